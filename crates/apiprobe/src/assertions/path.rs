//! Dotted/bracket paths into JSON values: `items[0].cargo_number`,
//! `pagination.total`, `[0].id`, `items[-1]`.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    /// Negative indices count from the end.
    Index(i64),
}

/// A parsed path. The empty path addresses the whole document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path `{path}`: {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String,
}

impl JsonPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let err = |reason: &str| PathError {
            path: raw.to_string(),
            reason: reason.to_string(),
        };
        let mut segments = Vec::new();
        let mut chars = raw.trim().chars().peekable();
        let mut key = String::new();
        // Set after `]` so that `a[0]b` is rejected but `a[0].b` and `a[0][1]` are not.
        let mut after_index = false;

        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if key.is_empty() && !after_index {
                        return Err(err("empty key"));
                    }
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    after_index = false;
                    if chars.peek().is_none() {
                        return Err(err("trailing '.'"));
                    }
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    let mut digits = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == ']' {
                            closed = true;
                            break;
                        }
                        digits.push(inner);
                    }
                    if !closed {
                        return Err(err("unterminated '['"));
                    }
                    let index = digits
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| err("index must be an integer"))?;
                    segments.push(Segment::Index(index));
                    after_index = true;
                }
                ']' => return Err(err("unexpected ']'")),
                other => {
                    if after_index {
                        return Err(err("expected '.' or '[' after index"));
                    }
                    key.push(other);
                }
            }
        }
        if !key.is_empty() {
            segments.push(Segment::Key(key));
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Walk the path. `None` when any segment does not resolve.
    #[must_use]
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |current, segment| match segment {
                Segment::Key(key) => current.as_object()?.get(key),
                Segment::Index(index) => {
                    let items = current.as_array()?;
                    let position = if *index < 0 {
                        let back = usize::try_from(index.unsigned_abs()).ok()?;
                        items.len().checked_sub(back)?
                    } else {
                        usize::try_from(*index).ok()?
                    };
                    items.get(position)
                }
            })
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if position == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Parse and resolve in one step.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Result<Option<&'a Value>, PathError> {
    Ok(JsonPath::parse(path)?.resolve(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_keys_and_indices() {
        let path = JsonPath::parse("items[0].cargo_number").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("items".to_string()),
                Segment::Index(0),
                Segment::Key("cargo_number".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "items[0].cargo_number");
        assert!(JsonPath::parse("").unwrap().is_root());
        assert_eq!(
            JsonPath::parse("[1][2]").unwrap().segments(),
            &[Segment::Index(1), Segment::Index(2)]
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["a..b", "a.", "a[0", "a[x]", "a]", "a[0]b", ".a"] {
            assert!(JsonPath::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn resolves_nested_values() {
        let body = json!({
            "items": [{"cargo_number": "100008/01"}, {"cargo_number": "100008/02"}],
            "pagination": {"total": 2}
        });
        assert_eq!(
            lookup(&body, "items[1].cargo_number").unwrap(),
            Some(&json!("100008/02"))
        );
        assert_eq!(
            lookup(&body, "items[-1].cargo_number").unwrap(),
            Some(&json!("100008/02"))
        );
        assert_eq!(lookup(&body, "pagination.total").unwrap(), Some(&json!(2)));
        assert_eq!(lookup(&body, "items[2]").unwrap(), None);
        assert_eq!(lookup(&body, "items[-3]").unwrap(), None);
        assert_eq!(lookup(&body, "pagination.total.value").unwrap(), None);
        assert_eq!(lookup(&body, "").unwrap(), Some(&body));
    }
}
