//! Declarative checks against parsed response bodies.
//!
//! Every check is pure: it reads the body and returns `Ok(())` or an
//! [`AssertionFailure`] describing the mismatch. The runner evaluates all
//! assertions of a step and keeps every failure, so one step reports every
//! mismatch at once.

pub mod path;

use crate::model::{
    Assertion, FailureKind, LengthPredicate, StepFailure, MAX_REGEX_PATTERN_LEN,
};
use path::{JsonPath, PathError};
use serde_json::Value;

pub use path::lookup;

/// Tolerance for comparing numbers when either side is a float.
pub const FLOAT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssertionFailure {
    #[error("field `{path}` is missing")]
    MissingField { path: String },
    #[error("field `{path}` is present but should be absent (value {actual})")]
    UnexpectedField { path: String, actual: Value },
    #[error("field `{path}`: expected {expected}, got {actual}")]
    ValueMismatch {
        path: String,
        expected: Value,
        actual: Value,
    },
    #[error("field `{path}`: {actual} is not one of {}", render_list(.allowed))]
    UnexpectedValue {
        path: String,
        actual: Value,
        allowed: Vec<Value>,
    },
    #[error("field `{path}`: length {actual} does not satisfy `{predicate}`")]
    LengthMismatch {
        path: String,
        actual: usize,
        predicate: LengthPredicate,
    },
    #[error("field `{path}`: duplicate value {value} at positions {first} and {second}")]
    DuplicateFound {
        path: String,
        value: Value,
        first: usize,
        second: usize,
    },
    #[error("field `{path}` is not a list (got {actual})")]
    NotAList { path: String, actual: Value },
    #[error("field `{path}`: {actual} does not match /{pattern}/")]
    PatternMismatch {
        path: String,
        pattern: String,
        actual: Value,
    },
    #[error("invalid pattern /{pattern}/: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error(transparent)]
    InvalidPath(#[from] PathError),
}

fn render_list(values: &[Value]) -> String {
    Value::Array(values.to_vec()).to_string()
}

impl AssertionFailure {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MissingField { .. } => FailureKind::MissingField,
            Self::UnexpectedField { .. } => FailureKind::UnexpectedField,
            Self::ValueMismatch { .. } => FailureKind::ValueMismatch,
            Self::UnexpectedValue { .. } => FailureKind::UnexpectedValue,
            Self::LengthMismatch { .. } => FailureKind::LengthMismatch,
            Self::DuplicateFound { .. } => FailureKind::DuplicateFound,
            Self::NotAList { .. } => FailureKind::NotAList,
            Self::PatternMismatch { .. } => FailureKind::PatternMismatch,
            Self::InvalidPattern { .. } => FailureKind::InvalidPattern,
            Self::InvalidPath(_) => FailureKind::InvalidPath,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::ValueMismatch {
                expected, actual, ..
            } => Some(serde_json::json!({"expected": expected, "actual": actual})),
            Self::UnexpectedValue {
                actual, allowed, ..
            } => Some(serde_json::json!({"actual": actual, "allowed": allowed})),
            Self::LengthMismatch {
                actual, predicate, ..
            } => Some(serde_json::json!({"actual": actual, "predicate": predicate})),
            Self::DuplicateFound {
                value,
                first,
                second,
                ..
            } => Some(serde_json::json!({"value": value, "positions": [first, second]})),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_failure(&self) -> StepFailure {
        let failure = StepFailure::new(self.kind(), self.to_string());
        match self.details() {
            Some(details) => failure.with_details(details),
            None => failure,
        }
    }
}

/// Evaluate one assertion against a response body.
pub fn evaluate(body: &Value, assertion: &Assertion) -> Result<(), AssertionFailure> {
    let path = JsonPath::parse(assertion.path())?;
    let resolved = path.resolve(body);

    if let Assertion::FieldAbsent { .. } = assertion {
        return match resolved {
            None => Ok(()),
            Some(actual) => Err(AssertionFailure::UnexpectedField {
                path: path.to_string(),
                actual: actual.clone(),
            }),
        };
    }

    let actual = resolved.ok_or_else(|| AssertionFailure::MissingField {
        path: assertion.path().to_string(),
    })?;

    match assertion {
        Assertion::FieldPresent { .. } | Assertion::FieldAbsent { .. } => Ok(()),
        Assertion::FieldEquals { expected, .. } => {
            if values_equal(expected, actual) {
                Ok(())
            } else {
                Err(AssertionFailure::ValueMismatch {
                    path: assertion.path().to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                })
            }
        }
        Assertion::FieldInSet { allowed, .. } => {
            if allowed.iter().any(|candidate| values_equal(candidate, actual)) {
                Ok(())
            } else {
                Err(AssertionFailure::UnexpectedValue {
                    path: assertion.path().to_string(),
                    actual: actual.clone(),
                    allowed: allowed.clone(),
                })
            }
        }
        Assertion::FieldMatches { pattern, .. } => {
            check_pattern(assertion.path(), pattern, actual)
        }
        Assertion::ListLength { predicate, .. } => {
            let items = as_list(assertion.path(), actual)?;
            if predicate.matches(items.len()) {
                Ok(())
            } else {
                Err(AssertionFailure::LengthMismatch {
                    path: assertion.path().to_string(),
                    actual: items.len(),
                    predicate: *predicate,
                })
            }
        }
        Assertion::NoDuplicateValues { key, .. } => {
            let items = as_list(assertion.path(), actual)?;
            check_unique(assertion.path(), items, key.as_deref())
        }
    }
}

impl Assertion {
    /// Evaluate and flatten to `(passed, reason)`; the reason is empty on success.
    #[must_use]
    pub fn check(&self, body: &Value) -> (bool, String) {
        match evaluate(body, self) {
            Ok(()) => (true, String::new()),
            Err(failure) => (false, failure.to_string()),
        }
    }
}

/// Evaluate every assertion and keep all failures, tagged with the assertion.
#[must_use]
pub fn evaluate_all(body: &Value, assertions: &[Assertion]) -> Vec<StepFailure> {
    assertions
        .iter()
        .filter_map(|assertion| {
            evaluate(body, assertion)
                .err()
                .map(|failure| failure.to_failure().with_assertion(assertion.to_string()))
        })
        .collect()
}

/// Structural equality where numbers compare within [`FLOAT_EPSILON`] as soon
/// as either side is a float.
#[must_use]
pub fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(left), Value::Number(right)) => {
            if left.is_f64() || right.is_f64() {
                match (left.as_f64(), right.as_f64()) {
                    (Some(l), Some(r)) => (l - r).abs() <= FLOAT_EPSILON,
                    _ => false,
                }
            } else {
                left == right
            }
        }
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .zip(right.iter())
                    .all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left.iter().all(|(key, l)| {
                    right
                        .get(key)
                        .map(|r| values_equal(l, r))
                        .unwrap_or(false)
                })
        }
        _ => expected == actual,
    }
}

fn as_list<'a>(path: &str, actual: &'a Value) -> Result<&'a Vec<Value>, AssertionFailure> {
    actual.as_array().ok_or_else(|| AssertionFailure::NotAList {
        path: path.to_string(),
        actual: actual.clone(),
    })
}

fn check_pattern(path: &str, pattern: &str, actual: &Value) -> Result<(), AssertionFailure> {
    if pattern.len() > MAX_REGEX_PATTERN_LEN {
        return Err(AssertionFailure::InvalidPattern {
            pattern: pattern.chars().take(40).collect(),
            reason: format!("pattern exceeds {MAX_REGEX_PATTERN_LEN} characters"),
        });
    }
    let regex = regex::Regex::new(pattern).map_err(|err| AssertionFailure::InvalidPattern {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })?;
    let text = match actual {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if regex.is_match(&text) {
        Ok(())
    } else {
        Err(AssertionFailure::PatternMismatch {
            path: path.to_string(),
            pattern: pattern.to_string(),
            actual: actual.clone(),
        })
    }
}

fn check_unique(path: &str, items: &[Value], key: Option<&str>) -> Result<(), AssertionFailure> {
    let key_path = key.map(JsonPath::parse).transpose()?;
    let mut seen: Vec<(usize, &Value)> = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let value = match &key_path {
            Some(key_path) => match key_path.resolve(item) {
                Some(value) => value,
                // Elements without the key cannot collide.
                None => continue,
            },
            None => item,
        };
        if let Some((first, _)) = seen
            .iter()
            .find(|(_, earlier)| values_equal(earlier, value))
        {
            let path = match key {
                Some(key) => format!("{path}[*].{key}"),
                None => path.to_string(),
            };
            return Err(AssertionFailure::DuplicateFound {
                path,
                value: value.clone(),
                first: *first,
                second: position,
            });
        }
        seen.push((position, value));
    }
    Ok(())
}

/// Constructors mirroring the assertion names used in scenario files.
pub fn field_present(path: impl Into<String>) -> Assertion {
    Assertion::FieldPresent { path: path.into() }
}

pub fn field_absent(path: impl Into<String>) -> Assertion {
    Assertion::FieldAbsent { path: path.into() }
}

pub fn field_equals(path: impl Into<String>, expected: impl Into<Value>) -> Assertion {
    Assertion::FieldEquals {
        path: path.into(),
        expected: expected.into(),
    }
}

pub fn field_in_set<V: Into<Value>>(
    path: impl Into<String>,
    allowed: impl IntoIterator<Item = V>,
) -> Assertion {
    Assertion::FieldInSet {
        path: path.into(),
        allowed: allowed.into_iter().map(Into::into).collect(),
    }
}

pub fn field_matches(path: impl Into<String>, pattern: impl Into<String>) -> Assertion {
    Assertion::FieldMatches {
        path: path.into(),
        pattern: pattern.into(),
    }
}

pub fn list_length(path: impl Into<String>, predicate: LengthPredicate) -> Assertion {
    Assertion::ListLength {
        path: path.into(),
        predicate,
    }
}

pub fn no_duplicate_values(path: impl Into<String>) -> Assertion {
    Assertion::NoDuplicateValues {
        path: path.into(),
        key: None,
    }
}

pub fn no_duplicate_values_by(path: impl Into<String>, key: impl Into<String>) -> Assertion {
    Assertion::NoDuplicateValues {
        path: path.into(),
        key: Some(key.into()),
    }
}
