//! `{{key}}` placeholders in step paths and bodies.
//!
//! A placeholder names a context key, optionally followed by a path into the
//! captured value: `{{cargo_id}}`, `{{cargo.items[0].id}}`. A body string
//! that consists of exactly one placeholder is replaced by the captured value
//! itself, so numbers and objects keep their JSON type.

use crate::assertions::path::JsonPath;
use crate::model::{FailureKind, StepFailure};
use serde_json::Value;
use std::collections::BTreeMap;

/// Values captured by earlier steps of one run.
pub type Context = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unresolved reference: {key}")]
    UnresolvedReference { key: String },
    #[error("malformed placeholder in `{template}`: {reason}")]
    Malformed { template: String, reason: String },
}

impl TemplateError {
    #[must_use]
    pub fn to_failure(&self) -> StepFailure {
        match self {
            Self::UnresolvedReference { key } => {
                StepFailure::new(FailureKind::UnresolvedReference, self.to_string())
                    .with_details(serde_json::json!({"key": key}))
            }
            Self::Malformed { .. } => StepFailure::new(FailureKind::InvalidTemplate, self.to_string()),
        }
    }
}

enum Piece<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn split(template: &str) -> Result<Vec<Piece<'_>>, TemplateError> {
    let mut pieces = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let (text, after_open) = rest.split_at(start);
        if !text.is_empty() {
            pieces.push(Piece::Text(text));
        }
        let inner_and_rest = after_open.get(2..).unwrap_or_default();
        let end = inner_and_rest
            .find("}}")
            .ok_or_else(|| TemplateError::Malformed {
                template: template.to_string(),
                reason: "missing closing `}}`".to_string(),
            })?;
        let (inner, tail) = inner_and_rest.split_at(end);
        let reference = inner.trim();
        if reference.is_empty() {
            return Err(TemplateError::Malformed {
                template: template.to_string(),
                reason: "empty placeholder".to_string(),
            });
        }
        pieces.push(Piece::Placeholder(reference));
        rest = tail.get(2..).unwrap_or_default();
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(pieces)
}

/// Context key named by a reference: everything before the first `.` or `[`.
fn root_key(reference: &str) -> &str {
    reference
        .find(['.', '['])
        .and_then(|position| reference.get(..position))
        .unwrap_or(reference)
}

fn lookup<'a>(reference: &str, context: &'a Context) -> Result<&'a Value, TemplateError> {
    let unresolved = || TemplateError::UnresolvedReference {
        key: reference.to_string(),
    };
    let key = root_key(reference);
    let value = context.get(key).ok_or_else(unresolved)?;
    let sub_path = reference.get(key.len()..).unwrap_or_default();
    if sub_path.is_empty() {
        return Ok(value);
    }
    let sub_path = sub_path.strip_prefix('.').unwrap_or(sub_path);
    let path = JsonPath::parse(sub_path).map_err(|err| TemplateError::Malformed {
        template: reference.to_string(),
        reason: err.reason,
    })?;
    path.resolve(value).ok_or_else(unresolved)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Substitute every placeholder in a string.
pub fn resolve_str(template: &str, context: &Context) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    for piece in split(template)? {
        match piece {
            Piece::Text(text) => output.push_str(text),
            Piece::Placeholder(reference) => {
                output.push_str(&render_scalar(lookup(reference, context)?));
            }
        }
    }
    Ok(output)
}

/// Substitute placeholders in every string of a JSON document (keys included).
pub fn resolve_value(template: &Value, context: &Context) -> Result<Value, TemplateError> {
    match template {
        Value::String(text) => {
            let pieces = split(text)?;
            if let [Piece::Placeholder(reference)] = pieces.as_slice() {
                return lookup(reference, context).cloned();
            }
            resolve_str(text, context).map(Value::String)
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                resolved.insert(resolve_str(key, context)?, resolve_value(value, context)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Context keys a string template refers to, in order of appearance.
pub fn references(template: &str) -> Result<Vec<String>, TemplateError> {
    Ok(split(template)?
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Placeholder(reference) => Some(root_key(reference).to_string()),
            Piece::Text(_) => None,
        })
        .collect())
}

/// Context keys referenced anywhere inside a JSON template.
pub fn value_references(template: &Value) -> Result<Vec<String>, TemplateError> {
    let mut keys = Vec::new();
    collect_references(template, &mut keys)?;
    Ok(keys)
}

fn collect_references(template: &Value, keys: &mut Vec<String>) -> Result<(), TemplateError> {
    match template {
        Value::String(text) => keys.extend(references(text)?),
        Value::Array(items) => {
            for item in items {
                collect_references(item, keys)?;
            }
        }
        Value::Object(map) => {
            for (key, value) in map {
                keys.extend(references(key)?);
                collect_references(value, keys)?;
            }
        }
        _ => {}
    }
    Ok(())
}
