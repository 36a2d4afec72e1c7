use crate::assertions::path::JsonPath;
use crate::model::policy::RunPolicy;
use crate::model::scenario::{Action, Assertion, PolicyRef, Scenario};
use crate::model::MAX_REGEX_PATTERN_LEN;
use crate::runner::template::{references, value_references, TemplateError};
use crate::runner::{RunnerError, RunnerResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

pub fn load_scenario_file(path: &str) -> RunnerResult<Scenario> {
    let data = fs::read_to_string(path)
        .map_err(|err| RunnerError::io("E_IO", "failed to read scenario file", err))?;
    if path.ends_with(".yaml") || path.ends_with(".yml") {
        serde_yml::from_str(&data)
            .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to parse yaml", err))
    } else {
        serde_json::from_str(&data)
            .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to parse json", err))
    }
}

pub fn load_policy_ref(policy_ref: &PolicyRef) -> RunnerResult<RunPolicy> {
    match policy_ref {
        PolicyRef::Inline(policy) => Ok(policy.clone()),
        PolicyRef::File { path } => load_policy_file(Path::new(path)),
    }
}

pub fn load_policy_file(path: &Path) -> RunnerResult<RunPolicy> {
    let data = fs::read_to_string(path)
        .map_err(|err| RunnerError::io("E_IO", "failed to read policy file", err))?;
    serde_json::from_str(&data)
        .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to parse policy", err))
}

pub fn to_json_value<T: serde::Serialize>(value: &T) -> RunnerResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to serialize", err))
}

/// A problem found by [`validate_scenario`] without running anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// 1-based step position; `None` for scenario-level issues.
    pub step_index: Option<usize>,
    pub step_name: Option<String>,
    pub code: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.step_index, &self.step_name) {
            (Some(index), Some(name)) => {
                write!(f, "step {index} ({name}): [{}] {}", self.code, self.message)
            }
            _ => write!(f, "scenario: [{}] {}", self.code, self.message),
        }
    }
}

struct Issues {
    found: Vec<ValidationIssue>,
}

impl Issues {
    fn scenario(&mut self, code: &str, message: String) {
        self.found.push(ValidationIssue {
            step_index: None,
            step_name: None,
            code: code.to_string(),
            message,
        });
    }

    fn step(&mut self, index: usize, name: &str, code: &str, message: String) {
        self.found.push(ValidationIssue {
            step_index: Some(index),
            step_name: Some(name.to_string()),
            code: code.to_string(),
            message,
        });
    }
}

/// Check a scenario for authoring mistakes. An empty result means valid.
///
/// Template references must name a key captured by an earlier step; a key
/// captured only by a later step is reported as a forward reference.
#[must_use]
pub fn validate_scenario(scenario: &Scenario) -> Vec<ValidationIssue> {
    let mut issues = Issues { found: Vec::new() };

    let mut actor_names = HashSet::new();
    for actor in &scenario.actors {
        if !actor_names.insert(actor.name.as_str()) {
            issues.scenario(
                "duplicate_actor",
                format!("actor '{}' is declared more than once", actor.name),
            );
        }
        if actor.password.is_none() && actor.password_env.is_none() {
            issues.scenario(
                "missing_credentials",
                format!("actor '{}' has neither password nor password_env", actor.name),
            );
        }
    }

    // First step (1-based) that captures each key.
    let mut first_capture: BTreeMap<&str, usize> = BTreeMap::new();
    for (offset, step) in scenario.steps.iter().enumerate() {
        for key in step.capture.keys() {
            first_capture.entry(key.as_str()).or_insert(offset + 1);
        }
    }

    let mut step_names = HashSet::new();
    let mut logged_in: BTreeSet<&str> = BTreeSet::new();
    for (offset, step) in scenario.steps.iter().enumerate() {
        let index = offset + 1;
        let name = step.name.as_str();
        if !step_names.insert(name) {
            issues.step(
                index,
                name,
                "duplicate_step_name",
                format!("step name '{name}' is used more than once"),
            );
        }

        if let Some(actor) = step.action.actor() {
            if !actor_names.contains(actor) {
                issues.step(
                    index,
                    name,
                    "unknown_actor",
                    format!("actor '{actor}' is not declared"),
                );
            } else if matches!(step.action, Action::Request { .. }) && !logged_in.contains(actor) {
                issues.step(
                    index,
                    name,
                    "login_missing",
                    format!("actor '{actor}' has no earlier login step"),
                );
            }
        }
        if let Action::Login { actor, .. } = &step.action {
            logged_in.insert(actor.as_str());
        }

        if let Some(status) = step.expect_status {
            if !(100..=599).contains(&status) {
                issues.step(
                    index,
                    name,
                    "invalid_status",
                    format!("expect_status {status} is not an HTTP status code"),
                );
            }
        }

        match template_references(&step.action) {
            Ok(keys) => {
                for key in keys {
                    match first_capture.get(key.as_str()) {
                        Some(&captured_at) if captured_at < index => {}
                        Some(&captured_at) => issues.step(
                            index,
                            name,
                            "forward_reference",
                            format!("`{{{{{key}}}}}` is only captured by step {captured_at}"),
                        ),
                        None => issues.step(
                            index,
                            name,
                            "unknown_reference",
                            format!("`{{{{{key}}}}}` is never captured"),
                        ),
                    }
                }
            }
            Err(err) => issues.step(index, name, "invalid_template", err.to_string()),
        }

        for assertion in &step.assert {
            if let Err(err) = JsonPath::parse(assertion.path()) {
                issues.step(index, name, "invalid_path", err.to_string());
            }
            if let Assertion::FieldMatches { pattern, .. } = assertion {
                if let Some(reason) = pattern_problem(pattern) {
                    issues.step(index, name, "invalid_pattern", reason);
                }
            }
            if let Assertion::NoDuplicateValues { key: Some(key), .. } = assertion {
                if let Err(err) = JsonPath::parse(key) {
                    issues.step(index, name, "invalid_path", err.to_string());
                }
            }
        }
        for (key, path) in &step.capture {
            if let Err(err) = JsonPath::parse(path) {
                issues.step(
                    index,
                    name,
                    "invalid_path",
                    format!("capture '{key}': {err}"),
                );
            }
        }
    }
    issues.found
}

fn template_references(action: &Action) -> Result<Vec<String>, TemplateError> {
    match action {
        Action::Login { path, .. } => path.as_deref().map_or(Ok(Vec::new()), references),
        Action::Request { path, body, .. } => {
            let mut keys = references(path)?;
            if let Some(body) = body {
                keys.extend(value_references(body)?);
            }
            Ok(keys)
        }
    }
}

fn pattern_problem(pattern: &str) -> Option<String> {
    if pattern.len() > MAX_REGEX_PATTERN_LEN {
        return Some(format!("pattern exceeds {MAX_REGEX_PATTERN_LEN} characters"));
    }
    regex::Regex::new(pattern)
        .err()
        .map(|err| format!("invalid pattern /{pattern}/: {err}"))
}
