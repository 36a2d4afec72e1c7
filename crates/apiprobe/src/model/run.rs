use crate::model::{RunId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const REPORT_VERSION: u32 = 1;

/// Terminal state of a run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every declared step was executed.
    Completed,
    /// A failing step stopped the run under `stop_on_first_failure`.
    Aborted,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
}

/// Classification of a single step failure.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NetworkError,
    AuthNotReady,
    AuthFailed,
    UnknownActor,
    UnresolvedReference,
    InvalidTemplate,
    StatusMismatch,
    MissingField,
    ValueMismatch,
    UnexpectedValue,
    UnexpectedField,
    LengthMismatch,
    DuplicateFound,
    NotAList,
    PatternMismatch,
    InvalidPattern,
    InvalidPath,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkError => "network_error",
            Self::AuthNotReady => "auth_not_ready",
            Self::AuthFailed => "auth_failed",
            Self::UnknownActor => "unknown_actor",
            Self::UnresolvedReference => "unresolved_reference",
            Self::InvalidTemplate => "invalid_template",
            Self::StatusMismatch => "status_mismatch",
            Self::MissingField => "missing_field",
            Self::ValueMismatch => "value_mismatch",
            Self::UnexpectedValue => "unexpected_value",
            Self::UnexpectedField => "unexpected_field",
            Self::LengthMismatch => "length_mismatch",
            Self::DuplicateFound => "duplicate_found",
            Self::NotAList => "not_a_list",
            Self::PatternMismatch => "pattern_mismatch",
            Self::InvalidPattern => "invalid_pattern",
            Self::InvalidPath => "invalid_path",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reason a step did not pass.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
    /// The assertion (or capture) that produced this failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<String>,
    /// Structured detail such as `{"expected": .., "actual": ..}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            assertion: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_assertion(mut self, assertion: impl Into<String>) -> Self {
        self.assertion = Some(assertion.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.assertion {
            Some(assertion) => write!(f, "{} [{assertion}]: {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub step_name: String,
    /// 1-based position in the scenario.
    pub index: usize,
    pub status: StepStatus,
    pub passed: bool,
    pub http_status: Option<u16>,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub failures: Vec<StepFailure>,
    #[serde(default)]
    pub captured_outputs: BTreeMap<String, Value>,
}

/// Aggregate of one scenario run.
///
/// `total` counts executed steps, so `passed + failed == total` always holds;
/// `declared` is the number of steps in the scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub report_version: u32,
    pub run_id: RunId,
    pub scenario_name: String,
    pub status: RunStatus,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub declared: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
}

impl ScenarioReport {
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|step| step.step_name == name)
    }

    /// Passed steps as a percentage of executed steps; 100 for an empty run.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.passed as f64 * 100.0 / self.total as f64;
        rate
    }
}

/// Serializable form of a setup error, emitted by the CLI with `--json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}
