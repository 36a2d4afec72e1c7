//! Rendering of [`ScenarioReport`]s for machines (JSON) and people (text).

use crate::model::{RunStatus, ScenarioReport, StepResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// JSON summary with per-step results, plus derived `success_rate` and
/// `exit_code` fields. [`from_dict`] reads it back.
#[must_use]
pub fn to_dict(report: &ScenarioReport) -> Value {
    let mut value = serde_json::to_value(report).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert(
            "success_rate".to_string(),
            serde_json::json!(round_rate(report.success_rate())),
        );
        map.insert("exit_code".to_string(), exit_code(report).into());
    }
    value
}

pub fn from_dict(value: Value) -> Result<ScenarioReport, serde_json::Error> {
    serde_json::from_value(value)
}

/// `0` when no step failed, else `1`.
#[must_use]
pub fn exit_code(report: &ScenarioReport) -> i32 {
    i32::from(!report.success())
}

fn round_rate(rate: f64) -> f64 {
    (rate * 10.0).round() / 10.0
}

/// Compact pass/fail table followed by failure details and a success-rate line.
#[must_use]
pub fn to_text(report: &ScenarioReport) -> String {
    let name_width = report
        .steps
        .iter()
        .map(|step| step.step_name.chars().count())
        .max()
        .unwrap_or(0)
        .max(4);
    let index_width = report.declared.max(1).to_string().len().max(1);

    let mut out = String::new();
    let _ = writeln!(out, "scenario: {} (run {})", report.scenario_name, report.run_id);
    let _ = writeln!(
        out,
        "{:>index_width$}  {:<name_width$}  result  {:>4}  {:>6}",
        "#", "step", "http", "ms"
    );
    for step in &report.steps {
        let _ = writeln!(
            out,
            "{:>index_width$}  {:<name_width$}  {:<6}  {:>4}  {:>6}",
            step.index,
            step.step_name,
            result_label(step),
            step.http_status
                .map_or_else(|| "-".to_string(), |status| status.to_string()),
            step.elapsed_ms,
        );
        for failure in &step.failures {
            let _ = writeln!(out, "{:>index_width$}    - {failure}", "");
        }
    }

    let skipped = report.declared.saturating_sub(report.total);
    match report.status {
        RunStatus::Completed => {
            let _ = writeln!(out, "status: completed");
        }
        RunStatus::Aborted => {
            let _ = writeln!(out, "status: aborted ({skipped} step(s) not executed)");
        }
    }
    let _ = write!(
        out,
        "success rate: {}/{} ({:.1}%)",
        report.passed,
        report.total,
        report.success_rate()
    );
    out
}

fn result_label(step: &StepResult) -> &'static str {
    if step.passed {
        "PASS"
    } else {
        "FAIL"
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

impl ReportFormat {
    #[must_use]
    pub fn render(self, report: &ScenarioReport) -> String {
        match self {
            Self::Text => to_text(report),
            Self::Json => {
                let value = to_dict(report);
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown report format `{other}` (expected text or json)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FailureKind, RunId, StepFailure, StepId, StepStatus, REPORT_VERSION};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn step(index: usize, name: &str, failures: Vec<StepFailure>) -> StepResult {
        let passed = failures.is_empty();
        StepResult {
            step_id: StepId::new(),
            step_name: name.to_string(),
            index,
            status: if passed {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            },
            passed,
            http_status: Some(200),
            elapsed_ms: 12,
            attempts: 1,
            failures,
            captured_outputs: BTreeMap::new(),
        }
    }

    fn report() -> ScenarioReport {
        let now = Utc::now();
        ScenarioReport {
            report_version: REPORT_VERSION,
            run_id: RunId::new(),
            scenario_name: "placed cargo".to_string(),
            status: RunStatus::Aborted,
            total: 2,
            passed: 1,
            failed: 1,
            declared: 3,
            started_at: now,
            finished_at: now,
            duration_ms: 20,
            steps: vec![
                step(1, "operator login", Vec::new()),
                step(
                    2,
                    "placed cargo list",
                    vec![StepFailure::new(FailureKind::ValueMismatch, "boom")
                        .with_assertion("field_equals(items[0].status, \"placement_ready\")")],
                ),
            ],
        }
    }

    #[test]
    fn text_report_has_table_failures_and_rate() {
        let text = to_text(&report());
        assert!(text.contains("operator login"));
        assert!(text.contains("PASS"));
        assert!(text.contains("FAIL"));
        assert!(text.contains("value_mismatch [field_equals(items[0].status, \"placement_ready\")]: boom"));
        assert!(text.contains("status: aborted (1 step(s) not executed)"));
        assert!(text.ends_with("success rate: 1/2 (50.0%)"));
    }

    #[test]
    fn dict_carries_derived_fields() {
        let value = to_dict(&report());
        assert_eq!(value["exit_code"], 1);
        assert_eq!(value["success_rate"], 50.0);
        assert_eq!(value["steps"][1]["failures"][0]["kind"], "value_mismatch");
    }

    #[test]
    fn report_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("xml".parse::<ReportFormat>().is_err());
    }
}
