//! Verbose progress output using indicatif.

use apiprobe::model::StepStatus;
use apiprobe::runner::{ProgressCallback, ProgressEvent};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::Mutex;

/// Step-by-step progress on stderr, leaving stdout to the report.
pub struct VerboseProgress {
    spinner: Mutex<Option<ProgressBar>>,
    total_steps: Mutex<usize>,
    color: bool,
}

impl VerboseProgress {
    pub fn new(color: bool) -> Self {
        Self {
            spinner: Mutex::new(None),
            total_steps: Mutex::new(0),
            color,
        }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }
}

impl ProgressCallback for VerboseProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                run_id,
                scenario_name,
                total_steps,
            } => {
                if let Ok(mut total) = self.total_steps.lock() {
                    *total = *total_steps;
                }
                let _ = writeln!(
                    std::io::stderr(),
                    "run started: {scenario_name} [{run_id}] ({total_steps} steps)"
                );
            }
            ProgressEvent::StepStarted {
                step_index, name, ..
            } => {
                let total = self.total_steps.lock().map(|g| *g).unwrap_or(0);
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb.set_message(format!("[{step_index}/{total}] {name}"));
                pb.enable_steady_tick(std::time::Duration::from_millis(100));

                if let Ok(mut spinner) = self.spinner.lock() {
                    *spinner = Some(pb);
                }
            }
            ProgressEvent::StepCompleted {
                step_index,
                name,
                status,
                http_status,
                duration_ms,
                failures,
                ..
            } => {
                if let Ok(mut spinner) = self.spinner.lock() {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                }

                let icon = match status {
                    StepStatus::Passed => self.paint("32", "✓"),
                    StepStatus::Failed => self.paint("31", "✗"),
                };
                let http = http_status.map_or_else(|| "no response".to_string(), |s| format!("HTTP {s}"));
                let _ = writeln!(
                    std::io::stderr(),
                    "  {icon} {step_index}. {name} ({http}, {duration_ms}ms)"
                );
                for failure in failures {
                    let _ = writeln!(std::io::stderr(), "      - {failure}");
                }
            }
            ProgressEvent::RunCompleted {
                success,
                passed,
                failed,
                duration_ms,
                ..
            } => {
                let status_msg = if *success {
                    self.paint("32", "passed")
                } else {
                    self.paint("31", "failed")
                };
                let _ = writeln!(
                    std::io::stderr(),
                    "run {status_msg}: {passed} passed, {failed} failed, {duration_ms}ms total"
                );
            }
        }
    }
}
