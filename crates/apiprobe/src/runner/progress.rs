//! Progress callback for reporting run progress.

use crate::model::{RunId, StepFailure, StepId, StepStatus};

/// Event emitted while a scenario executes.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RunStarted {
        run_id: RunId,
        scenario_name: String,
        total_steps: usize,
    },
    StepStarted {
        step_id: StepId,
        /// 1-based.
        step_index: usize,
        name: String,
    },
    StepCompleted {
        step_id: StepId,
        step_index: usize,
        name: String,
        status: StepStatus,
        http_status: Option<u16>,
        duration_ms: u64,
        failures: Vec<StepFailure>,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        passed: usize,
        failed: usize,
        duration_ms: u64,
    },
}

/// Receives progress events during execution.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Collects events for assertions in tests.
#[cfg(test)]
#[derive(Default)]
pub struct CollectingProgress {
    events: std::sync::Mutex<Vec<ProgressEvent>>,
}

#[cfg(test)]
impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("progress mutex poisoned").clone()
    }
}

#[cfg(test)]
impl ProgressCallback for CollectingProgress {
    #[allow(clippy::expect_used)]
    fn on_progress(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .expect("progress mutex poisoned")
            .push(event.clone());
    }
}
