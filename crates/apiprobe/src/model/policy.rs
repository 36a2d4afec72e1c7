use serde::{Deserialize, Serialize};

/// Current run policy format version.
pub const POLICY_VERSION: u32 = 1;

/// Per-call timeout used when a policy does not override it.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Login endpoint used when neither the policy nor the step names one.
pub const DEFAULT_LOGIN_PATH: &str = "/api/auth/login";

/// What the runner does after a step fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Stop at the first failing step; the run ends `aborted`.
    #[default]
    StopOnFirstFailure,
    /// Execute every step regardless of earlier failures.
    Continue,
}

/// Execution policy for one scenario run.
///
/// Every field has a default, so `{}` is a valid policy. Unknown fields are
/// rejected so a typo does not silently fall back to a default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunPolicy {
    /// Policy format version for compatibility checking.
    pub policy_version: u32,
    /// Continue or stop after a failing step.
    pub abort: AbortPolicy,
    /// Timeout for each HTTP call, in milliseconds.
    pub timeout_ms: u64,
    /// Extra attempts for connection failures. Timeouts and HTTP error
    /// statuses are never retried.
    pub retries: u32,
    /// Fixed delay between retry attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Upper bound on the number of steps a scenario may declare.
    pub max_steps: u64,
    /// Default login endpoint for `login` steps.
    pub login_path: String,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            policy_version: POLICY_VERSION,
            abort: AbortPolicy::StopOnFirstFailure,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: 0,
            retry_backoff_ms: 500,
            max_steps: 10_000,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }
}

impl RunPolicy {
    #[must_use]
    pub fn continue_on_failure(mut self) -> Self {
        self.abort = AbortPolicy::Continue;
        self
    }

    #[must_use]
    pub fn stops_on_failure(&self) -> bool {
        self.abort == AbortPolicy::StopOnFirstFailure
    }
}
