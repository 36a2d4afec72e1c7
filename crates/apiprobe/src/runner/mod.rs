pub mod progress;
pub mod template;

use crate::artifacts::{ArtifactsWriter, ArtifactsWriterConfig, ExchangeRecord, REDACTED};
use crate::assertions::{evaluate_all, lookup, AssertionFailure};
use crate::http::{join_url, ClientConfig, HttpClient, HttpMethod, HttpResponse, NetworkError};
use crate::model::{
    Action, Actor, ErrorInfo, FailureKind, RunId, RunPolicy, RunStatus, Scenario, ScenarioReport,
    Step, StepFailure, StepResult, StepStatus, BASE_URL_ENV, POLICY_VERSION, REPORT_VERSION,
};
use crate::scenario::{load_policy_ref, validate_scenario};
use crate::session::{json_headers, SessionContext};
use chrono::Utc;
use miette::Diagnostic;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use template::{resolve_str, resolve_value, Context};
use tracing::{debug, info, warn};

pub use progress::{ProgressCallback, ProgressEvent};

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Stable error codes for setup failures, with their process exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Protocol,
    Config,
    CliInvalidArg,
    Io,
    Budget,
    Internal,
}

impl ErrorCode {
    pub const ALL: [Self; 6] = [
        Self::Protocol,
        Self::Config,
        Self::CliInvalidArg,
        Self::Io,
        Self::Budget,
        Self::Internal,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "E_PROTOCOL",
            Self::Config => "E_CONFIG",
            Self::CliInvalidArg => "E_CLI_INVALID_ARG",
            Self::Io => "E_IO",
            Self::Budget => "E_BUDGET",
            Self::Internal => "E_INTERNAL",
        }
    }

    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == code)
    }

    /// Exit code; 0 and 1 are reserved for passed and failed reports.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Protocol | Self::Config | Self::CliInvalidArg => 2,
            Self::Io => 3,
            Self::Budget => 4,
            Self::Internal => 5,
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Protocol => "scenario or policy could not be parsed or has an unsupported version",
            Self::Config => "run configuration is incomplete or invalid (base URL, policy values)",
            Self::CliInvalidArg => "command-line arguments are inconsistent",
            Self::Io => "a file could not be read or written",
            Self::Budget => "scenario exceeds the policy's max_steps budget",
            Self::Internal => "unexpected internal failure",
        }
    }
}

/// A failure that prevents a run from starting.
///
/// Failures of individual steps never surface here; they are recorded in the
/// [`ScenarioReport`].
#[derive(Debug)]
pub struct RunnerError {
    pub code: String,
    pub message: String,
    pub context: Option<Value>,
}

impl RunnerError {
    pub fn protocol(
        code: impl Into<String>,
        message: impl Into<String>,
        context: impl Into<Option<Value>>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn config(
        code: impl Into<String>,
        message: impl Into<String>,
        context: impl Into<Option<Value>>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn budget(
        code: impl Into<String>,
        message: impl Into<String>,
        context: impl Into<Option<Value>>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn io(
        code: impl Into<String>,
        message: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: Some(serde_json::json!({ "source": err.to_string() })),
        }
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn cli_invalid_arg(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::CliInvalidArg.as_str().to_string(),
            message: message.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        ErrorCode::parse(&self.code).map_or(1, ErrorCode::exit_code)
    }

    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.clone(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RunnerError {}

impl Diagnostic for RunnerError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(&self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        ErrorCode::parse(&self.code)
            .map(|code| Box::new(code.description()) as Box<dyn fmt::Display + 'a>)
    }
}

#[derive(Clone, Default)]
pub struct RunnerOptions {
    /// Overrides `APIPROBE_BASE_URL` and the scenario's `run.base_url`.
    pub base_url: Option<String>,
    pub artifacts: Option<ArtifactsWriterConfig>,
    pub progress: Option<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for RunnerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerOptions")
            .field("base_url", &self.base_url)
            .field("artifacts", &self.artifacts)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Lifecycle of a [`ScenarioRunner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Aborted,
}

/// Executes steps strictly in order against one base URL.
///
/// The capture context and actor sessions live only for the duration of one
/// [`ScenarioRunner::run`] call; every run starts empty.
pub struct ScenarioRunner {
    client: HttpClient,
    base_url: String,
    policy: RunPolicy,
    actors: BTreeMap<String, Actor>,
    progress: Option<Arc<dyn ProgressCallback>>,
    artifacts: Option<ArtifactsWriter>,
    state: RunState,
}

/// Everything needed to judge one HTTP exchange.
struct Exchange {
    method: HttpMethod,
    url: String,
    request_body: Option<Value>,
    result: Result<HttpResponse, NetworkError>,
    /// Set for login steps: whether a token was stored.
    authenticated: Option<bool>,
}

#[derive(Default)]
struct StepOutcome {
    http_status: Option<u16>,
    elapsed_ms: Option<u64>,
    attempts: u32,
    failures: Vec<StepFailure>,
    captured: BTreeMap<String, Value>,
}

impl ScenarioRunner {
    pub fn new(client: HttpClient, base_url: impl Into<String>, policy: RunPolicy) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            policy,
            actors: BTreeMap::new(),
            progress: None,
            artifacts: None,
            state: RunState::Pending,
        }
    }

    #[must_use]
    pub fn with_actors(mut self, actors: impl IntoIterator<Item = Actor>) -> Self {
        self.actors
            .extend(actors.into_iter().map(|actor| (actor.name.clone(), actor)));
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, writer: ArtifactsWriter) -> Self {
        self.artifacts = Some(writer);
        self
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    /// Execute `steps` and aggregate their results. Never fails: every error
    /// is recorded as a failure of the step that hit it.
    pub fn run(&mut self, scenario_name: &str, steps: &[Step]) -> ScenarioReport {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let run_started = Instant::now();
        self.state = RunState::Running;
        info!(%run_id, scenario = scenario_name, steps = steps.len(), base_url = %self.base_url, "run started");
        self.emit(ProgressEvent::RunStarted {
            run_id,
            scenario_name: scenario_name.to_string(),
            total_steps: steps.len(),
        });

        let mut context = Context::new();
        let mut sessions = SessionContext::new();
        let mut results = Vec::with_capacity(steps.len());
        let mut aborted = false;

        for (offset, step) in steps.iter().enumerate() {
            let index = offset + 1;
            self.emit(ProgressEvent::StepStarted {
                step_id: step.id,
                step_index: index,
                name: step.name.clone(),
            });
            let step_started = Instant::now();
            let outcome = self.execute_step(step, index, &context, &mut sessions);
            let elapsed_ms = outcome
                .elapsed_ms
                .unwrap_or_else(|| elapsed_ms(&step_started));
            let passed = outcome.failures.is_empty();
            let status = if passed {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            };

            if passed {
                info!(step = index, name = %step.name, http_status = ?outcome.http_status, elapsed_ms, "step passed");
            } else {
                for failure in &outcome.failures {
                    warn!(step = index, name = %step.name, kind = %failure.kind, "{}", failure.message);
                }
            }

            // Visible to later steps only.
            context.extend(outcome.captured.clone());

            self.emit(ProgressEvent::StepCompleted {
                step_id: step.id,
                step_index: index,
                name: step.name.clone(),
                status,
                http_status: outcome.http_status,
                duration_ms: elapsed_ms,
                failures: outcome.failures.clone(),
            });
            results.push(StepResult {
                step_id: step.id,
                step_name: step.name.clone(),
                index,
                status,
                passed,
                http_status: outcome.http_status,
                elapsed_ms,
                attempts: outcome.attempts,
                failures: outcome.failures,
                captured_outputs: outcome.captured,
            });

            if !passed && self.policy.stops_on_failure() {
                aborted = true;
                info!(step = index, remaining = steps.len() - index, "stopping after failed step");
                break;
            }
        }

        let passed = results.iter().filter(|result| result.passed).count();
        let total = results.len();
        let report = ScenarioReport {
            report_version: REPORT_VERSION,
            run_id,
            scenario_name: scenario_name.to_string(),
            status: if aborted {
                RunStatus::Aborted
            } else {
                RunStatus::Completed
            },
            total,
            passed,
            failed: total - passed,
            declared: steps.len(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed_ms(&run_started),
            steps: results,
        };
        self.state = if aborted {
            RunState::Aborted
        } else {
            RunState::Completed
        };
        info!(%run_id, passed = report.passed, failed = report.failed, status = ?report.status, "run finished");
        self.emit(ProgressEvent::RunCompleted {
            run_id,
            success: report.success(),
            passed: report.passed,
            failed: report.failed,
            duration_ms: report.duration_ms,
        });

        if let Some(writer) = self.artifacts.as_mut() {
            if let Err(err) = writer.write_report(&report) {
                warn!(error = %err, "failed to write report artifact");
            }
        }
        report
    }

    fn execute_step(
        &mut self,
        step: &Step,
        index: usize,
        context: &Context,
        sessions: &mut SessionContext,
    ) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        let prepared = match &step.action {
            Action::Login { actor, path } => {
                self.login(actor, path.as_deref(), context, sessions)
            }
            Action::Request {
                method,
                path,
                body,
                actor,
            } => self.request(*method, path, body.as_ref(), actor.as_deref(), context, sessions),
        };
        let exchange = match prepared {
            Ok(exchange) => exchange,
            Err(failure) => {
                outcome.failures.push(failure);
                return outcome;
            }
        };
        self.record_exchange(index, step, &exchange);

        let response = match exchange.result {
            Ok(response) => response,
            Err(err) => {
                outcome.attempts = err.attempts;
                outcome.failures.push(err.to_failure());
                return outcome;
            }
        };
        outcome.http_status = Some(response.status);
        outcome.elapsed_ms = Some(response.elapsed_ms);
        outcome.attempts = response.attempts;

        if let Some(failure) = check_status(step.expect_status, response.status) {
            outcome.failures.push(failure);
        }
        if let (Action::Login { actor, .. }, Some(authenticated)) =
            (&step.action, exchange.authenticated)
        {
            outcome.failures.extend(self.check_login(
                actor,
                step.expect_status,
                &response,
                authenticated,
                sessions,
            ));
        }

        let body = response.body.as_value();
        outcome.failures.extend(evaluate_all(&body, &step.assert));
        for (key, path) in &step.capture {
            match lookup(&body, path) {
                Ok(Some(value)) => {
                    debug!(step = index, key = %key, "captured value");
                    outcome.captured.insert(key.clone(), value.clone());
                }
                Ok(None) => outcome.failures.push(
                    AssertionFailure::MissingField { path: path.clone() }
                        .to_failure()
                        .with_assertion(format!("capture({key})")),
                ),
                Err(err) => outcome.failures.push(
                    AssertionFailure::from(err)
                        .to_failure()
                        .with_assertion(format!("capture({key})")),
                ),
            }
        }
        outcome
    }

    fn login(
        &self,
        actor: &str,
        path: Option<&str>,
        context: &Context,
        sessions: &mut SessionContext,
    ) -> Result<Exchange, StepFailure> {
        let declared = self
            .actors
            .get(actor)
            .ok_or_else(|| unknown_actor(actor))?;
        let credentials = match declared.credentials() {
            Ok(credentials) => credentials,
            Err(err) => {
                sessions.logout(actor);
                return Err(StepFailure::new(FailureKind::AuthFailed, err.to_string()));
            }
        };
        let path = resolve_str(path.unwrap_or(&self.policy.login_path), context)
            .map_err(|err| err.to_failure())?;
        let url = join_url(&self.base_url, &path);
        let request_body = serde_json::json!({
            "phone": credentials.phone,
            "password": REDACTED,
        });
        let (authenticated, result) =
            match sessions.login_exchange(&self.client, actor, &url, &credentials, self.timeout()) {
                Ok((authenticated, response)) => (Some(authenticated), Ok(response)),
                Err(err) => (None, Err(err)),
            };
        Ok(Exchange {
            method: HttpMethod::Post,
            url,
            request_body: Some(request_body),
            result,
            authenticated,
        })
    }

    fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
        actor: Option<&str>,
        context: &Context,
        sessions: &SessionContext,
    ) -> Result<Exchange, StepFailure> {
        let path = resolve_str(path, context).map_err(|err| err.to_failure())?;
        let body = body
            .map(|body| resolve_value(body, context))
            .transpose()
            .map_err(|err| err.to_failure())?;
        let headers = match actor {
            Some(actor) if !self.actors.contains_key(actor) => return Err(unknown_actor(actor)),
            Some(actor) => sessions
                .headers_for(actor)
                .map_err(|err| err.to_failure())?,
            None => json_headers(),
        };
        let url = join_url(&self.base_url, &path);
        let result = self
            .client
            .send(method, &url, body.as_ref(), &headers, self.timeout());
        Ok(Exchange {
            method,
            url,
            request_body: body,
            result,
            authenticated: None,
        })
    }

    /// Failures specific to login steps: no token where one was expected, or
    /// a role that differs from the actor's `role_label`.
    fn check_login(
        &self,
        actor: &str,
        expect_status: Option<u16>,
        response: &HttpResponse,
        authenticated: bool,
        sessions: &SessionContext,
    ) -> Vec<StepFailure> {
        let mut failures = Vec::new();
        let expects_success = match expect_status {
            Some(status) => (200..300).contains(&status),
            None => true,
        };
        if !authenticated {
            if expects_success {
                failures.push(StepFailure::new(
                    FailureKind::AuthFailed,
                    format!(
                        "login for actor '{actor}' returned no access_token (HTTP {})",
                        response.status
                    ),
                ));
            }
            return failures;
        }
        let expected_role = self
            .actors
            .get(actor)
            .and_then(|declared| declared.role_label.as_deref());
        if let (Some(expected), Some(session)) = (expected_role, sessions.session(actor)) {
            if session.role.as_deref() != Some(expected) {
                failures.push(
                    AssertionFailure::ValueMismatch {
                        path: "user.role".to_string(),
                        expected: Value::String(expected.to_string()),
                        actual: session.role.clone().map_or(Value::Null, Value::String),
                    }
                    .to_failure()
                    .with_assertion("role_label"),
                );
            }
        }
        failures
    }

    fn record_exchange(&mut self, index: usize, step: &Step, exchange: &Exchange) {
        let Some(writer) = self.artifacts.as_mut() else {
            return;
        };
        let (status, elapsed_ms, attempts, response_body, error) = match &exchange.result {
            Ok(response) => (
                Some(response.status),
                response.elapsed_ms,
                response.attempts,
                Some(response.body.clone()),
                None,
            ),
            Err(err) => (None, 0, err.attempts, None, Some(err.to_string())),
        };
        let record = ExchangeRecord {
            step_index: index,
            step_name: step.name.clone(),
            method: exchange.method,
            url: exchange.url.clone(),
            request_body: exchange.request_body.clone(),
            status,
            elapsed_ms,
            attempts,
            response_body,
            error,
        };
        if let Err(err) = writer.write_exchange(&record) {
            warn!(step = index, error = %err, "failed to write exchange artifact");
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.policy.timeout_ms)
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress.on_progress(&event);
        }
    }
}

fn unknown_actor(actor: &str) -> StepFailure {
    StepFailure::new(
        FailureKind::UnknownActor,
        format!("actor '{actor}' is not declared in the scenario"),
    )
}

/// Compare the response status with the step's expectation; any 2xx passes
/// when the step does not name one.
fn check_status(expected: Option<u16>, actual: u16) -> Option<StepFailure> {
    let (passed, message) = match expected {
        Some(expected) => (
            expected == actual,
            format!("expected HTTP {expected}, got {actual}"),
        ),
        None => (
            (200..300).contains(&actual),
            format!("expected a 2xx status, got {actual}"),
        ),
    };
    if passed {
        return None;
    }
    Some(
        StepFailure::new(FailureKind::StatusMismatch, message)
            .with_details(serde_json::json!({"expected": expected, "actual": actual})),
    )
}

/// Build the HTTP client a policy asks for.
pub fn client_for(policy: &RunPolicy) -> RunnerResult<HttpClient> {
    HttpClient::new(ClientConfig {
        retries: policy.retries,
        retry_backoff: Duration::from_millis(policy.retry_backoff_ms),
        ..ClientConfig::default()
    })
    .map_err(|err| RunnerError::internal("E_INTERNAL", format!("failed to build HTTP client: {err}")))
}

/// Pick the base URL: explicit value, then `APIPROBE_BASE_URL`, then the
/// scenario file.
pub fn resolve_base_url(explicit: Option<&str>, scenario: Option<&str>) -> RunnerResult<String> {
    let from_env = std::env::var(BASE_URL_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty());
    let base_url = explicit
        .map(str::to_string)
        .or(from_env)
        .or_else(|| scenario.map(str::to_string))
        .ok_or_else(|| {
            RunnerError::config(
                "E_CONFIG",
                format!(
                    "no base URL: pass --base-url, set {BASE_URL_ENV}, or set run.base_url in the scenario"
                ),
                None,
            )
        })?;
    let parsed = reqwest::Url::parse(&base_url).map_err(|err| {
        RunnerError::config(
            "E_CONFIG",
            "base URL is not an absolute URL",
            serde_json::json!({"base_url": base_url, "source": err.to_string()}),
        )
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(RunnerError::config(
            "E_CONFIG",
            "base URL must use http or https",
            serde_json::json!({"base_url": base_url}),
        ));
    }
    Ok(base_url.trim_end_matches('/').to_string())
}

pub fn validate_policy(policy: &RunPolicy) -> RunnerResult<()> {
    if policy.policy_version != POLICY_VERSION {
        return Err(RunnerError::protocol(
            "E_PROTOCOL",
            "unsupported policy version",
            serde_json::json!({
                "provided_version": policy.policy_version,
                "supported_version": POLICY_VERSION,
            }),
        ));
    }
    if policy.timeout_ms == 0 {
        return Err(RunnerError::config(
            "E_CONFIG",
            "timeout_ms must be greater than zero",
            None,
        ));
    }
    Ok(())
}

pub fn run_scenario(scenario: Scenario, options: RunnerOptions) -> RunnerResult<ScenarioReport> {
    let policy = load_policy_ref(&scenario.run.policy)?;
    validate_policy(&policy)?;

    let declared = u64::try_from(scenario.steps.len()).unwrap_or(u64::MAX);
    if declared > policy.max_steps {
        return Err(RunnerError::budget(
            "E_BUDGET",
            "scenario exceeds max_steps budget",
            serde_json::json!({"max_steps": policy.max_steps, "steps": declared}),
        ));
    }

    for issue in validate_scenario(&scenario) {
        warn!(step = ?issue.step_index, code = %issue.code, "{}", issue.message);
    }

    let base_url = resolve_base_url(
        options.base_url.as_deref(),
        scenario.run.base_url.as_deref(),
    )?;
    let client = client_for(&policy)?;

    let mut runner = ScenarioRunner::new(client, base_url, policy.clone())
        .with_actors(scenario.actors.iter().cloned());
    if let Some(progress) = options.progress {
        runner = runner.with_progress(progress);
    }
    if let Some(config) = options.artifacts {
        let mut writer = ArtifactsWriter::new(config)?;
        writer.write_scenario(&scenario)?;
        writer.write_policy(&policy)?;
        runner = runner.with_artifacts(writer);
    }

    Ok(runner.run(&scenario.metadata.name, &scenario.steps))
}

pub fn load_scenario(path: &str) -> RunnerResult<Scenario> {
    crate::scenario::load_scenario_file(path)
}

fn elapsed_ms(started_at: &Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}
