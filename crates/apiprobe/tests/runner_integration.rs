// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Runner integration tests against the in-process mock backend.

use apiprobe::assertions::{field_equals, field_in_set, field_present, list_length};
use apiprobe::model::{
    CompareOp, FailureKind, LengthPredicate, RunPolicy, RunStatus, Scenario, ScenarioReport,
};
use apiprobe::runner::{client_for, run_scenario, RunState, RunnerOptions, ScenarioRunner};
use apiprobe_fixtures::{actor, MockBackend, MockResponse, ScenarioBuilder, StepBuilder};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

const OPERATOR_PHONE: &str = "+79777888999";
const OPERATOR_PASSWORD: &str = "warehouse123";
const PLACED_CARGO: &str = "/api/warehouses/placed-cargo?page=1&per_page=25";

fn operator_backend() -> MockBackend {
    let backend = MockBackend::start();
    backend.login(OPERATOR_PHONE, OPERATOR_PASSWORD, "tok1", "warehouse_operator");
    backend
}

fn placed_cargo_backend(status: &str) -> MockBackend {
    let backend = operator_backend();
    backend.route(
        "GET",
        PLACED_CARGO,
        MockResponse::ok(&json!({
            "items": [
                {"cargo_number": "CRG-001", "status": status},
            ],
            "pagination": {"page": 1, "per_page": 25, "total": 1, "pages": 1}
        })),
    );
    backend
}

fn placed_cargo_scenario() -> Scenario {
    ScenarioBuilder::new("placed-cargo")
        .with_actor(actor("operator", OPERATOR_PHONE, OPERATOR_PASSWORD))
        .add_step(StepBuilder::login("operator login", "operator").build())
        .add_step(
            StepBuilder::get("list placed cargo", PLACED_CARGO)
                .as_actor("operator")
                .expect_status(200)
                .assert(list_length("items", LengthPredicate::new(CompareOp::Ge, 1)))
                .assert(field_present("items[0].cargo_number"))
                .assert(field_equals("items[0].status", "placement_ready"))
                .build(),
        )
        .build()
}

fn run_against(backend: &MockBackend, scenario: Scenario) -> ScenarioReport {
    let options = RunnerOptions {
        base_url: Some(backend.base_url().to_string()),
        ..RunnerOptions::default()
    };
    run_scenario(scenario, options).expect("scenario setup should succeed")
}

/// Step 1 fails (unknown route), steps 2 and 3 pass.
fn failing_first_scenario(continue_on_failure: bool) -> Scenario {
    let mut builder = ScenarioBuilder::new("mixed")
        .with_actor(actor("operator", OPERATOR_PHONE, OPERATOR_PASSWORD))
        .add_step(
            StepBuilder::get("missing endpoint", "/api/does-not-exist")
                .expect_status(200)
                .build(),
        )
        .add_step(StepBuilder::login("operator login", "operator").build())
        .add_step(
            StepBuilder::get("placed cargo", PLACED_CARGO)
                .as_actor("operator")
                .build(),
        );
    if continue_on_failure {
        builder = builder.continue_on_failure();
    }
    builder.build()
}

// =============================================================================
// Placed-cargo scenarios
// =============================================================================

#[test]
fn placed_cargo_passes_when_status_is_placement_ready() {
    let backend = placed_cargo_backend("placement_ready");

    let report = run_against(&backend, placed_cargo_scenario());

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total, 2);
    assert_eq!(report.passed, 2);
    assert_eq!(report.failed, 0);
    assert!(report.success());
    assert_eq!(report.steps[1].http_status, Some(200));
}

#[test]
fn placed_cargo_fails_when_status_is_placed_in_warehouse() {
    let backend = placed_cargo_backend("placed_in_warehouse");

    let report = run_against(&backend, placed_cargo_scenario());

    assert_eq!(report.total, 2);
    assert_eq!(report.passed, 1);
    assert_eq!(report.failed, 1);
    let step = report.step("list placed cargo").unwrap();
    assert!(!step.passed);
    assert_eq!(step.failures.len(), 1);
    assert_eq!(step.failures[0].kind, FailureKind::ValueMismatch);
    assert!(step.failures[0].message.contains("placed_in_warehouse"));
}

#[test]
fn authenticated_request_carries_bearer_token() {
    let backend = placed_cargo_backend("placement_ready");

    run_against(&backend, placed_cargo_scenario());

    let requests = backend.requests_to("/api/warehouses/placed-cargo");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("Authorization"), Some("Bearer tok1"));
    assert_eq!(requests[0].url, PLACED_CARGO);

    let logins = backend.requests_to("/api/auth/login");
    assert_eq!(
        logins[0].json().unwrap(),
        json!({"phone": OPERATOR_PHONE, "password": OPERATOR_PASSWORD})
    );
}

// =============================================================================
// Abort policy
// =============================================================================

#[test]
fn stop_policy_aborts_after_first_failure() {
    let backend = placed_cargo_backend("placement_ready");

    let report = run_against(&backend, failing_first_scenario(false));

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.declared, 3);
    assert_eq!(report.total, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.steps[0].failures[0].kind, FailureKind::StatusMismatch);
    assert!(backend.requests_to("/api/auth/login").is_empty());
}

#[test]
fn continue_policy_executes_every_step() {
    let backend = placed_cargo_backend("placement_ready");

    let report = run_against(&backend, failing_first_scenario(true));

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.total, 3);
    assert_eq!(report.passed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.passed + report.failed, report.total);
}

#[test]
fn request_before_login_is_auth_not_ready() {
    let backend = placed_cargo_backend("placement_ready");
    let scenario = ScenarioBuilder::new("no-login")
        .with_actor(actor("operator", OPERATOR_PHONE, OPERATOR_PASSWORD))
        .add_step(
            StepBuilder::get("placed cargo", PLACED_CARGO)
                .as_actor("operator")
                .build(),
        )
        .build();

    let report = run_against(&backend, scenario);

    assert_eq!(report.steps[0].failures[0].kind, FailureKind::AuthNotReady);
    assert_eq!(report.steps[0].http_status, None);
    assert_eq!(backend.request_count(), 0);
}

#[test]
fn wrong_password_is_auth_failed_unless_rejection_expected() {
    let backend = operator_backend();
    let scenario = ScenarioBuilder::new("bad-login")
        .continue_on_failure()
        .with_actor(actor("intruder", OPERATOR_PHONE, "wrong"))
        .add_step(StepBuilder::login("login expecting success", "intruder").build())
        .add_step(
            StepBuilder::login("login expecting rejection", "intruder")
                .expect_status(401)
                .assert(field_equals("detail", "Incorrect phone or password"))
                .build(),
        )
        .build();

    let report = run_against(&backend, scenario);

    let kinds: Vec<FailureKind> = report.steps[0]
        .failures
        .iter()
        .map(|failure| failure.kind)
        .collect();
    assert!(kinds.contains(&FailureKind::StatusMismatch));
    assert!(kinds.contains(&FailureKind::AuthFailed));
    assert!(report.steps[1].passed, "{:?}", report.steps[1].failures);
}

#[test]
fn role_label_mismatch_fails_login_step() {
    let backend = operator_backend();
    let mut operator = actor("operator", OPERATOR_PHONE, OPERATOR_PASSWORD);
    operator.role_label = Some("admin".to_string());
    let scenario = ScenarioBuilder::new("role")
        .with_actor(operator)
        .add_step(StepBuilder::login("operator login", "operator").build())
        .build();

    let report = run_against(&backend, scenario);

    let failure = &report.steps[0].failures[0];
    assert_eq!(failure.kind, FailureKind::ValueMismatch);
    assert_eq!(failure.assertion.as_deref(), Some("role_label"));
}

// =============================================================================
// Captures and templates
// =============================================================================

#[test]
fn captured_values_flow_into_later_steps() {
    let backend = operator_backend();
    backend.route(
        "POST",
        "/api/cargo",
        MockResponse::json(201, &json!({"id": 42, "cargo_number": "CRG-42"})),
    );
    backend.route(
        "GET",
        "/api/cargo/42",
        MockResponse::ok(&json!({"id": 42, "status": "created"})),
    );
    backend.route_fn("POST", "/api/orders", |request| {
        let body = request.json().unwrap_or_default();
        MockResponse::json(201, &json!({"received": body}))
    });
    let scenario = ScenarioBuilder::new("capture-flow")
        .with_actor(actor("operator", OPERATOR_PHONE, OPERATOR_PASSWORD))
        .add_step(StepBuilder::login("login", "operator").build())
        .add_step(
            StepBuilder::post("create cargo", "/api/cargo", json!({"weight": 1.5}))
                .as_actor("operator")
                .expect_status(201)
                .capture("cargo_id", "id")
                .capture("cargo_number", "cargo_number")
                .build(),
        )
        .add_step(
            StepBuilder::get("fetch cargo", "/api/cargo/{{cargo_id}}")
                .as_actor("operator")
                .assert(field_in_set("status", ["created", "placement_ready"]))
                .build(),
        )
        .add_step(
            StepBuilder::post(
                "order cargo",
                "/api/orders",
                json!({"cargo_id": "{{cargo_id}}", "note": "order for {{cargo_number}}"}),
            )
            .as_actor("operator")
            .assert(field_equals("received.cargo_id", 42))
            .assert(field_equals("received.note", "order for CRG-42"))
            .build(),
        )
        .build();

    let report = run_against(&backend, scenario);

    assert!(report.success(), "{:#?}", report.steps);
    assert_eq!(report.steps[1].captured_outputs["cargo_id"], json!(42));
    assert_eq!(backend.requests_to("/api/cargo/42").len(), 1);
}

#[test]
fn unresolved_reference_fails_without_sending() {
    let backend = operator_backend();
    let scenario = ScenarioBuilder::new("unresolved")
        .add_step(StepBuilder::get("fetch", "/api/cargo/{{cargo_id}}").build())
        .build();

    let report = run_against(&backend, scenario);

    let failure = &report.steps[0].failures[0];
    assert_eq!(failure.kind, FailureKind::UnresolvedReference);
    assert!(failure.message.contains("cargo_id"));
    assert_eq!(backend.request_count(), 0);
}

#[test]
fn missing_capture_path_fails_step() {
    let backend = operator_backend();
    backend.route("GET", "/api/profile", MockResponse::ok(&json!({"name": "x"})));
    let scenario = ScenarioBuilder::new("capture-missing")
        .add_step(
            StepBuilder::get("profile", "/api/profile")
                .capture("user_id", "id")
                .build(),
        )
        .build();

    let report = run_against(&backend, scenario);

    let failure = &report.steps[0].failures[0];
    assert_eq!(failure.kind, FailureKind::MissingField);
    assert_eq!(failure.assertion.as_deref(), Some("capture(user_id)"));
}

// =============================================================================
// Runner lifecycle
// =============================================================================

#[test]
fn runner_is_idempotent_across_runs() {
    let backend = placed_cargo_backend("placement_ready");
    let scenario = placed_cargo_scenario();
    let policy = RunPolicy::default();
    let mut runner = ScenarioRunner::new(client_for(&policy).unwrap(), backend.base_url(), policy)
        .with_actors(scenario.actors.clone());
    assert_eq!(runner.state(), RunState::Pending);

    let first = runner.run(&scenario.metadata.name, &scenario.steps);
    let second = runner.run(&scenario.metadata.name, &scenario.steps);

    assert_eq!(runner.state(), RunState::Completed);
    assert_ne!(first.run_id, second.run_id);
    for report in [&first, &second] {
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 2);
    }
    assert_eq!(backend.requests_to("/api/auth/login").len(), 2);
}

#[test]
fn connection_failures_are_retried() {
    let scenario = ScenarioBuilder::new("unreachable")
        .with_policy(RunPolicy {
            retries: 2,
            retry_backoff_ms: 10,
            timeout_ms: 2_000,
            ..RunPolicy::default()
        })
        .add_step(StepBuilder::get("ping", "/health").build())
        .build();
    let options = RunnerOptions {
        base_url: Some("http://127.0.0.1:1".to_string()),
        ..RunnerOptions::default()
    };

    let report = run_scenario(scenario, options).unwrap();

    let step = &report.steps[0];
    assert_eq!(step.failures[0].kind, FailureKind::NetworkError);
    assert_eq!(step.attempts, 3);
    assert_eq!(step.http_status, None);
}

#[test]
fn http_error_statuses_are_not_retried() {
    let backend = MockBackend::start();
    backend.route(
        "GET",
        "/flaky",
        MockResponse::json(503, &json!({"detail": "unavailable"})),
    );
    let scenario = ScenarioBuilder::new("no-retry")
        .with_policy(RunPolicy {
            retries: 3,
            retry_backoff_ms: 10,
            ..RunPolicy::default()
        })
        .add_step(StepBuilder::get("flaky", "/flaky").build())
        .build();

    let report = run_against(&backend, scenario);

    assert_eq!(report.steps[0].failures[0].kind, FailureKind::StatusMismatch);
    assert_eq!(backend.request_count(), 1);
}

#[test]
fn slow_backend_hits_timeout() {
    let backend = MockBackend::start();
    backend.route(
        "GET",
        "/slow",
        MockResponse::ok(&json!({})).with_delay(std::time::Duration::from_millis(500)),
    );
    let scenario = ScenarioBuilder::new("timeout")
        .with_policy(RunPolicy {
            timeout_ms: 100,
            retries: 3,
            retry_backoff_ms: 10,
            ..RunPolicy::default()
        })
        .add_step(StepBuilder::get("slow", "/slow").build())
        .build();

    let report = run_against(&backend, scenario);

    let step = &report.steps[0];
    let failure = &step.failures[0];
    assert_eq!(failure.kind, FailureKind::NetworkError);
    assert!(failure.message.contains("timeout"), "{}", failure.message);
    assert_eq!(step.attempts, 1);
    assert_eq!(backend.request_count(), 1);
}

#[test]
fn failed_relogin_drops_previous_token() {
    let backend = operator_backend();
    backend.route(
        "GET",
        "/api/users/me",
        MockResponse::ok(&json!({"role": "warehouse_operator"})),
    );
    let scenario = ScenarioBuilder::new("stale-token")
        .continue_on_failure()
        .with_actor(actor("operator", OPERATOR_PHONE, OPERATOR_PASSWORD))
        .add_step(StepBuilder::login("operator login", "operator").build())
        .add_step(
            StepBuilder::login_at(
                "relogin unreachable",
                "operator",
                "http://127.0.0.1:1/api/auth/login",
            )
            .build(),
        )
        .add_step(
            StepBuilder::get("profile", "/api/users/me")
                .as_actor("operator")
                .build(),
        )
        .build();

    let report = run_against(&backend, scenario);

    assert!(report.steps[0].passed);
    assert_eq!(report.steps[1].failures[0].kind, FailureKind::NetworkError);
    assert_eq!(report.steps[2].failures[0].kind, FailureKind::AuthNotReady);
    assert!(backend.requests_to("/api/users/me").is_empty());
}
