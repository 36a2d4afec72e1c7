//! End-to-end tests for `apiprobe run` and `apiprobe validate` against the
//! in-process mock backend.
// Test module - relaxed lint rules
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]

use apiprobe::assertions::{field_equals, field_present};
use apiprobe::model::Scenario;
use apiprobe_fixtures::{
    actor, temp_dir, write_scenario, write_scenario_text, MockBackend, MockResponse,
    ScenarioBuilder, StepBuilder,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const PLACED_CARGO: &str = "/api/warehouses/placed-cargo?page=1&per_page=25";

fn apiprobe_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_apiprobe"));
    cmd.env_remove("APIPROBE_BASE_URL")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn backend(status: &str) -> MockBackend {
    let backend = MockBackend::start();
    backend.login("+79777888999", "warehouse123", "tok1", "warehouse_operator");
    backend.route(
        "GET",
        PLACED_CARGO,
        MockResponse::ok(&json!({
            "items": [{"cargo_number": "CRG-001", "status": status}],
            "pagination": {"page": 1, "per_page": 25, "total": 1}
        })),
    );
    backend
}

fn placed_cargo_scenario() -> Scenario {
    ScenarioBuilder::new("placed-cargo")
        .with_actor(actor("operator", "+79777888999", "warehouse123"))
        .add_step(StepBuilder::login("operator login", "operator").build())
        .add_step(
            StepBuilder::get("placed cargo", PLACED_CARGO)
                .as_actor("operator")
                .expect_status(200)
                .assert(field_present("items[0].cargo_number"))
                .assert(field_equals("items[0].status", "placement_ready"))
                .build(),
        )
        .build()
}

fn scenario_file(name: &str, scenario: &Scenario) -> (PathBuf, PathBuf) {
    let dir = temp_dir(name);
    let path = dir.join("scenario.json");
    write_scenario(&path, scenario);
    (dir, path)
}

fn run(base_url: &str, scenario: &Path, extra: &[&str]) -> Output {
    apiprobe_bin()
        .arg("run")
        .arg("--base-url")
        .arg(base_url)
        .arg("--scenario")
        .arg(scenario)
        .args(extra)
        .output()
        .expect("failed to execute")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not JSON ({err}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn passing_scenario_exits_zero_with_text_report() {
    let backend = backend("placement_ready");
    let (_dir, path) = scenario_file("cli-pass", &placed_cargo_scenario());

    let output = run(backend.base_url(), &path, &[]);

    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scenario: placed-cargo"));
    assert!(stdout.contains("operator login"));
    assert!(stdout.contains("status: completed"));
    assert!(stdout.contains("success rate: 2/2 (100.0%)"));
}

#[test]
fn failing_assertion_exits_one_with_json_report() {
    let backend = backend("placed_in_warehouse");
    let (_dir, path) = scenario_file("cli-fail", &placed_cargo_scenario());

    let output = run(backend.base_url(), &path, &["--report-format", "json"]);

    assert_eq!(output.status.code(), Some(1));
    let report = stdout_json(&output);
    assert_eq!(report["total"], 2);
    assert_eq!(report["passed"], 1);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["exit_code"], 1);
    assert_eq!(report["steps"][1]["failures"][0]["kind"], "value_mismatch");
}

#[test]
fn continue_on_failure_flag_runs_remaining_steps() {
    let backend = backend("placement_ready");
    let scenario = ScenarioBuilder::new("keep-going")
        .with_actor(actor("operator", "+79777888999", "warehouse123"))
        .add_step(
            StepBuilder::get("unknown route", "/api/missing")
                .expect_status(200)
                .build(),
        )
        .add_step(StepBuilder::login("operator login", "operator").build())
        .build();
    let (_dir, path) = scenario_file("cli-continue", &scenario);

    let stopped = stdout_json(&run(backend.base_url(), &path, &["--report-format", "json"]));
    assert_eq!(stopped["status"], "aborted");
    assert_eq!(stopped["total"], 1);

    let output = run(
        backend.base_url(),
        &path,
        &["--report-format", "json", "--continue-on-failure"],
    );
    assert_eq!(output.status.code(), Some(1));
    let report = stdout_json(&output);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["total"], 2);
    assert_eq!(report["passed"], 1);
    assert_eq!(report["failed"], 1);
}

#[test]
fn base_url_is_read_from_environment() {
    let backend = backend("placement_ready");
    let (_dir, path) = scenario_file("cli-env", &placed_cargo_scenario());

    let output = apiprobe_bin()
        .env("APIPROBE_BASE_URL", backend.base_url())
        .arg("run")
        .arg("--scenario")
        .arg(&path)
        .output()
        .expect("failed to execute");

    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn missing_base_url_is_a_config_error() {
    let (_dir, path) = scenario_file("cli-no-base", &placed_cargo_scenario());

    let output = apiprobe_bin()
        .arg("run")
        .arg("--scenario")
        .arg(&path)
        .arg("--report-format")
        .arg("json")
        .output()
        .expect("failed to execute");

    assert_eq!(output.status.code(), Some(2));
    let error = stdout_json(&output);
    assert_eq!(error["code"], "E_CONFIG");
}

#[test]
fn overwrite_without_artifacts_is_rejected() {
    let backend = backend("placement_ready");
    let (_dir, path) = scenario_file("cli-overwrite-alone", &placed_cargo_scenario());

    let output = run(
        backend.base_url(),
        &path,
        &["--overwrite", "--report-format", "json"],
    );

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["code"], "E_CLI_INVALID_ARG");
    assert_eq!(backend.request_count(), 0);
}

#[test]
fn missing_scenario_file_is_an_io_error() {
    let dir = temp_dir("cli-missing");
    let output = run("http://127.0.0.1:1", &dir.join("nope.json"), &[]);

    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read scenario file"));
}

#[test]
fn step_budget_violation_exits_four() {
    let text = r#"{
        "metadata": {"name": "too-long"},
        "run": {"policy": {"max_steps": 1}},
        "steps": [
            {"name": "one", "action": {"type": "request", "method": "GET", "path": "/a"}},
            {"name": "two", "action": {"type": "request", "method": "GET", "path": "/b"}}
        ]
    }"#;
    let dir = temp_dir("cli-budget");
    let path = dir.join("scenario.json");
    write_scenario_text(&path, text);

    let output = run("http://127.0.0.1:1", &path, &[]);

    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn report_file_receives_rendered_report() {
    let backend = backend("placement_ready");
    let (dir, path) = scenario_file("cli-report-file", &placed_cargo_scenario());
    let report_path = dir.join("out").join("report.json");
    std::fs::create_dir_all(report_path.parent().unwrap()).unwrap();

    let output = run(
        backend.base_url(),
        &path,
        &[
            "--report-format",
            "json",
            "--report-file",
            report_path.to_str().unwrap(),
        ],
    );

    assert_eq!(output.status.code(), Some(0));
    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(written["scenario_name"], "placed-cargo");
    assert_eq!(written["success_rate"], 100.0);
}

#[test]
fn artifacts_directory_holds_redacted_exchanges() {
    let backend = backend("placement_ready");
    let (dir, path) = scenario_file("cli-artifacts", &placed_cargo_scenario());
    let artifacts = dir.join("artifacts");

    let output = run(
        backend.base_url(),
        &path,
        &["--artifacts", artifacts.to_str().unwrap()],
    );
    assert_eq!(output.status.code(), Some(0));

    for file in [
        "scenario.json",
        "policy.json",
        "report.json",
        "exchanges.jsonl",
        "checksums.json",
    ] {
        assert!(artifacts.join(file).exists(), "missing artifact {file}");
    }
    let exchanges = std::fs::read_to_string(artifacts.join("exchanges.jsonl")).unwrap();
    assert_eq!(exchanges.lines().count(), 2);
    assert!(!exchanges.contains("warehouse123"));
    assert!(!exchanges.contains("tok1"));

    let again = run(
        backend.base_url(),
        &path,
        &["--artifacts", artifacts.to_str().unwrap()],
    );
    assert_eq!(again.status.code(), Some(2));

    let overwritten = run(
        backend.base_url(),
        &path,
        &["--artifacts", artifacts.to_str().unwrap(), "--overwrite"],
    );
    assert_eq!(overwritten.status.code(), Some(0));
}

#[test]
fn verbose_progress_goes_to_stderr() {
    let backend = backend("placement_ready");
    let (_dir, path) = scenario_file("cli-verbose", &placed_cargo_scenario());

    let output = run(backend.base_url(), &path, &["--verbose", "--color=never"]);

    assert_eq!(output.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("run started: placed-cargo"));
    assert!(stderr.contains("placed cargo (HTTP 200"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("run started"));
}

#[test]
fn validate_accepts_well_formed_yaml() {
    let text = r#"
metadata:
  name: yaml-scenario
actors:
  - name: operator
    phone: "+79777888999"
    password: warehouse123
steps:
  - name: login
    action: {type: login, actor: operator}
  - name: list
    action: {type: request, method: GET, path: /api/cargo, actor: operator}
    assert:
      - {type: list_length, path: items, predicate: ">= 1"}
"#;
    let dir = temp_dir("cli-validate-yaml");
    let path = dir.join("scenario.yaml");
    write_scenario_text(&path, text);

    let output = apiprobe_bin()
        .arg("validate")
        .arg("--scenario")
        .arg(&path)
        .output()
        .expect("failed to execute");

    assert_eq!(
        output.status.code(),
        Some(0),
        "stdout: {}",
        String::from_utf8_lossy(&output.stdout)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("is valid (2 steps)"));
}

#[test]
fn validate_reports_forward_reference_as_json() {
    let scenario = ScenarioBuilder::new("forward")
        .add_step(StepBuilder::get("uses id", "/api/cargo/{{cargo_id}}").build())
        .add_step(
            StepBuilder::get("captures id", "/api/cargo")
                .capture("cargo_id", "items[0].id")
                .build(),
        )
        .build();
    let (_dir, path) = scenario_file("cli-validate-forward", &scenario);

    let output = apiprobe_bin()
        .arg("validate")
        .arg("--scenario")
        .arg(&path)
        .arg("--json")
        .output()
        .expect("failed to execute");

    assert_eq!(output.status.code(), Some(2));
    let payload = stdout_json(&output);
    assert_eq!(payload["valid"], false);
    assert_eq!(payload["issues"][0]["code"], "forward_reference");
    assert_eq!(payload["issues"][0]["step_index"], 1);
}
