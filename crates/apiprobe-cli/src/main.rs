//! apiprobe CLI: scenario-driven REST API probing.
//!
//! Runs scenario files against a backend, validates them offline, and prints
//! a report whose outcome becomes the process exit code.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

use apiprobe::artifacts::ArtifactsWriterConfig;
use apiprobe::model::{PolicyRef, RunPolicy, ScenarioReport};
use apiprobe::report::{self, ReportFormat};
use apiprobe::runner::{
    load_scenario, run_scenario, validate_policy, ProgressCallback, RunnerError, RunnerOptions,
};
use apiprobe::scenario::{load_policy_ref, validate_scenario, ValidationIssue};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod progress;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "apiprobe",
    version,
    about = "Scenario-driven REST API probe and assertion harness"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute a scenario against a backend and print the report
    Run {
        #[arg(
            long,
            env = "APIPROBE_BASE_URL",
            help = "Backend base URL (overrides the scenario's run.base_url)"
        )]
        base_url: Option<String>,
        #[arg(long, help = "Scenario file (.json, .yaml or .yml)")]
        scenario: PathBuf,
        #[arg(long, help = "Execute every step even after a failure")]
        continue_on_failure: bool,
        #[arg(long, default_value = "text", help = "Report format: text or json")]
        report_format: ReportFormat,
        #[arg(long, help = "Also write the report to this file")]
        report_file: Option<PathBuf>,
        #[arg(long, help = "Write scenario, exchanges and report to this directory")]
        artifacts: Option<PathBuf>,
        #[arg(long, help = "Overwrite existing artifacts directory")]
        overwrite: bool,
        #[arg(long, help = "Per-call timeout in milliseconds")]
        timeout_ms: Option<u64>,
        #[arg(long, help = "Extra attempts for connection failures")]
        retries: Option<u32>,
        #[arg(long, short = 'v', help = "Show step-by-step progress to stderr")]
        verbose: bool,
    },
    /// Check a scenario for problems without sending any request
    Validate {
        #[arg(long, help = "Scenario file (.json, .yaml or .yml)")]
        scenario: PathBuf,
        #[arg(long, help = "Output issues as JSON")]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment.
/// Returns whether progress output should use ANSI colors.
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

/// Route `tracing` output to stderr. `RUST_LOG` wins over the default level.
fn init_logging(verbose: bool, color: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(color)
                .with_target(false),
        )
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let color = configure_colors(cli.color);
    match cli.command {
        Commands::Run {
            base_url,
            scenario,
            continue_on_failure,
            report_format,
            report_file,
            artifacts,
            overwrite,
            timeout_ms,
            retries,
            verbose,
        } => {
            init_logging(verbose, color);
            cmd_run(RunArgs {
                base_url,
                scenario,
                continue_on_failure,
                report_format,
                report_file,
                artifacts,
                overwrite,
                timeout_ms,
                retries,
                verbose,
                color,
            })
        }
        Commands::Validate { scenario, json } => {
            init_logging(false, color);
            cmd_validate(&scenario, json)
        }
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

struct RunArgs {
    base_url: Option<String>,
    scenario: PathBuf,
    continue_on_failure: bool,
    report_format: ReportFormat,
    report_file: Option<PathBuf>,
    artifacts: Option<PathBuf>,
    overwrite: bool,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    verbose: bool,
    color: bool,
}

/// Handle the run command.
fn cmd_run(args: RunArgs) -> Result<()> {
    let json = args.report_format == ReportFormat::Json;
    if let Err(err) = check_run_args(args.artifacts.as_deref(), args.overwrite) {
        return emit_error(json, &err);
    }
    let mut scenario = match load_scenario(&path_arg(&args.scenario)) {
        Ok(scenario) => scenario,
        Err(err) => return emit_error(json, &err),
    };
    let mut policy = match load_policy_ref(&scenario.run.policy) {
        Ok(policy) => policy,
        Err(err) => return emit_error(json, &err),
    };
    apply_cli_policy_overrides(
        &mut policy,
        args.continue_on_failure,
        args.timeout_ms,
        args.retries,
    );
    scenario.run.policy = PolicyRef::Inline(policy);

    let progress_callback = if args.verbose {
        Some(Arc::new(progress::VerboseProgress::new(args.color)) as Arc<dyn ProgressCallback>)
    } else {
        None
    };
    let options = RunnerOptions {
        base_url: args.base_url,
        artifacts: args.artifacts.map(|dir| ArtifactsWriterConfig {
            dir,
            overwrite: args.overwrite,
        }),
        progress: progress_callback,
    };
    let result = run_scenario(scenario, options);
    emit_report(args.report_format, args.report_file.as_deref(), result)
}

fn check_run_args(
    artifacts: Option<&Path>,
    overwrite: bool,
) -> std::result::Result<(), RunnerError> {
    if overwrite && artifacts.is_none() {
        return Err(RunnerError::cli_invalid_arg(
            "--overwrite requires --artifacts",
        ));
    }
    Ok(())
}

/// Handle the validate command. Exits 2 when any issue is found.
fn cmd_validate(scenario_path: &Path, json: bool) -> Result<()> {
    let scenario = match load_scenario(&path_arg(scenario_path)) {
        Ok(scenario) => scenario,
        Err(err) => return emit_error(json, &err),
    };
    if let Err(err) = load_policy_ref(&scenario.run.policy).and_then(|p| validate_policy(&p)) {
        return emit_error(json, &err);
    }

    let issues = validate_scenario(&scenario);
    if json {
        let payload = serde_json::json!({
            "scenario": scenario.metadata.name,
            "steps": scenario.steps.len(),
            "valid": issues.is_empty(),
            "issues": issues,
        });
        let output = serde_json::to_string_pretty(&payload).into_diagnostic()?;
        println!("{output}");
    } else {
        print_issues(&scenario.metadata.name, scenario.steps.len(), &issues);
    }
    if !issues.is_empty() {
        std::process::exit(exit_code_for_error_code("E_PROTOCOL"));
    }
    Ok(())
}

/// Handle the completions command.
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

fn emit_report(
    format: ReportFormat,
    report_file: Option<&Path>,
    result: std::result::Result<ScenarioReport, RunnerError>,
) -> Result<()> {
    let json = format == ReportFormat::Json;
    let run_report = match result {
        Ok(run_report) => run_report,
        Err(err) => return emit_error(json, &err),
    };
    let rendered = format.render(&run_report);
    println!("{rendered}");
    if let Some(path) = report_file {
        if let Err(err) = std::fs::write(path, format!("{rendered}\n")) {
            let err = RunnerError::io("E_IO", "failed to write report file", err);
            return emit_error(json, &err);
        }
    }
    std::process::exit(report::exit_code(&run_report));
}

fn emit_error(json: bool, err: &RunnerError) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("error: {err}");
        if let Some(context) = err.context.as_ref() {
            eprintln!("  context: {context}");
        }
    }
    std::process::exit(exit_code_for_error(err));
}

fn print_issues(name: &str, steps: usize, issues: &[ValidationIssue]) {
    if issues.is_empty() {
        println!("scenario `{name}` is valid ({steps} steps)");
        return;
    }
    println!("scenario `{name}`: {} issue(s)", issues.len());
    for issue in issues {
        println!("  - {issue}");
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// CLI flags take precedence over the scenario's policy.
fn apply_cli_policy_overrides(
    policy: &mut RunPolicy,
    continue_on_failure: bool,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
) {
    if continue_on_failure {
        policy.abort = apiprobe::model::AbortPolicy::Continue;
    }
    if let Some(timeout_ms) = timeout_ms {
        policy.timeout_ms = timeout_ms;
    }
    if let Some(retries) = retries {
        policy.retries = retries;
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn exit_code_for_error_code(code: &str) -> i32 {
    apiprobe::runner::ErrorCode::parse(code).map_or(1, apiprobe::runner::ErrorCode::exit_code)
}

fn exit_code_for_error(err: &RunnerError) -> i32 {
    err.exit_code()
}
