//! Pathgate - path-filtered execution gate
//!
//! The `pathgate` command runs early in a build stage and stops the pipeline
//! execution when the triggering change set does not touch any configured
//! path filter.
//!
//! ## Commands
//!
//! - `check`: evaluate the gate once (and stop the execution on no match)
//! - `filters`: validate and print the configured filters
//! - `changed`: list paths changed between two revisions
//!
//! Flags fall back to the environment variables the build environment
//! already exports (`CODEBUILD_RESOLVED_SOURCE_VERSION`, `CODE_PATH_FILTERS`,
//! `PIPELINE_NAME`, ...).

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, Level};

use pathgate_core::{
    CommandStop, ExecutionGate, ExecutionHandle, GateError, GateInput, GitDiffMatcher, HttpStop,
    HttpStopConfig, IdempotentStop, NoopStop, PathFilter, PathFilterSet, RevisionRef,
    StopPrimitive,
};

/// Exit status for a failed evaluation (diff unavailable, bad configuration).
const EXIT_GATE_FAILED: u8 = 2;

/// Exit status for STOPPED with a failed stop request under `--strict-stop`.
const EXIT_STOP_FAILED: u8 = 3;

#[derive(Parser)]
#[command(name = "pathgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Path-filtered execution gate for build pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the path filters and stop the execution if none matches
    Check(CheckArgs),

    /// Validate the filter configuration and print the normalized list
    Filters {
        /// Comma-separated path filters
        #[arg(long, env = "CODE_PATH_FILTERS", default_value = "")]
        filters: String,
    },

    /// List paths changed between two revisions
    Changed {
        #[command(flatten)]
        revisions: RevisionArgs,

        /// Only list paths under this filter
        #[arg(long)]
        filter: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RevisionArgs {
    /// Repository checkout to diff in
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Revision being built
    #[arg(long, env = "CODEBUILD_RESOLVED_SOURCE_VERSION")]
    head: String,

    /// Previous revision (default: first parent of --head)
    #[arg(long, env = "PATHGATE_BASE_REVISION")]
    base: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StopBackend {
    /// `aws codepipeline stop-pipeline-execution`
    Codepipeline,
    /// Arbitrary command given with --stop-command
    Command,
    /// POST to --stop-url
    Http,
    /// Log only
    Noop,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    revisions: RevisionArgs,

    /// Comma-separated path filters (empty: never stop)
    #[arg(long, env = "CODE_PATH_FILTERS", default_value = "")]
    filters: String,

    /// Execution to stop when no filter matches
    #[arg(long, env = "PIPELINE_EXECUTION_ID")]
    execution: Option<String>,

    /// How to request the stop
    #[arg(long, value_enum, env = "PATHGATE_STOP_BACKEND", default_value = "codepipeline")]
    stop_backend: StopBackend,

    /// Pipeline name for the codepipeline backend
    #[arg(long, env = "PIPELINE_NAME")]
    pipeline_name: Option<String>,

    /// One argument of the stop command; repeat for each ({execution}, {reason} are substituted)
    #[arg(long = "stop-command", value_name = "ARG", allow_hyphen_values = true)]
    stop_command: Vec<String>,

    /// Stderr text meaning the stop is already in progress (command backend)
    #[arg(long = "already-stopped-marker", value_name = "TEXT")]
    already_stopped_markers: Vec<String>,

    /// Orchestrator endpoint for the http backend
    #[arg(long, env = "PATHGATE_STOP_URL")]
    stop_url: Option<String>,

    /// Bearer token for the http backend
    #[arg(long, env = "PATHGATE_STOP_TOKEN", hide_env_values = true)]
    stop_token: Option<String>,

    /// Exit non-zero when the stop request itself fails
    #[arg(long)]
    strict_stop: bool,

    /// Print the full JSON report instead of the bare decision
    #[arg(long)]
    json_report: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pathgate_core::init_tracing(cli.json, level);

    match run(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{:#}", e), "pathgate failed");
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_status_for(&e))
        }
    }
}

async fn run(command: Commands) -> Result<u8> {
    match command {
        Commands::Check(args) => cmd_check(&args).await,
        Commands::Filters { filters } => cmd_filters(&filters).map(|_| 0),
        Commands::Changed { revisions, filter } => {
            cmd_changed(&revisions, filter.as_deref()).await.map(|_| 0)
        }
    }
}

/// Gate failures exit with 2, anything else with 1.
fn exit_status_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<GateError>() {
        Some(e) if e.is_fatal() => EXIT_GATE_FAILED,
        _ => 1,
    }
}

fn revision_pair(revisions: &RevisionArgs) -> Result<(RevisionRef, RevisionRef), GateError> {
    let head = RevisionRef::new(&revisions.head)?;
    let base = match revisions.base.as_deref().map(str::trim) {
        Some(base) if !base.is_empty() => RevisionRef::new(base)?,
        _ => RevisionRef::parent_of(&head),
    };
    Ok((base, head))
}

/// Build the explicit gate input from CLI/environment configuration.
fn gate_input(args: &CheckArgs) -> Result<GateInput, GateError> {
    let (base, head) = revision_pair(&args.revisions)?;
    let filters = PathFilterSet::parse_csv(&args.filters)?;

    let execution = match args.execution.as_deref() {
        Some(id) => ExecutionHandle::new(id)?,
        // Nothing can be stopped without filters, and noop never sends anything.
        None if filters.is_empty() || args.stop_backend == StopBackend::Noop => {
            ExecutionHandle::new("unspecified")?
        }
        None => {
            return Err(GateError::Configuration(
                "--execution (PIPELINE_EXECUTION_ID) is required to stop the execution"
                    .to_string(),
            ))
        }
    };

    Ok(GateInput::new(base, head, filters, execution))
}

fn stop_backend(args: &CheckArgs) -> Result<Box<dyn StopPrimitive>, GateError> {
    let backend: Box<dyn StopPrimitive> = match args.stop_backend {
        StopBackend::Codepipeline => {
            let pipeline = args.pipeline_name.as_deref().unwrap_or_default();
            Box::new(CommandStop::codepipeline(pipeline)?)
        }
        StopBackend::Command => {
            let stop = args
                .already_stopped_markers
                .iter()
                .fold(CommandStop::new(args.stop_command.clone())?, |stop, marker| {
                    stop.with_already_requested_marker(marker.as_str())
                });
            Box::new(stop.with_working_dir(&args.revisions.repo))
        }
        StopBackend::Http => {
            let url = args.stop_url.as_deref().ok_or_else(|| {
                GateError::Configuration("--stop-url is required for the http backend".to_string())
            })?;
            let mut config = HttpStopConfig::new(url);
            if let Some(token) = args.stop_token.as_deref() {
                config = config.with_token(token);
            }
            Box::new(HttpStop::new(config)?)
        }
        StopBackend::Noop => Box::new(NoopStop),
    };
    Ok(backend)
}

/// Evaluate the gate once and report the decision. Returns the exit status.
async fn cmd_check(args: &CheckArgs) -> Result<u8> {
    let input = gate_input(args)?;
    // With no filters the gate never stops, so no backend needs configuring.
    let backend: Box<dyn StopPrimitive> = if input.filters.is_empty() {
        Box::new(NoopStop)
    } else {
        stop_backend(args)?
    };
    let stop = IdempotentStop::new(backend);
    let matcher = GitDiffMatcher::new(&args.revisions.repo);

    info!("ref[{}]", input.head);
    info!("execution[{}]", input.execution);

    let gate = ExecutionGate::new(matcher, stop);
    let report = gate.evaluate(&input).await?;

    if args.json_report {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize gate report")?
        );
    } else {
        println!("{}", report.decision);
    }

    if report.stop_failed() {
        error!(
            execution = %report.execution,
            "execution was not stopped and may keep running"
        );
        if args.strict_stop {
            return Ok(EXIT_STOP_FAILED);
        }
    }

    Ok(0)
}

/// Validate and print the filter configuration
fn cmd_filters(raw: &str) -> Result<()> {
    let filters = PathFilterSet::parse_csv(raw)?;

    if filters.is_empty() {
        println!("No path filters configured (every change continues)");
    } else {
        for filter in &filters {
            println!("{}", filter);
        }
    }
    println!("Digest: {}", filters.digest());
    Ok(())
}

/// List changed paths between two revisions
async fn cmd_changed(revisions: &RevisionArgs, filter: Option<&str>) -> Result<()> {
    let (base, head) = revision_pair(revisions)?;
    let filter = filter.map(PathFilter::new).transpose()?;
    let matcher = GitDiffMatcher::new(&revisions.repo);

    let paths = matcher
        .changed_paths(&base, &head, filter.as_ref())
        .await
        .with_context(|| format!("Failed to list changes between {} and {}", base, head))?;

    for path in &paths {
        println!("{}", path);
    }
    info!(count = paths.len(), base = %base, head = %head, "listed changed paths");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn parse(args: &[&str]) -> CheckArgs {
        let mut argv = vec!["pathgate", "check"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).expect("arguments should parse").command {
            Commands::Check(args) => args,
            _ => unreachable!(),
        }
    }

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?} failed", args);
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn repo_with_docs_change() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-q"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/readme.md"), "v1\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-q", "-m", "initial"]);
        std::fs::write(dir.path().join("docs/readme.md"), "v2\n").unwrap();
        run_git(dir.path(), &["commit", "-q", "-am", "docs"]);
        let head = run_git(dir.path(), &["rev-parse", "HEAD"]);
        (dir, head)
    }

    #[test]
    fn base_defaults_to_first_parent() {
        let args = parse(&["--head", "abc123", "--filters", "infra", "--execution", "e1"]);
        let input = gate_input(&args).unwrap();
        assert_eq!(input.base.as_str(), "abc123~1");
        assert_eq!(input.head.as_str(), "abc123");
    }

    #[test]
    fn explicit_base_is_used() {
        let args = parse(&["--head", "abc123", "--base", "def456", "--execution", "e1"]);
        assert_eq!(gate_input(&args).unwrap().base.as_str(), "def456");
    }

    #[test]
    fn execution_required_when_a_stop_may_be_sent() {
        let args = parse(&["--head", "abc123", "--filters", "infra"]);
        let err = gate_input(&args).unwrap_err();
        assert!(matches!(err, GateError::Configuration(_)));

        let args = parse(&["--head", "abc123", "--filters", "infra", "--stop-backend", "noop"]);
        assert!(gate_input(&args).is_ok());

        let args = parse(&["--head", "abc123", "--filters", ""]);
        assert!(gate_input(&args).is_ok());
    }

    #[test]
    fn malformed_head_is_a_configuration_error() {
        let args = parse(&["--head", "a..b", "--execution", "e1"]);
        assert!(matches!(
            gate_input(&args).unwrap_err(),
            GateError::Configuration(_)
        ));
    }

    #[test]
    fn backend_configuration_is_validated() {
        let args = parse(&["--head", "h", "--stop-backend", "codepipeline"]);
        assert!(stop_backend(&args).is_err(), "pipeline name required");

        let args = parse(&[
            "--head",
            "h",
            "--stop-backend",
            "codepipeline",
            "--pipeline-name",
            "deploy",
        ]);
        assert!(stop_backend(&args).is_ok());

        let args = parse(&["--head", "h", "--stop-backend", "http"]);
        assert!(stop_backend(&args).is_err(), "url required");

        let args = parse(&["--head", "h", "--stop-backend", "command"]);
        assert!(stop_backend(&args).is_err(), "command required");

        let args = parse(&[
            "--head",
            "h",
            "--stop-backend",
            "command",
            "--stop-command",
            "echo",
            "--stop-command",
            "{execution}",
        ]);
        assert!(stop_backend(&args).is_ok());
    }

    #[test]
    fn exit_status_mapping() {
        let diff: anyhow::Error = GateError::DiffUnavailable {
            filter: "infra".to_string(),
            reason: "bad revision".to_string(),
        }
        .into();
        let config: anyhow::Error = GateError::Configuration("bad filter".to_string()).into();
        let other = anyhow::anyhow!("disk full");

        assert_eq!(exit_status_for(&diff), EXIT_GATE_FAILED);
        assert_eq!(exit_status_for(&config), EXIT_GATE_FAILED);
        assert_eq!(exit_status_for(&other), 1);
    }

    #[test]
    fn filters_command_rejects_absolute_paths() {
        assert!(cmd_filters("services/api, infra").is_ok());
        assert!(cmd_filters("").is_ok());
        assert!(cmd_filters("/etc").is_err());
    }

    #[tokio::test]
    async fn check_stops_with_command_backend() {
        let (repo, head) = repo_with_docs_change();
        let marker = repo.path().join("stopped");
        let repo_arg = repo.path().to_string_lossy().to_string();
        let marker_arg = marker.to_string_lossy().to_string();
        let args = parse(&[
            "--repo",
            &repo_arg,
            "--head",
            &head,
            "--filters",
            "services/api,infra",
            "--execution",
            "exec-9",
            "--stop-backend",
            "command",
            "--stop-command",
            "sh",
            "--stop-command",
            "-c",
            "--stop-command",
            "echo \"$0\" > \"$1\"",
            "--stop-command",
            "{execution}",
            "--stop-command",
            &marker_arg,
        ]);

        let code = cmd_check(&args).await.unwrap();

        assert_eq!(code, 0);
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "exec-9");
    }

    #[tokio::test]
    async fn check_continues_without_stopping() {
        let (repo, head) = repo_with_docs_change();
        let repo_arg = repo.path().to_string_lossy().to_string();
        let args = parse(&[
            "--repo",
            &repo_arg,
            "--head",
            &head,
            "--filters",
            "docs",
            "--execution",
            "exec-9",
            "--stop-backend",
            "command",
            "--stop-command",
            "false",
            "--strict-stop",
        ]);

        assert_eq!(cmd_check(&args).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn strict_stop_reports_failed_stop_request() {
        let (repo, head) = repo_with_docs_change();
        let repo_arg = repo.path().to_string_lossy().to_string();
        let args = parse(&[
            "--repo",
            &repo_arg,
            "--head",
            &head,
            "--filters",
            "infra",
            "--execution",
            "exec-9",
            "--stop-backend",
            "command",
            "--stop-command",
            "false",
            "--strict-stop",
        ]);

        assert_eq!(cmd_check(&args).await.unwrap(), EXIT_STOP_FAILED);
    }

    #[tokio::test]
    async fn check_fails_on_unknown_base() {
        let (repo, head) = repo_with_docs_change();
        let repo_arg = repo.path().to_string_lossy().to_string();
        let args = parse(&[
            "--repo",
            &repo_arg,
            "--head",
            &head,
            "--base",
            "no-such-branch",
            "--filters",
            "infra",
            "--stop-backend",
            "noop",
        ]);

        let err = cmd_check(&args).await.unwrap_err();
        assert_eq!(exit_status_for(&err), EXIT_GATE_FAILED);
    }
}
