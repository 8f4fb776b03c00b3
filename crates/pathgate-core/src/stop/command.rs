//! Stop backend that shells out to an external command.

use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{StopAck, StopPrimitive, STOP_REASON};
use crate::error::{GateError, Result};
use crate::revision::ExecutionHandle;

/// Marker the AWS CLI prints when a stop is already in progress.
pub const CODEPIPELINE_DUPLICATE_STOP: &str = "DuplicatedStopRequestException";

/// Marker the AWS CLI prints when the execution cannot be stopped, which
/// includes executions that are already stopping or stopped.
pub const CODEPIPELINE_NOT_STOPPABLE: &str = "PipelineExecutionNotStoppableException";

/// Command run after a failed stop to find out whether the execution is
/// already on its way down.
///
/// Runs only when the stop command's stderr contains one of the trigger
/// markers. If its trimmed stdout equals one of the stopping statuses, the
/// failed stop is reported as [`StopAck::AlreadyRequested`].
#[derive(Debug, Clone)]
pub struct StatusCheck {
    argv: Vec<String>,
    triggers: Vec<String>,
    stopping_statuses: Vec<String>,
}

impl StatusCheck {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        check_executable(&argv, "status command")?;
        Ok(Self {
            argv,
            triggers: Vec::new(),
            stopping_statuses: Vec::new(),
        })
    }

    pub fn with_trigger(mut self, marker: impl Into<String>) -> Self {
        self.triggers.push(marker.into());
        self
    }

    pub fn with_stopping_status(mut self, status: impl Into<String>) -> Self {
        self.stopping_statuses.push(status.into());
        self
    }

    fn is_triggered_by(&self, stderr: &str) -> bool {
        self.triggers.iter().any(|marker| stderr.contains(marker.as_str()))
    }
}

/// Runs an argv template to request a stop.
///
/// `{execution}` and `{reason}` are substituted in every argument. A
/// non-zero exit whose stderr contains one of the "already requested"
/// markers is treated as [`StopAck::AlreadyRequested`], and so is a failure
/// that an attached [`StatusCheck`] shows to be a stop already under way.
#[derive(Debug, Clone)]
pub struct CommandStop {
    argv: Vec<String>,
    already_requested_markers: Vec<String>,
    status_check: Option<StatusCheck>,
    working_dir: Option<PathBuf>,
}

impl CommandStop {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        check_executable(&argv, "stop command")?;
        Ok(Self {
            argv,
            already_requested_markers: Vec::new(),
            status_check: None,
            working_dir: None,
        })
    }

    /// Stop a whole CodePipeline execution through the AWS CLI.
    ///
    /// Stops the pipeline execution rather than the build job: a stopped
    /// build job shows up as a failed pipeline. CodePipeline rejects a second
    /// stop with `PipelineExecutionNotStoppableException` once the first one
    /// has moved the execution to `Stopping`, so that error is followed by a
    /// `get-pipeline-execution` status lookup.
    pub fn codepipeline(pipeline_name: &str) -> Result<Self> {
        let pipeline_name = pipeline_name.trim();
        if pipeline_name.is_empty() {
            return Err(GateError::Configuration(
                "pipeline name is required for the codepipeline stop backend".to_string(),
            ));
        }
        let argv = to_argv(&[
            "aws",
            "codepipeline",
            "stop-pipeline-execution",
            "--pipeline-name",
            pipeline_name,
            "--pipeline-execution-id",
            "{execution}",
            "--abandon",
            "--reason",
            "{reason}",
        ]);
        let status = StatusCheck::new(to_argv(&[
            "aws",
            "codepipeline",
            "get-pipeline-execution",
            "--pipeline-name",
            pipeline_name,
            "--pipeline-execution-id",
            "{execution}",
            "--query",
            "pipelineExecution.status",
            "--output",
            "text",
        ]))?
        .with_trigger(CODEPIPELINE_NOT_STOPPABLE)
        .with_stopping_status("Stopping")
        .with_stopping_status("Stopped");

        Ok(Self::new(argv)?
            .with_already_requested_marker(CODEPIPELINE_DUPLICATE_STOP)
            .with_status_check(status))
    }

    pub fn with_already_requested_marker(mut self, marker: impl Into<String>) -> Self {
        self.already_requested_markers.push(marker.into());
        self
    }

    pub fn with_status_check(mut self, status_check: StatusCheck) -> Self {
        self.status_check = Some(status_check);
        self
    }

    /// Run a different executable (for example an `aws` outside `PATH`) for
    /// both the stop command and its status check.
    pub fn with_executable(mut self, exe: impl Into<String>) -> Self {
        let exe = exe.into();
        self.argv[0] = exe.clone();
        if let Some(check) = self.status_check.as_mut() {
            check.argv[0] = exe;
        }
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Argument vector with placeholders substituted.
    pub fn render(&self, execution: &ExecutionHandle) -> Vec<String> {
        render(&self.argv, execution)
    }

    async fn run(&self, argv: &[String], execution: &ExecutionHandle) -> Result<Output> {
        let (exe, args) = argv
            .split_first()
            .ok_or_else(|| GateError::Configuration("stop command is empty".to_string()))?;

        let mut command = Command::new(exe);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        command.output().await.map_err(|e| GateError::StopRequestFailed {
            execution: execution.to_string(),
            reason: format!("failed to run '{}': {}", exe, e),
        })
    }

    /// True when the status check reports a stop already under way.
    async fn already_stopping(&self, check: &StatusCheck, execution: &ExecutionHandle) -> bool {
        let argv = render(&check.argv, execution);
        let output = match self.run(&argv, execution).await {
            Ok(output) => output,
            Err(e) => {
                warn!(execution = %execution, error = %e, "status check failed");
                return false;
            }
        };
        if !output.status.success() {
            warn!(
                execution = %execution,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "status check failed"
            );
            return false;
        }

        let status = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(execution = %execution, status = %status, "execution status");
        check.stopping_statuses.iter().any(|s| *s == status)
    }
}

#[async_trait]
impl StopPrimitive for CommandStop {
    async fn stop(&self, execution: &ExecutionHandle) -> Result<StopAck> {
        let argv = self.render(execution);
        let exe = argv[0].as_str();

        debug!(execution = %execution, command = %exe, "running stop command");
        let output = self.run(&argv, execution).await?;

        if output.status.success() {
            info!(execution = %execution, "stop requested");
            return Ok(StopAck::Requested);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if self
            .already_requested_markers
            .iter()
            .any(|marker| stderr.contains(marker.as_str()))
        {
            warn!(execution = %execution, "stop already in progress");
            return Ok(StopAck::AlreadyRequested);
        }

        if let Some(check) = self.status_check.as_ref().filter(|c| c.is_triggered_by(&stderr)) {
            if self.already_stopping(check, execution).await {
                warn!(execution = %execution, "execution already stopping");
                return Ok(StopAck::AlreadyRequested);
            }
        }

        Err(GateError::StopRequestFailed {
            execution: execution.to_string(),
            reason: match output.status.code() {
                Some(code) => format!("'{}' exited with {}: {}", exe, code, stderr),
                None => format!("'{}' terminated by signal", exe),
            },
        })
    }
}

fn check_executable(argv: &[String], what: &str) -> Result<()> {
    if argv.first().map_or(true, |exe| exe.trim().is_empty()) {
        return Err(GateError::Configuration(format!(
            "{} must name an executable",
            what
        )));
    }
    Ok(())
}

fn to_argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn render(argv: &[String], execution: &ExecutionHandle) -> Vec<String> {
    argv.iter()
        .map(|arg| {
            arg.replace("{execution}", execution.as_str())
                .replace("{reason}", STOP_REASON)
        })
        .collect()
}
