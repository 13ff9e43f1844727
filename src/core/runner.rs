// src/core/runner.rs

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Timeout for `--version` style probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Captured result of an external command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr, the way a shell `2>&1` redirect would look.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }

    /// Turns a non-zero exit into `ToolError::Failed`.
    pub fn into_success(self, program: &str) -> Result<Self, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::Failed {
                program: program.to_string(),
                code: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{program}` was not found, is it installed and on PATH?")]
    NotFound { program: String },
    #[error("`{program}` timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
    #[error("`{program}` exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Seam between the pipeline stages and the operating system's process table.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ToolError> {
        debug!(program, args = ?args, timeout_secs = timeout.as_secs(), "Spawning external command.");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout must not leave the child running.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ToolError::NotFound { program: program.to_string() },
                _ => ToolError::Io { program: program.to_string(), source: e },
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let output = CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!(program, status = ?output.status, stdout_bytes = output.stdout.len(), "External command finished.");
                Ok(output)
            }
            Ok(Err(e)) => Err(ToolError::Io { program: program.to_string(), source: e }),
            Err(_) => {
                warn!(program, timeout_secs = timeout.as_secs(), "External command timed out, killing it.");
                Err(ToolError::TimedOut { program: program.to_string(), timeout })
            }
        }
    }
}

/// Runs `<program> <flag>` and returns the first line of its output.
pub async fn probe_version(
    runner: &dyn CommandRunner,
    program: &str,
    flag: &str,
) -> Result<String, ToolError> {
    let output = runner
        .run(program, &[flag.to_string()], PROBE_TIMEOUT)
        .await?
        .into_success(program)?;
    Ok(output
        .combined()
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string())
}
