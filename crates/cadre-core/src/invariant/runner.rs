//! Generic command execution, used by the Analysis phase (baseline capture)
//! and the Integration Verification phase (build/test/lint commands).

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// A named shell command with an expected exit code and a timeout.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub expected_exit_code: i32,
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            expected_exit_code: 0,
            timeout_secs: 300,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_expected_exit_code(mut self, code: i32) -> Self {
        self.expected_exit_code = code;
        self
    }
}

/// The result of executing a single command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command passed (exit code matched `expected_exit_code`).
    pub passed: bool,
    /// The actual exit code returned by the process, or `None` if the
    /// process was terminated by a signal or timed out.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Run a command's spec in the given working directory and return the
/// result. The exit code is compared against `spec.expected_exit_code`.
pub async fn run_command(spec: &CommandSpec, working_dir: &Path) -> Result<CommandResult> {
    let start = Instant::now();
    let timeout = Duration::from_secs(spec.timeout_secs.max(1));

    let mut child = Command::new(&spec.command)
        .args(&spec.args)
        .current_dir(working_dir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .with_context(|| {
            format!(
                "failed to execute {:?} (command: {} {})",
                spec.name,
                spec.command,
                spec.args.join(" "),
            )
        })?;

    // Take stdout/stderr handles so we can read them concurrently with
    // waiting for the process. This avoids deadlocks if the child fills the
    // pipe buffer.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let read_stdout = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    let read_stderr = async {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await.ok();
        }
        String::from_utf8_lossy(&buf).into_owned()
    };

    match tokio::time::timeout(timeout, async {
        let (wait_result, stdout, stderr) = tokio::join!(child.wait(), read_stdout, read_stderr);
        (wait_result, stdout, stderr)
    })
    .await
    {
        Ok((Ok(status), stdout, stderr)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let exit_code = status.code();
            let passed = exit_code == Some(spec.expected_exit_code);

            Ok(CommandResult {
                passed,
                exit_code,
                stdout,
                stderr,
                duration_ms,
            })
        }
        Ok((Err(e), _, _)) => Err(e).with_context(|| {
            format!(
                "failed to wait on {:?} (command: {} {})",
                spec.name,
                spec.command,
                spec.args.join(" "),
            )
        }),
        Err(_) => {
            let _ = child.kill().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            Ok(CommandResult {
                passed: false,
                exit_code: None,
                stdout: String::new(),
                stderr: format!(
                    "{:?} timed out after {}s",
                    spec.name, spec.timeout_secs
                ),
                duration_ms,
            })
        }
    }
}
