//! Command runners.
//!
//! A [`CommandRunner`] takes a fully generated shell command string and
//! returns its raw stdout, stderr and exit code. The scheduler never assumes
//! a particular command-line tool; provisioning backends and task commands
//! alike are just strings handed to a runner.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Captured result of running a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code, `None` if the process was killed by a signal or never ran.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Create an output with the given exit code.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    /// Check whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Check whether both streams are empty.
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Runs generated shell commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// Returns `Err` only when the command could not be launched at all.
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput>;
}

/// Runs commands through a local shell (`sh -c` by default).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    /// Create a runner using `sh`.
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Create a runner using a specific shell binary.
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}

/// Logs every command instead of running it. Every command succeeds with
/// empty output, so a whole pipeline can be walked without side effects.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput> {
        info!(command = %command, "dry run");
        Ok(CommandOutput::new("", "", 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_runner_captures_stdout_and_stderr() {
        let runner = ShellRunner::new();

        let output = runner
            .run("echo stdout_msg; echo stderr_msg >&2")
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "stdout_msg");
        assert_eq!(output.stderr.trim(), "stderr_msg");
    }

    #[tokio::test]
    async fn test_shell_runner_reports_exit_code() {
        let runner = ShellRunner::new();

        let output = runner.run("exit 42").await.unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(42));
    }

    #[tokio::test]
    async fn test_shell_runner_supports_pipes() {
        let runner = ShellRunner::new();

        let output = runner.run("printf 'b\\na\\n' | sort | head -1").await.unwrap();

        assert_eq!(output.stdout.trim(), "a");
    }

    #[tokio::test]
    async fn test_missing_shell_is_launch_error() {
        let runner = ShellRunner::with_shell("/nonexistent/shell");

        assert!(runner.run("true").await.is_err());
    }

    #[tokio::test]
    async fn test_dry_run_never_executes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("touched");

        let output = DryRunRunner
            .run(&format!("touch {}", marker.display()))
            .await
            .unwrap();

        assert!(output.success());
        assert!(output.is_empty());
        assert!(!marker.exists());
    }

    #[test]
    fn test_empty_output() {
        assert!(CommandOutput::new("", "", 0).is_empty());
        assert!(!CommandOutput::new("x", "", 0).is_empty());
    }
}
