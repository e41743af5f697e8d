//! Command executor.
//!
//! A [`Process`] is one invocation of one command on behalf of a compute
//! resource operation. [`Process::run`] launches it in the background and
//! returns immediately; [`Process::wait`] blocks until it terminates and
//! captures its output exactly once.
//!
//! A non-zero exit marks the process failed but is not an error here:
//! whether to retry is decided by the owning resource.

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use super::runner::{CommandOutput, CommandRunner};

/// Errors from misusing an executor.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// `wait()` was called before `run()`.
    #[error("process '{0}' was never started")]
    NotStarted(String),
}

/// A single command invocation with its retry budget.
pub struct Process {
    command: String,
    num_retries: u32,
    quiet: bool,
    runner: Arc<dyn CommandRunner>,
    handle: Option<JoinHandle<std::io::Result<CommandOutput>>>,
    output: Option<CommandOutput>,
    complete: bool,
    failed: bool,
    stopped: bool,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("command", &self.command)
            .field("num_retries", &self.num_retries)
            .field("complete", &self.complete)
            .field("failed", &self.failed)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Process {
    /// Create an executor for a command. Nothing runs until [`Process::run`].
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        command: impl Into<String>,
        num_retries: u32,
    ) -> Self {
        Self {
            command: command.into(),
            num_retries,
            quiet: false,
            runner,
            handle: None,
            output: None,
            complete: false,
            failed: false,
            stopped: false,
        }
    }

    /// Builder: log failures at low severity.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Launch the command in the background.
    ///
    /// Calling `run` on a process that is already running or complete does nothing.
    pub fn run(&mut self) {
        if self.handle.is_some() || self.complete {
            return;
        }
        let runner = Arc::clone(&self.runner);
        let command = self.command.clone();
        self.handle = Some(tokio::spawn(async move { runner.run(&command).await }));
    }

    /// Wait for the command to terminate and return its output.
    ///
    /// Idempotent: a complete process returns its cached output. Dropping the
    /// returned future before it resolves leaves the command running and the
    /// process waitable again.
    pub async fn wait(&mut self) -> Result<CommandOutput, ProcessError> {
        if let Some(output) = self.output.as_ref().filter(|_| self.complete) {
            return Ok(output.clone());
        }

        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| ProcessError::NotStarted(self.command.clone()))?;

        let output = match handle.await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => CommandOutput {
                stdout: String::new(),
                stderr: format!("failed to launch command: {}", e),
                exit_code: None,
            },
            Err(e) => CommandOutput {
                stdout: String::new(),
                stderr: format!("command task aborted: {}", e),
                exit_code: None,
            },
        };

        self.handle = None;
        self.failed = !output.success();
        self.complete = true;
        self.output = Some(output.clone());
        Ok(output)
    }

    /// Build the executor for the next attempt, or `None` if the budget is spent.
    pub fn retry(&self) -> Option<Process> {
        if self.num_retries == 0 {
            return None;
        }
        let runner = Arc::clone(&self.runner);
        let next = Process::new(runner, self.command.clone(), self.num_retries - 1);
        Some(next.quiet(self.quiet))
    }

    /// Mark the process as cancelled. Advisory only: the command keeps running.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Get the command string.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Remaining retries.
    pub fn num_retries(&self) -> u32 {
        self.num_retries
    }

    /// Captured output, once complete.
    pub fn output(&self) -> Option<&CommandOutput> {
        self.output.as_ref()
    }

    /// Check whether the command has been launched.
    pub fn is_started(&self) -> bool {
        self.handle.is_some() || self.complete
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ShellRunner;
    use crate::testing::ScriptedRunner;

    fn shell() -> Arc<dyn CommandRunner> {
        Arc::new(ShellRunner::new())
    }

    #[tokio::test]
    async fn test_wait_captures_output() {
        let mut proc = Process::new(shell(), "echo hello", 0);
        proc.run();

        let output = proc.wait().await.unwrap();

        assert_eq!(output.stdout.trim(), "hello");
        assert!(proc.is_complete());
        assert!(!proc.has_failed());
    }

    #[tokio::test]
    async fn test_nonzero_exit_marks_failed_without_error() {
        let mut proc = Process::new(shell(), "echo oops >&2; exit 3", 2);
        proc.run();

        let output = proc.wait().await.unwrap();

        assert!(proc.has_failed());
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_wait_is_idempotent() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("count", CommandOutput::new("1", "", 0));
        let mut proc = Process::new(runner.clone(), "count", 0);
        proc.run();

        let first = proc.wait().await.unwrap();
        let second = proc.wait().await.unwrap();
        proc.run();
        let third = proc.wait().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(runner.call_count("count"), 1);
    }

    #[tokio::test]
    async fn test_wait_before_run_is_error() {
        let mut proc = Process::new(shell(), "true", 0);

        let err = proc.wait().await.unwrap_err();

        assert!(matches!(err, ProcessError::NotStarted(_)));
    }

    #[tokio::test]
    async fn test_launch_failure_counts_as_failed_command() {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(ShellRunner::with_shell("/nonexistent/shell"));
        let mut proc = Process::new(runner, "true", 0);
        proc.run();

        let output = proc.wait().await.unwrap();

        assert!(proc.has_failed());
        assert_eq!(output.exit_code, None);
        assert!(output.stderr.contains("failed to launch"));
    }

    #[test]
    fn test_retry_budget_strictly_decreases() {
        let proc = Process::new(shell(), "false", 2).quiet(true);

        let second = proc.retry().unwrap();
        let third = second.retry().unwrap();

        assert_eq!(second.num_retries(), 1);
        assert_eq!(third.num_retries(), 0);
        assert!(third.is_quiet());
        assert_eq!(third.command(), "false");
        assert!(third.retry().is_none());
    }

    #[test]
    fn test_stop_is_advisory_flag() {
        let mut proc = Process::new(shell(), "sleep 1", 0);
        assert!(!proc.is_stopped());

        proc.stop();

        assert!(proc.is_stopped());
        assert!(!proc.is_started());
    }
}
