//! Testing utilities for users of the gantry library.
//!
//! This module provides helpers for exercising resources and schedulers
//! without a cloud provider:
//!
//! - [`ScriptedRunner`]: a [`CommandRunner`] that answers commands from a script
//! - [`RecordingHandler`]: an [`EventHandler`] that keeps every event it sees

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::events::{Event, EventHandler};
use crate::execution::{CommandOutput, CommandRunner};

/// One recorded command invocation.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// The command string as received.
    pub command: String,
    /// When the runner started handling it.
    pub started: Instant,
    /// When the runner returned.
    pub finished: Instant,
}

struct Rule {
    pattern: String,
    responses: VecDeque<CommandOutput>,
    delay: Duration,
}

/// A command runner driven by substring rules.
///
/// Each rule matches commands containing its pattern; the first matching rule
/// (in registration order) answers. A rule with several responses hands them
/// out in order and repeats the last one. Unmatched commands succeed with
/// empty output.
///
/// # Example
///
/// ```
/// use gantry::execution::{CommandOutput, CommandRunner};
/// use gantry::testing::ScriptedRunner;
///
/// # tokio_test_block(async {
/// let runner = ScriptedRunner::new();
/// runner.respond_sequence("instances create", vec![
///     CommandOutput::new("", "quota exceeded", 1),
///     CommandOutput::new("created", "", 0),
/// ]);
///
/// let first = runner.run("gcloud compute instances create vm-1").await.unwrap();
/// let second = runner.run("gcloud compute instances create vm-1").await.unwrap();
/// assert!(!first.success());
/// assert!(second.success());
/// assert_eq!(runner.call_count("instances create"), 2);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f);
/// # }
/// ```
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CallRecord>>,
}

impl ScriptedRunner {
    /// Create a runner with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command containing `pattern` with `output`.
    pub fn respond(&self, pattern: impl Into<String>, output: CommandOutput) {
        self.respond_sequence(pattern, vec![output]);
    }

    /// Answer commands containing `pattern` with `outputs` in order,
    /// repeating the last one once the sequence is exhausted.
    pub fn respond_sequence(&self, pattern: impl Into<String>, outputs: Vec<CommandOutput>) {
        self.add_rule(pattern.into(), outputs, Duration::ZERO);
    }

    /// Like [`ScriptedRunner::respond`], but take `delay` before answering.
    pub fn respond_after(
        &self,
        pattern: impl Into<String>,
        output: CommandOutput,
        delay: Duration,
    ) {
        self.add_rule(pattern.into(), vec![output], delay);
    }

    /// Make every command containing `pattern` exit with status 1.
    pub fn fail(&self, pattern: impl Into<String>) {
        self.respond(pattern, CommandOutput::new("", "scripted failure", 1));
    }

    fn add_rule(&self, pattern: String, outputs: Vec<CommandOutput>, delay: Duration) {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules.push(Rule {
            pattern,
            responses: outputs.into(),
            delay,
        });
    }

    fn next_response(&self, command: &str) -> (CommandOutput, Duration) {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rule) = rules.iter_mut().find(|r| command.contains(&r.pattern)) else {
            return (CommandOutput::new("", "", 0), Duration::ZERO);
        };
        let output = if rule.responses.len() > 1 {
            rule.responses.pop_front().unwrap_or_default()
        } else {
            rule.responses.front().cloned().unwrap_or_default()
        };
        (output, rule.delay)
    }

    /// Every command received so far, in order of completion.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Commands received so far that contain `pattern`.
    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.command.contains(pattern))
            .map(|c| c.command)
            .collect()
    }

    /// Number of commands received so far that contain `pattern`.
    pub fn call_count(&self, pattern: &str) -> usize {
        self.commands_matching(pattern).len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str) -> std::io::Result<CommandOutput> {
        let started = Instant::now();
        let (output, delay) = self.next_response(command);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CallRecord {
                command: command.to_string(),
                started,
                finished: Instant::now(),
            });
        Ok(output)
    }
}

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Number of received events matching a predicate.
    pub async fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unmatched_command_succeeds() {
        let runner = ScriptedRunner::new();

        let output = runner.run("anything").await.unwrap();

        assert!(output.success());
        assert_eq!(runner.call_count("anything"), 1);
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let runner = ScriptedRunner::new();
        runner.respond("describe", CommandOutput::new("first", "", 0));
        runner.respond("describe vm", CommandOutput::new("second", "", 0));

        let output = runner.run("describe vm-1").await.unwrap();

        assert_eq!(output.stdout, "first");
    }

    #[tokio::test]
    async fn test_sequence_repeats_last_response() {
        let runner = ScriptedRunner::new();
        runner.respond_sequence(
            "poll",
            vec![CommandOutput::new("a", "", 0), CommandOutput::new("b", "", 0)],
        );

        let outputs: Vec<String> = {
            let mut v = Vec::new();
            for _ in 0..3 {
                v.push(runner.run("poll").await.unwrap().stdout);
            }
            v
        };

        assert_eq!(outputs, vec!["a", "b", "b"]);
    }

    #[tokio::test]
    async fn test_delay_is_recorded() {
        let runner = ScriptedRunner::new();
        runner.respond_after("slow", CommandOutput::new("", "", 0), Duration::from_millis(30));

        runner.run("slow job").await.unwrap();

        let call = &runner.calls()[0];
        assert!(call.finished.duration_since(call.started) >= Duration::from_millis(30));
    }
}
