//! Pipeline tasks.
//!
//! A [`Task`] is a named shell command with resource requirements and a set
//! of prerequisite tasks. The command string itself is opaque: it is produced
//! by a per-step command builder and only ever handed to a compute resource.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::resource::ResourceRequirements;
use super::types::TaskId;

/// Execution status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting on prerequisites.
    Pending,
    /// Every prerequisite is Complete; waiting for a resource.
    Ready,
    /// Executing on a compute resource.
    Running,
    /// Finished successfully.
    Complete,
    /// Failed after the resource exhausted its retries.
    Failed,
}

impl TaskStatus {
    /// Check whether the task will not change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A unit of work in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique, stable identifier.
    pub id: TaskId,

    /// Step kind (e.g. "align", "merge").
    pub kind: String,

    /// Literal shell command to run.
    pub command: String,

    /// Resource requirements.
    pub requirements: ResourceRequirements,

    /// Tasks that must be Complete before this one may start.
    pub requires: Vec<TaskId>,

    /// Retries granted to the run command. `None` uses the resource default.
    pub num_retries: Option<u32>,

    /// Log failures of this task at debug level.
    pub quiet: bool,
}

impl Task {
    /// Create a new builder for a task.
    pub fn builder(id: impl Into<TaskId>, command: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(id, command)
    }

    /// Check whether the task has no prerequisites.
    pub fn is_root(&self) -> bool {
        self.requires.is_empty()
    }
}

/// Builder for creating [`Task`] instances.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    id: TaskId,
    kind: Option<String>,
    command: String,
    requirements: ResourceRequirements,
    requires: Vec<TaskId>,
    num_retries: Option<u32>,
    quiet: bool,
}

impl TaskBuilder {
    /// Create a new builder with the given id and command.
    pub fn new(id: impl Into<TaskId>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: None,
            command: command.into(),
            requirements: ResourceRequirements::default(),
            requires: Vec::new(),
            num_retries: None,
            quiet: false,
        }
    }

    /// Set the step kind.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Set the resource requirements.
    pub fn requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Set the minimum CPU count.
    pub fn min_cpus(mut self, cpus: u32) -> Self {
        self.requirements.min_cpus = cpus;
        self
    }

    /// Add a single prerequisite.
    pub fn requires(mut self, id: impl Into<TaskId>) -> Self {
        self.requires.push(id.into());
        self
    }

    /// Add multiple prerequisites.
    pub fn requires_all<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.requires.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Override the run retry budget.
    pub fn num_retries(mut self, retries: u32) -> Self {
        self.num_retries = Some(retries);
        self
    }

    /// Mark failures as expected.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Build the `Task`. The kind defaults to the task id.
    pub fn build(self) -> Task {
        let kind = self.kind.unwrap_or_else(|| self.id.as_str().to_string());
        Task {
            id: self.id,
            kind,
            command: self.command,
            requirements: self.requirements,
            requires: self.requires,
            num_retries: self.num_retries,
            quiet: self.quiet,
        }
    }
}
