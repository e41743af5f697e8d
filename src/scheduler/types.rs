//! Scheduler type definitions.
//!
//! This module contains the error type, the failure policy and the run
//! report produced by the scheduler.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::core::graph::GraphError;
use crate::core::task::TaskStatus;
use crate::core::types::{ResourceId, TaskId};

/// Errors that prevent a pipeline from starting.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The task graph failed validation.
    #[error("invalid task graph: {0}")]
    InvalidGraph(#[from] GraphError),

    /// The resource limit leaves no room for any resource.
    #[error("max_resources must be at least 1")]
    NoCapacity,
}

/// What the scheduler does once a task has Failed.
///
/// Dependents of a failed task stay Pending under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop launching new work and let in-flight tasks finish.
    #[default]
    StopLaunching,
    /// Keep scheduling tasks that do not depend on the failure.
    ContinueIndependent,
}

/// Final state of one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Resource the task last ran on (or was provisioned for).
    pub resource: Option<ResourceId>,
    /// Wall time of the final run.
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone)]
pub struct SchedulerResult {
    pub pipeline: String,
    /// True only if every task Completed.
    pub success: bool,
    pub duration: Duration,
    /// Every task, in submission order.
    pub tasks: Vec<TaskReport>,
    pub failed_tasks: Vec<TaskId>,
    /// Tasks that never ran because a prerequisite Failed.
    pub blocked_tasks: Vec<TaskId>,
    pub resources_provisioned: usize,
    /// Sum of resource costs, for resources that track pricing.
    pub total_cost: f64,
}

impl SchedulerResult {
    /// Final status of a task.
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.iter().find(|t| &t.id == id).map(|t| t.status)
    }

    pub fn report(&self, id: &TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| &t.id == id)
    }

    pub fn completed_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_policy_serde() {
        let policy: FailurePolicy = serde_yaml::from_str("continue_independent").unwrap();

        assert_eq!(policy, FailurePolicy::ContinueIndependent);
        assert_eq!(FailurePolicy::default(), FailurePolicy::StopLaunching);
    }

    #[test]
    fn test_result_lookup() {
        let result = SchedulerResult {
            pipeline: "wgs".into(),
            success: false,
            duration: Duration::from_secs(1),
            tasks: vec![
                TaskReport {
                    id: TaskId::new("a"),
                    status: TaskStatus::Complete,
                    resource: None,
                    duration: None,
                    error: None,
                },
                TaskReport {
                    id: TaskId::new("b"),
                    status: TaskStatus::Failed,
                    resource: None,
                    duration: None,
                    error: Some("boom".into()),
                },
            ],
            failed_tasks: vec![TaskId::new("b")],
            blocked_tasks: vec![],
            resources_provisioned: 1,
            total_cost: 0.0,
        };

        assert_eq!(result.status(&TaskId::new("a")), Some(TaskStatus::Complete));
        assert_eq!(result.report(&TaskId::new("b")).unwrap().error.as_deref(), Some("boom"));
        assert_eq!(result.completed_count(), 1);
        assert_eq!(result.status(&TaskId::new("zz")), None);
    }
}
