//! Task dependency graph.
//!
//! The graph owns every task of a pipeline run together with its status.
//! Tasks are kept in submission order, which is also the scheduling priority
//! when several tasks become Ready at once.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use super::task::{Task, TaskStatus};
use super::types::TaskId;

/// Errors that can occur when building a task graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A cycle was detected in the graph.
    #[error("cycle detected involving tasks: {}", join_ids(.0))]
    CycleDetected(Vec<TaskId>),

    /// A task requires a task that doesn't exist.
    #[error("missing requirement: task '{from}' requires non-existent task '{to}'")]
    MissingRequirement { from: TaskId, to: TaskId },

    /// A task lists itself as a requirement.
    #[error("task '{0}' cannot require itself")]
    SelfRequirement(TaskId),

    /// Attempted to add a duplicate task.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// Task not found in the graph.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
}

/// A task together with its current status.
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// The task definition.
    pub task: Task,

    /// Current status.
    pub status: TaskStatus,
}

/// Submission-ordered graph of tasks and their `requires` edges.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<TaskId, usize>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from tasks and validate it.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for task in tasks {
            graph.add_task(task)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Register a task. Requirements are checked by [`TaskGraph::validate`],
    /// so tasks may be added in any order.
    pub fn add_task(&mut self, task: Task) -> Result<(), GraphError> {
        if self.index.contains_key(&task.id) {
            return Err(GraphError::DuplicateTask(task.id));
        }
        self.index.insert(task.id.clone(), self.nodes.len());
        self.nodes.push(TaskNode {
            task,
            status: TaskStatus::Pending,
        });
        Ok(())
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the number of tasks.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over tasks in submission order.
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter()
    }

    /// Get a task by ID.
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.nodes[i].task)
    }

    /// Get the status of a task.
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.index.get(id).map(|&i| self.nodes[i].status)
    }

    /// Set the status of a task.
    pub fn set_status(&mut self, id: &TaskId, status: TaskStatus) -> Result<(), GraphError> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| GraphError::TaskNotFound(id.clone()))?;
        self.nodes[i].status = status;
        Ok(())
    }

    /// Tasks that directly require the given task.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|n| n.task.requires.contains(id))
            .map(|n| n.task.id.clone())
            .collect()
    }

    /// Promote Pending tasks whose requirements are all Complete to Ready,
    /// then return every Ready task in submission order.
    pub fn refresh_ready(&mut self) -> Vec<TaskId> {
        let promotable: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.status == TaskStatus::Pending && self.requirements_complete(&n.task))
            .map(|(i, _)| i)
            .collect();

        for i in promotable {
            self.nodes[i].status = TaskStatus::Ready;
        }

        self.nodes
            .iter()
            .filter(|n| n.status == TaskStatus::Ready)
            .map(|n| n.task.id.clone())
            .collect()
    }

    fn requirements_complete(&self, task: &Task) -> bool {
        task.requires
            .iter()
            .all(|req| self.status(req) == Some(TaskStatus::Complete))
    }

    /// Check whether any transitive requirement of a task has Failed.
    pub fn is_blocked(&self, id: &TaskId) -> bool {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&TaskId> = match self.get(id) {
            Some(task) => task.requires.iter().collect(),
            None => return false,
        };

        while let Some(req) = queue.pop_front() {
            if !seen.insert(req) {
                continue;
            }
            match self.index.get(req).map(|&i| &self.nodes[i]) {
                Some(node) if node.status == TaskStatus::Failed => return true,
                Some(node) => queue.extend(node.task.requires.iter()),
                None => {}
            }
        }
        false
    }

    /// Pending tasks that can never run because a prerequisite Failed.
    pub fn blocked_tasks(&self) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|n| n.status == TaskStatus::Pending && self.is_blocked(&n.task.id))
            .map(|n| n.task.id.clone())
            .collect()
    }

    /// Pending or Ready tasks that may still be scheduled.
    pub fn outstanding(&self) -> impl Iterator<Item = &Task> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, TaskStatus::Pending | TaskStatus::Ready))
            .filter(|n| !self.is_blocked(&n.task.id))
            .map(|n| &n.task)
    }

    /// Tasks currently in the given status, in submission order.
    pub fn with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|n| n.status == status)
            .map(|n| n.task.id.clone())
            .collect()
    }

    /// Return tasks in topological order (ties broken by submission order).
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        // Kahn's algorithm
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.task.requires.len()).collect();
        let mut reverse_deps: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];

        for (i, node) in self.nodes.iter().enumerate() {
            for req in &node.task.requires {
                let j = *self.index.get(req).ok_or_else(|| GraphError::MissingRequirement {
                    from: node.task.id.clone(),
                    to: req.clone(),
                })?;
                reverse_deps[j].push(i);
            }
        }

        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(i) = queue.pop_front() {
            result.push(self.nodes[i].task.id.clone());
            for &next in &reverse_deps[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if result.len() != self.nodes.len() {
            let cycle: Vec<TaskId> = (0..self.nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].task.id.clone())
                .collect();
            return Err(GraphError::CycleDetected(cycle));
        }

        Ok(result)
    }

    /// Validate the graph structure.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for req in &node.task.requires {
                if req == &node.task.id {
                    return Err(GraphError::SelfRequirement(req.clone()));
                }
                if !self.index.contains_key(req) {
                    return Err(GraphError::MissingRequirement {
                        from: node.task.id.clone(),
                        to: req.clone(),
                    });
                }
            }
        }

        self.topological_order()?;
        Ok(())
    }
}
