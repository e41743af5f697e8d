//! Core data model: identifiers, tasks, the task graph, resource
//! requirements and retry rules.

pub mod graph;
pub mod resource;
pub mod retry;
pub mod task;
pub mod types;
