//! Dependency-aware task scheduler.
//!
//! This module provides the scheduling loop that provisions compute
//! resources, assigns Ready tasks to them, and tears everything down.

mod engine;
mod types;

pub use engine::TaskScheduler;
pub use types::{FailurePolicy, SchedulerError, SchedulerResult, TaskReport};
