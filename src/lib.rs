//! gantry - a dependency-aware pipeline scheduler over elastically
//! provisioned compute.
//!
//! Tasks form a dependency graph. The [`TaskScheduler`] provisions compute
//! resources through a [`ResourceFactory`], runs each Ready task on a
//! resource that satisfies its requirements, and tears every resource down
//! when the pipeline finishes.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod platform;
pub mod scheduler;
pub mod testing;

pub use config::{ConfigError, PipelineBuilder, PipelineConfig, YamlLoader, load_pipeline};
pub use core::graph::{GraphError, TaskGraph};
pub use core::resource::{Capacity, ResourceRequirements, ResourceStatus};
pub use core::retry::{Operation, ResourceTimings};
pub use core::task::{Task, TaskStatus};
pub use core::types::{ResourceId, TaskId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{CommandOutput, CommandRunner, DryRunRunner, ShellRunner};
pub use platform::{
    ComputeResource, ElasticFactory, ElasticInstance, LocalFactory, LocalNode, ResourceError,
    ResourceFactory,
};
pub use scheduler::{FailurePolicy, SchedulerError, SchedulerResult, TaskReport, TaskScheduler};
