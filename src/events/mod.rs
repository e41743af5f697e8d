//! Lifecycle events and event handling.
//!
//! This module provides event emission for task and resource lifecycle
//! events, enabling observability into a pipeline run.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{ResourceId, TaskId};

/// Lifecycle events emitted during a pipeline run.
#[derive(Debug, Clone)]
pub enum Event {
    /// The scheduler started working on a pipeline.
    PipelineStarted {
        pipeline: String,
        task_count: usize,
        timestamp: Instant,
    },

    /// The scheduler finished (successfully or not).
    PipelineCompleted {
        pipeline: String,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },

    /// A compute resource finished provisioning and is Available.
    ResourceCreated {
        resource_id: ResourceId,
        cpus: u32,
        mem_gb: u32,
        timestamp: Instant,
    },

    /// A compute resource was torn down.
    ResourceDestroyed {
        resource_id: ResourceId,
        /// Total cost, when the resource tracks pricing.
        cost: Option<f64>,
        timestamp: Instant,
    },

    /// A task was assigned to a resource and started.
    TaskStarted {
        task_id: TaskId,
        resource_id: ResourceId,
        timestamp: Instant,
    },

    /// A task completed successfully.
    TaskCompleted {
        task_id: TaskId,
        resource_id: ResourceId,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task failed for good.
    TaskFailed {
        task_id: TaskId,
        resource_id: Option<ResourceId>,
        error: String,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::PipelineStarted { timestamp, .. } => *timestamp,
            Event::PipelineCompleted { timestamp, .. } => *timestamp,
            Event::ResourceCreated { timestamp, .. } => *timestamp,
            Event::ResourceDestroyed { timestamp, .. } => *timestamp,
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::TaskCompleted { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Create a PipelineStarted event.
    pub fn pipeline_started(pipeline: impl Into<String>, task_count: usize) -> Self {
        Event::PipelineStarted {
            pipeline: pipeline.into(),
            task_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a PipelineCompleted event.
    pub fn pipeline_completed(
        pipeline: impl Into<String>,
        success: bool,
        duration: Duration,
    ) -> Self {
        Event::PipelineCompleted {
            pipeline: pipeline.into(),
            success,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a ResourceCreated event.
    pub fn resource_created(resource_id: ResourceId, cpus: u32, mem_gb: u32) -> Self {
        Event::ResourceCreated {
            resource_id,
            cpus,
            mem_gb,
            timestamp: Instant::now(),
        }
    }

    /// Create a ResourceDestroyed event.
    pub fn resource_destroyed(resource_id: ResourceId, cost: Option<f64>) -> Self {
        Event::ResourceDestroyed {
            resource_id,
            cost,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(task_id: TaskId, resource_id: ResourceId) -> Self {
        Event::TaskStarted {
            task_id,
            resource_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(task_id: TaskId, resource_id: ResourceId, duration: Duration) -> Self {
        Event::TaskCompleted {
            task_id,
            resource_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(task_id: TaskId, resource_id: Option<ResourceId>, error: String) -> Self {
        Event::TaskFailed {
            task_id,
            resource_id,
            error,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
