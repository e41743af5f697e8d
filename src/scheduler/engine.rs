//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Promoting tasks to Ready once their requirements are Complete
//! - Assigning Ready tasks to idle resources, in submission order
//! - Provisioning new resources up to the resource limit
//! - Recording task outcomes and blocking dependents of failures
//! - Releasing idle resources and tearing everything down at the end
//! - Event emission
//!
//! The task graph and the resource pool are owned by a single scheduling
//! loop. Resource operations run as worker futures in a [`JoinSet`] and
//! report back to the loop, so a Ready task can never be assigned twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::graph::TaskGraph;
use crate::core::resource::ResourceRequirements;
use crate::core::task::{Task, TaskStatus};
use crate::core::types::{ResourceId, TaskId};
use crate::events::{Event, EventBus};
use crate::execution::CommandOutput;
use crate::platform::{ComputeResource, ErrorKind, ResourceError, ResourceFactory};

use super::types::{FailurePolicy, SchedulerError, SchedulerResult, TaskReport};

/// Default number of resources alive at once.
const DEFAULT_MAX_RESOURCES: usize = 4;

/// Default retry budget for task commands that do not set their own.
const DEFAULT_NUM_RETRIES: u32 = 3;

/// Where a pooled resource is in its life, from the scheduler's view.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// Being created on behalf of a Ready task.
    Creating(TaskId),
    /// Available with nothing to do.
    Idle,
    /// Running a task.
    Busy(TaskId),
    /// Being torn down.
    Destroying,
    /// Gone.
    Off,
}

struct PoolEntry {
    resource: Arc<dyn ComputeResource>,
    slot: Slot,
}

/// Message from a worker back to the scheduling loop.
enum WorkerResult {
    Created {
        index: usize,
        result: Result<(), ResourceError>,
    },
    Finished {
        index: usize,
        task_id: TaskId,
        elapsed: Duration,
        result: Result<CommandOutput, ResourceError>,
    },
    Destroyed {
        index: usize,
        result: Result<(), ResourceError>,
    },
}

/// Per-run mutable state.
#[derive(Default)]
struct RunState {
    pool: Vec<PoolEntry>,
    workers: JoinSet<WorkerResult>,
    reports: HashMap<TaskId, TaskReport>,
    halted: bool,
    starved: bool,
    total_cost: f64,
}

impl RunState {
    fn idle_fit(&self, requirements: &ResourceRequirements) -> Option<usize> {
        self.pool
            .iter()
            .position(|e| e.slot == Slot::Idle && e.resource.capacity().satisfies(requirements))
    }

    fn is_reserved_for(&self, task_id: &TaskId) -> bool {
        self.pool
            .iter()
            .any(|e| matches!(&e.slot, Slot::Creating(t) if t == task_id))
    }

    fn live_count(&self) -> usize {
        self.pool.iter().filter(|e| e.slot != Slot::Off).count()
    }

    fn report_mut(&mut self, task_id: &TaskId) -> &mut TaskReport {
        self.reports
            .entry(task_id.clone())
            .or_insert_with(|| TaskReport {
                id: task_id.clone(),
                status: TaskStatus::Pending,
                resource: None,
                duration: None,
                error: None,
            })
    }
}

/// Dependency-aware task scheduler over a pool of compute resources.
pub struct TaskScheduler {
    name: String,
    graph: TaskGraph,
    factory: Arc<dyn ResourceFactory>,
    max_resources: usize,
    failure_policy: FailurePolicy,
    default_num_retries: u32,
    event_bus: Option<Arc<EventBus>>,
}

impl TaskScheduler {
    /// Create a scheduler for a pipeline.
    pub fn new(
        name: impl Into<String>,
        graph: TaskGraph,
        factory: Arc<dyn ResourceFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            graph,
            factory,
            max_resources: DEFAULT_MAX_RESOURCES,
            failure_policy: FailurePolicy::default(),
            default_num_retries: DEFAULT_NUM_RETRIES,
            event_bus: None,
        }
    }

    /// Builder: cap the number of resources alive at once.
    pub fn with_max_resources(mut self, max_resources: usize) -> Self {
        self.max_resources = max_resources;
        self
    }

    /// Builder: set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Builder: retry budget for tasks that do not set their own.
    pub fn with_default_num_retries(mut self, retries: u32) -> Self {
        self.default_num_retries = retries;
        self
    }

    /// Builder: emit lifecycle events to a bus.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task graph, with statuses as of the last run.
    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Run every task to a terminal state (or until failure stops the run)
    /// and tear down all resources.
    pub async fn run(&mut self) -> Result<SchedulerResult, SchedulerError> {
        if self.max_resources == 0 {
            return Err(SchedulerError::NoCapacity);
        }
        self.graph.validate()?;

        let span = info_span!(
            "pipeline",
            pipeline = %self.name,
            task_count = self.graph.len(),
        );
        Ok(self.execute().instrument(span).await)
    }

    async fn execute(&mut self) -> SchedulerResult {
        let started = Instant::now();
        info!(
            max_resources = self.max_resources,
            policy = ?self.failure_policy,
            "Starting pipeline"
        );
        self.emit(Event::pipeline_started(self.name.clone(), self.graph.len()))
            .await;

        let mut state = RunState::default();
        loop {
            if self.launching(&state) {
                self.dispatch(&mut state).await;
            }
            self.release_idle(&mut state);

            let Some(joined) = state.workers.join_next().await else {
                break;
            };
            match joined {
                Ok(result) => self.handle_worker(&mut state, result).await,
                Err(e) => error!(error = %e, "Resource worker aborted"),
            }
        }

        self.teardown(&mut state).await;
        let result = self.build_result(&mut state, started.elapsed());

        if result.success {
            info!(duration = ?result.duration, cost = result.total_cost, "Pipeline complete");
        } else {
            error!(
                failed = result.failed_tasks.len(),
                blocked = result.blocked_tasks.len(),
                "Pipeline failed"
            );
        }
        self.emit(Event::pipeline_completed(
            self.name.clone(),
            result.success,
            result.duration,
        ))
        .await;
        result
    }

    fn launching(&self, state: &RunState) -> bool {
        !state.halted || self.failure_policy == FailurePolicy::ContinueIndependent
    }

    /// Place every Ready task, in submission order.
    async fn dispatch(&mut self, state: &mut RunState) {
        state.starved = false;

        for task_id in self.graph.refresh_ready() {
            if !self.launching(state) {
                break;
            }
            let Some(task) = self.graph.get(&task_id).cloned() else {
                continue;
            };

            if let Some(index) = state.idle_fit(&task.requirements) {
                self.start_task(state, index, task).await;
                continue;
            }
            if state.is_reserved_for(&task_id) {
                continue;
            }
            if state.live_count() >= self.max_resources {
                debug!(task = %task_id, "Resource limit reached, task waits");
                state.starved = true;
                continue;
            }

            match self.factory.build(task_id.as_str(), &task.requirements) {
                Ok(resource) => self.provision(state, resource, task_id),
                Err(e) => self.fail_task(state, &task_id, None, e.to_string()).await,
            }
        }
    }

    fn provision(&self, state: &mut RunState, resource: Arc<dyn ComputeResource>, task_id: TaskId) {
        let index = state.pool.len();
        info!(resource = %resource.id(), task = %task_id, "Provisioning resource");

        let worker = Arc::clone(&resource);
        let span = info_span!("create", resource = %resource.id());
        state.workers.spawn(
            async move {
                let result = worker.create().await;
                WorkerResult::Created { index, result }
            }
            .instrument(span),
        );
        state.pool.push(PoolEntry {
            resource,
            slot: Slot::Creating(task_id),
        });
    }

    async fn start_task(&mut self, state: &mut RunState, index: usize, task: Task) {
        let resource = Arc::clone(&state.pool[index].resource);
        state.pool[index].slot = Slot::Busy(task.id.clone());
        self.set_status(&task.id, TaskStatus::Running);

        let report = state.report_mut(&task.id);
        report.resource = Some(resource.id().clone());

        info!(task = %task.id, resource = %resource.id(), "Task started");
        self.emit(Event::task_started(task.id.clone(), resource.id().clone()))
            .await;

        let retries = task.num_retries.unwrap_or(self.default_num_retries);
        let span = info_span!("task", task = %task.id, resource = %resource.id());
        state.workers.spawn(
            async move {
                let started = Instant::now();
                let result = resource
                    .run(&task.id, &task.command, retries, task.quiet)
                    .await;
                WorkerResult::Finished {
                    index,
                    task_id: task.id,
                    elapsed: started.elapsed(),
                    result,
                }
            }
            .instrument(span),
        );
    }

    fn spawn_destroy(&self, state: &mut RunState, index: usize) {
        let resource = Arc::clone(&state.pool[index].resource);
        state.pool[index].slot = Slot::Destroying;
        debug!(resource = %resource.id(), "Destroying resource");

        let span = info_span!("destroy", resource = %resource.id());
        state.workers.spawn(
            async move {
                let result = resource.destroy(true).await;
                WorkerResult::Destroyed { index, result }
            }
            .instrument(span),
        );
    }

    /// Destroy idle resources that no outstanding task could use, or one of
    /// them when a Ready task is waiting for room under the limit.
    fn release_idle(&self, state: &mut RunState) {
        let stopping = !self.launching(state);
        let mut make_room = state.starved;

        let idle: Vec<usize> = state
            .pool
            .iter()
            .enumerate()
            .filter(|(_, e)| e.slot == Slot::Idle)
            .map(|(i, _)| i)
            .collect();

        for index in idle {
            let capacity = state.pool[index].resource.capacity();
            let wanted = !stopping
                && self
                    .graph
                    .outstanding()
                    .any(|t| capacity.satisfies(&t.requirements));

            if !wanted || make_room {
                debug!(
                    resource = %state.pool[index].resource.id(),
                    wanted,
                    "Releasing idle resource"
                );
                self.spawn_destroy(state, index);
                make_room = false;
            }
        }
        state.starved = false;
    }

    async fn handle_worker(&mut self, state: &mut RunState, result: WorkerResult) {
        match result {
            WorkerResult::Created { index, result: Ok(()) } => {
                let resource = Arc::clone(&state.pool[index].resource);
                state.pool[index].slot = Slot::Idle;
                let capacity = resource.capacity();
                info!(
                    resource = %resource.id(),
                    cpus = capacity.cpus,
                    mem_gb = capacity.mem_gb,
                    "Resource available"
                );
                self.emit(Event::resource_created(
                    resource.id().clone(),
                    capacity.cpus,
                    capacity.mem_gb,
                ))
                .await;
            }
            WorkerResult::Created { index, result: Err(e) } => {
                let resource = Arc::clone(&state.pool[index].resource);
                error!(resource = %resource.id(), error = %e, "Failed to provision resource");

                if let Slot::Creating(task_id) = state.pool[index].slot.clone() {
                    if self.graph.status(&task_id) == Some(TaskStatus::Ready) {
                        let message = format!("provisioning failed: {}", e);
                        self.fail_task(state, &task_id, Some(resource.id().clone()), message)
                            .await;
                    }
                }
                resource.lock();
                self.spawn_destroy(state, index);
            }
            WorkerResult::Finished {
                index,
                task_id,
                elapsed,
                result: Ok(_),
            } => {
                let resource_id = state.pool[index].resource.id().clone();
                state.pool[index].slot = Slot::Idle;
                self.set_status(&task_id, TaskStatus::Complete);
                state.report_mut(&task_id).duration = Some(elapsed);

                info!(
                    task = %task_id,
                    resource = %resource_id,
                    duration = ?elapsed,
                    "Task complete"
                );
                self.emit(Event::task_completed(task_id, resource_id, elapsed))
                    .await;
            }
            WorkerResult::Finished {
                index,
                task_id,
                elapsed,
                result: Err(e),
            } => {
                let resource_id = state.pool[index].resource.id().clone();
                state.report_mut(&task_id).duration = Some(elapsed);
                self.fail_task(state, &task_id, Some(resource_id), e.to_string())
                    .await;

                if e.kind() == ErrorKind::Locked {
                    self.spawn_destroy(state, index);
                } else {
                    state.pool[index].slot = Slot::Idle;
                }
            }
            WorkerResult::Destroyed { index, result } => {
                let resource = Arc::clone(&state.pool[index].resource);
                state.pool[index].slot = Slot::Off;
                if let Err(e) = result {
                    error!(resource = %resource.id(), error = %e, "Failed to destroy resource");
                }

                let cost = resource.cost();
                state.total_cost += cost.unwrap_or(0.0);
                info!(resource = %resource.id(), cost = ?cost, "Resource destroyed");
                self.emit(Event::resource_destroyed(resource.id().clone(), cost))
                    .await;
            }
        }
    }

    async fn fail_task(
        &mut self,
        state: &mut RunState,
        task_id: &TaskId,
        resource: Option<ResourceId>,
        message: String,
    ) {
        self.set_status(task_id, TaskStatus::Failed);
        error!(task = %task_id, error = %message, "Task failed");

        let dependents = self.graph.dependents(task_id);
        if !dependents.is_empty() {
            warn!(task = %task_id, dependents = dependents.len(), "Dependent tasks will not run");
        }
        if !state.halted && self.failure_policy == FailurePolicy::StopLaunching {
            warn!("No new tasks will be launched");
        }
        state.halted = true;

        let report = state.report_mut(task_id);
        report.error = Some(message.clone());
        if resource.is_some() {
            report.resource = resource.clone();
        }

        self.emit(Event::task_failed(task_id.clone(), resource, message))
            .await;
    }

    /// Destroy everything still alive and wait for it.
    async fn teardown(&mut self, state: &mut RunState) {
        let alive: Vec<usize> = state
            .pool
            .iter()
            .enumerate()
            .filter(|(_, e)| e.slot == Slot::Idle)
            .map(|(i, _)| i)
            .collect();
        for index in alive {
            self.spawn_destroy(state, index);
        }

        while let Some(joined) = state.workers.join_next().await {
            match joined {
                Ok(result) => self.handle_worker(state, result).await,
                Err(e) => error!(error = %e, "Resource worker aborted"),
            }
        }
    }

    fn build_result(&self, state: &mut RunState, duration: Duration) -> SchedulerResult {
        let tasks: Vec<TaskReport> = self
            .graph
            .nodes()
            .map(|node| {
                let mut report = state.report_mut(&node.task.id).clone();
                report.status = node.status;
                report
            })
            .collect();

        SchedulerResult {
            pipeline: self.name.clone(),
            success: tasks.iter().all(|t| t.status == TaskStatus::Complete),
            duration,
            failed_tasks: self.graph.with_status(TaskStatus::Failed),
            blocked_tasks: self.graph.blocked_tasks(),
            tasks,
            resources_provisioned: state.pool.len(),
            total_cost: state.total_cost,
        }
    }

    fn set_status(&mut self, task_id: &TaskId, status: TaskStatus) {
        if let Err(e) = self.graph.set_status(task_id, status) {
            warn!(task = %task_id, error = %e, "Failed to update task status");
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}
