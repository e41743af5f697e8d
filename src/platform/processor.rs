//! Compute resource abstraction.
//!
//! A compute resource ("processor") is one unit of executable capacity: a
//! cluster node or a cloud instance. Every backend implements
//! [`ComputeResource`]; the shared bookkeeping (executor map, status lock,
//! Locked flag, timestamps and the retry loop) lives in [`ProcessorCore`].
//!
//! # Concurrency
//!
//! Each public operation holds the resource's status lock for its whole
//! duration, so no two operations on one resource overlap. The Locked flag
//! is a watch channel: every wait point selects on it, which lets a locked
//! resource abandon in-flight waits and release the status lock so that
//! `destroy` can proceed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{MutexGuard, watch};
use tracing::{debug, error, info, warn};

use crate::core::resource::{Capacity, ResourceStatus};
use crate::core::retry::{Operation, ResourceTimings, RetryVerdict, retry_verdict};
use crate::core::types::{ResourceId, TaskId};
use crate::execution::{CommandOutput, CommandRunner, Process, ProcessError};

use super::pricing::PricingError;

/// Classification of a resource error, used by callers to branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Worth retrying locally.
    Transient,
    /// Unrecoverable.
    Fatal,
    /// The resource was locked.
    Locked,
    /// The resource never became ready.
    Timeout,
}

/// Errors surfaced by compute resources.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// A non-destroy operation was attempted on (or interrupted by) a locked resource.
    #[error("resource '{resource}' is locked, operation '{operation}' aborted")]
    Locked { resource: ResourceId, operation: String },

    /// A command failed and could not be retried.
    #[error("operation '{operation}' failed on resource '{resource}' (exit code {exit_code:?})")]
    CommandFailed {
        resource: ResourceId,
        operation: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The resource was provisioned but its startup never completed.
    #[error("resource '{resource}' was created but never became ready after {resets} resets")]
    StartupTimeout { resource: ResourceId, resets: u32 },

    /// A single provider query failed.
    #[error("provider query for '{resource}' failed: {message}")]
    Provider { resource: ResourceId, message: String },

    /// Provider queries kept failing after every retry.
    #[error("unable to get status of resource '{resource}': {message}")]
    StatusUnavailable { resource: ResourceId, message: String },

    /// No resource shape can host the request.
    #[error("cannot provision '{label}': {message}")]
    Unsatisfiable { label: String, message: String },

    /// Machine type resolution failed.
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// An executor was misused.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl ResourceError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResourceError::Locked { .. } => ErrorKind::Locked,
            ResourceError::StartupTimeout { .. } => ErrorKind::Timeout,
            ResourceError::Provider { .. } => ErrorKind::Transient,
            ResourceError::CommandFailed { .. }
            | ResourceError::StatusUnavailable { .. }
            | ResourceError::Unsatisfiable { .. }
            | ResourceError::Pricing(_)
            | ResourceError::Process(_) => ErrorKind::Fatal,
        }
    }
}

/// The capability interface every compute backend provides.
#[async_trait]
pub trait ComputeResource: Send + Sync {
    /// Resource identifier.
    fn id(&self) -> &ResourceId;

    /// Current capacity. For elastic instances this reflects the resolved
    /// machine shape once `create()` has run, which may exceed the request.
    fn capacity(&self) -> Capacity;

    /// Provision the resource and block until it is servicing work.
    async fn create(&self) -> Result<(), ResourceError>;

    /// Tear the resource down. Allowed on a locked resource.
    async fn destroy(&self, wait: bool) -> Result<(), ResourceError>;

    /// Run a task command, retrying per the resource's retry policy.
    async fn run(
        &self,
        task_id: &TaskId,
        command: &str,
        num_retries: u32,
        quiet: bool,
    ) -> Result<CommandOutput, ResourceError>;

    /// Reconcile and return the current status (a live poll, not a cached read).
    async fn get_status(&self) -> Result<ResourceStatus, ResourceError>;

    /// Set the Locked flag: abort in-flight waits and refuse new work.
    fn lock(&self);

    /// Check the Locked flag.
    fn is_locked(&self) -> bool;

    /// Accumulated cost, once the resource was created and destroyed.
    fn cost(&self) -> Option<f64> {
        None
    }
}

/// Status reconciliation used by the retry loop.
///
/// Implementations must not take the status lock: the retry loop already
/// runs under it.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Reconcile the current status from the backend.
    async fn sync_status(&self) -> Result<ResourceStatus, ResourceError>;
}

/// State and behaviour shared by every compute resource.
pub struct ProcessorCore {
    id: ResourceId,
    capacity: Mutex<Capacity>,
    default_num_retries: u32,
    timings: ResourceTimings,
    runner: Arc<dyn CommandRunner>,
    processes: Mutex<HashMap<String, Process>>,
    status_lock: tokio::sync::Mutex<()>,
    status: Mutex<ResourceStatus>,
    locked: watch::Sender<bool>,
    start_time: Mutex<Option<DateTime<Utc>>>,
    stop_time: Mutex<Option<DateTime<Utc>>>,
}

impl ProcessorCore {
    /// Create the shared state for a resource.
    pub fn new(
        id: ResourceId,
        capacity: Capacity,
        default_num_retries: u32,
        timings: ResourceTimings,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let (locked, _) = watch::channel(false);
        Self {
            id,
            capacity: Mutex::new(capacity),
            default_num_retries,
            timings,
            runner,
            processes: Mutex::new(HashMap::new()),
            status_lock: tokio::sync::Mutex::new(()),
            status: Mutex::new(ResourceStatus::Off),
            locked,
            start_time: Mutex::new(None),
            stop_time: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn capacity(&self) -> Capacity {
        *self.capacity.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_capacity(&self, capacity: Capacity) {
        *self.capacity.lock().unwrap_or_else(|e| e.into_inner()) = capacity;
    }

    pub fn default_num_retries(&self) -> u32 {
        self.default_num_retries
    }

    pub fn timings(&self) -> &ResourceTimings {
        &self.timings
    }

    /// Last reconciled status.
    pub fn status(&self) -> ResourceStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, status: ResourceStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Acquire the per-resource status lock.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.status_lock.lock().await
    }

    /// Set the Locked flag and mark every stored executor as stopped.
    pub fn lock(&self) {
        self.locked.send_replace(true);
        let mut processes = self.processes.lock().unwrap_or_else(|e| e.into_inner());
        for process in processes.values_mut() {
            if !process.is_complete() {
                process.stop();
            }
        }
        debug!(resource = %self.id, "Resource locked");
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.borrow()
    }

    /// Subscribe to Locked flag changes.
    pub fn locked_watch(&self) -> watch::Receiver<bool> {
        self.locked.subscribe()
    }

    /// Refuse a non-destroy operation on a locked resource.
    pub fn ensure_unlocked(&self, operation: &Operation) -> Result<(), ResourceError> {
        if self.is_locked() && !operation.is_destroy() {
            error!(
                resource = %self.id,
                operation = %operation,
                "Refusing operation, resource locked"
            );
            return Err(self.locked_error(operation));
        }
        Ok(())
    }

    fn locked_error(&self, operation: &Operation) -> ResourceError {
        ResourceError::Locked {
            resource: self.id.clone(),
            operation: operation.name().to_string(),
        }
    }

    /// Start a command for an operation, replacing any previous executor
    /// stored under the same name.
    pub fn launch(
        &self,
        operation: &Operation,
        command: impl Into<String>,
        num_retries: u32,
        quiet: bool,
    ) {
        let mut process = Process::new(Arc::clone(&self.runner), command, num_retries).quiet(quiet);
        process.run();
        info!(resource = %self.id, operation = %operation, "Process started");
        self.store_process(operation, process);
    }

    fn store_process(&self, operation: &Operation, process: Process) {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(operation.name().to_string(), process);
    }

    fn take_process(&self, operation: &Operation) -> Result<Process, ResourceError> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(operation.name())
            .ok_or_else(|| ProcessError::NotStarted(operation.name().to_string()).into())
    }

    /// Remaining retries of the executor stored under an operation name.
    pub fn retries_left(&self, operation: &Operation) -> Option<u32> {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(operation.name())
            .map(|p| p.num_retries())
    }

    /// Run a one-off provider query (status, describe) outside the executor map.
    pub async fn query(&self, command: impl Into<String>) -> Result<CommandOutput, ResourceError> {
        let mut process = Process::new(Arc::clone(&self.runner), command, 0);
        process.run();
        Ok(process.wait().await?)
    }

    /// Wait for an operation's executor, abandoning the wait if the resource
    /// gets locked. Destroy waits are never abandoned.
    async fn wait_cancellable(
        &self,
        operation: &Operation,
        process: &mut Process,
    ) -> Result<CommandOutput, ResourceError> {
        if operation.is_destroy() {
            return Ok(process.wait().await?);
        }

        let mut locked = self.locked_watch();
        let outcome = tokio::select! {
            output = process.wait() => Some(output),
            Ok(_) = locked.wait_for(|l| *l) => None,
        };

        match outcome {
            Some(output) => Ok(output?),
            None => {
                process.stop();
                debug!(
                    resource = %self.id,
                    operation = %operation,
                    "Wait abandoned, resource locked"
                );
                Err(self.locked_error(operation))
            }
        }
    }

    /// Block until an operation's executor finishes, applying the retry
    /// policy on failure.
    ///
    /// Each retry replaces the stored executor with a fresh one carrying one
    /// fewer retry, after the fixed retry backoff. Exhausting the budget, or
    /// failing while the reconciled status is incompatible with the
    /// operation, is fatal.
    pub async fn wait_process<P>(
        &self,
        probe: &P,
        operation: &Operation,
    ) -> Result<CommandOutput, ResourceError>
    where
        P: StatusProbe + ?Sized,
    {
        loop {
            let mut process = self.take_process(operation)?;

            let waited = self.wait_cancellable(operation, &mut process).await;
            let output = match waited {
                Ok(output) => output,
                Err(e) => {
                    self.store_process(operation, process);
                    return Err(e);
                }
            };

            if !process.has_failed() {
                self.record_success(operation);
                self.store_process(operation, process);
                return Ok(output);
            }

            if self.is_locked() && !operation.is_destroy() {
                process.stop();
                self.failure(operation, &process);
                self.store_process(operation, process);
                return Err(self.locked_error(operation));
            }

            let status = probe.sync_status().await?;
            match retry_verdict(operation, status, process.num_retries()) {
                RetryVerdict::Settled => {
                    debug!(resource = %self.id, operation = %operation, "Resource already off");
                    self.record_success(operation);
                    self.store_process(operation, process);
                    return Ok(output);
                }
                RetryVerdict::Retry => {
                    let Some(mut next) = process.retry() else {
                        let err = self.failure(operation, &process);
                        self.store_process(operation, process);
                        return Err(err);
                    };
                    warn!(
                        resource = %self.id,
                        operation = %operation,
                        status = %status,
                        retries_left = process.num_retries(),
                        "Process failed, re-running command"
                    );
                    if !self.retry_backoff(operation).await {
                        process.stop();
                        self.failure(operation, &process);
                        self.store_process(operation, process);
                        return Err(self.locked_error(operation));
                    }
                    next.run();
                    self.store_process(operation, next);
                }
                RetryVerdict::Fatal => {
                    let err = self.failure(operation, &process);
                    self.store_process(operation, process);
                    return Err(err);
                }
            }
        }
    }

    /// Sleep through the retry backoff. Returns `false` if the resource got
    /// locked first, in which case nothing may be launched. Destroy backoffs
    /// always run to completion.
    async fn retry_backoff(&self, operation: &Operation) -> bool {
        if operation.is_destroy() {
            tokio::time::sleep(self.timings.retry_backoff).await;
            return true;
        }

        let mut locked = self.locked_watch();
        let slept = tokio::select! {
            _ = tokio::time::sleep(self.timings.retry_backoff) => true,
            Ok(_) = locked.wait_for(|l| *l) => false,
        };
        slept && !self.is_locked()
    }

    fn record_success(&self, operation: &Operation) {
        match operation {
            Operation::Create => self.mark_started(),
            Operation::Destroy => self.mark_stopped(),
            Operation::Run(_) => {}
        }
        info!(resource = %self.id, operation = %operation, "Process complete");
    }

    /// Log a fatal failure at the right severity and build the error.
    fn failure(&self, operation: &Operation, process: &Process) -> ResourceError {
        let output = process.output().cloned().unwrap_or_default();

        if process.is_quiet() {
            debug!(resource = %self.id, operation = %operation, "Process failed");
        } else if process.is_stopped() {
            warn!(
                resource = %self.id,
                operation = %operation,
                "Process failed due to cancellation"
            );
        } else {
            error!(
                resource = %self.id,
                operation = %operation,
                exit_code = ?output.exit_code,
                "Process failed"
            );
        }
        if !output.is_empty() {
            debug!(
                resource = %self.id,
                operation = %operation,
                stdout = %output.stdout.trim(),
                stderr = %output.stderr.trim(),
                "Captured process output"
            );
        }

        ResourceError::CommandFailed {
            resource: self.id.clone(),
            operation: operation.name().to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }

    /// Run a provider query, retrying transient failures up to the default
    /// budget with the status backoff in between.
    pub async fn with_poll_retries<T, F, Fut>(
        &self,
        what: &str,
        mut attempt: F,
    ) -> Result<T, ResourceError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ResourceError>> + Send,
        T: Send,
    {
        let mut retries = self.default_num_retries;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.kind() == ErrorKind::Transient && retries > 0 => {
                    debug!(
                        resource = %self.id,
                        error = %e,
                        retries_left = retries,
                        "Unable to get {}, retrying",
                        what
                    );
                    retries -= 1;
                    tokio::time::sleep(self.timings.status_backoff).await;
                }
                Err(e) if e.kind() == ErrorKind::Transient => {
                    error!(resource = %self.id, error = %e, "Unable to get {}", what);
                    return Err(ResourceError::StatusUnavailable {
                        resource: self.id.clone(),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record the moment the resource became usable.
    pub fn mark_started(&self) {
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        *self.stop_time.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Record the moment the resource was torn down.
    pub fn mark_stopped(&self) {
        *self.stop_time.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        *self.stop_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cost at a fixed hourly price over the start/stop window.
    ///
    /// `None` until the resource has both been created and destroyed.
    pub fn cost_at(&self, price_per_hour: f64) -> Option<f64> {
        let start = self.start_time()?;
        let stop = self.stop_time()?;
        let seconds = (stop - start).num_milliseconds().max(0) as f64 / 1000.0;
        Some((price_per_hour * seconds / 3600.0).max(0.0))
    }
}
