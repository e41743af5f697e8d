//! Local cluster node.
//!
//! A [`LocalNode`] is capacity that already exists: creating and destroying
//! it is pure bookkeeping. Task commands still go through the executor map
//! and the shared retry policy.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::resource::{Capacity, ResourceStatus};
use crate::core::retry::Operation;
use crate::core::types::{ResourceId, TaskId};
use crate::execution::CommandOutput;

use super::processor::{ComputeResource, ProcessorCore, ResourceError, StatusProbe};

/// A node of a pre-existing cluster (or the local host).
pub struct LocalNode {
    core: ProcessorCore,
}

impl LocalNode {
    pub fn new(core: ProcessorCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &ProcessorCore {
        &self.core
    }
}

#[async_trait]
impl StatusProbe for LocalNode {
    async fn sync_status(&self) -> Result<ResourceStatus, ResourceError> {
        Ok(self.core.status())
    }
}

#[async_trait]
impl ComputeResource for LocalNode {
    fn id(&self) -> &ResourceId {
        self.core.id()
    }

    fn capacity(&self) -> Capacity {
        self.core.capacity()
    }

    async fn create(&self) -> Result<(), ResourceError> {
        self.core.ensure_unlocked(&Operation::Create)?;
        let _guard = self.core.acquire().await;
        self.core.ensure_unlocked(&Operation::Create)?;

        self.core.mark_started();
        self.core.set_status(ResourceStatus::Available);
        info!(resource = %self.core.id(), cpus = self.core.capacity().cpus, "Node ready");
        Ok(())
    }

    async fn destroy(&self, _wait: bool) -> Result<(), ResourceError> {
        let _guard = self.core.acquire().await;
        self.core.mark_stopped();
        self.core.set_status(ResourceStatus::Off);
        info!(resource = %self.core.id(), "Node released");
        Ok(())
    }

    async fn run(
        &self,
        task_id: &TaskId,
        command: &str,
        num_retries: u32,
        quiet: bool,
    ) -> Result<CommandOutput, ResourceError> {
        let operation = Operation::Run(task_id.clone());
        self.core.ensure_unlocked(&operation)?;
        let _guard = self.core.acquire().await;
        self.core.ensure_unlocked(&operation)?;

        self.core.launch(&operation, command, num_retries, quiet);
        self.core.wait_process(self, &operation).await
    }

    async fn get_status(&self) -> Result<ResourceStatus, ResourceError> {
        let _guard = self.core.acquire().await;
        let status = self.sync_status().await?;
        debug!(resource = %self.core.id(), status = %status, "Node status");
        Ok(status)
    }

    fn lock(&self) {
        self.core.lock();
    }

    fn is_locked(&self) -> bool {
        self.core.is_locked()
    }
}
