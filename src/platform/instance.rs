//! Elastic cloud instances.
//!
//! An [`ElasticInstance`] is provisioned on demand through a
//! [`ProvisioningBackend`]. Creation resolves the cheapest machine type,
//! runs the provider's create command, then polls instance metadata until
//! the instance's startup script publishes its ready marker. An instance
//! that never becomes ready is destroyed and recreated a bounded number of
//! times.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};

use crate::core::resource::{Capacity, ResourceStatus};
use crate::core::retry::Operation;
use crate::core::types::{ResourceId, TaskId};
use crate::execution::CommandOutput;

use super::pricing::{MachineSelection, PricingResolver};
use super::processor::{ComputeResource, ProcessorCore, ResourceError, StatusProbe};
use super::provider::{InstanceSpec, ProviderState, ProvisioningBackend, region_of};

/// Provider-side settings shared by every instance of a pipeline.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub zone: String,
    pub service_account: String,
    pub disk_image: String,
    pub boot_disk_ssd: bool,
    pub local_ssd_count: u32,
    pub preemptible: bool,
    /// Startup script passed to the provider as instance metadata.
    pub startup_script: Option<String>,
    /// Metadata key the startup script sets once the instance is usable.
    pub ready_marker: String,
}

impl InstanceSettings {
    pub fn new(
        zone: impl Into<String>,
        service_account: impl Into<String>,
        disk_image: impl Into<String>,
    ) -> Self {
        Self {
            zone: zone.into(),
            service_account: service_account.into(),
            disk_image: disk_image.into(),
            boot_disk_ssd: false,
            local_ssd_count: 0,
            preemptible: false,
            startup_script: None,
            ready_marker: "READY".to_string(),
        }
    }
}

/// A cloud instance created and destroyed on demand.
pub struct ElasticInstance {
    core: ProcessorCore,
    settings: InstanceSettings,
    region: String,
    backend: Arc<dyn ProvisioningBackend>,
    pricing: Arc<dyn PricingResolver>,
    machine: OnceLock<MachineSelection>,
    startup_complete: AtomicBool,
    creation_resets: AtomicU32,
}

impl ElasticInstance {
    /// Wrap a core whose capacity holds the requested CPUs, memory and disk.
    pub fn new(
        core: ProcessorCore,
        settings: InstanceSettings,
        backend: Arc<dyn ProvisioningBackend>,
        pricing: Arc<dyn PricingResolver>,
    ) -> Self {
        let region = region_of(&settings.zone).to_string();
        Self {
            core,
            settings,
            region,
            backend,
            pricing,
            machine: OnceLock::new(),
            startup_complete: AtomicBool::new(false),
            creation_resets: AtomicU32::new(0),
        }
    }

    /// Instance name on the provider side.
    pub fn name(&self) -> &str {
        self.core.id().as_str()
    }

    pub fn zone(&self) -> &str {
        &self.settings.zone
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Machine type, once resolved by the first `create()`.
    pub fn instance_type(&self) -> Option<&str> {
        self.machine.get().map(|m| m.instance_type.as_str())
    }

    pub fn price_per_hour(&self) -> Option<f64> {
        self.machine.get().map(|m| m.price_per_hour)
    }

    pub fn creation_resets(&self) -> u32 {
        self.creation_resets.load(Ordering::SeqCst)
    }

    pub fn is_startup_complete(&self) -> bool {
        self.startup_complete.load(Ordering::SeqCst)
    }

    pub fn core(&self) -> &ProcessorCore {
        &self.core
    }

    fn provider_error(&self, message: impl Into<String>) -> ResourceError {
        ResourceError::Provider {
            resource: self.core.id().clone(),
            message: message.into(),
        }
    }

    /// Resolve the machine type once; later calls reuse the first answer.
    fn resolve_machine(&self) -> Result<MachineSelection, ResourceError> {
        if let Some(machine) = self.machine.get() {
            return Ok(machine.clone());
        }

        let requested = self.core.capacity();
        let machine = self.pricing.resolve(
            requested.cpus,
            requested.mem_gb,
            &self.settings.zone,
            self.settings.preemptible,
        )?;
        debug!(
            resource = %self.core.id(),
            instance_type = %machine.instance_type,
            price_per_hour = machine.price_per_hour,
            "Resolved instance type"
        );

        self.core
            .set_capacity(Capacity::new(machine.cpus, machine.mem_gb, requested.disk_gb));
        let _ = self.machine.set(machine.clone());
        Ok(machine)
    }

    fn create_command(&self, machine: &MachineSelection) -> String {
        let spec = InstanceSpec {
            name: self.name(),
            zone: &self.settings.zone,
            disk_image: &self.settings.disk_image,
            disk_gb: self.core.capacity().disk_gb,
            boot_disk_ssd: self.settings.boot_disk_ssd,
            local_ssd_count: self.settings.local_ssd_count,
            preemptible: self.settings.preemptible,
            service_account: &self.settings.service_account,
            startup_script: self.settings.startup_script.as_deref(),
            machine,
        };
        self.backend.create_command(&spec)
    }

    /// One status query, mapped onto the resource lifecycle.
    async fn poll_status(&self) -> Result<ResourceStatus, ResourceError> {
        let output = self
            .core
            .query(self.backend.status_command(self.name(), &self.settings.zone))
            .await?;
        let state = self
            .backend
            .parse_state(&output)
            .map_err(|message| self.provider_error(message))?;

        let status = match state {
            ProviderState::Missing => ResourceStatus::Off,
            ProviderState::Terminating => ResourceStatus::Destroying,
            ProviderState::Booting => ResourceStatus::Creating,
            ProviderState::Running => {
                if self.is_startup_complete() || self.poll_ready().await? {
                    self.startup_complete.store(true, Ordering::SeqCst);
                    return Ok(ResourceStatus::Available);
                }
                ResourceStatus::Creating
            }
        };
        self.startup_complete.store(false, Ordering::SeqCst);
        Ok(status)
    }

    /// One describe query, checked for the ready marker.
    async fn poll_ready(&self) -> Result<bool, ResourceError> {
        let output = self
            .core
            .query(self.backend.describe_command(self.name(), &self.settings.zone))
            .await?;
        if !output.success() {
            return Err(self.provider_error(format!(
                "cannot poll startup script, instance removed or never created: {}",
                output.stderr.trim()
            )));
        }
        self.backend
            .is_ready(&output, &self.settings.ready_marker)
            .map_err(|message| self.provider_error(message))
    }

    /// Poll for the ready marker until it shows up, the startup budget runs
    /// out, or the instance is locked.
    ///
    /// Returns whether the instance became ready.
    async fn wait_until_ready(&self) -> Result<bool, ResourceError> {
        let timings = self.core.timings().clone();
        let cycles = timings.ready_poll_cycles();
        let mut locked = self.core.locked_watch();
        let mut cycle = 0;

        while cycle < cycles && !self.is_startup_complete() && !self.core.is_locked() {
            tokio::select! {
                _ = tokio::time::sleep(timings.ready_poll_interval) => {}
                Ok(_) = locked.wait_for(|l| *l) => break,
            }
            cycle += 1;

            let ready = self
                .core
                .with_poll_retries("startup status", || self.poll_ready())
                .await?;
            if ready {
                self.startup_complete.store(true, Ordering::SeqCst);
            }
        }

        if self.core.is_locked() {
            debug!(resource = %self.core.id(), "Instance locked while waiting for creation");
            return Err(ResourceError::Locked {
                resource: self.core.id().clone(),
                operation: Operation::Create.name().to_string(),
            });
        }
        Ok(self.is_startup_complete())
    }

    async fn destroy_unlocked(&self, wait: bool) -> Result<(), ResourceError> {
        self.core.set_status(ResourceStatus::Destroying);
        self.core.launch(
            &Operation::Destroy,
            self.backend.destroy_command(self.name(), &self.settings.zone),
            self.core.default_num_retries(),
            false,
        );

        if wait {
            self.core.wait_process(self, &Operation::Destroy).await?;
            self.startup_complete.store(false, Ordering::SeqCst);
            self.core.set_status(ResourceStatus::Off);
        }
        Ok(())
    }
}

#[async_trait]
impl StatusProbe for ElasticInstance {
    async fn sync_status(&self) -> Result<ResourceStatus, ResourceError> {
        let status = self
            .core
            .with_poll_retries("instance status", || self.poll_status())
            .await?;
        self.core.set_status(status);
        Ok(status)
    }
}

#[async_trait]
impl ComputeResource for ElasticInstance {
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

        let machine = self.resolve_machine()?;
        loop {
            info!(
                resource = %self.core.id(),
                instance_type = %machine.instance_type,
                price_per_hour = machine.price_per_hour,
                "Creating instance"
            );
            self.core.set_status(ResourceStatus::Creating);
            self.core.launch(
                &Operation::Create,
                self.create_command(&machine),
                self.core.default_num_retries(),
                false,
            );
            self.core.wait_process(self, &Operation::Create).await?;

            debug!(resource = %self.core.id(), "Waiting for instance startup-script completion");
            self.startup_complete.store(false, Ordering::SeqCst);
            if self.wait_until_ready().await? {
                self.core.set_status(ResourceStatus::Available);
                info!(
                    resource = %self.core.id(),
                    "Instance startup complete, ready to run commands"
                );
                return Ok(());
            }

            let resets = self.creation_resets();
            if resets >= self.core.default_num_retries() {
                error!(
                    resource = %self.core.id(),
                    resets,
                    "Instance created but never became available"
                );
                return Err(ResourceError::StartupTimeout {
                    resource: self.core.id().clone(),
                    resets,
                });
            }

            warn!(
                resource = %self.core.id(),
                timeout = ?self.core.timings().ready_timeout,
                "Instance startup timed out, resetting instance"
            );
            self.creation_resets.fetch_add(1, Ordering::SeqCst);
            self.destroy_unlocked(true).await?;
        }
    }

    async fn destroy(&self, wait: bool) -> Result<(), ResourceError> {
        let _guard = self.core.acquire().await;
        info!(resource = %self.core.id(), "Destroying instance");
        self.destroy_unlocked(wait).await
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

        let remote = self
            .backend
            .remote_command(self.name(), &self.settings.zone, command);
        self.core.launch(&operation, remote, num_retries, quiet);
        self.core.wait_process(self, &operation).await
    }

    async fn get_status(&self) -> Result<ResourceStatus, ResourceError> {
        let _guard = self.core.acquire().await;
        let status = self.sync_status().await?;
        debug!(resource = %self.core.id(), status = %status, "Instance status");
        Ok(status)
    }

    fn lock(&self) {
        self.core.lock();
    }

    fn is_locked(&self) -> bool {
        self.core.is_locked()
    }

    fn cost(&self) -> Option<f64> {
        self.core.cost_at(self.price_per_hour()?)
    }
}
