//! Resource factories.
//!
//! The scheduler provisions capacity through a [`ResourceFactory`], so it
//! never depends on a concrete backend.

use std::sync::Arc;
use tracing::info;

use crate::core::resource::{Capacity, ResourceRequirements};
use crate::core::retry::ResourceTimings;
use crate::core::types::ResourceId;
use crate::execution::CommandRunner;

use super::instance::{ElasticInstance, InstanceSettings};
use super::local::LocalNode;
use super::pricing::PricingResolver;
use super::processor::{ComputeResource, ProcessorCore, ResourceError};
use super::provider::ProvisioningBackend;

/// Builds compute resources sized for a task.
pub trait ResourceFactory: Send + Sync {
    /// Build an (Off) resource able to host `requirements`.
    ///
    /// `label` names the task the resource is provisioned for and ends up in
    /// the generated resource identifier.
    fn build(
        &self,
        label: &str,
        requirements: &ResourceRequirements,
    ) -> Result<Arc<dyn ComputeResource>, ResourceError>;
}

/// Shared construction parameters.
#[derive(Clone)]
struct Common {
    prefix: String,
    runner: Arc<dyn CommandRunner>,
    default_num_retries: u32,
    timings: ResourceTimings,
}

impl Common {
    fn core(&self, label: &str, capacity: Capacity) -> ProcessorCore {
        ProcessorCore::new(
            ResourceId::generate(&self.prefix, label),
            capacity,
            self.default_num_retries,
            self.timings.clone(),
            Arc::clone(&self.runner),
        )
    }
}

/// Hands out nodes of a fixed shape.
pub struct LocalFactory {
    common: Common,
    capacity: Capacity,
}

impl LocalFactory {
    pub fn new(
        prefix: impl Into<String>,
        capacity: Capacity,
        runner: Arc<dyn CommandRunner>,
        default_num_retries: u32,
        timings: ResourceTimings,
    ) -> Self {
        Self {
            common: Common {
                prefix: prefix.into(),
                runner,
                default_num_retries,
                timings,
            },
            capacity,
        }
    }
}

impl ResourceFactory for LocalFactory {
    fn build(
        &self,
        label: &str,
        requirements: &ResourceRequirements,
    ) -> Result<Arc<dyn ComputeResource>, ResourceError> {
        if !self.capacity.satisfies(requirements) {
            return Err(ResourceError::Unsatisfiable {
                label: label.to_string(),
                message: format!(
                    "needs {} CPUs and {} GB, nodes have {} CPUs and {} GB",
                    requirements.min_cpus,
                    requirements.mem_gb,
                    self.capacity.cpus,
                    self.capacity.mem_gb
                ),
            });
        }
        Ok(Arc::new(LocalNode::new(self.common.core(label, self.capacity))))
    }
}

/// Provisions cloud instances sized to each request.
pub struct ElasticFactory {
    common: Common,
    settings: InstanceSettings,
    disk_gb: u64,
    backend: Arc<dyn ProvisioningBackend>,
    pricing: Arc<dyn PricingResolver>,
    dry_run: bool,
}

impl ElasticFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prefix: impl Into<String>,
        settings: InstanceSettings,
        disk_gb: u64,
        backend: Arc<dyn ProvisioningBackend>,
        pricing: Arc<dyn PricingResolver>,
        runner: Arc<dyn CommandRunner>,
        default_num_retries: u32,
        timings: ResourceTimings,
    ) -> Self {
        Self {
            common: Common {
                prefix: prefix.into(),
                runner,
                default_num_retries,
                timings,
            },
            settings,
            disk_gb,
            backend,
            pricing,
            dry_run: false,
        }
    }

    /// Skip provisioning: hand out bookkeeping-only nodes shaped like the
    /// machine type each request would resolve to.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl ResourceFactory for ElasticFactory {
    fn build(
        &self,
        label: &str,
        requirements: &ResourceRequirements,
    ) -> Result<Arc<dyn ComputeResource>, ResourceError> {
        if requirements.nodes > 1 {
            return Err(ResourceError::Unsatisfiable {
                label: label.to_string(),
                message: format!("needs {} nodes, instances are single nodes", requirements.nodes),
            });
        }
        if self.dry_run {
            let selection = self.pricing.resolve(
                requirements.min_cpus,
                requirements.mem_gb,
                &self.settings.zone,
                self.settings.preemptible,
            )?;
            info!(
                label = %label,
                instance_type = %selection.instance_type,
                "dry run, not provisioning"
            );
            let capacity = Capacity::new(selection.cpus, selection.mem_gb, self.disk_gb);
            return Ok(Arc::new(LocalNode::new(self.common.core(label, capacity))));
        }

        let requested = Capacity::new(requirements.min_cpus, requirements.mem_gb, self.disk_gb);
        Ok(Arc::new(ElasticInstance::new(
            self.common.core(label, requested),
            self.settings.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.pricing),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resource::ResourceStatus;
    use crate::core::types::TaskId;
    use crate::platform::{GcloudBackend, MachineCatalog, MachineType};
    use crate::testing::ScriptedRunner;
    use std::time::Duration;

    fn timings() -> ResourceTimings {
        ResourceTimings::immediate(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_local_factory_builds_off_nodes() {
        let factory = LocalFactory::new(
            "wgs",
            Capacity::new(8, 32, 0),
            Arc::new(ScriptedRunner::new()),
            1,
            timings(),
        );

        let node = factory.build("align_1", &ResourceRequirements::cpus(4)).unwrap();

        assert!(node.id().as_str().starts_with("wgs-align-1-"));
        assert_eq!(node.capacity().cpus, 8);
        assert_eq!(node.get_status().await.unwrap(), ResourceStatus::Off);
    }

    #[test]
    fn test_local_factory_rejects_oversized_request() {
        let factory = LocalFactory::new(
            "wgs",
            Capacity::new(8, 32, 0),
            Arc::new(ScriptedRunner::new()),
            1,
            timings(),
        );

        let err = factory
            .build("merge", &ResourceRequirements::cpus(16))
            .err()
            .unwrap();

        assert!(matches!(err, ResourceError::Unsatisfiable { .. }));

        let err = factory
            .build("mpi", &ResourceRequirements::cpus(2).with_nodes(4))
            .err()
            .unwrap();

        assert!(matches!(err, ResourceError::Unsatisfiable { .. }));
    }

    #[tokio::test]
    async fn test_elastic_factory_sizes_instances_to_request() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "--format=json",
            crate::execution::CommandOutput::new(
                r#"{"metadata": {"items": [{"key": "READY"}]}}"#,
                "",
                0,
            ),
        );
        let catalog = MachineCatalog::new(vec![MachineType {
            name: "n1-standard-8".to_string(),
            cpus: 8,
            mem_gb: 30,
            price_per_hour: 0.38,
            preemptible_price: None,
            zones: Vec::new(),
        }]);
        let factory = ElasticFactory::new(
            "wgs",
            InstanceSettings::new("us-east1-c", "svc@project.iam", "gantry-image"),
            500,
            Arc::new(GcloudBackend::default()),
            Arc::new(catalog),
            runner.clone(),
            0,
            timings(),
        );

        let vm = factory
            .build("align_1", &ResourceRequirements::cpus(6).with_memory(20))
            .unwrap();
        assert_eq!(vm.capacity().cpus, 6);

        vm.create().await.unwrap();

        assert_eq!(vm.capacity().cpus, 8);
        assert_eq!(vm.capacity().disk_gb, 500);
        assert!(runner.commands_matching("instances create")[0].contains("--boot-disk-size 500GB"));
    }

    #[tokio::test]
    async fn test_elastic_dry_run_never_provisions() {
        let runner = Arc::new(ScriptedRunner::new());
        let catalog = MachineCatalog::new(vec![MachineType {
            name: "n1-standard-8".to_string(),
            cpus: 8,
            mem_gb: 30,
            price_per_hour: 0.38,
            preemptible_price: None,
            zones: Vec::new(),
        }]);
        let factory = ElasticFactory::new(
            "wgs",
            InstanceSettings::new("us-east1-c", "svc@project.iam", "gantry-image"),
            500,
            Arc::new(GcloudBackend::default()),
            Arc::new(catalog),
            runner.clone(),
            0,
            timings(),
        )
        .with_dry_run(true);

        let node = factory.build("align_1", &ResourceRequirements::cpus(6)).unwrap();
        assert_eq!(node.capacity().cpus, 8);

        node.create().await.unwrap();
        node.run(&TaskId::new("align_1"), "bwa mem", 0, false).await.unwrap();
        node.destroy(true).await.unwrap();

        assert_eq!(runner.commands_matching("gcloud").len(), 0);
        assert_eq!(runner.calls().len(), 1);
        assert!(
            factory
                .build("huge", &ResourceRequirements::cpus(64))
                .is_err()
        );
    }
}
