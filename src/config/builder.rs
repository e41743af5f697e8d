//! Pipeline builder from YAML configuration.
//!
//! This module converts a PipelineConfig into a task graph, a resource
//! factory for the configured platform, and a ready-to-run scheduler.

use std::path::Path;
use std::sync::Arc;

use crate::core::graph::TaskGraph;
use crate::core::resource::{Capacity, ResourceRequirements};
use crate::core::task::Task;
use crate::execution::{CommandRunner, DryRunRunner};
use crate::platform::{
    ElasticFactory, GcloudBackend, InstanceSettings, LocalFactory, MachineCatalog, ResourceFactory,
};
use crate::scheduler::TaskScheduler;

use super::error::ConfigError;
use super::types::{FanoutConfig, PipelineConfig, PlatformConfig, TaskConfig};
use super::yaml::YamlLoader;

/// Builder for creating schedulers from pipeline configuration.
pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Expand the configuration into tasks, in submission order: explicit
    /// tasks first, then fan-out splits, then the merge task.
    pub fn tasks(config: &PipelineConfig) -> Vec<Task> {
        let mut tasks: Vec<Task> = config.tasks.iter().map(Self::build_task).collect();
        if let Some(fanout) = &config.fanout {
            tasks.extend(Self::build_fanout(fanout));
        }
        tasks
    }

    /// Build and validate the task graph.
    pub fn graph(config: &PipelineConfig) -> Result<TaskGraph, ConfigError> {
        TaskGraph::from_tasks(Self::tasks(config))
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    /// Build the resource factory for the configured platform.
    pub fn factory(
        config: &PipelineConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Arc<dyn ResourceFactory> {
        Self::platform_factory(config, runner, false)
    }

    fn platform_factory(
        config: &PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        dry_run: bool,
    ) -> Arc<dyn ResourceFactory> {
        match &config.platform {
            PlatformConfig::Local(local) => {
                let cpus = local.cpus.unwrap_or_else(|| {
                    std::thread::available_parallelism()
                        .map(|n| n.get() as u32)
                        .unwrap_or(1)
                });
                Arc::new(LocalFactory::new(
                    &config.name,
                    Capacity::new(cpus, local.mem_gb, 0),
                    runner,
                    config.default_num_retries,
                    config.timings.clone(),
                ))
            }
            PlatformConfig::Elastic(elastic) => {
                let settings = InstanceSettings {
                    zone: elastic.zone.clone(),
                    service_account: elastic.service_account.clone(),
                    disk_image: elastic.disk_image.clone(),
                    boot_disk_ssd: elastic.boot_disk_ssd,
                    local_ssd_count: elastic.local_ssd_count,
                    preemptible: elastic.preemptible,
                    startup_script: elastic.startup_script.clone(),
                    ready_marker: elastic.ready_marker.clone(),
                };
                Arc::new(ElasticFactory::new(
                    &config.name,
                    settings,
                    elastic.disk_size_gb,
                    Arc::new(GcloudBackend::new(&elastic.ssh_user)),
                    Arc::new(MachineCatalog::new(elastic.machine_types.clone())),
                    runner,
                    config.default_num_retries,
                    config.timings.clone(),
                )
                .with_dry_run(dry_run))
            }
        }
    }

    /// Build a scheduler for the pipeline.
    pub fn build(
        config: &PipelineConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<TaskScheduler, ConfigError> {
        Self::scheduler(config, Self::factory(config, runner))
    }

    /// Build a scheduler that logs every command instead of running it and
    /// never provisions cloud instances.
    pub fn build_dry_run(config: &PipelineConfig) -> Result<TaskScheduler, ConfigError> {
        let factory = Self::platform_factory(config, Arc::new(DryRunRunner), true);
        Self::scheduler(config, factory)
    }

    fn scheduler(
        config: &PipelineConfig,
        factory: Arc<dyn ResourceFactory>,
    ) -> Result<TaskScheduler, ConfigError> {
        let graph = Self::graph(config)?;

        Ok(TaskScheduler::new(&config.name, graph, factory)
            .with_max_resources(config.platform.max_resources())
            .with_failure_policy(config.failure_policy)
            .with_default_num_retries(config.default_num_retries))
    }

    fn build_task(config: &TaskConfig) -> Task {
        let mut builder = Task::builder(config.id.as_str(), config.command.as_str())
            .requirements(
                ResourceRequirements::cpus(config.min_cpus)
                    .with_nodes(config.nodes)
                    .with_memory(config.mem_gb),
            )
            .requires_all(config.requires.iter().map(String::as_str))
            .quiet(config.quiet);

        if let Some(kind) = &config.kind {
            builder = builder.kind(kind.as_str());
        }
        if let Some(retries) = config.retries {
            builder = builder.num_retries(retries);
        }
        builder.build()
    }

    fn build_fanout(fanout: &FanoutConfig) -> Vec<Task> {
        let kind = fanout.kind.clone().unwrap_or_else(|| fanout.prefix.clone());
        let requirements = ResourceRequirements::cpus(fanout.min_cpus).with_memory(fanout.mem_gb);

        let split_task = |id: String, index: u32| {
            let command = fanout.command.replace("{index}", &index.to_string());
            let mut builder = Task::builder(id, command)
                .kind(kind.as_str())
                .requirements(requirements.clone())
                .requires_all(fanout.requires.iter().map(String::as_str));
            if let Some(retries) = fanout.retries {
                builder = builder.num_retries(retries);
            }
            builder.build()
        };

        if fanout.count <= 1 {
            return vec![split_task(fanout.prefix.clone(), 1)];
        }

        let mut tasks: Vec<Task> = (1..=fanout.count)
            .map(|i| split_task(format!("{}_{}", fanout.prefix, i), i))
            .collect();

        if let Some(merge) = &fanout.merge {
            let split_ids: Vec<String> = tasks.iter().map(|t| t.id.to_string()).collect();
            let mut builder = Task::builder(merge.id.as_str(), merge.command.as_str())
                .requirements(ResourceRequirements::cpus(merge.min_cpus).with_memory(merge.mem_gb))
                .requires_all(split_ids.iter().map(String::as_str));
            if let Some(kind) = &merge.kind {
                builder = builder.kind(kind.as_str());
            }
            if let Some(retries) = merge.retries {
                builder = builder.num_retries(retries);
            }
            tasks.push(builder.build());
        }
        tasks
    }
}

/// Load a pipeline file and build its scheduler.
pub fn load_pipeline(
    path: impl AsRef<Path>,
    runner: Arc<dyn CommandRunner>,
) -> Result<(PipelineConfig, TaskScheduler), ConfigError> {
    let config = YamlLoader::load_pipeline(path)?;
    let scheduler = PipelineBuilder::build(&config, runner)?;
    Ok((config, scheduler))
}
