//! Common test utilities shared across integration tests.

use gantry::platform::{GcloudBackend, InstanceSettings, MachineCatalog, MachineType};
use gantry::testing::{CallRecord, ScriptedRunner};
use gantry::{
    Capacity, CommandOutput, ElasticFactory, LocalFactory, ResourceFactory, ResourceTimings, Task,
};
use std::sync::Arc;
use std::time::Duration;

/// Describe output once the startup script has published its marker.
pub const READY: &str = r#"{"metadata": {"items": [{"key": "READY", "value": "1"}]}}"#;

/// Substring of the provider status query.
pub const STATUS: &str = "value(status)";

/// Substring of the provider describe query.
pub const DESCRIBE: &str = "--format=json";

/// Timings with millisecond backoffs and a short startup budget.
pub fn fast_timings() -> ResourceTimings {
    ResourceTimings::immediate(Duration::from_millis(1))
}

/// Provider answer for an instance that does not exist.
pub fn not_found() -> CommandOutput {
    CommandOutput::new("", "ERROR: The resource was not found", 1)
}

/// A task running `run <id>`.
pub fn task(id: &str, requires: &[&str]) -> Task {
    Task::builder(id, format!("run {}", id))
        .requires_all(requires.iter().copied())
        .build()
}

pub fn local_factory(
    runner: Arc<ScriptedRunner>,
    cpus: u32,
    retries: u32,
) -> Arc<dyn ResourceFactory> {
    Arc::new(LocalFactory::new(
        "it",
        Capacity::new(cpus, 32, 0),
        runner,
        retries,
        fast_timings(),
    ))
}

pub fn catalog() -> Arc<MachineCatalog> {
    let machine = |name: &str, cpus, mem_gb, price| MachineType {
        name: name.to_string(),
        cpus,
        mem_gb,
        price_per_hour: price,
        preemptible_price: None,
        zones: Vec::new(),
    };
    Arc::new(MachineCatalog::new(vec![
        machine("n1-standard-4", 4, 15, 0.19),
        machine("n1-standard-16", 16, 60, 0.76),
    ]))
}

pub fn elastic_factory(runner: Arc<ScriptedRunner>, retries: u32) -> Arc<dyn ResourceFactory> {
    Arc::new(ElasticFactory::new(
        "it",
        InstanceSettings::new("us-east1-c", "runner@project.iam", "gantry-image"),
        200,
        Arc::new(GcloudBackend::default()),
        catalog(),
        runner,
        retries,
        fast_timings(),
    ))
}

/// Largest number of matching calls that were in flight at the same time.
pub fn max_overlap(calls: &[CallRecord]) -> usize {
    calls
        .iter()
        .map(|call| {
            calls
                .iter()
                .filter(|other| other.started < call.finished && other.finished > call.started)
                .count()
        })
        .max()
        .unwrap_or(0)
}
