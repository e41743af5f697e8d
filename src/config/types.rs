//! Pipeline configuration types.
//!
//! A pipeline file names the pipeline, picks a compute platform, and lists
//! its tasks. A `fanout` section generates split/align/merge style tasks.

use serde::{Deserialize, Serialize};

use crate::core::retry::ResourceTimings;
use crate::platform::MachineType;
use crate::scheduler::FailurePolicy;

fn default_num_retries() -> u32 {
    3
}

fn default_max_resources() -> usize {
    4
}

fn default_one() -> u32 {
    1
}

fn default_disk_size_gb() -> u64 {
    100
}

fn default_ready_marker() -> String {
    "READY".to_string()
}

fn default_ssh_user() -> String {
    "gantry".to_string()
}

fn default_fanout_prefix() -> String {
    "align".to_string()
}

/// A pipeline file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name, also the prefix of generated resource names.
    pub name: String,

    /// What to do after a task fails.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Retry budget for resource operations and for tasks without their own.
    #[serde(default = "default_num_retries")]
    pub default_num_retries: u32,

    /// Backoff and polling intervals, in milliseconds.
    #[serde(default)]
    pub timings: ResourceTimings,

    /// Where tasks run.
    pub platform: PlatformConfig,

    /// Explicit tasks, in submission order.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,

    /// Generated fan-out tasks, submitted after the explicit ones.
    pub fanout: Option<FanoutConfig>,
}

/// Compute platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformConfig {
    /// Fixed-shape nodes of an existing cluster, or the local host.
    Local(LocalConfig),
    /// Cloud instances provisioned per task.
    Elastic(ElasticConfig),
}

impl PlatformConfig {
    pub fn max_resources(&self) -> usize {
        match self {
            PlatformConfig::Local(local) => local.max_resources,
            PlatformConfig::Elastic(elastic) => elastic.max_resources,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlatformConfig::Local(_) => "local",
            PlatformConfig::Elastic(_) => "elastic",
        }
    }
}

/// Local platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_max_resources")]
    pub max_resources: usize,

    /// CPUs per node. Defaults to the host's available parallelism.
    pub cpus: Option<u32>,

    /// Memory per node in GB.
    #[serde(default)]
    pub mem_gb: u32,
}

/// Elastic platform settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    pub zone: String,
    pub service_account: String,
    pub disk_image: String,

    #[serde(default = "default_disk_size_gb")]
    pub disk_size_gb: u64,

    #[serde(default)]
    pub boot_disk_ssd: bool,

    #[serde(default)]
    pub local_ssd_count: u32,

    #[serde(default)]
    pub preemptible: bool,

    /// Path of the startup script passed as instance metadata.
    pub startup_script: Option<String>,

    /// Metadata key the startup script sets when done.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,

    /// User for remote command execution.
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default = "default_max_resources")]
    pub max_resources: usize,

    /// Price list used to pick machine types.
    #[serde(default)]
    pub machine_types: Vec<MachineType>,
}

/// One explicit task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,

    /// Step kind. Defaults to the id.
    pub kind: Option<String>,

    pub command: String,

    /// Must be 1; multi-node tasks are rejected at validation.
    #[serde(default = "default_one")]
    pub nodes: u32,

    #[serde(default = "default_one")]
    pub min_cpus: u32,

    #[serde(default)]
    pub mem_gb: u32,

    #[serde(default)]
    pub requires: Vec<String>,

    /// Retries for the task command. Defaults to `default_num_retries`.
    pub retries: Option<u32>,

    /// Log failures at debug level.
    #[serde(default)]
    pub quiet: bool,
}

/// Split/align/merge fan-out.
///
/// `count` parallel tasks named `<prefix>_<n>` (1-based) run `command` with
/// `{index}` replaced by `n`. With more than one split, an optional `merge`
/// task requires all of them. A single split is a plain task named `<prefix>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default = "default_fanout_prefix")]
    pub prefix: String,

    pub kind: Option<String>,

    pub count: u32,

    /// Command template; `{index}` is replaced by the split number.
    pub command: String,

    #[serde(default = "default_one")]
    pub min_cpus: u32,

    #[serde(default)]
    pub mem_gb: u32,

    /// Tasks every split requires.
    #[serde(default)]
    pub requires: Vec<String>,

    pub retries: Option<u32>,

    pub merge: Option<MergeConfig>,
}

/// The task joining every split back together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    pub id: String,

    pub kind: Option<String>,

    pub command: String,

    #[serde(default = "default_one")]
    pub min_cpus: u32,

    #[serde(default)]
    pub mem_gb: u32,

    pub retries: Option<u32>,
}
