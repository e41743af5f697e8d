//! Resource requirements for task execution.
//!
//! Tasks declare how many nodes and how many CPUs they need; compute
//! resources advertise the capacity they actually provide.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a compute resource.
///
/// Resources cycle `Off → Creating → Available → Destroying → Off`.
/// The orthogonal Locked flag lives on the resource itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    /// Nothing exists on the provider side.
    Off,
    /// Provisioned but not yet servicing work.
    Creating,
    /// Ready to run commands.
    Available,
    /// Being torn down.
    Destroying,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceStatus::Off => "OFF",
            ResourceStatus::Creating => "CREATING",
            ResourceStatus::Available => "AVAILABLE",
            ResourceStatus::Destroying => "DESTROYING",
        };
        f.write_str(s)
    }
}

/// Resource requirements for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Number of nodes the task spans. Every resource is a single node, so
    /// the scheduler only runs tasks asking for one; pipeline validation
    /// rejects anything larger.
    pub nodes: u32,

    /// Minimum CPU count on the node running the task.
    pub min_cpus: u32,

    /// Memory in GB. Zero means "whatever the node comes with".
    pub mem_gb: u32,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            nodes: 1,
            min_cpus: 1,
            mem_gb: 0,
        }
    }
}

impl ResourceRequirements {
    /// Create requirements for a single node with the given CPU count.
    pub fn cpus(min_cpus: u32) -> Self {
        Self {
            min_cpus,
            ..Self::default()
        }
    }

    /// Builder: set the node count.
    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nodes = nodes;
        self
    }

    /// Builder: set the memory requirement in GB.
    pub fn with_memory(mut self, mem_gb: u32) -> Self {
        self.mem_gb = mem_gb;
        self
    }
}

/// Capacity provided by a compute resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    /// CPU count.
    pub cpus: u32,

    /// Memory in GB.
    pub mem_gb: u32,

    /// Boot disk size in GB.
    pub disk_gb: u64,
}

impl Capacity {
    /// Create a capacity description.
    pub fn new(cpus: u32, mem_gb: u32, disk_gb: u64) -> Self {
        Self {
            cpus,
            mem_gb,
            disk_gb,
        }
    }

    /// Check whether this capacity can host a task with the given requirements.
    pub fn satisfies(&self, req: &ResourceRequirements) -> bool {
        req.nodes <= 1 && self.cpus >= req.min_cpus && self.mem_gb >= req.mem_gb
    }
}
