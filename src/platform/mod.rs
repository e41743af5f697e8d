//! Compute resources and the backends that provision them.
//!
//! - [`ComputeResource`]: the capability interface the scheduler depends on
//! - [`ElasticInstance`]: cloud instances created on demand
//! - [`LocalNode`]: pre-existing cluster nodes
//! - [`ResourceFactory`]: builds either kind for the scheduler

mod factory;
mod instance;
mod local;
mod pricing;
pub mod processor;
mod provider;

pub use factory::{ElasticFactory, LocalFactory, ResourceFactory};
pub use instance::{ElasticInstance, InstanceSettings};
pub use local::LocalNode;
pub use pricing::{MachineCatalog, MachineSelection, MachineType, PricingError, PricingResolver};
pub use processor::{ComputeResource, ErrorKind, ProcessorCore, ResourceError, StatusProbe};
pub use provider::{
    GcloudBackend, InstanceSpec, ProviderState, ProvisioningBackend, boot_disk_size, region_of,
};
