//! Machine type and price resolution.
//!
//! An elastic instance asks a [`PricingResolver`] for the cheapest machine
//! shape satisfying its CPU and memory request. The resolved shape may be
//! larger than requested; callers read back the resolved values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from machine type resolution.
#[derive(Debug, Error, PartialEq)]
pub enum PricingError {
    /// Nothing in the catalog can host the request.
    #[error("no machine type with at least {cpus} CPUs and {mem_gb} GB in zone '{zone}'")]
    NoMatchingMachine { cpus: u32, mem_gb: u32, zone: String },
}

/// A resolved machine shape and its hourly price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSelection {
    /// Provider machine type name.
    pub instance_type: String,
    /// Resolved CPU count.
    pub cpus: u32,
    /// Resolved memory in GB.
    pub mem_gb: u32,
    /// Price per hour, in the catalog's currency.
    pub price_per_hour: f64,
}

impl MachineSelection {
    /// Custom shapes are provisioned with explicit CPU and memory flags.
    pub fn is_custom(&self) -> bool {
        self.instance_type.starts_with("custom")
    }
}

/// Resolves a CPU/memory request to a concrete machine type.
///
/// Must be deterministic for a given price snapshot.
pub trait PricingResolver: Send + Sync {
    fn resolve(
        &self,
        cpus: u32,
        mem_gb: u32,
        zone: &str,
        preemptible: bool,
    ) -> Result<MachineSelection, PricingError>;
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineType {
    pub name: String,
    pub cpus: u32,
    pub mem_gb: u32,
    pub price_per_hour: f64,

    /// Discounted price for preemptible instances, if offered.
    #[serde(default)]
    pub preemptible_price: Option<f64>,

    /// Zones offering this type. Empty means every zone.
    #[serde(default)]
    pub zones: Vec<String>,
}

impl MachineType {
    fn price(&self, preemptible: bool) -> f64 {
        if preemptible {
            self.preemptible_price.unwrap_or(self.price_per_hour)
        } else {
            self.price_per_hour
        }
    }

    fn offered_in(&self, zone: &str) -> bool {
        self.zones.is_empty() || self.zones.iter().any(|z| z == zone)
    }
}

/// A static price list, usually loaded from the pipeline config.
#[derive(Debug, Clone, Default)]
pub struct MachineCatalog {
    machines: Vec<MachineType>,
}

impl MachineCatalog {
    pub fn new(machines: Vec<MachineType>) -> Self {
        Self { machines }
    }

    pub fn machines(&self) -> &[MachineType] {
        &self.machines
    }
}

impl PricingResolver for MachineCatalog {
    /// Pick the cheapest type with enough CPUs and memory; ties go to the
    /// smaller shape, then to catalog order.
    fn resolve(
        &self,
        cpus: u32,
        mem_gb: u32,
        zone: &str,
        preemptible: bool,
    ) -> Result<MachineSelection, PricingError> {
        let best = self
            .machines
            .iter()
            .filter(|m| m.cpus >= cpus && m.mem_gb >= mem_gb && m.offered_in(zone))
            .min_by(|a, b| {
                a.price(preemptible)
                    .total_cmp(&b.price(preemptible))
                    .then(a.cpus.cmp(&b.cpus))
                    .then(a.mem_gb.cmp(&b.mem_gb))
            });

        match best {
            Some(m) => Ok(MachineSelection {
                instance_type: m.name.clone(),
                cpus: m.cpus,
                mem_gb: m.mem_gb,
                price_per_hour: m.price(preemptible),
            }),
            None => Err(PricingError::NoMatchingMachine {
                cpus,
                mem_gb,
                zone: zone.to_string(),
            }),
        }
    }
}
