//! Retry rules and timing configuration for resource operations.
//!
//! Retry is exclusively the compute resource's responsibility. Whether a
//! failed operation may be retried depends on the resource's reconciled
//! status at the moment of failure, crossed with the kind of operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::resource::ResourceStatus;
use super::types::TaskId;

/// An operation performed on a compute resource.
///
/// The operation name doubles as the key into the resource's executor map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Provision the resource.
    Create,
    /// Tear the resource down.
    Destroy,
    /// Run a task command on the resource.
    Run(TaskId),
}

impl Operation {
    /// Get the operation name ("create", "destroy", or the task id).
    pub fn name(&self) -> &str {
        match self {
            Operation::Create => "create",
            Operation::Destroy => "destroy",
            Operation::Run(task_id) => task_id.as_str(),
        }
    }

    /// Check whether this is a teardown.
    pub fn is_destroy(&self) -> bool {
        matches!(self, Operation::Destroy)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do after an operation's command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Re-run the command, consuming one unit of retry budget.
    Retry,
    /// The failure is moot (destroying something already gone).
    Settled,
    /// Surface the failure.
    Fatal,
}

/// Decide whether a failed operation may be retried.
///
/// * `status` - the resource status reconciled right after the failure
/// * `retries_left` - remaining budget on the failed executor
///
/// Locked resources are handled by the caller before the status is polled.
pub fn retry_verdict(
    operation: &Operation,
    status: ResourceStatus,
    retries_left: u32,
) -> RetryVerdict {
    if status == ResourceStatus::Off && operation.is_destroy() {
        return RetryVerdict::Settled;
    }

    let compatible = match status {
        ResourceStatus::Off => matches!(operation, Operation::Create),
        ResourceStatus::Creating | ResourceStatus::Destroying => operation.is_destroy(),
        ResourceStatus::Available => !matches!(operation, Operation::Create),
    };

    if compatible && retries_left > 0 {
        RetryVerdict::Retry
    } else {
        RetryVerdict::Fatal
    }
}

/// Timing knobs for resource operations.
///
/// Defaults match the production values: a 3 s backoff between command
/// retries, 5 s between status poll retries, and a 10 minute startup budget
/// polled every 10 s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceTimings {
    /// Fixed delay before re-running a failed command.
    #[serde(rename = "retry_backoff_ms", with = "serde_millis")]
    pub retry_backoff: Duration,

    /// Fixed delay before re-polling provider status after an error.
    #[serde(rename = "status_backoff_ms", with = "serde_millis")]
    pub status_backoff: Duration,

    /// Interval between readiness polls during startup.
    #[serde(rename = "ready_poll_interval_ms", with = "serde_millis")]
    pub ready_poll_interval: Duration,

    /// Total time allowed for the ready marker to appear.
    #[serde(rename = "ready_timeout_ms", with = "serde_millis")]
    pub ready_timeout: Duration,
}

impl Default for ResourceTimings {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(3),
            status_backoff: Duration::from_secs(5),
            ready_poll_interval: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(600),
        }
    }
}

impl ResourceTimings {
    /// Uniform short timings, handy for tests and local runs.
    pub fn immediate(step: Duration) -> Self {
        Self {
            retry_backoff: step,
            status_backoff: step,
            ready_poll_interval: step,
            ready_timeout: step * 10,
        }
    }

    /// Number of readiness polls that fit in the startup budget.
    pub fn ready_poll_cycles(&self) -> u32 {
        if self.ready_poll_interval.is_zero() {
            return 1;
        }
        let cycles = self.ready_timeout.as_millis() / self.ready_poll_interval.as_millis();
        cycles.clamp(1, u32::MAX as u128) as u32
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as milliseconds (matching the YAML config format).
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
