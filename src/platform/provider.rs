//! Provisioning backends.
//!
//! A [`ProvisioningBackend`] knows the command-line syntax of one cloud
//! provider: it generates create, destroy, status and describe commands and
//! interprets their raw output. Commands themselves are executed by the
//! owning resource's [`CommandRunner`](crate::execution::CommandRunner).

use serde_json::Value;

use crate::execution::CommandOutput;

use super::pricing::MachineSelection;

/// Boot disks at or above this size are expressed in TB.
pub const TB_THRESHOLD_GB: u64 = 10240;

/// Provider-observed instance state, before mapping to a resource status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderState {
    /// The provider has no such instance.
    Missing,
    /// Provisioning or staging.
    Booting,
    /// Running; not necessarily done with its startup script.
    Running,
    /// Stopping, suspended or terminated.
    Terminating,
}

/// Everything needed to generate a create command.
#[derive(Debug, Clone)]
pub struct InstanceSpec<'a> {
    pub name: &'a str,
    pub zone: &'a str,
    pub disk_image: &'a str,
    pub disk_gb: u64,
    pub boot_disk_ssd: bool,
    pub local_ssd_count: u32,
    pub preemptible: bool,
    pub service_account: &'a str,
    pub startup_script: Option<&'a str>,
    pub machine: &'a MachineSelection,
}

/// Command syntax of a cloud provider.
pub trait ProvisioningBackend: Send + Sync {
    fn create_command(&self, spec: &InstanceSpec<'_>) -> String;

    fn destroy_command(&self, name: &str, zone: &str) -> String;

    /// Command whose output [`ProvisioningBackend::parse_state`] understands.
    fn status_command(&self, name: &str, zone: &str) -> String;

    /// Command returning instance metadata as JSON.
    fn describe_command(&self, name: &str, zone: &str) -> String;

    /// Wrap a task command so it runs on the instance.
    fn remote_command(&self, name: &str, zone: &str, command: &str) -> String;

    /// Interpret the output of the status command.
    fn parse_state(&self, output: &CommandOutput) -> Result<ProviderState, String>;

    /// Check describe output for the ready marker in the instance metadata.
    fn is_ready(&self, describe: &CommandOutput, marker: &str) -> Result<bool, String> {
        let data: Value = serde_json::from_str(&describe.stdout)
            .map_err(|e| format!("invalid describe output: {}", e))?;
        let ready = data
            .pointer("/metadata/items")
            .and_then(Value::as_array)
            .is_some_and(|items| {
                items
                    .iter()
                    .any(|item| item.get("key").and_then(Value::as_str) == Some(marker))
            });
        Ok(ready)
    }
}

/// Format a boot disk size: whole GB below the TB threshold, TB rounded up above it.
pub fn boot_disk_size(disk_gb: u64) -> String {
    if disk_gb >= TB_THRESHOLD_GB {
        format!("{}TB", disk_gb.div_ceil(1024))
    } else {
        format!("{}GB", disk_gb)
    }
}

/// Derive the region from a zone (`us-east1-c` -> `us-east1`).
pub fn region_of(zone: &str) -> &str {
    zone.rsplit_once('-').map_or(zone, |(region, _)| region)
}

/// Quote a command for a single-quoted remote shell argument.
fn single_quote_escape(command: &str) -> String {
    command.replace('\'', "'\"'\"'")
}

/// Google Compute Engine via the `gcloud` CLI.
#[derive(Debug, Clone)]
pub struct GcloudBackend {
    ssh_user: String,
}

impl GcloudBackend {
    pub fn new(ssh_user: impl Into<String>) -> Self {
        Self {
            ssh_user: ssh_user.into(),
        }
    }
}

impl Default for GcloudBackend {
    fn default() -> Self {
        Self::new("gantry")
    }
}

impl ProvisioningBackend for GcloudBackend {
    fn create_command(&self, spec: &InstanceSpec<'_>) -> String {
        let mut args = vec![
            format!("gcloud compute instances create {}", spec.name),
            format!("--zone {}", spec.zone),
        ];

        if spec.preemptible {
            args.push("--preemptible".to_string());
        }

        args.push(format!("--image {}", spec.disk_image));
        args.push(format!("--boot-disk-size {}", boot_disk_size(spec.disk_gb)));
        args.push(format!(
            "--boot-disk-type {}",
            if spec.boot_disk_ssd { "pd-ssd" } else { "pd-standard" }
        ));
        args.extend((0..spec.local_ssd_count).map(|_| "--local-ssd interface=scsi".to_string()));
        args.push("--scopes cloud-platform".to_string());
        args.push(format!("--service-account {}", spec.service_account));

        if spec.machine.is_custom() {
            args.push(format!("--custom-cpu {}", spec.machine.cpus));
            args.push(format!("--custom-memory {}GB", spec.machine.mem_gb));
        } else {
            args.push(format!("--machine-type {}", spec.machine.instance_type));
        }

        if let Some(script) = spec.startup_script {
            args.push(format!("--metadata-from-file startup-script={}", script));
        }

        args.join(" ")
    }

    fn destroy_command(&self, name: &str, zone: &str) -> String {
        format!("yes 2>/dev/null | gcloud compute instances delete {} --zone {}", name, zone)
    }

    fn status_command(&self, name: &str, zone: &str) -> String {
        format!(
            "gcloud compute instances describe {} --zone {} --format='value(status)'",
            name, zone
        )
    }

    fn describe_command(&self, name: &str, zone: &str) -> String {
        format!("gcloud compute instances describe {} --zone {} --format=json", name, zone)
    }

    fn remote_command(&self, name: &str, zone: &str, command: &str) -> String {
        format!(
            "gcloud compute ssh {}@{} --command '{}' --zone {}",
            self.ssh_user,
            name,
            single_quote_escape(command),
            zone
        )
    }

    fn parse_state(&self, output: &CommandOutput) -> Result<ProviderState, String> {
        if !output.success() {
            if output.stderr.contains("was not found") || output.stderr.contains("notFound") {
                return Ok(ProviderState::Missing);
            }
            return Err(output.stderr.trim().to_string());
        }

        match output.stdout.trim() {
            "PROVISIONING" | "STAGING" => Ok(ProviderState::Booting),
            "RUNNING" => Ok(ProviderState::Running),
            "STOPPING" | "SUSPENDING" | "SUSPENDED" | "TERMINATED" => {
                Ok(ProviderState::Terminating)
            }
            other => Err(format!("unrecognised instance status '{}'", other)),
        }
    }
}
