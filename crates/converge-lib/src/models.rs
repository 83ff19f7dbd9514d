//! Core data models for a deployment run

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Host operating-system family, decided once by the prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    DebianLike,
    RhelLike,
    Other,
}

/// Host CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Arm64,
    X86_64,
    Other,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OsFamily::DebianLike => "debian-like",
            OsFamily::RhelLike => "rhel-like",
            OsFamily::Other => "other",
        })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Architecture::Arm64 => "arm64",
            Architecture::X86_64 => "x86_64",
            Architecture::Other => "other",
        })
    }
}

/// Host capacity and identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProfile {
    pub os_family: OsFamily,
    pub architecture: Architecture,
    pub total_memory_bytes: u64,
    pub cpu_count: u32,
}

/// Resource limits derived from host capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePlan {
    pub container_memory_limit_bytes: u64,
    pub buffer_cache_bytes: u64,
    pub effective_cache_bytes: u64,
    pub work_mem_bytes: u64,
    pub maintenance_work_mem_bytes: u64,
    pub max_connections: u32,
    pub max_parallel_workers: u32,
}

/// Container restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    #[default]
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::OnFailure => "on-failure",
        }
    }
}

/// Desired state of the single managed service
///
/// `environment` holds credentials; its values never appear in `Debug`
/// output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Unique container name
    pub name: String,
    pub image_reference: String,
    pub published_port: u16,
    pub container_port: u16,
    pub volume_host_path: PathBuf,
    pub volume_container_path: String,
    pub environment: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    /// Environment keys that must be present and non-empty
    pub required_credentials: Vec<String>,
    /// Database role used on the administrative channel
    pub admin_user: String,
}

impl ServiceSpec {
    /// Returns the first required credential that is absent or empty.
    pub fn missing_credential(&self) -> Option<&str> {
        self.required_credentials
            .iter()
            .find(|key| {
                self.environment
                    .get(key.as_str())
                    .map(|v| v.is_empty())
                    .unwrap_or(true)
            })
            .map(|k| k.as_str())
    }
}

impl fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .environment
            .keys()
            .map(|k| (k.as_str(), "<redacted>"))
            .collect();

        f.debug_struct("ServiceSpec")
            .field("name", &self.name)
            .field("image_reference", &self.image_reference)
            .field("published_port", &self.published_port)
            .field("container_port", &self.container_port)
            .field("volume_host_path", &self.volume_host_path)
            .field("volume_container_path", &self.volume_container_path)
            .field("environment", &redacted)
            .field("restart_policy", &self.restart_policy)
            .field("required_credentials", &self.required_credentials)
            .field("admin_user", &self.admin_user)
            .finish()
    }
}

/// Runtime-observed status of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Absent,
    Created,
    Running,
    Restarting,
    Exited,
}

impl InstanceStatus {
    /// Maps a runtime state string (`docker inspect .State.Status`).
    ///
    /// `paused`, `removing` and `dead` count as exited: none of them serve
    /// requests and all need replacing.
    pub fn from_runtime_state(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "created" => InstanceStatus::Created,
            "running" => InstanceStatus::Running,
            "restarting" => InstanceStatus::Restarting,
            "" => InstanceStatus::Absent,
            _ => InstanceStatus::Exited,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstanceStatus::Absent => "absent",
            InstanceStatus::Created => "created",
            InstanceStatus::Running => "running",
            InstanceStatus::Restarting => "restarting",
            InstanceStatus::Exited => "exited",
        })
    }
}

/// A view onto one container, refreshed per query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub name: String,
    pub status: InstanceStatus,
}

/// How a setting takes effect once written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// Picked up by a configuration reload
    Reload,
    /// Needs a server restart
    Restart,
}

/// A single administrative setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSetting {
    pub key: String,
    pub value: String,
    pub apply_mode: ApplyMode,
}

impl ConfigSetting {
    pub fn reload(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            apply_mode: ApplyMode::Reload,
        }
    }

    pub fn restart(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            apply_mode: ApplyMode::Restart,
        }
    }
}

/// Ordered settings; order only affects log output
pub type ConfigSettings = Vec<ConfigSetting>;

/// Result of a successful settings pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub failed: Vec<String>,
    pub restart_required: bool,
}

/// Final liveness verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub reachable: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}
