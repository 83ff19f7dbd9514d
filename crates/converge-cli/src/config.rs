//! Layered deployment configuration
//!
//! Built-in defaults, then an optional TOML file, then `CONVERGE_*`
//! environment variables (`CONVERGE_SERVICE__NAME=db` sets `service.name`).
//! Credentials are never read from the file; they come only from
//! `CONVERGE_DB_PASSWORD` and `CONVERGE_ACCESS_TOKEN`.

use anyhow::{Context, Result};
use converge_lib::planner::PlannerRatios;
use converge_lib::retry::RetryPolicy;
use converge_lib::{ConfigSetting, DeployOptions, RestartPolicy, ServiceSpec, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "CONVERGE";
pub const DB_PASSWORD_VAR: &str = "CONVERGE_DB_PASSWORD";
pub const ACCESS_TOKEN_VAR: &str = "CONVERGE_ACCESS_TOKEN";

/// Container environment keys the credentials are injected as
pub const DB_PASSWORD_KEY: &str = "POSTGRES_PASSWORD";
pub const ACCESS_TOKEN_KEY: &str = "ACCESS_TOKEN";

/// Deployment configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub service: ServiceConfig,
    pub planner: PlannerRatios,
    pub retry: RetryConfig,
    pub settings: SettingsConfig,
    pub runtime: RuntimeConfig,
    /// Write helper scripts here after a successful deploy
    pub scripts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub image: String,
    pub published_port: u16,
    pub container_port: u16,
    pub volume_host_path: PathBuf,
    pub volume_container_path: String,
    pub restart_policy: RestartPolicy,
    pub admin_user: String,
    pub database: String,
    /// Extra non-secret container environment
    pub environment: Vec<EnvEntry>,
}

/// A container environment variable declared in the configuration file.
///
/// Names are values, not table keys, so their case survives loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "converge-db".to_string(),
            image: "postgres:16".to_string(),
            published_port: 5432,
            container_port: 5432,
            volume_host_path: PathBuf::from("/var/lib/converge/data"),
            volume_container_path: "/var/lib/postgresql/data".to_string(),
            restart_policy: RestartPolicy::UnlessStopped,
            admin_user: "postgres".to_string(),
            database: "postgres".to_string(),
            environment: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub start_attempts: u32,
    pub start_interval_secs: u64,
    pub liveness_attempts: u32,
    pub liveness_interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let start = RetryPolicy::container_start();
        let liveness = RetryPolicy::liveness();
        Self {
            start_attempts: start.max_attempts,
            start_interval_secs: start.interval.as_secs(),
            liveness_attempts: liveness.max_attempts,
            liveness_interval_secs: liveness.interval.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn start_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.start_attempts, Duration::from_secs(self.start_interval_secs))
    }

    pub fn liveness_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.liveness_attempts,
            Duration::from_secs(self.liveness_interval_secs),
        )
    }
}

/// A setting declared in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
    /// Only takes effect after a server restart
    #[serde(default)]
    pub restart: bool,
}

impl From<&SettingEntry> for ConfigSetting {
    fn from(entry: &SettingEntry) -> Self {
        if entry.restart {
            ConfigSetting::restart(&entry.key, &entry.value)
        } else {
            ConfigSetting::reload(&entry.key, &entry.value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Apply the settings derived from the resource plan
    pub baseline: bool,
    pub extra: Vec<SettingEntry>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            baseline: true,
            extra: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub binary: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DeployConfig {
    /// Load configuration from defaults, the optional file and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`DeployConfig::load`] with an explicit environment (for testing).
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: DeployConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |msg: &str| Err(ValidationError::InvalidConfig(msg.to_string()));

        if self.service.name.trim().is_empty() {
            return invalid("service.name must not be empty");
        }
        if self.service.image.trim().is_empty() {
            return invalid("service.image must not be empty");
        }
        if self.service.published_port == 0 || self.service.container_port == 0 {
            return invalid("service ports must be non-zero");
        }
        if self.service.admin_user.trim().is_empty() {
            return invalid("service.admin_user must not be empty");
        }
        if self.retry.start_attempts == 0 || self.retry.liveness_attempts == 0 {
            return invalid("retry attempts must be at least 1");
        }
        for entry in &self.service.environment {
            if entry.name.is_empty() || entry.name.contains('=') || entry.name.contains('\0') {
                return Err(ValidationError::InvalidConfig(format!(
                    "invalid container environment name {:?}",
                    entry.name
                )));
            }
            if [DB_PASSWORD_KEY, ACCESS_TOKEN_KEY]
                .iter()
                .any(|key| entry.name.eq_ignore_ascii_case(key))
            {
                return Err(ValidationError::InvalidConfig(format!(
                    "{} must come from the environment, not the configuration",
                    entry.name
                )));
            }
        }
        self.planner.validate()
    }

    /// Service spec with credentials resolved through `lookup`.
    pub fn service_spec<F>(&self, lookup: F) -> ServiceSpec
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut environment: BTreeMap<String, String> = self
            .service
            .environment
            .iter()
            .map(|entry| (entry.name.clone(), entry.value.clone()))
            .collect();
        for (var, key) in [(DB_PASSWORD_VAR, DB_PASSWORD_KEY), (ACCESS_TOKEN_VAR, ACCESS_TOKEN_KEY)] {
            if let Some(value) = lookup(var) {
                environment.insert(key.to_string(), value);
            }
        }

        ServiceSpec {
            name: self.service.name.clone(),
            image_reference: self.service.image.clone(),
            published_port: self.service.published_port,
            container_port: self.service.container_port,
            volume_host_path: self.service.volume_host_path.clone(),
            volume_container_path: self.service.volume_container_path.clone(),
            environment,
            restart_policy: self.service.restart_policy,
            required_credentials: vec![DB_PASSWORD_KEY.to_string(), ACCESS_TOKEN_KEY.to_string()],
            admin_user: self.service.admin_user.clone(),
        }
    }

    /// Service spec with credentials from the process environment.
    pub fn service_spec_from_env(&self) -> ServiceSpec {
        self.service_spec(|var| std::env::var(var).ok())
    }

    pub fn options(&self) -> DeployOptions {
        DeployOptions {
            ratios: self.planner,
            start_policy: self.retry.start_policy(),
            liveness_policy: self.retry.liveness_policy(),
            baseline_settings: self.settings.baseline,
            extra_settings: self.settings.extra.iter().map(ConfigSetting::from).collect(),
        }
    }
}
