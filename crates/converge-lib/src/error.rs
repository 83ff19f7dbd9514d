//! Error taxonomy for a deployment run
//!
//! Every fatal error can name the stage it came from and the exit code the
//! process should terminate with.

use crate::models::InstanceStatus;
use thiserror::Error;

/// Exit code used when a failure has no underlying process exit code.
pub const GENERIC_FAILURE_CODE: i32 = 1;

/// Exit code used for pre-flight validation failures.
pub const VALIDATION_FAILURE_CODE: i32 = 2;

fn nonzero(code: Option<i32>) -> i32 {
    code.filter(|c| *c != 0).unwrap_or(GENERIC_FAILURE_CODE)
}

/// Pre-flight input validation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required credential: {0}")]
    MissingCredential(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of an external command issued by the runtime or the installer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{op} failed (exit code {}): {stderr}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()))]
pub struct RuntimeError {
    /// Logical operation, e.g. `pull` or `inspect`
    pub op: String,
    /// Process exit code, `None` if the process could not be spawned or was killed
    pub exit_code: Option<i32>,
    /// Captured standard error (trimmed)
    pub stderr: String,
}

impl RuntimeError {
    pub fn new(op: impl Into<String>, exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            exit_code,
            stderr: stderr.into().trim().to_string(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        nonzero(self.exit_code)
    }

    /// The runtime reported that the target does not exist.
    pub fn is_not_found(&self) -> bool {
        is_not_found_message(&self.stderr)
    }
}

pub(crate) fn is_not_found_message(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("no such object") || lower.contains("no such container")
}

/// Container runtime could not be installed or started.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("install stage '{stage}' failed with exit code {exit_code}: {message}")]
pub struct InstallError {
    pub stage: &'static str,
    pub exit_code: i32,
    pub message: String,
}

impl InstallError {
    pub fn new(stage: &'static str, exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            stage,
            exit_code: nonzero(exit_code),
            message: message.into(),
        }
    }
}

/// Failure on the service's administrative channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("admin command failed (exit code {}): {message}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()))]
pub struct AdminError {
    pub exit_code: Option<i32>,
    pub message: String,
}

impl AdminError {
    pub fn new(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into().trim().to_string(),
        }
    }
}

impl From<RuntimeError> for AdminError {
    fn from(err: RuntimeError) -> Self {
        Self {
            exit_code: err.exit_code,
            message: err.stderr,
        }
    }
}

/// Instance replacement or readiness wait failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("missing required credential: {0}")]
    MissingCredential(String),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("instance did not reach running state (last status: {status})")]
    NotRunning {
        status: InstanceStatus,
        captured_logs: String,
    },
}

impl ReconcileError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReconcileError::MissingCredential(_) => VALIDATION_FAILURE_CODE,
            ReconcileError::Runtime(e) => e.exit_code(),
            ReconcileError::NotRunning { .. } => GENERIC_FAILURE_CODE,
        }
    }

    /// Logs captured from the runtime when the instance failed to come up.
    pub fn captured_logs(&self) -> Option<&str> {
        match self {
            ReconcileError::NotRunning { captured_logs, .. } => Some(captured_logs),
            _ => None,
        }
    }
}

/// Outcome of applying administrative settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("instance is not running (status: {0})")]
    NotReady(InstanceStatus),

    #[error("settings failed to apply: {}", .0.join(", "))]
    PartialFailure(Vec<String>),

    #[error("configuration reload failed: {0}")]
    ReloadFailed(AdminError),
}

impl ConfigError {
    /// Partial failures are reported but never abort a run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConfigError::PartialFailure(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::ReloadFailed(e) => nonzero(e.exit_code),
            _ => GENERIC_FAILURE_CODE,
        }
    }
}

/// Fatal error that aborts a deployment run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Config(ConfigError),

    #[error("restart after configuration failed: {0}")]
    Restart(ReconcileError),
}

impl DeployError {
    /// Name of the pipeline stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            DeployError::Validation(_) => "validate",
            DeployError::Install(_) => "install",
            DeployError::Reconcile(ReconcileError::MissingCredential(_)) => "validate",
            DeployError::Reconcile(_) => "reconcile",
            DeployError::Config(_) => "configure",
            DeployError::Restart(_) => "restart",
        }
    }

    /// Process exit code for this failure; always non-zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Validation(_) => VALIDATION_FAILURE_CODE,
            DeployError::Install(e) => e.exit_code,
            DeployError::Reconcile(e) | DeployError::Restart(e) => e.exit_code(),
            DeployError::Config(e) => e.exit_code(),
        }
    }
}
