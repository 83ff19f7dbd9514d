//! Container runtime interface
//!
//! The reconciler, health reporter and CLI depend only on the
//! [`ContainerRuntime`] trait. [`DockerCli`] drives the `docker` binary.

mod docker;

pub use docker::{parse_inspect_line, parse_ps_output, DockerCli};

use crate::error::RuntimeError;
use crate::models::{ResourcePlan, ServiceInstance, ServiceSpec};
use async_trait::async_trait;

/// Number of log lines captured for diagnostics
pub const DIAGNOSTIC_LOG_LINES: usize = 50;

/// Operations the deployment needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Fetch an image so that creation does not block on the registry.
    async fn pull(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create and start a container, returning its runtime id.
    async fn create_and_start(
        &self,
        spec: &ServiceSpec,
        plan: &ResourcePlan,
    ) -> Result<String, RuntimeError>;

    /// Stop a container by id or name. Stopping a stopped container succeeds.
    async fn stop(&self, id_or_name: &str) -> Result<(), RuntimeError>;

    /// Remove a stopped container by id or name.
    async fn remove(&self, id_or_name: &str) -> Result<(), RuntimeError>;

    /// Current state; an unknown name yields status `Absent`.
    async fn inspect(&self, name: &str) -> Result<ServiceInstance, RuntimeError>;

    /// Last `tail` lines of the container's output.
    async fn logs(&self, name: &str, tail: usize) -> Result<String, RuntimeError>;

    /// All containers, in any state, whose name is exactly `name`.
    async fn list_by_name(&self, name: &str) -> Result<Vec<ServiceInstance>, RuntimeError>;

    /// Restart a container in place.
    async fn restart(&self, name: &str) -> Result<(), RuntimeError>;
}
