//! Library for single-host database deployment
//!
//! This crate provides the core functionality for:
//! - Host probing and container runtime installation
//! - Resource planning from host capacity
//! - Replacing the service container and waiting for it to run
//! - Applying database settings over the administrative channel
//! - Liveness reporting, helper scripts and observability

pub mod admin;
pub mod applier;
pub mod error;
pub mod health;
pub mod installer;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod planner;
pub mod probe;
pub mod reconciler;
pub mod retry;
pub mod runtime;
pub mod scripts;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{
    AdminError, ConfigError, DeployError, InstallError, ReconcileError, RuntimeError,
    ValidationError,
};
pub use health::{ComponentHealth, ComponentStatus, HealthReporter};
pub use models::*;
pub use observability::{DeployMetrics, EventLogger};
pub use pipeline::{DeployOptions, Deployer, DeploymentReport};
