//! Subcommand implementations

pub mod deploy;
pub mod host;
pub mod scripts;
pub mod service;

use crate::config::DeployConfig;
use converge_lib::admin::PsqlExec;
use converge_lib::installer::{CommandRunner, ProcessRunner, RuntimeInstaller};
use converge_lib::runtime::DockerCli;
use std::sync::Arc;

/// Production backends wired from configuration
pub struct Backends {
    pub runner: Arc<dyn CommandRunner>,
    pub runtime: Arc<DockerCli>,
    pub admin: Arc<PsqlExec>,
}

impl Backends {
    pub fn from_config(config: &DeployConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner);
        let binary = &config.runtime.binary;
        Self {
            runtime: Arc::new(DockerCli::new(runner.clone()).with_binary(binary)),
            admin: Arc::new(
                PsqlExec::new(runner.clone(), &config.service.admin_user)
                    .with_binary(binary)
                    .with_database(&config.service.database),
            ),
            runner,
        }
    }

    pub fn installer(&self, config: &DeployConfig) -> RuntimeInstaller {
        RuntimeInstaller::new(self.runner.clone()).with_binary(&config.runtime.binary)
    }
}
