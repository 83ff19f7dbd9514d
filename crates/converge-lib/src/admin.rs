//! Administrative channel into the running database

use crate::error::AdminError;
use crate::installer::{CommandRunner, CommandSpec};
use crate::models::ServiceInstance;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Request/response channel into a running service
#[async_trait]
pub trait AdminChannel: Send + Sync {
    /// Execute one administrative statement, returning its textual output.
    async fn execute(&self, instance: &ServiceInstance, statement: &str)
        -> Result<String, AdminError>;

    /// Ask the service to reload its configuration.
    async fn reload(&self, instance: &ServiceInstance) -> Result<(), AdminError>;

    /// Succeeds when the service accepts requests.
    async fn liveness(&self, instance: &ServiceInstance) -> Result<(), AdminError>;
}

/// Channel using `psql` and `pg_isready` inside the container via `docker exec`
pub struct PsqlExec {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    user: String,
    database: String,
}

impl PsqlExec {
    pub fn new(runner: Arc<dyn CommandRunner>, user: impl Into<String>) -> Self {
        Self {
            runner,
            binary: "docker".to_string(),
            user: user.into(),
            database: "postgres".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    fn target(instance: &ServiceInstance) -> &str {
        if instance.name.is_empty() {
            &instance.instance_id
        } else {
            &instance.name
        }
    }

    /// `docker exec` command running a single statement through psql.
    pub fn psql_command(&self, instance: &ServiceInstance, statement: &str) -> CommandSpec {
        CommandSpec::new(
            &self.binary,
            [
                "exec",
                Self::target(instance),
                "psql",
                "-v",
                "ON_ERROR_STOP=1",
                "-U",
                self.user.as_str(),
                "-d",
                self.database.as_str(),
                "-tAc",
                statement,
            ],
        )
    }

    pub fn isready_command(&self, instance: &ServiceInstance) -> CommandSpec {
        CommandSpec::new(
            &self.binary,
            [
                "exec",
                Self::target(instance),
                "pg_isready",
                "-U",
                self.user.as_str(),
                "-d",
                self.database.as_str(),
            ],
        )
    }
}

#[async_trait]
impl AdminChannel for PsqlExec {
    async fn execute(
        &self,
        instance: &ServiceInstance,
        statement: &str,
    ) -> Result<String, AdminError> {
        let output = self.runner.run(&self.psql_command(instance, statement)).await;
        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(AdminError::new(output.exit_code, output.stderr))
        }
    }

    async fn reload(&self, instance: &ServiceInstance) -> Result<(), AdminError> {
        let result = self.execute(instance, "SELECT pg_reload_conf()").await?;
        if result == "t" {
            Ok(())
        } else {
            Err(AdminError::new(
                None,
                format!("pg_reload_conf returned {:?}", result),
            ))
        }
    }

    async fn liveness(&self, instance: &ServiceInstance) -> Result<(), AdminError> {
        let output = self.runner.run(&self.isready_command(instance)).await;
        debug!(exit_code = ?output.exit_code, "Liveness probe");
        if output.success() {
            Ok(())
        } else {
            let message = if output.stdout.trim().is_empty() {
                output.stderr
            } else {
                output.stdout
            };
            Err(AdminError::new(output.exit_code, message))
        }
    }
}
