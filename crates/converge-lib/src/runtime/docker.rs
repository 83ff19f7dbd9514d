//! Docker CLI backend

use super::ContainerRuntime;
use crate::error::{is_not_found_message, RuntimeError};
use crate::installer::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::{InstanceStatus, ResourcePlan, ServiceInstance, ServiceSpec};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime driving the `docker` command line
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "docker".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn exec(&self, op: &str, command: CommandSpec) -> Result<CommandOutput, RuntimeError> {
        debug!(op = %op, command = %command, "Runtime call");
        let output = self.runner.run(&command).await;
        if output.success() {
            Ok(output)
        } else {
            Err(RuntimeError::new(op, output.exit_code, output.stderr))
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.binary, args)
    }

    /// Arguments for `docker run`. Environment values are not part of the
    /// argument list; only the keys are, and the values travel in the
    /// child's environment.
    pub fn run_args(spec: &ServiceSpec, plan: &ResourcePlan) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--restart".to_string(),
            spec.restart_policy.as_str().to_string(),
            "--memory".to_string(),
            plan.container_memory_limit_bytes.to_string(),
            "--shm-size".to_string(),
            plan.buffer_cache_bytes.to_string(),
            "-p".to_string(),
            format!("{}:{}", spec.published_port, spec.container_port),
            "-v".to_string(),
            format!(
                "{}:{}",
                spec.volume_host_path.display(),
                spec.volume_container_path
            ),
        ];
        for key in spec.environment.keys() {
            args.push("-e".to_string());
            args.push(key.clone());
        }
        args.push(spec.image_reference.clone());
        args
    }
}

/// Parses one `{{.Id}}\t{{.State.Status}}` line from `docker inspect`.
pub fn parse_inspect_line(name: &str, line: &str) -> Option<ServiceInstance> {
    let (id, state) = line.trim().split_once('\t')?;
    Some(ServiceInstance {
        instance_id: id.to_string(),
        name: name.to_string(),
        status: InstanceStatus::from_runtime_state(state),
    })
}

/// Parses `{{.ID}}\t{{.Names}}\t{{.State}}` lines from `docker ps`,
/// keeping only exact name matches.
pub fn parse_ps_output(name: &str, output: &str) -> Vec<ServiceInstance> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split('\t');
            let id = fields.next()?.trim();
            let names = fields.next()?.trim();
            let state = fields.next().unwrap_or("").trim();
            if id.is_empty() || !names.split(',').any(|n| n.trim_start_matches('/') == name) {
                return None;
            }
            Some(ServiceInstance {
                instance_id: id.to_string(),
                name: name.to_string(),
                status: InstanceStatus::from_runtime_state(state),
            })
        })
        .collect()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        info!(image = %image, "Pulling image");
        self.exec("pull", self.command(["pull", image])).await?;
        Ok(())
    }

    async fn create_and_start(
        &self,
        spec: &ServiceSpec,
        plan: &ResourcePlan,
    ) -> Result<String, RuntimeError> {
        let command = self
            .command(Self::run_args(spec, plan))
            .with_env(spec.environment.clone());
        let output = self.exec("create", command).await?;
        let id = output.stdout.trim().to_string();
        info!(name = %spec.name, container_id = %id, "Container created");
        Ok(id)
    }

    async fn stop(&self, id_or_name: &str) -> Result<(), RuntimeError> {
        self.exec("stop", self.command(["stop", id_or_name])).await?;
        Ok(())
    }

    async fn remove(&self, id_or_name: &str) -> Result<(), RuntimeError> {
        self.exec("remove", self.command(["rm", "-f", id_or_name])).await?;
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ServiceInstance, RuntimeError> {
        let command = self.command([
            "inspect",
            "--type",
            "container",
            "--format",
            "{{.Id}}\t{{.State.Status}}",
            name,
        ]);
        let output = self.runner.run(&command).await;

        if !output.success() {
            if is_not_found_message(&output.stderr) {
                return Ok(ServiceInstance {
                    instance_id: String::new(),
                    name: name.to_string(),
                    status: InstanceStatus::Absent,
                });
            }
            return Err(RuntimeError::new("inspect", output.exit_code, output.stderr));
        }

        parse_inspect_line(name, &output.stdout).ok_or_else(|| {
            RuntimeError::new(
                "inspect",
                None,
                format!("unexpected inspect output: {}", output.stdout.trim()),
            )
        })
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String, RuntimeError> {
        let tail = tail.to_string();
        let output = self
            .exec("logs", self.command(["logs", "--tail", tail.as_str(), name]))
            .await?;
        // container stderr is forwarded on our stderr
        let mut combined = output.stdout;
        if !output.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&output.stderr);
        }
        Ok(combined)
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<ServiceInstance>, RuntimeError> {
        let filter = format!("name=^/{}$", name);
        let output = self
            .exec(
                "list",
                self.command([
                    "ps",
                    "-a",
                    "--no-trunc",
                    "--filter",
                    filter.as_str(),
                    "--format",
                    "{{.ID}}\t{{.Names}}\t{{.State}}",
                ]),
            )
            .await?;
        Ok(parse_ps_output(name, &output.stdout))
    }

    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        info!(name = %name, "Restarting container");
        self.exec("restart", self.command(["restart", name])).await?;
        Ok(())
    }
}
