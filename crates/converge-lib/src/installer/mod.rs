//! Container runtime installation
//!
//! Ensures Docker is installed, its daemon is running and enabled at boot.
//! A host that already answers `docker info` is left untouched.

mod runner;

pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};

use crate::error::InstallError;
use crate::models::{HostProfile, OsFamily};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod stages {
    pub const PACKAGE_INSTALL: &str = "package-install";
    pub const SERVICE_START: &str = "service-start";
    pub const VERIFY: &str = "verify";
}

/// What `ensure_runtime_present` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    /// Binary present and daemon answering; nothing was changed
    AlreadyPresent,
    /// Binary present, daemon had to be started
    ServiceStarted,
    /// Packages were installed and the daemon started
    Installed,
}

/// A step of an installation plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    pub command: CommandSpec,
    /// Failure is logged and ignored
    pub best_effort: bool,
}

impl InstallStep {
    fn required<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: CommandSpec::new(program, args),
            best_effort: false,
        }
    }

    fn best_effort<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: CommandSpec::new(program, args),
            best_effort: true,
        }
    }
}

/// Package installation commands for an OS family.
pub fn package_plan(os_family: OsFamily) -> Vec<InstallStep> {
    match os_family {
        OsFamily::DebianLike => vec![
            InstallStep::best_effort("apt-get", ["update"]),
            InstallStep::required("apt-get", ["install", "-y", "docker.io"]),
        ],
        OsFamily::RhelLike => vec![
            InstallStep::required("dnf", ["install", "-y", "dnf-plugins-core"]),
            InstallStep::required(
                "dnf",
                [
                    "config-manager",
                    "--add-repo",
                    "https://download.docker.com/linux/centos/docker-ce.repo",
                ],
            ),
            InstallStep::required(
                "dnf",
                ["install", "-y", "docker-ce", "docker-ce-cli", "containerd.io"],
            ),
        ],
        OsFamily::Other => vec![InstallStep::required(
            "sh",
            ["-c", "curl -fsSL https://get.docker.com | sh"],
        )],
    }
}

/// Service manager invocations tried in order; the first success wins.
pub fn service_start_candidates() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("systemctl", ["enable", "--now", "docker"]),
        CommandSpec::new("service", ["docker", "start"]),
        CommandSpec::new("/etc/init.d/docker", ["start"]),
    ]
}

/// Installs and starts the container runtime when needed
pub struct RuntimeInstaller {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl RuntimeInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "docker".to_string(),
        }
    }

    /// Use a different runtime binary name (e.g. a full path)
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn binary_available(&self) -> bool {
        let output = self
            .runner
            .run(&CommandSpec::new(&self.binary, ["--version"]))
            .await;
        debug!(available = output.success(), "Runtime binary check");
        output.success()
    }

    async fn daemon_reachable(&self) -> bool {
        let output = self
            .runner
            .run(&CommandSpec::new(
                &self.binary,
                ["info", "--format", "{{.ServerVersion}}"],
            ))
            .await;
        debug!(reachable = output.success(), "Runtime daemon check");
        output.success()
    }

    /// Brings the host to a state where the runtime is usable.
    ///
    /// Calling this on a host that is already set up performs only the two
    /// read-only checks.
    pub async fn ensure_runtime_present(
        &self,
        profile: &HostProfile,
    ) -> Result<InstallOutcome, InstallError> {
        let binary_present = self.binary_available().await;
        if binary_present && self.daemon_reachable().await {
            info!("Container runtime already present and running");
            return Ok(InstallOutcome::AlreadyPresent);
        }

        let outcome = if binary_present {
            info!("Container runtime installed but daemon not reachable, starting service");
            InstallOutcome::ServiceStarted
        } else {
            info!(os_family = %profile.os_family, "Container runtime missing, installing");
            self.install_packages(profile.os_family).await?;
            InstallOutcome::Installed
        };

        self.start_service().await?;

        if !self.binary_available().await {
            return Err(InstallError::new(
                stages::VERIFY,
                None,
                format!("{} is still not available after installation", self.binary),
            ));
        }
        if !self.daemon_reachable().await {
            return Err(InstallError::new(
                stages::VERIFY,
                None,
                "runtime daemon is not reachable after service start",
            ));
        }

        info!(outcome = ?outcome, "Container runtime ready");
        Ok(outcome)
    }

    async fn install_packages(&self, os_family: OsFamily) -> Result<(), InstallError> {
        for step in package_plan(os_family) {
            let output = self.runner.run(&step.command).await;
            if output.success() {
                debug!(command = %step.command, "Install step succeeded");
                continue;
            }
            if step.best_effort {
                warn!(
                    command = %step.command,
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "Best-effort install step failed, continuing"
                );
                continue;
            }
            return Err(InstallError::new(
                stages::PACKAGE_INSTALL,
                output.exit_code,
                format!("`{}`: {}", step.command, output.stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn start_service(&self) -> Result<(), InstallError> {
        let mut last: Option<(CommandSpec, CommandOutput)> = None;

        for candidate in service_start_candidates() {
            let output = self.runner.run(&candidate).await;
            if output.success() {
                info!(command = %candidate, "Runtime service started");
                return Ok(());
            }
            debug!(
                command = %candidate,
                exit_code = ?output.exit_code,
                "Service start style not usable, trying next"
            );
            last = Some((candidate, output));
        }

        let (command, output) = match last {
            Some(last) => last,
            None => return Err(InstallError::new(stages::SERVICE_START, None, "no service manager")),
        };
        Err(InstallError::new(
            stages::SERVICE_START,
            output.exit_code,
            format!("all service start styles failed, last `{}`: {}", command, output.stderr.trim()),
        ))
    }
}
