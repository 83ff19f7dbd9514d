//! Commands against the deployed service: status and restart

use anyhow::{bail, Result};
use colored::Colorize;
use converge_lib::reconciler::Reconciler;
use converge_lib::runtime::ContainerRuntime;
use converge_lib::{HealthReporter, HealthSummary, InstanceStatus, ServiceInstance};
use serde::Serialize;

use super::Backends;
use crate::config::DeployConfig;
use crate::output::{
    color_status, print_heading, print_json, print_rows, print_success, print_warning, FieldRow,
    OutputFormat,
};

#[derive(Serialize)]
struct StatusOutput {
    instance: ServiceInstance,
    #[serde(skip_serializing_if = "Option::is_none")]
    health: Option<HealthSummary>,
}

/// Show container status and, if it runs, liveness
pub async fn status(config: &DeployConfig, format: OutputFormat) -> Result<()> {
    let backends = Backends::from_config(config);
    let instance = backends.runtime.inspect(&config.service.name).await?;

    let health = if instance.status == InstanceStatus::Running {
        let reporter = HealthReporter::new(
            backends.admin.clone(),
            backends.runtime.clone(),
            config.retry.liveness_policy(),
        );
        Some(reporter.report(&instance).await)
    } else {
        None
    };

    print_status(&StatusOutput { instance, health }, format)
}

/// Restart the container in place and wait until it is running and live
pub async fn restart(config: &DeployConfig, format: OutputFormat) -> Result<()> {
    let backends = Backends::from_config(config);
    let current = backends.runtime.inspect(&config.service.name).await?;
    if current.status == InstanceStatus::Absent {
        bail!("{} is not deployed", config.service.name);
    }

    let reconciler = Reconciler::new(backends.runtime.clone(), config.retry.start_policy());
    let instance = reconciler.restart_and_wait(&config.service.name).await?;

    let reporter = HealthReporter::new(
        backends.admin.clone(),
        backends.runtime.clone(),
        config.retry.liveness_policy(),
    );
    let health = reporter.report(&instance).await;

    print_status(
        &StatusOutput {
            instance,
            health: Some(health),
        },
        format,
    )
}

fn print_status(output: &StatusOutput, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(output)?,
        OutputFormat::Table => {
            print_heading("Service Status");
            let mut rows = vec![
                FieldRow::new("Name", &output.instance.name),
                FieldRow::new("Status", color_status(&output.instance.status.to_string())),
            ];
            if !output.instance.instance_id.is_empty() {
                rows.push(FieldRow::new("Instance", &output.instance.instance_id));
            }
            if let Some(health) = &output.health {
                let liveness = if health.reachable { "reachable" } else { "unreachable" };
                rows.push(FieldRow::new("Liveness", color_status(liveness)));
                rows.push(FieldRow::new("Probe attempts", health.attempts));
            }
            print_rows(rows);

            match &output.health {
                Some(health) if health.reachable => print_success("Service is accepting connections"),
                Some(health) => {
                    print_warning("Service is not accepting connections");
                    if let Some(diagnostic) = &health.diagnostic {
                        println!("{}", diagnostic.dimmed());
                    }
                }
                None => print_warning(&format!(
                    "{} is {}",
                    output.instance.name, output.instance.status
                )),
            }
        }
    }
    Ok(())
}
