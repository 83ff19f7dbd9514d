//! Full deployment run

use anyhow::Result;
use colored::Colorize;
use converge_lib::probe::Prober;
use converge_lib::scripts::{write_scripts, ScriptParams};
use converge_lib::{ComponentStatus, ConfigSetting, Deployer, DeploymentReport};
use std::path::PathBuf;
use tabled::Tabled;

use super::Backends;
use crate::config::DeployConfig;
use crate::output::{
    color_status, format_bytes, print_heading, print_info, print_json, print_rows, print_success,
    print_warning, FieldRow, OutputFormat,
};

/// Row for the component table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

pub struct DeployArgs {
    pub baseline: bool,
    pub settings: Vec<ConfigSetting>,
    pub scripts_dir: Option<PathBuf>,
}

/// Converge the host and print the report
pub async fn run(config: &DeployConfig, args: DeployArgs, format: OutputFormat) -> Result<()> {
    let spec = config.service_spec_from_env();
    let mut options = config.options();
    options.baseline_settings &= args.baseline;
    options.extra_settings.extend(args.settings);

    let backends = Backends::from_config(config);
    let deployer = Deployer::new(
        Prober::new(),
        backends.runner.clone(),
        backends.runtime.clone(),
        backends.admin.clone(),
        options,
    )
    .with_installer(backends.installer(config));

    let report = deployer.run(&spec).await?;

    let scripts_dir = args.scripts_dir.or_else(|| config.scripts_dir.clone());
    let mut scripts = Vec::new();
    if let Some(dir) = scripts_dir {
        let params = ScriptParams::new(&spec, &config.retry.liveness_policy());
        scripts = write_scripts(&dir, &params)?;
    }

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_report(&report);
            for path in &scripts {
                print_info(&format!("Helper script written to {}", path.display()));
            }
        }
    }
    Ok(())
}

fn print_report(report: &DeploymentReport) {
    print_heading("Deployment Report");
    print_rows(vec![
        FieldRow::new("Host", format!("{} / {}", report.host.os_family, report.host.architecture)),
        FieldRow::new("Memory", format_bytes(report.host.total_memory_bytes)),
        FieldRow::new("Runtime", format!("{:?}", report.install)),
        FieldRow::new("Memory limit", format_bytes(report.plan.container_memory_limit_bytes)),
        FieldRow::new("Instance", &report.instance.instance_id),
        FieldRow::new("Settings applied", report.apply.applied.len()),
        FieldRow::new("Liveness attempts", report.health.attempts),
        FieldRow::new(
            "Duration",
            format!(
                "{:.1}s",
                (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
            ),
        ),
    ]);
    println!();

    let rows: Vec<ComponentRow> = report
        .components
        .iter()
        .map(|(name, health)| ComponentRow {
            component: name.clone(),
            status: color_status(&health.status.to_string()),
            detail: health.message.clone().unwrap_or_default(),
        })
        .collect();
    print_rows(rows);

    if let Some(diagnostic) = &report.health.diagnostic {
        println!("\n{}", "Diagnostic".bold());
        println!("{}", diagnostic.dimmed());
    }

    match report.status {
        ComponentStatus::Healthy => print_success(&format!(
            "{} is running and reachable",
            report.instance.name
        )),
        _ => print_warning(&format!(
            "{} deployed with status {}",
            report.instance.name, report.status
        )),
    }
}
