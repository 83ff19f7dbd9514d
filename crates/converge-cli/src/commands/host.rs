//! Read-only host commands: probe and plan

use anyhow::Result;
use converge_lib::pipeline::settings_for;
use converge_lib::planner::plan_with;
use converge_lib::probe::Prober;
use converge_lib::{ApplyMode, HostProfile, ResourcePlan};
use serde::Serialize;
use tabled::Tabled;

use crate::config::DeployConfig;
use crate::output::{format_bytes, print_heading, print_json, print_rows, FieldRow, OutputFormat};

/// Row for the settings table
#[derive(Tabled, Serialize)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Takes effect on")]
    applies: String,
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    host: &'a HostProfile,
    plan: &'a ResourcePlan,
    settings: &'a [SettingRow],
}

/// Show the detected host profile
pub async fn probe(format: OutputFormat) -> Result<()> {
    let host = Prober::new().probe().await;

    match format {
        OutputFormat::Json => print_json(&host)?,
        OutputFormat::Table => {
            print_heading("Host Profile");
            print_rows(host_rows(&host));
        }
    }
    Ok(())
}

/// Show the resource plan and the settings it produces.
///
/// `memory_bytes` replaces the probed memory for what-if planning.
pub async fn plan(config: &DeployConfig, memory_bytes: Option<u64>, format: OutputFormat) -> Result<()> {
    let mut host = Prober::new().probe().await;
    if let Some(bytes) = memory_bytes {
        host.total_memory_bytes = bytes;
    }

    let options = config.options();
    let plan = plan_with(&host, &options.ratios);
    let settings: Vec<SettingRow> = settings_for(&plan, &options)
        .into_iter()
        .map(|s| SettingRow {
            key: s.key,
            value: s.value,
            applies: match s.apply_mode {
                ApplyMode::Reload => "reload".to_string(),
                ApplyMode::Restart => "restart".to_string(),
            },
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&PlanOutput {
            host: &host,
            plan: &plan,
            settings: &settings,
        })?,
        OutputFormat::Table => {
            print_heading("Resource Plan");
            let mut rows = host_rows(&host);
            rows.extend(plan_rows(&plan));
            print_rows(rows);
            println!();
            print_rows(settings);
        }
    }
    Ok(())
}

fn host_rows(host: &HostProfile) -> Vec<FieldRow> {
    vec![
        FieldRow::new("OS family", host.os_family),
        FieldRow::new("Architecture", host.architecture),
        FieldRow::new("Memory", format_bytes(host.total_memory_bytes)),
        FieldRow::new("CPUs", host.cpu_count),
    ]
}

fn plan_rows(plan: &ResourcePlan) -> Vec<FieldRow> {
    vec![
        FieldRow::new("Container memory limit", format_bytes(plan.container_memory_limit_bytes)),
        FieldRow::new("Buffer cache", format_bytes(plan.buffer_cache_bytes)),
        FieldRow::new("Effective cache", format_bytes(plan.effective_cache_bytes)),
        FieldRow::new("Work memory", format_bytes(plan.work_mem_bytes)),
        FieldRow::new("Maintenance memory", format_bytes(plan.maintenance_work_mem_bytes)),
        FieldRow::new("Max connections", plan.max_connections),
        FieldRow::new("Parallel workers", plan.max_parallel_workers),
    ]
}
