//! converge - single-host database deployment
//!
//! Probes the host, makes sure the container runtime is present, replaces
//! the database container, applies tuning settings and reports liveness.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use converge_lib::scripts::ScriptError;
use converge_lib::{
    ConfigSetting, DeployError, DeployMetrics, ReconcileError, RuntimeError, ValidationError,
};
use output::{LogFormat, OutputFormat};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Single-host database deployment reconciler
#[derive(Parser)]
#[command(name = "converge")]
#[command(author, version, about = "Single-host database deployment reconciler", long_about = None)]
pub struct Cli {
    /// TOML configuration file (can also be set via CONVERGE_CONFIG env var)
    #[arg(long, short, env = "CONVERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: OutputFormat,

    /// Log format on stderr
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Write Prometheus metrics in text format to this file on exit
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the runtime, replace the container, configure and verify it
    Deploy {
        /// Skip the settings derived from the resource plan
        #[arg(long)]
        no_baseline: bool,

        /// Extra setting applied after the baseline (KEY=VALUE, repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_setting)]
        settings: Vec<ConfigSetting>,

        /// Also write helper scripts to this directory
        #[arg(long)]
        scripts_dir: Option<PathBuf>,
    },

    /// Show the detected host profile
    Probe,

    /// Show the resource plan and derived settings for this host
    Plan {
        /// Plan for this much memory instead of the probed amount
        #[arg(long)]
        memory_bytes: Option<u64>,
    },

    /// Show container status and liveness
    Status,

    /// Restart the container and wait until it accepts connections
    Restart,

    /// Write status.sh and start.sh helper scripts
    Scripts {
        /// Target directory
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
    },
}

/// Parses `KEY=VALUE` into a reload-mode setting.
fn parse_setting(raw: &str) -> Result<ConfigSetting, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))?;
    let key = key.trim();
    converge_lib::applier::validate_key(key)?;
    Ok(ConfigSetting::reload(key, value))
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (json, text) = match format {
        LogFormat::Json => (Some(fmt::layer().json().with_writer(std::io::stderr)), None),
        LogFormat::Text => (None, Some(fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

impl Commands {
    /// Stage reported for failures outside the deployment pipeline
    fn stage(&self) -> &'static str {
        match self {
            Commands::Deploy { .. } => "deploy",
            Commands::Probe => "probe",
            Commands::Plan { .. } => "plan",
            Commands::Status => "status",
            Commands::Restart => "restart",
            Commands::Scripts { .. } => "scripts",
        }
    }
}

/// Exit code and failing stage for an error raised while running `stage`.
fn failure_of(err: &anyhow::Error, stage: &'static str) -> (i32, Option<&'static str>) {
    if let Some(e) = err.downcast_ref::<DeployError>() {
        (e.exit_code(), Some(e.stage()))
    } else if err.downcast_ref::<ValidationError>().is_some() {
        (converge_lib::error::VALIDATION_FAILURE_CODE, Some("validate"))
    } else if let Some(e) = err.downcast_ref::<ReconcileError>() {
        (e.exit_code(), Some(stage))
    } else if let Some(e) = err.downcast_ref::<RuntimeError>() {
        (e.exit_code(), Some(stage))
    } else if err.downcast_ref::<ScriptError>().is_some() {
        (converge_lib::error::GENERIC_FAILURE_CODE, Some("scripts"))
    } else {
        (converge_lib::error::GENERIC_FAILURE_CODE, None)
    }
}

/// Process status byte for a failure code; never 0.
fn failure_status(code: i32) -> u8 {
    u8::try_from(code).ok().filter(|c| *c != 0).unwrap_or(1)
}

async fn execute(cli: Cli) -> Result<()> {
    let config = config::DeployConfig::load(cli.config.as_deref())?;
    info!(service = %config.service.name, image = %config.service.image, "Configuration loaded");

    match cli.command {
        Commands::Deploy {
            no_baseline,
            settings,
            scripts_dir,
        } => {
            let args = commands::deploy::DeployArgs {
                baseline: !no_baseline,
                settings,
                scripts_dir,
            };
            commands::deploy::run(&config, args, cli.format).await?;
        }
        Commands::Probe => commands::host::probe(cli.format).await?,
        Commands::Plan { memory_bytes } => {
            commands::host::plan(&config, memory_bytes, cli.format).await?
        }
        Commands::Status => commands::service::status(&config, cli.format).await?,
        Commands::Restart => commands::service::restart(&config, cli.format).await?,
        Commands::Scripts { output } => commands::scripts::write(&config, &output, cli.format)?,
    }

    Ok(())
}

fn write_metrics(path: &Path) -> Result<()> {
    std::fs::write(path, DeployMetrics::new().render())
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            output::print_error(&format!("Failed to start async runtime: {}", e));
            return ExitCode::FAILURE;
        }
    };

    let metrics_file = cli.metrics_file.clone();
    let command_stage = cli.command.stage();
    let result = runtime.block_on(execute(cli));

    if let Some(path) = metrics_file {
        if let Err(e) = write_metrics(&path) {
            output::print_warning(&format!("{:#}", e));
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let (code, stage) = failure_of(&e, command_stage);
            match stage {
                Some(stage) => output::print_error(&format!(
                    "stage '{}' failed (exit code {}): {:#}",
                    stage, code, e
                )),
                None => output::print_error(&format!("{:#}", e)),
            }
            if let Some(logs) = e
                .downcast_ref::<DeployError>()
                .and_then(|d| match d {
                    DeployError::Reconcile(r) | DeployError::Restart(r) => r.captured_logs(),
                    _ => None,
                })
                .or_else(|| e.downcast_ref::<ReconcileError>().and_then(|r| r.captured_logs()))
            {
                eprintln!("--- container logs ---\n{}", logs.trim_end());
            }
            ExitCode::from(failure_status(code))
        }
    }
}
