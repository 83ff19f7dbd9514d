//! Helper script generation

use anyhow::Result;
use converge_lib::scripts::{write_scripts, ScriptParams};
use std::path::Path;

use crate::config::DeployConfig;
use crate::output::{print_info, print_json, print_success, OutputFormat};

/// Render the helper scripts into `dir`
pub fn write(config: &DeployConfig, dir: &Path, format: OutputFormat) -> Result<()> {
    // scripts never embed credentials
    let spec = config.service_spec(|_| None);
    let params = ScriptParams::new(&spec, &config.retry.liveness_policy());
    let paths = write_scripts(dir, &params)?;

    match format {
        OutputFormat::Json => print_json(&paths)?,
        OutputFormat::Table => {
            for path in &paths {
                print_info(&path.display().to_string());
            }
            print_success(&format!("Wrote {} helper scripts for {}", paths.len(), spec.name));
        }
    }
    Ok(())
}
