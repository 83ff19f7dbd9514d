//! Operator helper scripts
//!
//! Renders `status.sh` and `start.sh` from templates compiled into the
//! binary, so an operator can inspect or bounce the service without this
//! tool installed.

use crate::models::ServiceSpec;
use crate::retry::RetryPolicy;
use crate::runtime::DIAGNOSTIC_LOG_LINES;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{debug, info};

const TEMPLATES: &[(&str, &str)] = &[
    ("status.sh", include_str!("../templates/status.sh")),
    ("start.sh", include_str!("../templates/start.sh")),
];

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{field} {value:?} cannot be embedded in a shell script")]
    UnsafeValue { field: &'static str, value: String },

    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Values substituted into the templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptParams {
    pub name: String,
    pub admin_user: String,
    pub published_port: u16,
    pub log_lines: usize,
    pub attempts: u32,
    pub interval_secs: u64,
}

impl ScriptParams {
    pub fn new(spec: &ServiceSpec, liveness: &RetryPolicy) -> Self {
        Self {
            name: spec.name.clone(),
            admin_user: spec.admin_user.clone(),
            published_port: spec.published_port,
            log_lines: DIAGNOSTIC_LOG_LINES,
            attempts: liveness.max_attempts,
            interval_secs: liveness.interval.as_secs().max(1),
        }
    }

    fn validate(&self) -> Result<(), ScriptError> {
        for (field, value) in [("name", &self.name), ("admin_user", &self.admin_user)] {
            if !is_shell_safe(value) {
                return Err(ScriptError::UnsafeValue {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Container-name alphabet: `[A-Za-z0-9][A-Za-z0-9_.-]*`
fn is_shell_safe(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedScript {
    pub file_name: String,
    pub content: String,
}

fn renderer() -> Result<Tera, ScriptError> {
    let mut tera = Tera::default();
    for (name, content) in TEMPLATES {
        tera.add_raw_template(name, content)?;
        debug!(template = %name, "Loaded embedded template");
    }
    Ok(tera)
}

/// Renders every helper script.
pub fn render_scripts(params: &ScriptParams) -> Result<Vec<RenderedScript>, ScriptError> {
    params.validate()?;
    let tera = renderer()?;
    let context = Context::from_serialize(params)?;

    TEMPLATES
        .iter()
        .map(|(name, _)| {
            Ok(RenderedScript {
                file_name: name.to_string(),
                content: tera.render(name, &context)?,
            })
        })
        .collect()
}

/// Renders the scripts into `dir` (created if missing) as executables.
pub fn write_scripts(dir: &Path, params: &ScriptParams) -> Result<Vec<PathBuf>, ScriptError> {
    let scripts = render_scripts(params)?;
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ScriptError::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let mut written = Vec::with_capacity(scripts.len());
    for script in scripts {
        let path = dir.join(&script.file_name);
        std::fs::write(&path, &script.content).map_err(io_err(path.as_path()))?;
        make_executable(&path).map_err(io_err(path.as_path()))?;
        written.push(path);
    }

    info!(dir = %dir.display(), count = written.len(), "Helper scripts written");
    Ok(written)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
