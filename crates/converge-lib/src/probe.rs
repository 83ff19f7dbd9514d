//! Host environment detection
//!
//! Reads OS identification from `etc/os-release` and memory capacity from
//! `proc/meminfo` under a configurable root. Unknown values degrade to the
//! `Other` variants instead of failing.

use crate::models::{Architecture, HostProfile, OsFamily};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const DEBIAN_IDS: &[&str] = &["debian", "ubuntu", "raspbian", "linuxmint", "pop"];
const RHEL_IDS: &[&str] = &["rhel", "centos", "fedora", "rocky", "almalinux", "amzn", "ol"];

/// Read-only host prober
#[derive(Debug, Clone)]
pub struct Prober {
    root: PathBuf,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    /// Prober for the real host filesystem
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }

    /// Prober reading under a custom root (for testing)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Classifies the host. Never fails.
    pub async fn probe(&self) -> HostProfile {
        let os_family = match tokio::fs::read_to_string(self.root.join("etc/os-release")).await {
            Ok(content) => classify_os(&parse_os_release(&content)),
            Err(e) => {
                warn!(error = %e, "Could not read os-release, treating OS as unknown");
                OsFamily::Other
            }
        };

        let total_memory_bytes = match tokio::fs::read_to_string(self.root.join("proc/meminfo")).await
        {
            Ok(content) => parse_mem_total(&content).unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "Could not read meminfo");
                0
            }
        };

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);

        let profile = HostProfile {
            os_family,
            architecture: classify_arch(std::env::consts::ARCH),
            total_memory_bytes,
            cpu_count,
        };

        info!(
            os_family = %profile.os_family,
            architecture = %profile.architecture,
            total_memory_bytes = profile.total_memory_bytes,
            cpu_count = profile.cpu_count,
            "Host probed"
        );
        profile
    }
}

/// Parses `KEY=value` lines of an os-release file, unquoting values.
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(v);
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}

/// Decides the OS family from `ID`, falling back to `ID_LIKE`.
pub fn classify_os(fields: &HashMap<String, String>) -> OsFamily {
    let id = fields
        .get("ID")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    if DEBIAN_IDS.contains(&id.as_str()) {
        return OsFamily::DebianLike;
    }
    if RHEL_IDS.contains(&id.as_str()) {
        return OsFamily::RhelLike;
    }

    let like = fields
        .get("ID_LIKE")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    for token in like.split_whitespace() {
        if matches!(token, "debian" | "ubuntu") {
            return OsFamily::DebianLike;
        }
        if matches!(token, "rhel" | "fedora" | "centos") {
            return OsFamily::RhelLike;
        }
    }

    debug!(id = %id, id_like = %like, "Unrecognised OS identification");
    OsFamily::Other
}

/// Maps a machine architecture string (`uname -m` style).
pub fn classify_arch(arch: &str) -> Architecture {
    match arch {
        "aarch64" | "arm64" => Architecture::Arm64,
        "x86_64" | "amd64" => Architecture::X86_64,
        _ => Architecture::Other,
    }
}

/// Extracts `MemTotal` from `/proc/meminfo` in bytes.
pub fn parse_mem_total(content: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let mut parts = rest.split_whitespace();
        let value: u64 = parts.next()?.parse().ok()?;
        let multiplier = match parts.next() {
            Some("kB") | Some("KB") => 1024,
            Some("mB") | Some("MB") => 1024 * 1024,
            None => 1,
            Some(_) => return None,
        };
        value.checked_mul(multiplier)
    })
}
