//! Resource planning
//!
//! Sizes the container memory cap and database memory settings from host
//! capacity. Ratios are expressed in basis points (1/100 of a percent) and
//! all arithmetic runs in `u128`, so any `u64` memory size is safe.

use crate::error::ValidationError;
use crate::models::{HostProfile, ResourcePlan};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

const FULL_BPS: u32 = 10_000;

/// Memory of the reference host the baselines are sized for
pub const REFERENCE_MEMORY_BYTES: u64 = 16 * GIB;
/// CPU count of the reference host
pub const REFERENCE_CPU_COUNT: u32 = 4;

pub const CONTAINER_MEMORY_BPS: u32 = 7_500;
pub const BUFFER_CACHE_BPS: u32 = 2_500;
pub const BUFFER_CACHE_MIN_BPS: u32 = 1_250;
pub const BUFFER_CACHE_MAX_BPS: u32 = 2_500;
pub const EFFECTIVE_CACHE_BPS: u32 = 7_500;

pub const BASELINE_WORK_MEM_BYTES: u64 = 16 * MIB;
pub const BASELINE_MAINTENANCE_WORK_MEM_BYTES: u64 = GIB;
pub const BASELINE_MAX_CONNECTIONS: u32 = 200;

pub const MIN_BUFFER_CACHE_BYTES: u64 = 128 * KIB;
pub const MIN_EFFECTIVE_CACHE_BYTES: u64 = 8 * MIB;
pub const MIN_WORK_MEM_BYTES: u64 = 64 * KIB;
pub const MAX_WORK_MEM_BYTES: u64 = GIB;
pub const MIN_MAINTENANCE_WORK_MEM_BYTES: u64 = MIB;
pub const MAX_MAINTENANCE_WORK_MEM_BYTES: u64 = 2 * GIB;
pub const MIN_MAX_CONNECTIONS: u32 = 10;
pub const MAX_MAX_CONNECTIONS: u32 = 1_000;

/// Tunable ratios for the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerRatios {
    pub container_memory_bps: u32,
    pub buffer_cache_bps: u32,
    pub effective_cache_bps: u32,
}

impl Default for PlannerRatios {
    fn default() -> Self {
        Self {
            container_memory_bps: CONTAINER_MEMORY_BPS,
            buffer_cache_bps: BUFFER_CACHE_BPS,
            effective_cache_bps: EFFECTIVE_CACHE_BPS,
        }
    }
}

impl PlannerRatios {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.container_memory_bps == 0 || self.container_memory_bps > FULL_BPS {
            return Err(ValidationError::InvalidConfig(format!(
                "container memory ratio must be within 1..={} basis points, got {}",
                FULL_BPS, self.container_memory_bps
            )));
        }
        if !(BUFFER_CACHE_MIN_BPS..=BUFFER_CACHE_MAX_BPS).contains(&self.buffer_cache_bps) {
            return Err(ValidationError::InvalidConfig(format!(
                "buffer cache ratio must be within {}..={} basis points, got {}",
                BUFFER_CACHE_MIN_BPS, BUFFER_CACHE_MAX_BPS, self.buffer_cache_bps
            )));
        }
        if self.effective_cache_bps == 0 || self.effective_cache_bps > FULL_BPS {
            return Err(ValidationError::InvalidConfig(format!(
                "effective cache ratio must be within 1..={} basis points, got {}",
                FULL_BPS, self.effective_cache_bps
            )));
        }
        Ok(())
    }
}

fn fraction(total: u64, bps: u32) -> u64 {
    let value = total as u128 * bps.min(FULL_BPS) as u128 / FULL_BPS as u128;
    value as u64
}

fn scale(baseline: u64, total: u64) -> u128 {
    baseline as u128 * total as u128 / REFERENCE_MEMORY_BYTES as u128
}

fn clamp_u64(value: u128, min: u64, max: u64) -> u64 {
    value.clamp(min as u128, max as u128) as u64
}

/// Derives a [`ResourcePlan`] with the default ratios.
pub fn plan(profile: &HostProfile) -> ResourcePlan {
    plan_with(profile, &PlannerRatios::default())
}

/// Derives a [`ResourcePlan`] with explicit ratios. Pure and infallible.
pub fn plan_with(profile: &HostProfile, ratios: &PlannerRatios) -> ResourcePlan {
    let total = profile.total_memory_bytes;

    let container_memory_limit_bytes = fraction(total, ratios.container_memory_bps)
        .max(1)
        .min(total.max(1));
    let buffer_cache_bytes = fraction(total, ratios.buffer_cache_bps).max(MIN_BUFFER_CACHE_BYTES);
    let effective_cache_bytes =
        fraction(total, ratios.effective_cache_bps).max(MIN_EFFECTIVE_CACHE_BYTES);

    let work_mem_bytes = clamp_u64(
        scale(BASELINE_WORK_MEM_BYTES, total),
        MIN_WORK_MEM_BYTES,
        MAX_WORK_MEM_BYTES,
    );
    let maintenance_work_mem_bytes = clamp_u64(
        scale(BASELINE_MAINTENANCE_WORK_MEM_BYTES, total),
        MIN_MAINTENANCE_WORK_MEM_BYTES,
        MAX_MAINTENANCE_WORK_MEM_BYTES,
    );
    let max_connections = clamp_u64(
        scale(BASELINE_MAX_CONNECTIONS as u64, total),
        MIN_MAX_CONNECTIONS as u64,
        MAX_MAX_CONNECTIONS as u64,
    ) as u32;

    let plan = ResourcePlan {
        container_memory_limit_bytes,
        buffer_cache_bytes,
        effective_cache_bytes,
        work_mem_bytes,
        maintenance_work_mem_bytes,
        max_connections,
        max_parallel_workers: profile.cpu_count.max(1),
    };

    debug!(?plan, total_memory_bytes = total, "Resource plan computed");
    plan
}
