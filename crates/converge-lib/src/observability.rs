//! Observability for deployment runs
//!
//! Provides:
//! - Prometheus metrics (stage durations, settings outcome, poll attempts)
//! - Structured stage events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for stage durations (in seconds); installs can take minutes
const STAGE_BUCKETS: &[f64] = &[0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

static GLOBAL_METRICS: OnceLock<DeployMetricsInner> = OnceLock::new();

struct DeployMetricsInner {
    stage_duration_seconds: HistogramVec,
    stage_failures: IntCounterVec,
    settings_applied: IntCounter,
    settings_failed: IntCounter,
    reconcile_poll_attempts: IntCounter,
    health_probe_attempts: IntCounter,
    instances_removed: IntCounter,
}

impl DeployMetricsInner {
    fn new() -> Self {
        Self {
            stage_duration_seconds: register_histogram_vec!(
                "converge_stage_duration_seconds",
                "Wall-clock time spent in each deployment stage",
                &["stage"],
                STAGE_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_duration_seconds"),

            stage_failures: register_int_counter_vec!(
                "converge_stage_failures_total",
                "Deployment stages that ended in a fatal error",
                &["stage"]
            )
            .expect("Failed to register stage_failures"),

            settings_applied: register_int_counter!(
                "converge_settings_applied_total",
                "Administrative settings accepted by the service"
            )
            .expect("Failed to register settings_applied"),

            settings_failed: register_int_counter!(
                "converge_settings_failed_total",
                "Administrative settings rejected or not sent"
            )
            .expect("Failed to register settings_failed"),

            reconcile_poll_attempts: register_int_counter!(
                "converge_reconcile_poll_attempts_total",
                "Status polls issued while waiting for the instance to run"
            )
            .expect("Failed to register reconcile_poll_attempts"),

            health_probe_attempts: register_int_counter!(
                "converge_health_probe_attempts_total",
                "Liveness probes issued by the health reporter"
            )
            .expect("Failed to register health_probe_attempts"),

            instances_removed: register_int_counter!(
                "converge_instances_removed_total",
                "Pre-existing instances stopped and removed during reconcile"
            )
            .expect("Failed to register instances_removed"),
        }
    }
}

/// Handle to the process-wide deployment metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct DeployMetrics {
    _private: (),
}

impl Default for DeployMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DeployMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DeployMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DeployMetricsInner {
        GLOBAL_METRICS.get_or_init(DeployMetricsInner::new)
    }

    pub fn observe_stage(&self, stage: &str, elapsed: Duration) {
        self.inner()
            .stage_duration_seconds
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_stage_failure(&self, stage: &str) {
        self.inner().stage_failures.with_label_values(&[stage]).inc();
    }

    pub fn add_settings(&self, applied: usize, failed: usize) {
        self.inner().settings_applied.inc_by(applied as u64);
        self.inner().settings_failed.inc_by(failed as u64);
    }

    pub fn add_reconcile_polls(&self, attempts: u32) {
        self.inner().reconcile_poll_attempts.inc_by(u64::from(attempts));
    }

    pub fn add_health_probes(&self, attempts: u32) {
        self.inner().health_probe_attempts.inc_by(u64::from(attempts));
    }

    pub fn add_instances_removed(&self, count: usize) {
        self.inner().instances_removed.inc_by(count as u64);
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for deployment events
///
/// Each event carries an `event` field and the service name so a run can be
/// followed in JSON logs. Credential values are never passed in here.
#[derive(Clone)]
pub struct EventLogger {
    service: String,
}

impl EventLogger {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn stage_started(&self, stage: &str) {
        info!(
            event = "stage_started",
            service = %self.service,
            stage = %stage,
            "Stage started"
        );
    }

    pub fn stage_completed(&self, stage: &str, elapsed: Duration) {
        info!(
            event = "stage_completed",
            service = %self.service,
            stage = %stage,
            elapsed_ms = elapsed.as_millis() as u64,
            "Stage completed"
        );
    }

    pub fn stage_failed(&self, stage: &str, exit_code: i32, error: &str) {
        error!(
            event = "stage_failed",
            service = %self.service,
            stage = %stage,
            exit_code = exit_code,
            error = %error,
            "Stage failed"
        );
    }

    pub fn instance_replaced(&self, removed: usize, instance_id: &str) {
        info!(
            event = "instance_replaced",
            service = %self.service,
            removed = removed,
            instance_id = %instance_id,
            "Service instance replaced"
        );
    }

    pub fn setting_failed(&self, key: &str, reason: &str) {
        warn!(
            event = "setting_failed",
            service = %self.service,
            key = %key,
            reason = %reason,
            "Setting was not applied"
        );
    }

    pub fn deployment_finished(&self, status: &str, elapsed: Duration) {
        info!(
            event = "deployment_finished",
            service = %self.service,
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Deployment finished"
        );
    }
}
