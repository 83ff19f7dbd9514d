//! Deployment pipeline
//!
//! Runs the stages strictly in order:
//!
//! ```text
//! validate -> probe -> install -> plan -> reconcile -> configure [-> restart] -> health
//! ```
//!
//! The first fatal error aborts the run. Rejected settings and an
//! unreachable service degrade the report instead.

use crate::admin::AdminChannel;
use crate::applier::{baseline_settings, ConfigApplier};
use crate::error::{DeployError, ValidationError};
use crate::health::{components, compute_status, ComponentHealth, ComponentMap, ComponentStatus, HealthReporter};
use crate::installer::{CommandRunner, InstallOutcome, RuntimeInstaller};
use crate::models::{
    ApplyReport, ConfigSetting, ConfigSettings, HealthSummary, HostProfile, ResourcePlan,
    ServiceInstance, ServiceSpec,
};
use crate::observability::{DeployMetrics, EventLogger};
use crate::planner::{plan_with, PlannerRatios};
use crate::probe::Prober;
use crate::reconciler::Reconciler;
use crate::retry::RetryPolicy;
use crate::runtime::ContainerRuntime;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;

pub mod stages {
    pub const VALIDATE: &str = "validate";
    pub const PROBE: &str = "probe";
    pub const INSTALL: &str = "install";
    pub const PLAN: &str = "plan";
    pub const RECONCILE: &str = "reconcile";
    pub const CONFIGURE: &str = "configure";
    pub const RESTART: &str = "restart";
    pub const HEALTH: &str = "health";
}

/// Tunables for a run
#[derive(Debug, Clone, PartialEq)]
pub struct DeployOptions {
    pub ratios: PlannerRatios,
    pub start_policy: RetryPolicy,
    pub liveness_policy: RetryPolicy,
    /// Apply the plan-derived tuning settings
    pub baseline_settings: bool,
    /// Applied after the baseline; a key here overrides the baseline value
    pub extra_settings: ConfigSettings,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            ratios: PlannerRatios::default(),
            start_policy: RetryPolicy::container_start(),
            liveness_policy: RetryPolicy::liveness(),
            baseline_settings: true,
            extra_settings: Vec::new(),
        }
    }
}

/// Everything a successful run did
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub host: HostProfile,
    pub install: InstallOutcome,
    pub plan: ResourcePlan,
    pub instance: ServiceInstance,
    pub apply: ApplyReport,
    pub health: HealthSummary,
    pub components: ComponentMap,
    pub status: ComponentStatus,
}

/// Settings for a plan: the baseline (if enabled) with `extra` merged over it.
pub fn settings_for(plan: &ResourcePlan, options: &DeployOptions) -> ConfigSettings {
    let mut settings = if options.baseline_settings {
        baseline_settings(plan)
    } else {
        Vec::new()
    };
    for setting in &options.extra_settings {
        merge_setting(&mut settings, setting.clone());
    }
    settings
}

fn merge_setting(settings: &mut ConfigSettings, setting: ConfigSetting) {
    match settings.iter_mut().find(|s| s.key == setting.key) {
        Some(existing) => *existing = setting,
        None => settings.push(setting),
    }
}

pub struct Deployer {
    prober: Prober,
    installer: RuntimeInstaller,
    reconciler: Reconciler,
    admin: Arc<dyn AdminChannel>,
    health: HealthReporter,
    options: DeployOptions,
    metrics: DeployMetrics,
}

impl Deployer {
    pub fn new(
        prober: Prober,
        runner: Arc<dyn CommandRunner>,
        runtime: Arc<dyn ContainerRuntime>,
        admin: Arc<dyn AdminChannel>,
        options: DeployOptions,
    ) -> Self {
        Self {
            prober,
            installer: RuntimeInstaller::new(runner),
            reconciler: Reconciler::new(runtime.clone(), options.start_policy),
            admin: admin.clone(),
            health: HealthReporter::new(admin, runtime, options.liveness_policy),
            options,
            metrics: DeployMetrics::new(),
        }
    }

    /// Use a non-default runtime binary for installation checks.
    pub fn with_installer(mut self, installer: RuntimeInstaller) -> Self {
        self.installer = installer;
        self
    }

    /// Converges the host onto one running, configured instance of `spec`.
    pub async fn run(&self, spec: &ServiceSpec) -> Result<DeploymentReport, DeployError> {
        let events = EventLogger::new(&spec.name);
        let started = Instant::now();
        let mut tracker = StageTracker {
            events: &events,
            metrics: &self.metrics,
            current: stages::VALIDATE,
            since: started,
        };

        let result = self.run_stages(spec, &events, &mut tracker).await;
        match &result {
            Ok(report) => events.deployment_finished(&report.status.to_string(), started.elapsed()),
            Err(e) => {
                events.stage_failed(tracker.current, e.exit_code(), &e.to_string());
                self.metrics.inc_stage_failure(tracker.current);
                events.deployment_finished(&ComponentStatus::Unhealthy.to_string(), started.elapsed());
            }
        }
        result
    }

    async fn run_stages(
        &self,
        spec: &ServiceSpec,
        events: &EventLogger,
        tracker: &mut StageTracker<'_>,
    ) -> Result<DeploymentReport, DeployError> {
        let started_at = Utc::now();

        tracker.begin(stages::VALIDATE);
        if let Some(key) = spec.missing_credential() {
            return Err(ValidationError::MissingCredential(key.to_string()).into());
        }
        self.options.ratios.validate()?;
        tracker.end();

        tracker.begin(stages::PROBE);
        let host = self.prober.probe().await;
        if host.total_memory_bytes == 0 {
            warn!("Host memory unknown, planning with minimum values");
        }
        tracker.end();

        tracker.begin(stages::INSTALL);
        let install = self.installer.ensure_runtime_present(&host).await?;
        tracker.end();

        tracker.begin(stages::PLAN);
        let plan = plan_with(&host, &self.options.ratios);
        tracker.end();

        tracker.begin(stages::RECONCILE);
        let replacement = self.reconciler.replace(spec, &plan).await?;
        self.metrics.add_instances_removed(replacement.removed);
        self.metrics.add_reconcile_polls(replacement.poll_attempts);
        events.instance_replaced(replacement.removed, &replacement.instance.instance_id);
        let mut instance = replacement.instance;
        tracker.end();

        tracker.begin(stages::CONFIGURE);
        let settings = settings_for(&plan, &self.options);
        let apply = ConfigApplier::new(self.admin.clone())
            .with_events(events.clone())
            .apply_all(&instance, &settings)
            .await
            .map_err(DeployError::Config)?;
        self.metrics.add_settings(apply.applied.len(), apply.failed.len());
        tracker.end();

        if apply.restart_required {
            tracker.begin(stages::RESTART);
            instance = self
                .reconciler
                .restart_and_wait(&spec.name)
                .await
                .map_err(DeployError::Restart)?;
            tracker.end();
        }

        tracker.begin(stages::HEALTH);
        let health = self.health.report(&instance).await;
        self.metrics.add_health_probes(health.attempts);
        tracker.end();

        let mut health_map = ComponentMap::new();
        health_map.insert(components::RUNTIME.to_string(), ComponentHealth::healthy());
        health_map.insert(components::INSTANCE.to_string(), ComponentHealth::healthy());
        health_map.insert(
            components::CONFIGURATION.to_string(),
            if apply.failed.is_empty() {
                ComponentHealth::healthy()
            } else {
                ComponentHealth::degraded(format!("rejected: {}", apply.failed.join(", ")))
            },
        );
        health_map.insert(
            components::LIVENESS.to_string(),
            if health.reachable {
                ComponentHealth::healthy()
            } else {
                ComponentHealth::degraded(format!(
                    "no answer after {} attempts",
                    health.attempts
                ))
            },
        );
        let status = compute_status(&health_map);

        Ok(DeploymentReport {
            started_at,
            finished_at: Utc::now(),
            host,
            install,
            plan,
            instance,
            apply,
            health,
            components: health_map,
            status,
        })
    }
}

/// Stage bookkeeping shared by the event log and the metrics
struct StageTracker<'a> {
    events: &'a EventLogger,
    metrics: &'a DeployMetrics,
    current: &'static str,
    since: Instant,
}

impl StageTracker<'_> {
    fn begin(&mut self, stage: &'static str) {
        self.current = stage;
        self.since = Instant::now();
        self.events.stage_started(stage);
    }

    fn end(&self) {
        let elapsed = self.since.elapsed();
        self.metrics.observe_stage(self.current, elapsed);
        self.events.stage_completed(self.current, elapsed);
    }
}
