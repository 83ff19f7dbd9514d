//! Health reporting for the deployed service
//!
//! Probes liveness through the admin channel and rolls component outcomes
//! up into a single status for the run.

use crate::admin::AdminChannel;
use crate::error::AdminError;
use crate::models::{HealthSummary, ServiceInstance};
use crate::retry::RetryPolicy;
use crate::runtime::{ContainerRuntime, DIAGNOSTIC_LOG_LINES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Overall status: any unhealthy wins, then any degraded.
    pub fn compute<'a, I>(statuses: I) -> ComponentStatus
    where
        I: IntoIterator<Item = &'a ComponentStatus>,
    {
        let mut has_degraded = false;
        for status in statuses {
            match status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Unhealthy => "unhealthy",
        })
    }
}

/// Component names used in reports
pub mod components {
    pub const RUNTIME: &str = "runtime";
    pub const INSTANCE: &str = "instance";
    pub const CONFIGURATION: &str = "configuration";
    pub const LIVENESS: &str = "liveness";
}

/// Information about a component's health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Component health keyed by component name
pub type ComponentMap = BTreeMap<String, ComponentHealth>;

/// Overall status of a set of components.
pub fn compute_status(components: &ComponentMap) -> ComponentStatus {
    ComponentStatus::compute(components.values().map(|c| &c.status))
}

pub struct HealthReporter {
    admin: Arc<dyn AdminChannel>,
    runtime: Arc<dyn ContainerRuntime>,
    policy: RetryPolicy,
}

impl HealthReporter {
    pub fn new(
        admin: Arc<dyn AdminChannel>,
        runtime: Arc<dyn ContainerRuntime>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            admin,
            runtime,
            policy,
        }
    }

    /// Probes liveness until it succeeds or attempts run out. Never fails;
    /// an unreachable service comes back with the tail of its logs.
    pub async fn report(&self, instance: &ServiceInstance) -> HealthSummary {
        let admin = &self.admin;
        let (result, attempts) = self
            .policy
            .poll("liveness", |_| async move { admin.liveness(instance).await })
            .await;

        match result {
            Ok(()) => {
                info!(name = %instance.name, attempts = attempts, "Service is reachable");
                HealthSummary {
                    reachable: true,
                    attempts,
                    diagnostic: None,
                }
            }
            Err(e) => {
                warn!(
                    name = %instance.name,
                    attempts = attempts,
                    error = %e,
                    "Service did not answer liveness probes"
                );
                HealthSummary {
                    reachable: false,
                    attempts,
                    diagnostic: Some(self.diagnostic(instance, &e).await),
                }
            }
        }
    }

    async fn diagnostic(&self, instance: &ServiceInstance, last: &AdminError) -> String {
        let logs = match self.runtime.logs(&instance.name, DIAGNOSTIC_LOG_LINES).await {
            Ok(logs) => logs,
            Err(e) => format!("<logs unavailable: {}>", e),
        };
        format!("last probe: {}\n{}", last, logs.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InstanceStatus;
    use crate::testing::{running, FakeAdmin, FakeRuntime};
    use std::time::Duration;

    fn reporter(admin: Arc<FakeAdmin>, runtime: Arc<FakeRuntime>) -> HealthReporter {
        HealthReporter::new(admin, runtime, RetryPolicy::new(4, Duration::from_secs(3)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachable_after_retries() {
        let admin = Arc::new(FakeAdmin::new().live_after(3));
        let runtime = Arc::new(FakeRuntime::new());
        let start = tokio::time::Instant::now();

        let summary = reporter(admin.clone(), runtime.clone()).report(&running("svc")).await;

        assert!(summary.reachable);
        assert_eq!(summary.attempts, 3);
        assert!(summary.diagnostic.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert!(!runtime.calls().iter().any(|c| c.starts_with("logs")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_captures_logs() {
        let admin = Arc::new(FakeAdmin::new());
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_existing("svc", InstanceStatus::Running)
                .with_logs("FATAL:  could not map anonymous shared memory\n"),
        );

        let summary = reporter(admin.clone(), runtime).report(&running("svc")).await;

        assert!(!summary.reachable);
        assert_eq!(summary.attempts, 4);
        assert_eq!(admin.probes(), 4);
        let diagnostic = summary.diagnostic.unwrap();
        assert!(diagnostic.contains("no response"));
        assert!(diagnostic.contains("shared memory"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_fetch_error_becomes_diagnostic() {
        let admin = Arc::new(FakeAdmin::new());
        let runtime = Arc::new(FakeRuntime::new().failing("logs"));

        let summary = reporter(admin, runtime).report(&running("svc")).await;

        assert!(!summary.reachable);
        assert!(summary.diagnostic.unwrap().contains("logs unavailable"));
    }

    #[test]
    fn test_compute_status() {
        use ComponentStatus::*;
        assert_eq!(ComponentStatus::compute(&[Healthy, Healthy]), Healthy);
        assert_eq!(ComponentStatus::compute(&[Healthy, Degraded]), Degraded);
        assert_eq!(ComponentStatus::compute(&[Degraded, Unhealthy]), Unhealthy);
        assert_eq!(ComponentStatus::compute(&[]), Healthy);

        let mut components = ComponentMap::new();
        components.insert("a".into(), ComponentHealth::healthy());
        components.insert("b".into(), ComponentHealth::degraded("slow"));
        assert_eq!(compute_status(&components), Degraded);
    }
}
