//! Service reconciler
//!
//! Converges the host to exactly one running container for a service name by
//! replacing whatever currently holds that name. Replacement is destructive:
//! if creation fails the previous instance is already gone.

use crate::error::{ReconcileError, RuntimeError};
use crate::models::{InstanceStatus, ResourcePlan, ServiceInstance, ServiceSpec};
use crate::retry::RetryPolicy;
use crate::runtime::{ContainerRuntime, DIAGNOSTIC_LOG_LINES};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a replacement, with counters for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub instance: ServiceInstance,
    /// Pre-existing instances that were stopped and removed
    pub removed: usize,
    /// Status polls until the new instance was running
    pub poll_attempts: u32,
}

/// A container that vanished after it was listed counts as stopped and removed.
fn already_gone(result: Result<(), RuntimeError>, id: &str) -> Result<(), RuntimeError> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!(instance_id = %id, op = %e.op, "Instance already gone");
            Ok(())
        }
        other => other,
    }
}

/// Last thing seen while waiting for an instance
enum Observation {
    Status(InstanceStatus),
    Failed(RuntimeError),
}

pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    policy: RetryPolicy,
}

impl Reconciler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, policy: RetryPolicy) -> Self {
        Self { runtime, policy }
    }

    /// Replace any instance named `spec.name` with a fresh one and wait for it
    /// to run.
    pub async fn reconcile(
        &self,
        spec: &ServiceSpec,
        plan: &ResourcePlan,
    ) -> Result<ServiceInstance, ReconcileError> {
        self.replace(spec, plan).await.map(|r| r.instance)
    }

    /// Same as [`Reconciler::reconcile`], also reporting what was done.
    pub async fn replace(
        &self,
        spec: &ServiceSpec,
        plan: &ResourcePlan,
    ) -> Result<Replacement, ReconcileError> {
        if let Some(key) = spec.missing_credential() {
            return Err(ReconcileError::MissingCredential(key.to_string()));
        }

        let existing = self.runtime.list_by_name(&spec.name).await?;
        for instance in &existing {
            info!(
                name = %spec.name,
                instance_id = %instance.instance_id,
                status = %instance.status,
                "Removing existing instance"
            );
            already_gone(self.runtime.stop(&instance.instance_id).await, &instance.instance_id)?;
            already_gone(self.runtime.remove(&instance.instance_id).await, &instance.instance_id)?;
        }

        self.runtime.pull(&spec.image_reference).await?;
        let instance_id = self.runtime.create_and_start(spec, plan).await?;
        info!(name = %spec.name, instance_id = %instance_id, "Instance created, waiting for it to run");

        let (instance, poll_attempts) = self.wait_running(&spec.name).await?;
        Ok(Replacement {
            instance,
            removed: existing.len(),
            poll_attempts,
        })
    }

    /// Restart the named instance in place and wait until it runs again.
    pub async fn restart_and_wait(&self, name: &str) -> Result<ServiceInstance, ReconcileError> {
        self.runtime.restart(name).await?;
        let (instance, _) = self.wait_running(name).await?;
        Ok(instance)
    }

    /// Polls `inspect` until the instance reports `Running`.
    ///
    /// On exhaustion the container's recent logs are captured into the
    /// error. A runtime error on the last poll is returned as is.
    pub async fn wait_running(
        &self,
        name: &str,
    ) -> Result<(ServiceInstance, u32), ReconcileError> {
        let runtime = &self.runtime;
        let (result, attempts) = self
            .policy
            .poll("instance running", |_| async move {
                match runtime.inspect(name).await {
                    Ok(instance) if instance.status == InstanceStatus::Running => Ok(instance),
                    Ok(instance) => Err(Observation::Status(instance.status)),
                    Err(e) => Err(Observation::Failed(e)),
                }
            })
            .await;

        match result {
            Ok(instance) => Ok((instance, attempts)),
            Err(Observation::Failed(e)) => Err(ReconcileError::Runtime(e)),
            Err(Observation::Status(status)) => {
                warn!(
                    name = %name,
                    status = %status,
                    attempts = attempts,
                    "Instance did not reach running state"
                );
                let captured_logs = match self.runtime.logs(name, DIAGNOSTIC_LOG_LINES).await {
                    Ok(logs) => logs,
                    Err(e) => format!("<logs unavailable: {}>", e),
                };
                Err(ReconcileError::NotRunning {
                    status,
                    captured_logs,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_plan, sample_spec, FakeRuntime};
    use std::time::Duration;

    fn reconciler(runtime: Arc<FakeRuntime>) -> Reconciler {
        Reconciler::new(runtime, RetryPolicy::new(3, Duration::from_secs(1)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_reconcile_leaves_one_instance() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_existing("svc", InstanceStatus::Running)
                .with_existing("other", InstanceStatus::Running),
        );
        let reconciler = reconciler(runtime.clone());
        let spec = sample_spec("svc");

        for _ in 0..2 {
            let instance = reconciler.reconcile(&spec, &sample_plan()).await.unwrap();
            assert_eq!(instance.status, InstanceStatus::Running);
        }

        let containers = runtime.containers();
        assert_eq!(containers.iter().filter(|c| c.name == "svc").count(), 1);
        assert_eq!(containers.iter().filter(|c| c.name == "other").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credential_makes_no_runtime_calls() {
        let runtime = Arc::new(FakeRuntime::new().with_existing("svc", InstanceStatus::Running));
        let reconciler = reconciler(runtime.clone());
        let mut spec = sample_spec("svc");
        spec.environment.remove("ACCESS_TOKEN");

        let err = reconciler.reconcile(&spec, &sample_plan()).await.unwrap_err();
        assert_eq!(err, ReconcileError::MissingCredential("ACCESS_TOKEN".into()));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_reports_removed_and_polls() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_existing("svc", InstanceStatus::Exited)
                .with_statuses(&[InstanceStatus::Created, InstanceStatus::Running]),
        );
        let replacement = reconciler(runtime.clone())
            .replace(&sample_spec("svc"), &sample_plan())
            .await
            .unwrap();

        assert_eq!(replacement.removed, 1);
        assert_eq!(replacement.poll_attempts, 2);
        assert_eq!(
            runtime.mutations(),
            vec!["stop old-1", "remove old-1", "pull postgres:16", "create svc"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_running_captures_logs() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_statuses(&[InstanceStatus::Restarting, InstanceStatus::Exited])
                .with_logs("FATAL:  invalid value for parameter \"shared_buffers\""),
        );
        let start = tokio::time::Instant::now();

        let err = reconciler(runtime)
            .reconcile(&sample_spec("svc"), &sample_plan())
            .await
            .unwrap_err();

        match &err {
            ReconcileError::NotRunning { status, captured_logs } => {
                assert_eq!(*status, InstanceStatus::Exited);
                assert!(captured_logs.contains("shared_buffers"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_after_removal() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_existing("svc", InstanceStatus::Running)
                .failing("create"),
        );
        let err = reconciler(runtime.clone())
            .reconcile(&sample_spec("svc"), &sample_plan())
            .await
            .unwrap_err();

        match err {
            ReconcileError::Runtime(e) => {
                assert_eq!(e.op, "create");
                assert_eq!(e.exit_code(), 125);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_vanishing_during_replace_is_tolerated() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_existing("svc", InstanceStatus::Running)
                .vanished("stop"),
        );
        let replacement = reconciler(runtime.clone())
            .replace(&sample_spec("svc"), &sample_plan())
            .await
            .unwrap();

        assert_eq!(replacement.instance.status, InstanceStatus::Running);
        assert_eq!(
            runtime.mutations(),
            vec!["stop old-1", "remove old-1", "pull postgres:16", "create svc"]
        );
        assert_eq!(runtime.containers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_failure_other_than_missing_is_fatal() {
        let runtime = Arc::new(
            FakeRuntime::new()
                .with_existing("svc", InstanceStatus::Running)
                .failing("stop"),
        );
        let err = reconciler(runtime.clone())
            .replace(&sample_spec("svc"), &sample_plan())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Runtime(ref e) if e.op == "stop"));
        assert_eq!(runtime.mutations(), vec!["stop old-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_and_wait() {
        let runtime = Arc::new(FakeRuntime::new().with_existing("svc", InstanceStatus::Running));
        let instance = reconciler(runtime.clone()).restart_and_wait("svc").await.unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(runtime.mutations(), vec!["restart svc"]);
    }
}
