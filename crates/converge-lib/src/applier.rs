//! Configuration applier
//!
//! Writes settings through the administrative channel one at a time, then
//! asks the service to reload once. A rejected setting does not stop the
//! others from being applied.

use crate::admin::AdminChannel;
use crate::error::ConfigError;
use crate::models::{
    ApplyMode, ApplyReport, ConfigSetting, ConfigSettings, InstanceStatus, ResourcePlan,
    ServiceInstance,
};
use crate::observability::EventLogger;
use crate::planner::{GIB, KIB, MIB};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Checks a setting name against `[a-z_][a-z0-9_.]*`.
pub fn validate_key(key: &str) -> Result<(), String> {
    let mut chars = key.chars();
    match chars.next() {
        None => return Err("empty setting name".to_string()),
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        Some(c) => return Err(format!("setting name may not start with {:?}", c)),
    }
    if let Some(c) = chars.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '.')) {
        return Err(format!("setting name contains {:?}", c));
    }
    Ok(())
}

/// `ALTER SYSTEM` statement for a setting, with the value quoted as a literal.
pub fn alter_statement(setting: &ConfigSetting) -> Result<String, String> {
    validate_key(&setting.key)?;
    if setting.value.contains('\0') {
        return Err("value contains a NUL byte".to_string());
    }
    Ok(format!(
        "ALTER SYSTEM SET {} = '{}'",
        setting.key,
        setting.value.replace('\'', "''")
    ))
}

/// Renders a byte size in PostgreSQL memory units (`kB`, `MB`, `GB`).
///
/// The largest unit that represents the value exactly is used; anything not
/// a whole number of kilobytes is rounded down, with a floor of `1kB`.
pub fn pg_memory(bytes: u64) -> String {
    if bytes >= GIB && bytes % GIB == 0 {
        format!("{}GB", bytes / GIB)
    } else if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{}kB", (bytes / KIB).max(1))
    }
}

/// Tuning settings derived from a resource plan.
pub fn baseline_settings(plan: &ResourcePlan) -> ConfigSettings {
    let workers = plan.max_parallel_workers.max(1);
    vec![
        ConfigSetting::restart("shared_buffers", pg_memory(plan.buffer_cache_bytes)),
        ConfigSetting::reload("effective_cache_size", pg_memory(plan.effective_cache_bytes)),
        ConfigSetting::reload("work_mem", pg_memory(plan.work_mem_bytes)),
        ConfigSetting::reload(
            "maintenance_work_mem",
            pg_memory(plan.maintenance_work_mem_bytes),
        ),
        ConfigSetting::restart("max_connections", plan.max_connections.to_string()),
        // background workers also draw from this pool
        ConfigSetting::restart("max_worker_processes", workers.max(8).to_string()),
        ConfigSetting::reload("max_parallel_workers", workers.to_string()),
        ConfigSetting::restart("wal_buffers", "16MB"),
        ConfigSetting::reload("checkpoint_completion_target", "0.9"),
        ConfigSetting::reload("random_page_cost", "1.1"),
        ConfigSetting::reload("effective_io_concurrency", "200"),
        ConfigSetting::restart("listen_addresses", "*"),
    ]
}

pub struct ConfigApplier {
    admin: Arc<dyn AdminChannel>,
    events: Option<EventLogger>,
}

impl ConfigApplier {
    pub fn new(admin: Arc<dyn AdminChannel>) -> Self {
        Self {
            admin,
            events: None,
        }
    }

    /// Emit a `setting_failed` event for every rejected setting.
    pub fn with_events(mut self, events: EventLogger) -> Self {
        self.events = Some(events);
        self
    }

    /// Applies all settings and reloads once.
    ///
    /// Fails with `PartialFailure` listing the rejected keys when anything
    /// was rejected; the accepted settings stay applied.
    pub async fn apply(
        &self,
        instance: &ServiceInstance,
        settings: &[ConfigSetting],
    ) -> Result<ApplyReport, ConfigError> {
        let report = self.apply_all(instance, settings).await?;
        if report.failed.is_empty() {
            Ok(report)
        } else {
            Err(ConfigError::PartialFailure(report.failed))
        }
    }

    /// Like [`ConfigApplier::apply`], but rejected keys are returned in the
    /// report instead of as an error. Only `NotReady` and `ReloadFailed`
    /// are errors here.
    pub async fn apply_all(
        &self,
        instance: &ServiceInstance,
        settings: &[ConfigSetting],
    ) -> Result<ApplyReport, ConfigError> {
        if instance.status != InstanceStatus::Running {
            return Err(ConfigError::NotReady(instance.status));
        }

        let mut report = ApplyReport::default();
        for setting in settings {
            let outcome = match alter_statement(setting) {
                Ok(statement) => self
                    .admin
                    .execute(instance, &statement)
                    .await
                    .map_err(|e| e.to_string()),
                Err(reason) => Err(reason),
            };

            match outcome {
                Ok(_) => {
                    debug!(key = %setting.key, mode = ?setting.apply_mode, "Setting applied");
                    if setting.apply_mode == ApplyMode::Restart {
                        report.restart_required = true;
                    }
                    report.applied.push(setting.key.clone());
                }
                Err(reason) => {
                    match &self.events {
                        Some(events) => events.setting_failed(&setting.key, &reason),
                        None => warn!(key = %setting.key, reason = %reason, "Setting was not applied"),
                    }
                    report.failed.push(setting.key.clone());
                }
            }
        }

        self.admin
            .reload(instance)
            .await
            .map_err(ConfigError::ReloadFailed)?;

        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            restart_required = report.restart_required,
            "Configuration reloaded"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{running, sample_plan, FakeAdmin};

    fn applier(admin: Arc<FakeAdmin>) -> ConfigApplier {
        ConfigApplier::new(admin)
    }

    #[tokio::test]
    async fn test_rejected_setting_does_not_block_others() {
        let admin = Arc::new(FakeAdmin::new().rejecting("b"));
        let settings = vec![
            ConfigSetting::reload("a", "1"),
            ConfigSetting::reload("b", "bad"),
            ConfigSetting::reload("c", "3"),
        ];

        let err = applier(admin.clone())
            .apply(&running("svc"), &settings)
            .await
            .unwrap_err();

        assert_eq!(err, ConfigError::PartialFailure(vec!["b".into()]));
        assert_eq!(admin.statements().len(), 3);
        assert_eq!(admin.reloads(), 1);

        let report = applier(admin.clone())
            .apply_all(&running("svc"), &settings)
            .await
            .unwrap();
        assert_eq!(report.applied, vec!["a", "c"]);
        assert_eq!(report.failed, vec!["b"]);
    }

    #[tokio::test]
    async fn test_not_running_sends_nothing() {
        let admin = Arc::new(FakeAdmin::new());
        let mut instance = running("svc");
        instance.status = InstanceStatus::Restarting;

        let err = applier(admin.clone())
            .apply(&instance, &[ConfigSetting::reload("work_mem", "4MB")])
            .await
            .unwrap_err();

        assert_eq!(err, ConfigError::NotReady(InstanceStatus::Restarting));
        assert!(admin.statements().is_empty());
        assert_eq!(admin.reloads(), 0);
    }

    #[tokio::test]
    async fn test_invalid_key_is_never_sent() {
        let admin = Arc::new(FakeAdmin::new());
        let settings = vec![
            ConfigSetting::reload("work_mem; DROP TABLE x", "1"),
            ConfigSetting::reload("work_mem", "4MB"),
        ];

        let report = applier(admin.clone())
            .apply_all(&running("svc"), &settings)
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(admin.statements(), vec!["ALTER SYSTEM SET work_mem = '4MB'"]);
    }

    #[tokio::test]
    async fn test_reload_failure_is_fatal() {
        let admin = Arc::new(FakeAdmin::new().with_failing_reload());
        let err = applier(admin)
            .apply(&running("svc"), &[ConfigSetting::reload("work_mem", "4MB")])
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReloadFailed(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_restart_required_only_for_applied_restart_settings() {
        let admin = Arc::new(FakeAdmin::new().rejecting("shared_buffers"));
        let settings = vec![
            ConfigSetting::restart("shared_buffers", "1GB"),
            ConfigSetting::reload("work_mem", "4MB"),
        ];
        let report = applier(admin.clone())
            .apply_all(&running("svc"), &settings)
            .await
            .unwrap();
        assert!(!report.restart_required);

        let report = applier(Arc::new(FakeAdmin::new()))
            .apply_all(&running("svc"), &settings)
            .await
            .unwrap();
        assert!(report.restart_required);
    }

    #[test]
    fn test_statement_quotes_value() {
        let statement = alter_statement(&ConfigSetting::reload("search_path", "it's")).unwrap();
        assert_eq!(statement, "ALTER SYSTEM SET search_path = 'it''s'");
        assert!(alter_statement(&ConfigSetting::reload("work_mem", "4\0MB")).is_err());
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("work_mem").is_ok());
        assert!(validate_key("_custom.setting_2").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("2fast").is_err());
        assert!(validate_key("Work_mem").is_err());
        assert!(validate_key("a b").is_err());
    }

    #[test]
    fn test_pg_memory_units() {
        assert_eq!(pg_memory(4 * GIB), "4GB");
        assert_eq!(pg_memory(16 * MIB), "16MB");
        assert_eq!(pg_memory(1536 * MIB), "1536MB");
        assert_eq!(pg_memory(128 * KIB), "128kB");
        assert_eq!(pg_memory(100), "1kB");
    }

    #[test]
    fn test_baseline_settings_from_plan() {
        let settings = baseline_settings(&sample_plan());
        let get = |key: &str| settings.iter().find(|s| s.key == key).unwrap().clone();

        assert_eq!(settings.len(), 12);
        assert_eq!(get("shared_buffers").value, "4GB");
        assert_eq!(get("shared_buffers").apply_mode, ApplyMode::Restart);
        assert_eq!(get("work_mem").value, "16MB");
        assert_eq!(get("max_connections").value, "200");
        assert_eq!(get("max_worker_processes").value, "8");
        assert_eq!(get("max_parallel_workers").value, "4");
        assert!(settings.iter().all(|s| validate_key(&s.key).is_ok()));
    }
}
