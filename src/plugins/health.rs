//! Plugin health checks

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;
use serde::Serialize;

use crate::plugins::loader::PluginDescriptor;
use crate::plugins::plugin::PluginState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckResult {
    pub plugin_id: String,
    pub status: HealthStatus,
    pub message: String,
    pub checked_at: SystemTime,
    pub response_time: Duration,
}

/// Judge one plugin from its descriptor and, if running, its own report
pub fn evaluate(
    plugin_id: &str,
    descriptor: Option<&PluginDescriptor>,
    reported: Option<HealthStatus>,
) -> (HealthStatus, String) {
    let Some(descriptor) = descriptor else {
        return (HealthStatus::Unhealthy, "Plugin not found in registry".into());
    };
    match descriptor.state {
        PluginState::Failed => (
            HealthStatus::Unhealthy,
            format!(
                "Load error: {}",
                descriptor.failure_reason.as_deref().unwrap_or("unknown")
            ),
        ),
        PluginState::Started => match reported.unwrap_or(HealthStatus::Unknown) {
            HealthStatus::Healthy => (HealthStatus::Healthy, "Plugin is functioning normally".into()),
            HealthStatus::Degraded => (HealthStatus::Degraded, "Plugin reports degraded operation".into()),
            HealthStatus::Unhealthy => (HealthStatus::Unhealthy, "Plugin reports unhealthy".into()),
            HealthStatus::Unknown => (HealthStatus::Unknown, format!("No health report from {}", plugin_id)),
        },
        PluginState::Stopped | PluginState::Unloaded => {
            (HealthStatus::Unknown, "Plugin is stopped".into())
        }
        PluginState::Discovered | PluginState::Created | PluginState::Initialized => {
            (HealthStatus::Unknown, "Plugin not yet loaded".into())
        }
    }
}

/// Aggregate rule: any unhealthy, then any degraded, then all healthy
pub fn system_health<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> HealthStatus {
    let statuses: Vec<HealthStatus> = statuses.into_iter().copied().collect();
    if statuses.is_empty() {
        return HealthStatus::Unknown;
    }
    if statuses.contains(&HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if statuses.contains(&HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else if statuses.iter().all(|s| *s == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unknown
    }
}

/// Remembers the latest result per plugin
#[derive(Debug, Default)]
pub struct PluginHealthChecker {
    last_results: RwLock<BTreeMap<String, HealthCheckResult>>,
}

impl PluginHealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &self,
        plugin_id: &str,
        descriptor: Option<&PluginDescriptor>,
        reported: impl FnOnce() -> Option<HealthStatus>,
    ) -> HealthCheckResult {
        let started = Instant::now();
        let (status, message) = evaluate(plugin_id, descriptor, reported());
        let result = HealthCheckResult {
            plugin_id: plugin_id.to_string(),
            status,
            message,
            checked_at: SystemTime::now(),
            response_time: started.elapsed(),
        };
        self.last_results
            .write()
            .insert(plugin_id.to_string(), result.clone());
        result
    }

    pub fn last_result(&self, plugin_id: &str) -> Option<HealthCheckResult> {
        self.last_results.read().get(plugin_id).cloned()
    }

    pub fn last_results(&self) -> Vec<HealthCheckResult> {
        self.last_results.read().values().cloned().collect()
    }

    pub fn system_health(&self) -> HealthStatus {
        let results = self.last_results.read();
        system_health(results.values().map(|r| &r.status))
    }

    pub fn forget(&self, plugin_id: &str) {
        self.last_results.write().remove(plugin_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::PluginManifest;

    fn descriptor(state: PluginState, reason: Option<&str>) -> PluginDescriptor {
        let mut d = PluginDescriptor::from_manifest(PluginManifest::builtin("quest", "Quest"));
        d.state = state;
        d.failure_reason = reason.map(str::to_string);
        d
    }

    #[test]
    fn test_missing_plugin_is_unhealthy() {
        let (status, message) = evaluate("ghost", None, None);
        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(message, "Plugin not found in registry");
    }

    #[test]
    fn test_failed_plugin_reports_reason() {
        let d = descriptor(PluginState::Failed, Some("no data"));
        let (status, message) = evaluate("quest", Some(&d), None);
        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(message, "Load error: no data");
    }

    #[test]
    fn test_started_plugin_uses_its_report() {
        let d = descriptor(PluginState::Started, None);
        assert_eq!(
            evaluate("quest", Some(&d), Some(HealthStatus::Healthy)),
            (HealthStatus::Healthy, "Plugin is functioning normally".to_string())
        );
        assert_eq!(
            evaluate("quest", Some(&d), Some(HealthStatus::Degraded)).0,
            HealthStatus::Degraded
        );
    }

    #[test]
    fn test_not_loaded_is_unknown() {
        let d = descriptor(PluginState::Created, None);
        assert_eq!(
            evaluate("quest", Some(&d), None),
            (HealthStatus::Unknown, "Plugin not yet loaded".to_string())
        );
    }

    #[test]
    fn test_system_health_rules() {
        use HealthStatus::*;
        assert_eq!(system_health(&[] as &[HealthStatus]), Unknown);
        assert_eq!(system_health(&[Healthy, Healthy]), Healthy);
        assert_eq!(system_health(&[Healthy, Degraded]), Degraded);
        assert_eq!(system_health(&[Degraded, Unhealthy]), Unhealthy);
        assert_eq!(system_health(&[Healthy, Unknown]), Unknown);
    }

    #[test]
    fn test_checker_keeps_last_result() {
        let checker = PluginHealthChecker::new();
        let d = descriptor(PluginState::Started, None);
        checker.check("quest", Some(&d), || Some(HealthStatus::Healthy));
        assert_eq!(checker.system_health(), HealthStatus::Healthy);

        checker.check("quest", Some(&d), || Some(HealthStatus::Degraded));
        assert_eq!(checker.last_results().len(), 1);
        assert_eq!(checker.system_health(), HealthStatus::Degraded);

        checker.forget("quest");
        assert!(checker.last_result("quest").is_none());
    }
}
