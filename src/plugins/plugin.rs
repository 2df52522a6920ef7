//! The plugin contract
//!
//! A plugin is a unit of startup work: it builds one or more services,
//! registers them in the [`ServiceRegistry`], and optionally subscribes to
//! events. The host drives each plugin through
//! `initialize` → `start` → `stop`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::core::error::Result;
use crate::plugins::events::EventBus;
use crate::plugins::health::HealthStatus;
use crate::plugins::registry::{ServiceMetadata, ServiceRegistry};

/// Lifecycle position of a loaded plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PluginState {
    Discovered,
    Created,
    Initialized,
    Started,
    Stopped,
    Unloaded,
    Failed,
}

impl PluginState {
    pub fn is_running(&self) -> bool {
        matches!(self, PluginState::Started)
    }
}

/// Everything a plugin may touch while it runs
#[derive(Clone)]
pub struct PluginContext {
    pub plugin_id: String,
    pub registry: Arc<ServiceRegistry>,
    pub events: Arc<EventBus>,
    /// The `[plugins.<id>]` table from the host configuration
    pub config: toml::Table,
    pub data_dir: PathBuf,
}

impl PluginContext {
    /// Metadata stamped with this plugin's id, so unload can find it again
    pub fn metadata(&self, name: &str, priority: i32) -> ServiceMetadata {
        ServiceMetadata {
            priority,
            name: Some(name.to_string()),
            version: None,
            plugin_id: Some(self.plugin_id.clone()),
        }
    }

    /// Register a service owned by this plugin at the given priority
    pub fn provide<T>(&self, service: Arc<T>, name: &str, priority: i32)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.register(service, self.metadata(name, priority));
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_int(&self, key: &str) -> Option<i64> {
        self.config.get(key).and_then(|v| v.as_integer())
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(|v| v.as_bool())
    }
}

pub trait Plugin: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    /// Build and register services; must not depend on other plugins
    /// having been started
    fn initialize(&mut self, ctx: &PluginContext) -> Result<()>;

    fn start(&mut self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self, _ctx: &PluginContext) -> Result<()> {
        Ok(())
    }

    /// Self-reported health, consulted only while the plugin is started
    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PluginContext {
        let mut config = toml::Table::new();
        config.insert("interval".into(), toml::Value::Integer(5));
        config.insert("label".into(), toml::Value::String("fast".into()));
        PluginContext {
            plugin_id: "test-plugin".into(),
            registry: Arc::new(ServiceRegistry::new()),
            events: Arc::new(EventBus::new()),
            config,
            data_dir: PathBuf::from("target/test-data"),
        }
    }

    #[test]
    fn test_provide_stamps_plugin_id() {
        let ctx = context();
        ctx.provide(Arc::new(42u32), "answer", 50);

        let entries = ctx.registry.get_all_with_metadata::<u32>();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.plugin_id.as_deref(), Some("test-plugin"));
        assert_eq!(entries[0].1.priority, 50);
    }

    #[test]
    fn test_config_accessors() {
        let ctx = context();
        assert_eq!(ctx.config_int("interval"), Some(5));
        assert_eq!(ctx.config_str("label"), Some("fast"));
        assert_eq!(ctx.config_bool("missing"), None);
    }
}
