//! Plugin discovery, ordering and lifecycle
//!
//! Plugins are compiled in: a [`PluginCatalog`] maps entry names to
//! factories. Manifests come from the catalog itself or from `plugin.json`
//! files on disk, whose entry for the active profile must name a catalog
//! entry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::core::config::GameConfig;
use crate::core::error::{LablabError, Result};
use crate::plugins::capability::{self, CapabilityPolicy};
use crate::plugins::events::EventBus;
use crate::plugins::health::{HealthCheckResult, HealthStatus, PluginHealthChecker};
use crate::plugins::manifest::{self, LoadStrategy, PluginManifest};
use crate::plugins::metrics::PluginSystemMetrics;
use crate::plugins::plugin::{Plugin, PluginContext, PluginState};
use crate::plugins::registry::{ServiceMetadata, ServiceRegistry};
use crate::plugins::resolver;

pub const MANIFEST_FILE: &str = "plugin.json";

/// Priority of the bus's own registration
const EVENT_BUS_PRIORITY: i32 = 1000;

pub type PluginFactory = fn() -> Box<dyn Plugin>;

/// Built-in plugins known to this binary
#[derive(Default, Clone)]
pub struct PluginCatalog {
    entries: BTreeMap<String, (PluginManifest, PluginFactory)>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory under the manifest's default entry name
    pub fn add(&mut self, manifest: PluginManifest, factory: PluginFactory) {
        let entry = manifest
            .entry_type
            .clone()
            .unwrap_or_else(|| manifest.id.clone());
        self.entries.insert(entry, (manifest, factory));
    }

    pub fn with(mut self, manifest: PluginManifest, factory: PluginFactory) -> Self {
        self.add(manifest, factory);
        self
    }

    pub fn factory(&self, entry: &str) -> Option<PluginFactory> {
        self.entries.get(entry).map(|(_, f)| *f)
    }

    pub fn manifests(&self) -> impl Iterator<Item = &PluginManifest> {
        self.entries.values().map(|(m, _)| m)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: PluginState,
    pub failure_reason: Option<String>,
    pub manifest: PluginManifest,
    pub state_changed_at: SystemTime,
}

impl PluginDescriptor {
    pub fn from_manifest(manifest: PluginManifest) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            state: PluginState::Discovered,
            failure_reason: None,
            manifest,
            state_changed_at: SystemTime::now(),
        }
    }
}

/// Descriptors of every plugin the host has seen
#[derive(Debug, Default)]
pub struct PluginRegistry {
    descriptors: RwLock<BTreeMap<String, PluginDescriptor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, descriptor: PluginDescriptor) {
        self.descriptors.write().insert(descriptor.id.clone(), descriptor);
    }

    pub fn remove(&self, id: &str) -> Option<PluginDescriptor> {
        self.descriptors.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<PluginDescriptor> {
        self.descriptors.read().get(id).cloned()
    }

    pub fn get_all(&self) -> Vec<PluginDescriptor> {
        self.descriptors.read().values().cloned().collect()
    }

    pub fn update_state(&self, id: &str, state: PluginState, reason: Option<String>) {
        if let Some(d) = self.descriptors.write().get_mut(id) {
            d.state = state;
            d.failure_reason = reason;
            d.state_changed_at = SystemTime::now();
        }
    }

    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.descriptors.read().get(id).map(|d| d.state)
    }

    pub fn count_in(&self, state: PluginState) -> usize {
        self.descriptors
            .read()
            .values()
            .filter(|d| d.state == state)
            .count()
    }
}

struct LoadedPlugin {
    id: String,
    plugin: Box<dyn Plugin>,
    ctx: PluginContext,
}

pub struct PluginHost {
    registry: Arc<ServiceRegistry>,
    events: Arc<EventBus>,
    catalog: PluginCatalog,
    manifests: Vec<PluginManifest>,
    descriptors: PluginRegistry,
    loaded: Vec<LoadedPlugin>,
    metrics: PluginSystemMetrics,
    health: PluginHealthChecker,
    policy: CapabilityPolicy,
    profile: String,
    data_dir: PathBuf,
    plugin_config: toml::Table,
}

impl PluginHost {
    pub fn new(config: &GameConfig, catalog: PluginCatalog) -> Self {
        let registry = Arc::new(ServiceRegistry::new());
        let events = Arc::new(EventBus::new());
        registry.register(
            events.clone(),
            ServiceMetadata {
                priority: EVENT_BUS_PRIORITY,
                name: Some("EventBus".into()),
                ..Default::default()
            },
        );

        let manifests = catalog.manifests().cloned().collect();
        Self {
            registry,
            events,
            catalog,
            manifests,
            descriptors: PluginRegistry::new(),
            loaded: Vec::new(),
            metrics: PluginSystemMetrics::new(),
            health: PluginHealthChecker::new(),
            policy: CapabilityPolicy::from_config(config),
            profile: "console".into(),
            data_dir: config.data_dir.clone(),
            plugin_config: toml::Table::new(),
        }
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = profile.to_string();
        self
    }

    /// Per-plugin settings, keyed by plugin id
    pub fn with_plugin_config(mut self, table: toml::Table) -> Self {
        self.plugin_config = table;
        self
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn descriptors(&self) -> &PluginRegistry {
        &self.descriptors
    }

    pub fn metrics(&self) -> &PluginSystemMetrics {
        &self.metrics
    }

    pub fn manifests(&self) -> &[PluginManifest] {
        &self.manifests
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        self.loaded.iter().map(|p| p.id.clone()).collect()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded.iter().any(|p| p.id == id)
    }

    pub fn plugin_state(&self, id: &str) -> Option<PluginState> {
        self.descriptors.state(id)
    }

    /// Add or replace a known manifest
    pub fn add_manifest(&mut self, manifest: PluginManifest) {
        self.manifests.retain(|m| m.id != manifest.id);
        self.manifests.push(manifest);
    }

    /// Read `plugin.json` at `dir`, in its children, and under a nested
    /// `plugins/` directory. Unreadable manifests are logged and skipped.
    pub fn discover(&mut self, dir: &Path) -> Result<Vec<PluginManifest>> {
        let mut found = Vec::new();
        let direct = dir.join(MANIFEST_FILE);
        if direct.is_file() {
            self.read_manifest(&direct, &mut found);
        } else if dir.is_dir() {
            for child in sorted_subdirs(dir)? {
                let candidate = child.join(MANIFEST_FILE);
                if candidate.is_file() {
                    self.read_manifest(&candidate, &mut found);
                } else if child.file_name().is_some_and(|n| n == "plugins") {
                    for nested in sorted_subdirs(&child)? {
                        let candidate = nested.join(MANIFEST_FILE);
                        if candidate.is_file() {
                            self.read_manifest(&candidate, &mut found);
                        }
                    }
                }
            }
        } else {
            warn!(path = %dir.display(), "Plugin directory does not exist");
        }

        info!(path = %dir.display(), count = found.len(), "Discovered plugin manifests");
        for manifest in &found {
            self.add_manifest(manifest.clone());
        }
        Ok(found)
    }

    fn read_manifest(&self, path: &Path, found: &mut Vec<PluginManifest>) {
        match manifest::parse_file(path) {
            Ok(m) => {
                debug!(plugin = %m.id, path = %path.display(), "Found plugin manifest");
                found.push(m);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid plugin manifest"),
        }
    }

    /// Validate, order and load every eager or lazy plugin for the profile.
    /// Returns how many are running afterwards.
    pub fn load_all(&mut self) -> Result<usize> {
        self.metrics.start_system();

        let candidates: Vec<PluginManifest> = self
            .manifests
            .iter()
            .filter(|m| m.supports_profile(&self.profile))
            .filter(|m| m.load_strategy != LoadStrategy::Explicit)
            .cloned()
            .collect();

        let validation = capability::validate(&candidates, &self.policy);
        for (id, reason) in &validation.excluded {
            if let Some(m) = candidates.iter().find(|m| &m.id == id) {
                self.mark_failed(m, reason.clone());
            }
        }

        let resolution = resolver::resolve(&validation.to_load)?;
        for (id, reason) in &resolution.excluded {
            if let Some(m) = validation.to_load.iter().find(|m| &m.id == id) {
                self.mark_failed(m, reason.clone());
            }
        }

        for id in &resolution.load_order {
            if self.is_loaded(id) {
                continue;
            }
            if let Some(manifest) = validation.to_load.iter().find(|m| &m.id == id) {
                // Errors are recorded on the descriptor
                let _ = self.load_manifest(manifest.clone());
            }
        }

        self.metrics.complete_system();
        info!(
            loaded = self.metrics.loaded(),
            failed = self.metrics.failed(),
            "Plugin loading complete"
        );
        Ok(self.loaded.len())
    }

    /// Load one known plugin by id, including explicit-only plugins
    pub fn load(&mut self, id: &str) -> Result<()> {
        if self.is_loaded(id) {
            return Ok(());
        }
        let manifest = self
            .manifests
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| LablabError::Plugin(format!("Unknown plugin: {}", id)))?;
        self.load_manifest(manifest)
    }

    fn load_manifest(&mut self, manifest: PluginManifest) -> Result<()> {
        let id = manifest.id.clone();

        if let Some(dep) = manifest.hard_dependencies().find(|d| !self.is_loaded(&d.id)) {
            let reason = format!("Dependency not loaded: {}", dep.id);
            self.mark_failed(&manifest, reason.clone());
            return Err(LablabError::Dependency(reason));
        }

        let index = self.metrics.start_plugin_load(
            &id,
            &self.profile,
            &manifest.version,
            manifest.dependencies.len(),
        );
        let mut descriptor = PluginDescriptor::from_manifest(manifest.clone());
        descriptor.state = PluginState::Created;
        self.descriptors.add(descriptor);

        match self.instantiate_and_start(&manifest) {
            Ok(loaded) => {
                self.descriptors.update_state(&id, PluginState::Started, None);
                self.metrics.complete_plugin_load(index, true, None);
                self.loaded.push(loaded);
                info!(plugin = %id, version = %manifest.version, "Plugin started");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.registry.unregister_plugin(&id);
                self.descriptors
                    .update_state(&id, PluginState::Failed, Some(reason.clone()));
                self.metrics.complete_plugin_load(index, false, Some(reason.clone()));
                error!(plugin = %id, error = %reason, "Plugin failed to load");
                Err(e)
            }
        }
    }

    fn instantiate_and_start(&self, manifest: &PluginManifest) -> Result<LoadedPlugin> {
        let entry = manifest.entry_for(&self.profile).ok_or_else(|| {
            LablabError::Plugin(format!("No entry point for profile {}", self.profile))
        })?;
        let factory = self
            .catalog
            .factory(entry)
            .ok_or_else(|| LablabError::Plugin(format!("No built-in plugin named '{}'", entry)))?;

        let ctx = PluginContext {
            plugin_id: manifest.id.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            config: self
                .plugin_config
                .get(&manifest.id)
                .and_then(|v| v.as_table())
                .cloned()
                .unwrap_or_default(),
            data_dir: self.data_dir.clone(),
        };

        let mut plugin = factory();
        plugin.initialize(&ctx)?;
        self.descriptors
            .update_state(&manifest.id, PluginState::Initialized, None);
        plugin.start(&ctx)?;

        Ok(LoadedPlugin {
            id: manifest.id.clone(),
            plugin,
            ctx,
        })
    }

    fn mark_failed(&self, manifest: &PluginManifest, reason: String) {
        warn!(plugin = %manifest.id, reason = %reason, "Plugin not loaded");
        let mut descriptor = PluginDescriptor::from_manifest(manifest.clone());
        descriptor.state = PluginState::Failed;
        descriptor.failure_reason = Some(reason);
        self.descriptors.add(descriptor);
    }

    /// Stop a plugin and drop every service it registered
    pub fn unload(&mut self, id: &str) -> Result<()> {
        let index = self
            .loaded
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| LablabError::Plugin(format!("Plugin not loaded: {}", id)))?;
        let mut loaded = self.loaded.remove(index);

        if let Err(e) = loaded.plugin.stop(&loaded.ctx) {
            warn!(plugin = id, error = %e, "Plugin stop reported an error");
        }
        self.descriptors.update_state(id, PluginState::Stopped, None);
        let removed = self.registry.unregister_plugin(id);
        self.descriptors.update_state(id, PluginState::Unloaded, None);
        self.health.forget(id);
        info!(plugin = id, services = removed, "Plugin unloaded");
        Ok(())
    }

    /// Unload in reverse load order
    pub fn unload_all(&mut self) {
        let ids: Vec<String> = self.loaded.iter().rev().map(|p| p.id.clone()).collect();
        for id in ids {
            if let Err(e) = self.unload(&id) {
                warn!(plugin = %id, error = %e, "Unload failed");
            }
        }
    }

    pub fn reload(&mut self, id: &str) -> Result<()> {
        if self.is_loaded(id) {
            self.unload(id)?;
        }
        self.load(id)
    }

    pub fn check_health(&self, id: &str) -> HealthCheckResult {
        let descriptor = self.descriptors.get(id);
        let plugin = self.loaded.iter().find(|p| p.id == id);
        self.health
            .check(id, descriptor.as_ref(), || plugin.map(|p| p.plugin.health()))
    }

    pub fn check_all_health(&self) -> Vec<HealthCheckResult> {
        self.descriptors
            .get_all()
            .iter()
            .map(|d| self.check_health(&d.id))
            .collect()
    }

    pub fn system_health(&self) -> HealthStatus {
        self.health.system_health()
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        self.unload_all();
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::PluginDependency;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static STOPS: AtomicUsize = AtomicUsize::new(0);

    struct Counter {
        id: &'static str,
    }

    impl Plugin for Counter {
        fn id(&self) -> &str {
            self.id
        }

        fn name(&self) -> &str {
            "Counter"
        }

        fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
            let start = ctx.config_int("start").unwrap_or(0) as usize;
            ctx.provide(Arc::new(AtomicUsize::new(start)), "counter", 100);
            Ok(())
        }

        fn stop(&mut self, _ctx: &PluginContext) -> Result<()> {
            STOPS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    impl Plugin for Broken {
        fn id(&self) -> &str {
            "broken"
        }

        fn name(&self) -> &str {
            "Broken"
        }

        fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
            ctx.provide(Arc::new(7u8), "half-registered", 100);
            Err(LablabError::Plugin("missing data".into()))
        }
    }

    fn counter() -> Box<dyn Plugin> {
        Box::new(Counter { id: "counter" })
    }

    fn broken() -> Box<dyn Plugin> {
        Box::new(Broken)
    }

    fn catalog() -> PluginCatalog {
        PluginCatalog::new()
            .with(PluginManifest::builtin("counter", "Counter"), counter)
            .with(
                PluginManifest::builtin("broken", "Broken")
                    .depends_on(PluginDependency::hard("counter")),
                broken,
            )
    }

    fn host() -> PluginHost {
        PluginHost::new(&GameConfig::default(), catalog())
    }

    #[test]
    fn test_event_bus_is_registered() {
        let host = host();
        let bus = host.registry().resolve::<EventBus>().unwrap();
        assert!(Arc::ptr_eq(&bus, host.events()));
    }

    #[test]
    fn test_load_all_records_failures() {
        let mut host = host();
        let loaded = host.load_all().unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(host.plugin_state("counter"), Some(PluginState::Started));
        assert_eq!(host.plugin_state("broken"), Some(PluginState::Failed));
        let reason = host.descriptors().get("broken").unwrap().failure_reason.unwrap();
        assert!(reason.contains("missing data"));

        // Partial registrations are rolled back
        assert!(!host.registry().is_registered::<u8>());
        assert!(host.registry().is_registered::<AtomicUsize>());
        assert_eq!(host.metrics().failed(), 1);
    }

    #[test]
    fn test_plugin_config_reaches_plugin() {
        let mut table = toml::Table::new();
        let mut counter = toml::Table::new();
        counter.insert("start".into(), toml::Value::Integer(41));
        table.insert("counter".into(), toml::Value::Table(counter));

        let mut host = host().with_plugin_config(table);
        host.load("counter").unwrap();
        let value = host.registry().resolve::<AtomicUsize>().unwrap();
        assert_eq!(value.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn test_skip_list_excludes() {
        let config = GameConfig {
            skip_plugins: vec!["counter".into()],
            ..Default::default()
        };
        let mut host = PluginHost::new(&config, catalog());
        assert_eq!(host.load_all().unwrap(), 0);
        assert_eq!(host.plugin_state("counter"), Some(PluginState::Failed));
        // broken's dependency is gone, so the resolver drops it
        let reason = host.descriptors().get("broken").unwrap().failure_reason.unwrap();
        assert_eq!(reason, "Missing hard dependencies: counter");
    }

    #[test]
    fn test_unload_and_reload() {
        let mut host = host();
        host.load("counter").unwrap();
        let before = STOPS.load(Ordering::SeqCst);

        host.unload("counter").unwrap();
        assert!(STOPS.load(Ordering::SeqCst) > before);
        assert_eq!(host.plugin_state("counter"), Some(PluginState::Unloaded));
        assert!(!host.registry().is_registered::<AtomicUsize>());
        assert!(host.unload("counter").is_err());

        host.reload("counter").unwrap();
        assert!(host.is_loaded("counter"));
        assert!(host.registry().is_registered::<AtomicUsize>());
    }

    #[test]
    fn test_health_reflects_state() {
        let mut host = host();
        host.load_all().unwrap();
        assert_eq!(host.check_health("counter").status, HealthStatus::Healthy);
        assert_eq!(host.check_health("broken").status, HealthStatus::Unhealthy);
        assert_eq!(host.check_health("ghost").message, "Plugin not found in registry");
        assert_eq!(host.system_health(), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_discover_reads_nested_manifests() {
        let root = std::env::temp_dir().join(format!("lablab-discover-{}", uuid::Uuid::new_v4()));
        let nested = root.join("plugins").join("counter-copy");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join(MANIFEST_FILE),
            r#"{"id": "counter-copy", "name": "Copy", "version": "0.1.0", "entryType": "counter"}"#,
        )
        .unwrap();
        let bad = root.join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(MANIFEST_FILE), "{ not json").unwrap();

        let mut host = host();
        let found = host.discover(&root).unwrap();
        assert_eq!(found.len(), 1);
        host.load("counter-copy").unwrap();
        assert!(host.is_loaded("counter-copy"));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
