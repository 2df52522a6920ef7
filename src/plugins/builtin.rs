//! Plugins compiled into the game
//!
//! Most built-ins just construct one service and register it. The few that
//! own background work or subscriptions keep a handle so `stop` can undo
//! them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::core::error::Result;
use crate::gameplay::{
    BossService, DialogueLibrary, HazardService, InventoryService, MerchantService, NpcService, ProgressionService,
    QuestService, SpellService,
};
use crate::plugins::events::SubscriptionId;
use crate::plugins::health::HealthStatus;
use crate::plugins::loader::PluginCatalog;
use crate::plugins::manifest::{PluginDependency, PluginManifest};
use crate::plugins::plugin::{Plugin, PluginContext};
use crate::services::{
    AnalyticsService, ConfigService, DiagnosticsService, FileVectorStore, JsonStorage, LocalizationService,
    PoolService, ResilienceService, SchedulerService, VectorStore,
};

/// Front-end selected by the `ui` capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontEnd {
    pub id: String,
    pub interactive: bool,
}

type Init = fn(&PluginContext) -> Result<()>;

/// A plugin whose whole job is registering services at initialize
struct ServicePlugin {
    id: &'static str,
    name: &'static str,
    init: Init,
}

impl Plugin for ServicePlugin {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
        (self.init)(ctx)
    }
}

/// Content file from `<data_dir>/content/`, when the player ships one
fn content_override(ctx: &PluginContext, file: &str) -> Result<Option<String>> {
    let path = ctx.data_dir.join("content").join(file);
    if !path.is_file() {
        return Ok(None);
    }
    info!(plugin = %ctx.plugin_id, path = %path.display(), "Loading content override");
    Ok(Some(std::fs::read_to_string(path)?))
}

fn service_dir(ctx: &PluginContext, default: &str) -> PathBuf {
    match ctx.config_str("path") {
        Some(path) => PathBuf::from(path),
        None => ctx.data_dir.join(default),
    }
}

fn init_inventory(ctx: &PluginContext) -> Result<()> {
    ctx.provide(Arc::new(InventoryService::new()), "InventoryService", 100);
    Ok(())
}

fn init_progression(ctx: &PluginContext) -> Result<()> {
    ctx.provide(Arc::new(ProgressionService::new()), "ProgressionService", 100);
    Ok(())
}

fn init_quest(ctx: &PluginContext) -> Result<()> {
    let service = match content_override(ctx, "quests.toml")? {
        Some(src) => QuestService::from_toml_str(&src)?,
        None => QuestService::with_defaults()?,
    };
    ctx.provide(Arc::new(service), "QuestService", 100);
    Ok(())
}

fn init_npc(ctx: &PluginContext) -> Result<()> {
    let library = match content_override(ctx, "dialogue.toml")? {
        Some(src) => DialogueLibrary::from_toml_str(&src)?,
        None => DialogueLibrary::with_defaults()?,
    };
    ctx.provide(Arc::new(NpcService::new(library)), "NpcService", 100);
    Ok(())
}

fn init_merchant(ctx: &PluginContext) -> Result<()> {
    let service = match content_override(ctx, "merchants.toml")? {
        Some(src) => MerchantService::from_toml_str(&src)?,
        None => MerchantService::with_defaults()?,
    };
    ctx.provide(Arc::new(service), "MerchantService", 100);
    Ok(())
}

fn init_spells(ctx: &PluginContext) -> Result<()> {
    let service = match content_override(ctx, "spells.toml")? {
        Some(src) => SpellService::from_toml_str(&src)?,
        None => SpellService::with_defaults()?,
    };
    ctx.provide(Arc::new(service), "SpellService", 100);
    Ok(())
}

fn init_hazards(ctx: &PluginContext) -> Result<()> {
    let service = match content_override(ctx, "hazards.toml")? {
        Some(src) => HazardService::from_toml_str(&src)?,
        None => HazardService::with_defaults()?,
    };
    ctx.provide(Arc::new(service), "HazardService", 100);
    Ok(())
}

fn init_boss(ctx: &PluginContext) -> Result<()> {
    let service = match content_override(ctx, "bosses.toml")? {
        Some(src) => BossService::from_toml_str(&src)?,
        None => BossService::with_defaults()?,
    };
    ctx.provide(Arc::new(service), "BossService", 100);
    Ok(())
}

fn init_resilience(ctx: &PluginContext) -> Result<()> {
    ctx.provide(Arc::new(ResilienceService::new()), "ResilienceService", 100);
    Ok(())
}

fn init_pool(ctx: &PluginContext) -> Result<()> {
    ctx.provide(Arc::new(PoolService::new()), "PoolService", 100);
    Ok(())
}

fn init_storage(ctx: &PluginContext) -> Result<()> {
    let storage = JsonStorage::new(service_dir(ctx, "storage"))?;
    ctx.provide(Arc::new(storage), "JsonStorage", 100);
    Ok(())
}

fn init_vector_store(ctx: &PluginContext) -> Result<()> {
    let store: Arc<dyn VectorStore> = Arc::new(FileVectorStore::new(service_dir(ctx, "vectors"))?);
    ctx.provide(store, "FileVectorStore", 100);
    Ok(())
}

fn init_localization(ctx: &PluginContext) -> Result<()> {
    let service = LocalizationService::new(service_dir(ctx, "localization"))?;
    if let Some(locale) = ctx.config_str("locale") {
        service.set_locale(locale);
    }
    ctx.provide(Arc::new(service), "LocalizationService", 100);
    Ok(())
}

fn init_config(ctx: &PluginContext) -> Result<()> {
    let service = ConfigService::new(ctx.events.clone());
    service.load_table(&ctx.config);
    ctx.provide(Arc::new(service), "ConfigService", 100);
    Ok(())
}

fn init_terminal_ui(ctx: &PluginContext) -> Result<()> {
    let front_end = FrontEnd {
        id: ctx.plugin_id.clone(),
        interactive: true,
    };
    ctx.provide(Arc::new(front_end), "TerminalUi", 100);
    Ok(())
}

fn init_headless_ui(ctx: &PluginContext) -> Result<()> {
    let front_end = FrontEnd {
        id: ctx.plugin_id.clone(),
        interactive: false,
    };
    ctx.provide(Arc::new(front_end), "HeadlessUi", 100);
    Ok(())
}

#[derive(Default)]
struct SchedulerPlugin {
    scheduler: Option<Arc<SchedulerService>>,
}

impl Plugin for SchedulerPlugin {
    fn id(&self) -> &str {
        "scheduler"
    }

    fn name(&self) -> &str {
        "Scheduler"
    }

    fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
        let scheduler = Arc::new(SchedulerService::new()?);
        ctx.provide(scheduler.clone(), "SchedulerService", 100);
        self.scheduler = Some(scheduler);
        Ok(())
    }

    fn stop(&mut self, _ctx: &PluginContext) -> Result<()> {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.cancel_all();
        }
        Ok(())
    }
}

#[derive(Default)]
struct AnalyticsPlugin {
    analytics: Option<Arc<AnalyticsService>>,
    subscriptions: Vec<SubscriptionId>,
}

impl Plugin for AnalyticsPlugin {
    fn id(&self) -> &str {
        "analytics"
    }

    fn name(&self) -> &str {
        "Analytics"
    }

    fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
        let analytics = Arc::new(AnalyticsService::new());
        ctx.provide(analytics.clone(), "AnalyticsService", 100);
        self.subscriptions = analytics.attach(&ctx.events);
        self.analytics = Some(analytics);
        info!("Analytics subscribed to game events");
        Ok(())
    }

    fn stop(&mut self, ctx: &PluginContext) -> Result<()> {
        for id in self.subscriptions.drain(..) {
            ctx.events.unsubscribe(id);
        }
        if let Some(analytics) = self.analytics.take() {
            let counters = analytics.counters();
            info!(
                spawns = counters.spawns,
                moves = counters.moves,
                combats = counters.combats,
                "Analytics summary"
            );
            analytics.flush();
        }
        Ok(())
    }
}

#[derive(Default)]
struct DiagnosticsPlugin {
    diagnostics: Option<Arc<DiagnosticsService>>,
}

impl Plugin for DiagnosticsPlugin {
    fn id(&self) -> &str {
        "diagnostics"
    }

    fn name(&self) -> &str {
        "Diagnostics"
    }

    fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
        let diagnostics = Arc::new(DiagnosticsService::new());
        ctx.provide(diagnostics.clone(), "DiagnosticsService", 100);
        self.diagnostics = Some(diagnostics);
        Ok(())
    }

    /// Periodic collection only runs when an interval is configured and a
    /// runtime is available
    fn start(&mut self, ctx: &PluginContext) -> Result<()> {
        if let (Some(diagnostics), Some(secs)) = (&self.diagnostics, ctx.config_int("collect_interval_secs")) {
            if tokio::runtime::Handle::try_current().is_ok() {
                diagnostics.start_collection(Duration::from_secs(secs.max(1) as u64))?;
            }
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: &PluginContext) -> Result<()> {
        if let Some(diagnostics) = self.diagnostics.take() {
            if diagnostics.is_collecting() {
                diagnostics.stop_collection();
            }
        }
        Ok(())
    }

    fn health(&self) -> HealthStatus {
        match &self.diagnostics {
            Some(d) if d.stats().total_errors > 0 => HealthStatus::Degraded,
            Some(_) => HealthStatus::Healthy,
            None => HealthStatus::Unknown,
        }
    }
}

macro_rules! service_plugin {
    ($id:literal, $name:literal, $init:expr) => {
        (|| -> Box<dyn Plugin> {
            Box::new(ServicePlugin {
                id: $id,
                name: $name,
                init: $init,
            })
        }) as fn() -> Box<dyn Plugin>
    };
}

/// Every plugin the game ships with
pub fn catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with(
            PluginManifest::builtin("inventory", "Inventory"),
            service_plugin!("inventory", "Inventory", init_inventory),
        )
        .with(
            PluginManifest::builtin("progression", "Progression"),
            service_plugin!("progression", "Progression", init_progression),
        )
        .with(
            PluginManifest::builtin("quest", "Quests")
                .depends_on(PluginDependency::hard("inventory"))
                .depends_on(PluginDependency::hard("progression")),
            service_plugin!("quest", "Quests", init_quest),
        )
        .with(
            PluginManifest::builtin("npc", "NPCs").depends_on(PluginDependency::soft("quest")),
            service_plugin!("npc", "NPCs", init_npc),
        )
        .with(
            PluginManifest::builtin("merchant", "Merchants").depends_on(PluginDependency::hard("inventory")),
            service_plugin!("merchant", "Merchants", init_merchant),
        )
        .with(
            PluginManifest::builtin("spells", "Spells").depends_on(PluginDependency::soft("progression")),
            service_plugin!("spells", "Spells", init_spells),
        )
        .with(
            PluginManifest::builtin("hazards", "Hazards"),
            service_plugin!("hazards", "Hazards", init_hazards),
        )
        .with(
            PluginManifest::builtin("boss", "Bosses").depends_on(PluginDependency::soft("progression")),
            service_plugin!("boss", "Bosses", init_boss),
        )
        .with(PluginManifest::builtin("scheduler", "Scheduler"), || -> Box<dyn Plugin> {
            Box::new(SchedulerPlugin::default())
        })
        .with(
            PluginManifest::builtin("resilience", "Resilience"),
            service_plugin!("resilience", "Resilience", init_resilience),
        )
        .with(
            PluginManifest::builtin("object-pool", "Object Pool"),
            service_plugin!("object-pool", "Object Pool", init_pool),
        )
        .with(
            PluginManifest::builtin("persistent-storage", "JSON Storage"),
            service_plugin!("persistent-storage", "JSON Storage", init_storage),
        )
        .with(
            PluginManifest::builtin("vector-store", "File Vector Store"),
            service_plugin!("vector-store", "File Vector Store", init_vector_store),
        )
        .with(
            PluginManifest::builtin("localization", "Localization"),
            service_plugin!("localization", "Localization", init_localization),
        )
        .with(
            PluginManifest::builtin("config", "Config Manager"),
            service_plugin!("config", "Config Manager", init_config),
        )
        .with(PluginManifest::builtin("analytics", "Analytics"), || -> Box<dyn Plugin> {
            Box::new(AnalyticsPlugin::default())
        })
        .with(PluginManifest::builtin("diagnostics", "Diagnostics"), || -> Box<dyn Plugin> {
            Box::new(DiagnosticsPlugin::default())
        })
        .with(
            profile_only(
                PluginManifest::builtin("ui-terminal", "Terminal UI").with_capability("ui:terminal"),
                "console",
            ),
            service_plugin!("ui-terminal", "Terminal UI", init_terminal_ui),
        )
        .with(
            profile_only(
                PluginManifest::builtin("ui-headless", "Headless UI").with_capability("ui:headless"),
                "headless",
            ),
            service_plugin!("ui-headless", "Headless UI", init_headless_ui),
        )
}

fn profile_only(mut manifest: PluginManifest, profile: &str) -> PluginManifest {
    manifest.supported_profiles.push(profile.to_string());
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GameConfig;
    use crate::plugins::loader::PluginHost;
    use crate::plugins::plugin::PluginState;

    fn host(profile: &str) -> PluginHost {
        let mut config = GameConfig::default();
        config.data_dir = std::env::temp_dir().join(format!("lablab-builtin-{}", uuid::Uuid::new_v4()));
        PluginHost::new(&config, catalog()).with_profile(profile)
    }

    #[test]
    fn test_all_console_plugins_load() {
        let mut host = host("console");
        let loaded = host.load_all().unwrap();
        assert_eq!(loaded, catalog().len() - 1);
        assert_eq!(host.plugin_state("ui-headless"), None);

        let registry = host.registry();
        assert!(registry.resolve::<QuestService>().is_ok());
        assert!(registry.resolve::<dyn VectorStore>().is_ok());
        assert!(registry.resolve::<FrontEnd>().unwrap().interactive);
    }

    #[test]
    fn test_dependencies_load_first() {
        let mut host = host("console");
        host.load_all().unwrap();
        let order = host.loaded_ids();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("inventory") < pos("quest"));
        assert!(pos("progression") < pos("quest"));
        assert!(pos("inventory") < pos("merchant"));
    }

    #[test]
    fn test_headless_profile_selects_headless_ui() {
        let mut host = host("headless");
        host.load_all().unwrap();
        assert_eq!(host.plugin_state("ui-terminal"), None);
        assert!(!host.registry().resolve::<FrontEnd>().unwrap().interactive);
    }

    #[test]
    fn test_unloading_analytics_drops_subscriptions() {
        let mut host = host("console");
        host.load_all().unwrap();
        assert_eq!(host.events().subscriber_count::<crate::events::EntityMoved>(), 1);
        host.unload("analytics").unwrap();
        assert_eq!(host.events().subscriber_count::<crate::events::EntityMoved>(), 0);
        assert_eq!(host.plugin_state("analytics"), Some(PluginState::Unloaded));
        assert!(host.registry().resolve::<AnalyticsService>().is_err());
    }
}
