//! Plugin host integration: the built-in catalog drives a game, and a
//! third-party plugin can take over a gameplay service.

use std::sync::Arc;

use lablab_bean::core::config::GameConfig;
use lablab_bean::core::error::Result;
use lablab_bean::game::{GameMode, GameServices, GameStateManager, PlayerAction};
use lablab_bean::gameplay::MerchantService;
use lablab_bean::plugins::builtin::catalog;
use lablab_bean::plugins::{Plugin, PluginContext, PluginHost, PluginManifest, PluginState};
use lablab_bean::services::JsonStorage;

fn temp_config(tag: &str) -> GameConfig {
    let mut config = GameConfig::default();
    config.data_dir = std::env::temp_dir().join(format!("lablab-{}-{}", tag, uuid::Uuid::new_v4()));
    config
}

struct BargainMerchants;

fn bargain_merchants() -> Box<dyn Plugin> {
    Box::new(BargainMerchants)
}

impl Plugin for BargainMerchants {
    fn id(&self) -> &str {
        "bargain-merchants"
    }

    fn name(&self) -> &str {
        "Bargain Merchants"
    }

    fn initialize(&mut self, ctx: &PluginContext) -> Result<()> {
        ctx.provide(Arc::new(MerchantService::with_defaults()?), "MerchantService", 200);
        Ok(())
    }
}

#[test]
fn test_builtin_host_drives_a_game() {
    let config = temp_config("host-game");
    let mut host = PluginHost::new(&config, catalog()).with_profile("headless");
    let loaded = host.load_all().unwrap();
    assert!(loaded > 0);
    assert_eq!(host.plugin_state("quest"), Some(PluginState::Started));

    let services = GameServices::from_registry(host.registry(), host.events().clone()).unwrap();
    let before = host.events().published_count();
    let mut game = GameStateManager::new(config, services);
    game.new_game(3).unwrap();
    assert_eq!(game.mode(), GameMode::Playing);
    assert!(host.events().published_count() > before);
    assert!(game.handle_player_action(PlayerAction::Wait).unwrap());

    host.unload_all();
    assert!(host.loaded_ids().is_empty());
}

#[test]
fn test_higher_priority_plugin_overrides_builtin_service() {
    let config = temp_config("override");
    let mut catalog = catalog();
    catalog.add(
        PluginManifest::builtin("bargain-merchants", "Bargain Merchants").with_priority(200),
        bargain_merchants,
    );
    let mut host = PluginHost::new(&config, catalog).with_profile("headless");
    host.load_all().unwrap();
    assert!(host.is_loaded("bargain-merchants"));

    let resolved = host.registry().resolve::<MerchantService>().unwrap();
    let services = GameServices::from_registry(host.registry(), host.events().clone()).unwrap();
    assert!(Arc::ptr_eq(&resolved, &services.merchants));

    let owners = host.registry().get_all_with_metadata::<MerchantService>();
    assert_eq!(owners.len(), 2);

    host.unload("bargain-merchants").unwrap();
    let fallback = host.registry().resolve::<MerchantService>().unwrap();
    assert!(!Arc::ptr_eq(&resolved, &fallback));
}

#[test]
fn test_storage_service_persists_under_data_dir() {
    let config = temp_config("storage");
    let mut host = PluginHost::new(&config, catalog()).with_profile("headless");
    host.load_all().unwrap();

    let storage = host.registry().resolve::<JsonStorage>().unwrap();
    storage.save("runs/best", &vec![1u32, 2, 3]).unwrap();
    assert!(storage.exists("runs/best"));
    let back: Vec<u32> = storage.load("runs/best").unwrap();
    assert_eq!(back, vec![1, 2, 3]);
    assert!(storage.root().starts_with(&config.data_dir));
}
