//! End-to-end game flow through the public API: starting a run, taking
//! stairs both ways and letting the autopilot play a long session.

use lablab_bean::components::{Ai, Position};
use lablab_bean::core::config::GameConfig;
use lablab_bean::game::{Autopilot, GameMode, GameServices, GameStateManager, LogSeverity, PlayerAction};
use lablab_bean::gameplay::MerchantInventory;
use lablab_bean::map::dungeon::Tile;

fn started(seed: u64) -> GameStateManager {
    started_with(GameConfig::default(), seed)
}

fn started_with(config: GameConfig, seed: u64) -> GameStateManager {
    let mut game = GameStateManager::new(config, GameServices::with_defaults().unwrap());
    game.new_game(seed).unwrap();
    game
}

fn clear_hostiles(game: &mut GameStateManager) {
    let hostile: Vec<_> = game.world().query::<&Ai>().iter().map(|(e, _)| e).collect();
    for e in hostile {
        game.world_mut().despawn(e).unwrap();
    }
}

fn teleport(game: &mut GameStateManager, to: Position) {
    let player = game.player().unwrap();
    *game.world_mut().get::<&mut Position>(player).unwrap() = to;
}

/// Clear the level, stand on the staircase and take it
fn take_stairs(game: &mut GameStateManager, tile: Tile, action: PlayerAction) {
    clear_hostiles(game);
    let stairs = game.map().unwrap().find_tile(tile).unwrap();
    teleport(game, stairs);
    assert!(game.handle_player_action(action).unwrap());
}

fn go_down(game: &mut GameStateManager) {
    take_stairs(game, Tile::StairsDown, PlayerAction::Descend);
}

fn go_up(game: &mut GameStateManager) {
    take_stairs(game, Tile::StairsUp, PlayerAction::Ascend);
}

fn blacksmith_stock(game: &GameStateManager) -> Vec<i32> {
    game.world()
        .query::<&MerchantInventory>()
        .iter()
        .find(|(_, inv)| inv.stock.contains_key("Iron Sword"))
        .map(|(_, inv)| inv.stock.values().filter(|s| !s.infinite).map(|s| s.quantity).collect())
        .unwrap()
}

#[test]
fn test_new_game_starts_on_level_one() {
    let game = started(1);
    assert_eq!(game.mode(), GameMode::Playing);
    assert_eq!(game.levels().current_level(), 1);

    let hero = game.player_snapshot().unwrap();
    assert_eq!(hero.health, hero.max_health);
    assert_eq!(hero.level, 1);
    assert!(game.map().unwrap().is_visible(game.player_position().unwrap()));
}

#[test]
fn test_stairs_round_trip_keeps_levels_cached() {
    let mut game = started(21);
    clear_hostiles(&mut game);

    let down = game.map().unwrap().find_tile(Tile::StairsDown).unwrap();
    teleport(&mut game, down);
    assert!(game.handle_player_action(PlayerAction::Descend).unwrap());
    assert_eq!(game.levels().current_level(), 2);
    assert!(game.levels().is_level_cached(1));

    clear_hostiles(&mut game);
    let up = game.map().unwrap().find_tile(Tile::StairsUp).unwrap();
    teleport(&mut game, up);
    assert!(game.handle_player_action(PlayerAction::Ascend).unwrap());
    assert_eq!(game.levels().current_level(), 1);
    assert_eq!(game.levels().personal_best(), 2);
}

#[test]
fn test_autopilot_session_keeps_invariants() {
    let mut game = started(77);
    let mut pilot = Autopilot::new(77);
    for _ in 0..400 {
        if game.mode() != GameMode::Playing {
            break;
        }
        let action = pilot.next_action(&game);
        game.handle_player_action(action).unwrap();

        if let Some(hero) = game.player_snapshot() {
            assert!(hero.health <= hero.max_health);
            assert!(hero.gold >= 0);
        }
        assert!(game.log().len() <= game.log().capacity());
    }
    assert!(game.turn() > 0);
    assert!(game.levels().personal_best() >= 1);
}

#[test]
fn test_notes_land_in_the_log() {
    let mut game = started(5);
    game.note("A cold draft blows.", LogSeverity::Info);
    let recent = game.log().recent(1);
    assert_eq!(recent[0].message, "A cold draft blows.");
}

#[test]
fn test_victory_waits_for_leaving_the_last_level() {
    let config = GameConfig {
        victory_level: 3,
        ..GameConfig::default()
    };
    let mut game = started_with(config, 8);
    go_down(&mut game);
    go_down(&mut game);
    assert_eq!(game.levels().current_level(), 3);
    assert_eq!(game.mode(), GameMode::Playing);

    clear_hostiles(&mut game);
    game.handle_player_action(PlayerAction::Descend).unwrap();
    assert_eq!(game.mode(), GameMode::Victory);
    assert_eq!(game.levels().current_level(), 3);
}

#[test]
fn test_merchants_restock_after_a_deep_trip() {
    let mut game = started(33);
    let smith = game
        .world()
        .query::<&MerchantInventory>()
        .iter()
        .find(|(_, inv)| inv.stock.contains_key("Iron Sword"))
        .map(|(e, _)| e)
        .unwrap();
    for s in game.world_mut().get::<&mut MerchantInventory>(smith).unwrap().stock.values_mut() {
        if !s.infinite {
            s.quantity = 0;
        }
    }

    for _ in 0..6 {
        go_down(&mut game);
    }
    assert_eq!(game.levels().personal_best(), 7);
    for _ in 0..6 {
        go_up(&mut game);
    }
    assert_eq!(game.levels().current_level(), 1);

    let stock = blacksmith_stock(&game);
    assert!(!stock.is_empty());
    assert!(stock.iter().all(|q| *q >= 2), "restocked: {:?}", stock);
}

#[test]
fn test_evicted_first_level_gets_its_townsfolk_back() {
    let config = GameConfig {
        level_cache_size: 2,
        ..GameConfig::default()
    };
    let mut game = started_with(config, 12);
    go_down(&mut game);
    go_down(&mut game);
    assert!(!game.levels().is_level_cached(1));
    go_up(&mut game);
    go_up(&mut game);
    assert_eq!(game.levels().current_level(), 1);

    let npcs = &game.services().npcs;
    assert!(npcs.find_npc(game.world(), "elder").is_some());
    assert!(!blacksmith_stock(&game).is_empty());
}
