//! Populating a freshly generated level

use hecs::{Entity, EntityBuilder, World};
use tracing::{debug, warn};

use crate::ai::IntelligentAi;
use crate::components::{
    Actor, Ai, AiBehavior, BaseStats, BlocksMovement, Combat, Enemy, EnemyKind, EquipmentSlots, Gold, Health,
    Inventory, Name, Player, Position, Renderable, StatusEffects, Visible,
};
use crate::core::config::GameConfig;
use crate::core::dice::DiceRoller;
use crate::core::types::GlyphColor;
use crate::events::{EntitySpawned, GameEvent};
use crate::gameplay::{Experience, Mana, MerchantService, NpcService, PlayerFlags, QuestLog, SpellBook};
use crate::map::dungeon::DungeonMap;
use crate::systems::{difficulty, movement};

pub const PLAYER_INVENTORY_SIZE: usize = 20;
pub const ENEMY_BASE_HEALTH: i32 = 30;
pub const ENEMY_BASE_ATTACK: i32 = 5;
pub const ENEMY_BASE_DEFENSE: i32 = 2;

/// Tries before giving up on finding an empty tile
const PLACEMENT_ATTEMPTS: usize = 200;

/// NPCs living on the first level: (id, name, role, dialogue tree, merchant template)
const TOWNSFOLK: [(&str, &str, &str, &str, Option<&str>); 3] = [
    ("elder", "Elder Maren", "quest_giver", "elder", None),
    ("shopkeeper", "Pip", "merchant", "shopkeeper", Some("general_store")),
    ("blacksmith", "Gorrik", "blacksmith", "blacksmith", Some("blacksmith")),
];

/// Where the hero starts on a new run
pub fn player_start(map: &DungeonMap) -> Option<Position> {
    map.rooms
        .first()
        .map(|r| r.center())
        .filter(|p| map.is_walkable(*p))
        .or_else(|| map.floor_tiles().next())
}

pub fn spawn_player(world: &mut World, config: &GameConfig, at: Position) -> Entity {
    let mut builder = EntityBuilder::new();
    builder
        .add(Player)
        .add(Name("Hero".to_string()))
        .add(at)
        .add(Health::new(config.player_health))
        .add(Combat::new(config.player_attack, config.player_defense))
        .add(BaseStats::new(config.player_attack, config.player_defense, config.player_speed))
        .add(Actor::new(config.player_speed))
        .add(Renderable::new('@', GlyphColor::Yellow, Renderable::LAYER_ACTOR + 1))
        .add(Visible)
        .add(BlocksMovement)
        .add(Inventory::new(PLAYER_INVENTORY_SIZE))
        .add(EquipmentSlots::default())
        .add(StatusEffects::default())
        .add(Experience::new())
        .add(Mana::new(config.player_mana))
        .add(SpellBook::default())
        .add(QuestLog::default())
        .add(PlayerFlags::default())
        .add(Gold::new(config.player_gold));
    let player = world.spawn(builder.build());
    debug!(?at, "Player created");
    player
}

/// A walkable tile nobody is standing on, at least `min_distance` from `avoid`
pub fn random_open_tile(
    world: &World,
    map: &DungeonMap,
    dice: &mut DiceRoller,
    avoid: Option<Position>,
    min_distance: i32,
) -> Option<Position> {
    let floor: Vec<Position> = map.floor_tiles().collect();
    for _ in 0..PLACEMENT_ATTEMPTS {
        let p = *dice.choose(&floor)?;
        if movement::blocker_at(world, p).is_some() {
            continue;
        }
        if avoid.is_some_and(|a| a.chebyshev(&p) < min_distance) {
            continue;
        }
        return Some(p);
    }
    None
}

/// One enemy with stats scaled for `level`
pub fn spawn_enemy(world: &mut World, kind: EnemyKind, at: Position, dice: &mut DiceRoller, level: u32) -> Entity {
    let health = difficulty::scale_stat(ENEMY_BASE_HEALTH, level);
    let speed = 80 + dice.range(0, 39);
    world.spawn((
        Enemy { kind },
        Name(kind.name().to_string()),
        at,
        Health::new(health),
        Combat::new(
            difficulty::scale_stat(ENEMY_BASE_ATTACK, level),
            difficulty::scale_stat(ENEMY_BASE_DEFENSE, level),
        ),
        Actor::new(speed),
        Ai::new(AiBehavior::Chase),
        Renderable::new(kind.glyph(), kind.color(), Renderable::LAYER_ACTOR),
        Visible,
        BlocksMovement,
        StatusEffects::default(),
    ))
}

/// Scatter `count` enemies of random kinds, keeping clear of the player
pub fn spawn_enemies(
    world: &mut World,
    map: &DungeonMap,
    dice: &mut DiceRoller,
    level: u32,
    count: usize,
    player_at: Option<Position>,
) -> Vec<GameEvent> {
    let mut events = Vec::new();
    for _ in 0..count {
        let Some(at) = random_open_tile(world, map, dice, player_at, 4) else {
            warn!(level, "No room left for enemies");
            break;
        };
        let Some(kind) = dice.choose(&EnemyKind::ALL).copied() else {
            break;
        };
        let entity = spawn_enemy(world, kind, at, dice, level);
        events.push(GameEvent::Spawned(EntitySpawned {
            entity,
            kind: kind.name().to_string(),
            position: at,
        }));
    }
    debug!(level, spawned = events.len(), "Enemies spawned");
    events
}

/// The elder, the shopkeeper and the blacksmith, one per room after the first
pub fn spawn_townsfolk(
    world: &mut World,
    map: &DungeonMap,
    dice: &mut DiceRoller,
    npcs: &NpcService,
    merchants: &MerchantService,
    player_at: Option<Position>,
) -> Vec<GameEvent> {
    let mut events = Vec::new();
    let mut rooms = map.rooms.iter().skip(1).map(|r| r.center());
    for (id, name, role, tree, template) in TOWNSFOLK {
        let at = rooms
            .by_ref()
            .find(|p| map.is_walkable(*p) && movement::blocker_at(world, *p).is_none())
            .or_else(|| random_open_tile(world, map, dice, player_at, 2));
        let Some(at) = at else {
            warn!(npc = id, "No room for NPC");
            continue;
        };
        let npc = npcs.create_npc(world, id, name, role, Some(tree), at);
        let _ = world.insert_one(npc, IntelligentAi::npc(name));
        if let Some(template) = template {
            if let Err(e) = merchants.stock_merchant(world, npc, template) {
                warn!(npc = id, error = %e, "Could not stock merchant");
            }
        }
        events.push(GameEvent::Spawned(EntitySpawned {
            entity: npc,
            kind: id.to_string(),
            position: at,
        }));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::generator::{MapGenerator, RoomParams};

    fn map() -> DungeonMap {
        MapGenerator::new(7).generate_rooms(60, 30, RoomParams::default())
    }

    #[test]
    fn test_enemies_keep_their_distance() {
        let map = map();
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(3);
        let start = player_start(&map).unwrap();
        let events = spawn_enemies(&mut world, &map, &mut dice, 1, 8, Some(start));

        assert_eq!(events.len(), 8);
        for (_, (pos, hp)) in world.query::<(&Position, &Health)>().iter() {
            assert!(pos.chebyshev(&start) >= 4);
            assert!(map.is_walkable(*pos));
            assert_eq!(hp.maximum, ENEMY_BASE_HEALTH);
        }
    }

    #[test]
    fn test_enemy_stats_scale_with_depth() {
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(1);
        let deep = spawn_enemy(&mut world, EnemyKind::Orc, Position::new(1, 1), &mut dice, 10);
        let hp = world.get::<&Health>(deep).unwrap().maximum;
        let speed = world.get::<&Actor>(deep).unwrap().speed;
        assert!(hp > ENEMY_BASE_HEALTH);
        assert!((80..120).contains(&speed));
    }

    #[test]
    fn test_townsfolk_are_stocked() {
        let map = map();
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(5);
        let npcs = NpcService::with_defaults().unwrap();
        let merchants = MerchantService::with_defaults().unwrap();
        let events = spawn_townsfolk(&mut world, &map, &mut dice, &npcs, &merchants, None);

        assert_eq!(events.len(), 3);
        let pip = npcs.find_npc(&world, "shopkeeper").unwrap();
        let elder = npcs.find_npc(&world, "elder").unwrap();
        assert!(merchants.is_merchant(&world, pip));
        assert!(!merchants.is_merchant(&world, elder));
    }
}
