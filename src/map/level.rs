//! Multi-level dungeon management
//!
//! Each level owns its map and, while the player is elsewhere, a stash
//! world holding the level's entities. Moving between levels swaps the
//! positioned entities of the live world in and out of those stashes.

use std::collections::BTreeMap;

use hecs::{Entity, World};
use serde::Serialize;

use crate::components::{Player, Position};
use crate::core::config::GameConfig;
use crate::map::dungeon::{DungeonMap, Tile};
use crate::map::generator::{CaveParams, MapGenerator, RoomParams};

pub struct DungeonLevel {
    pub number: u32,
    pub map: DungeonMap,
    pub up_stairs: Option<Position>,
    pub down_stairs: Option<Position>,
    /// Entities parked while the player is on another level
    stash: World,
}

impl DungeonLevel {
    pub fn stashed_entities(&self) -> usize {
        self.stash.len() as usize
    }
}

/// Outcome of taking a staircase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelTransition {
    pub success: bool,
    pub message: String,
    pub new_level: u32,
    pub new_record_depth: bool,
    pub victory_triggered: bool,
    /// The level was generated fresh and needs populating
    pub newly_generated: bool,
}

pub struct LevelManager {
    levels: BTreeMap<u32, DungeonLevel>,
    current: u32,
    personal_best: u32,
    pub endless_mode: bool,
    pub victory_level: u32,
    max_cached: usize,
    width: i32,
    height: i32,
    feet_per_level: u32,
    base_seed: u64,
}

impl LevelManager {
    pub fn new(config: &GameConfig, seed: u64) -> Self {
        Self {
            levels: BTreeMap::new(),
            current: 1,
            personal_best: 1,
            endless_mode: false,
            victory_level: config.victory_level,
            max_cached: config.level_cache_size,
            width: config.map_width,
            height: config.map_height,
            feet_per_level: config.feet_per_level,
            base_seed: seed,
        }
    }

    fn level_seed(&self, number: u32) -> u64 {
        self.base_seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(number as u64 * 1442695040888963407)
    }

    /// Build the map for a level; every fifth level is a cave
    fn generate(&self, number: u32) -> DungeonLevel {
        let mut gen = MapGenerator::new(self.level_seed(number));
        let mut map = if number % 5 == 0 {
            gen.generate_cave(self.width, self.height, CaveParams::default())
        } else {
            gen.generate_rooms(self.width, self.height, RoomParams::default())
        };
        gen.place_stairs(&mut map, number > 1);

        if !self.endless_mode && number >= self.victory_level {
            if let Some(p) = map.find_tile(Tile::StairsDown) {
                map.set_tile(p, Tile::Floor);
            }
        }

        DungeonLevel {
            number,
            up_stairs: map.find_tile(Tile::StairsUp),
            down_stairs: map.find_tile(Tile::StairsDown),
            map,
            stash: World::new(),
        }
    }

    /// Generate level 1 and make it current
    pub fn initialize_first_level(&mut self) -> &DungeonLevel {
        self.levels.clear();
        self.current = 1;
        self.personal_best = 1;
        let level = self.generate(1);
        self.levels.insert(1, level);
        &self.levels[&1]
    }

    pub fn current_level(&self) -> u32 {
        self.current
    }

    pub fn personal_best(&self) -> u32 {
        self.personal_best
    }

    pub fn current(&self) -> Option<&DungeonLevel> {
        self.levels.get(&self.current)
    }

    pub fn current_map(&self) -> Option<&DungeonMap> {
        self.current().map(|l| &l.map)
    }

    pub fn current_map_mut(&mut self) -> Option<&mut DungeonMap> {
        self.levels.get_mut(&self.current).map(|l| &mut l.map)
    }

    pub fn is_level_cached(&self, number: u32) -> bool {
        self.levels.contains_key(&number)
    }

    pub fn cached_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn is_victory_level(&self, number: u32) -> bool {
        !self.endless_mode && number >= self.victory_level
    }

    pub fn depth_feet(&self, number: u32) -> u32 {
        number * self.feet_per_level
    }

    /// Take the down staircase
    pub fn descend(&mut self, world: &mut World, player: Entity) -> LevelTransition {
        if self.is_victory_level(self.current) {
            return LevelTransition {
                success: true,
                message: "You have reached the Victory Chamber!".into(),
                new_level: self.current,
                victory_triggered: true,
                ..Default::default()
            };
        }

        let next = self.current + 1;
        let newly_generated = self.switch_to(world, next);

        let new_record = next > self.personal_best;
        if new_record {
            self.personal_best = next;
            tracing::info!(level = next, "New depth record");
        }

        let arrival = self
            .current()
            .and_then(|l| l.up_stairs.or_else(|| l.map.rooms.first().map(|r| r.center())));
        place_player(world, player, arrival);

        let message = if self.is_victory_level(next) {
            format!(
                "Descending to Level {}... The Victory Chamber lies before you!",
                next
            )
        } else {
            format!(
                "Descending to Level {} ({} ft)...",
                next,
                self.depth_feet(next)
            )
        };

        LevelTransition {
            success: true,
            message,
            new_level: next,
            new_record_depth: new_record,
            newly_generated,
            victory_triggered: false,
        }
    }

    /// Take the up staircase
    pub fn ascend(&mut self, world: &mut World, player: Entity) -> LevelTransition {
        if self.current <= 1 {
            return LevelTransition {
                success: false,
                message: "You cannot ascend further.".into(),
                new_level: self.current,
                ..Default::default()
            };
        }

        let prev = self.current - 1;
        let newly_generated = self.switch_to(world, prev);
        let arrival = self.current().and_then(|l| l.down_stairs);
        place_player(world, player, arrival);

        LevelTransition {
            success: true,
            message: format!("Ascending to Level {}...", prev),
            new_level: prev,
            newly_generated,
            ..Default::default()
        }
    }

    /// Park the current level's entities, then restore or generate `target`
    ///
    /// Returns true when `target` had to be generated.
    fn switch_to(&mut self, world: &mut World, target: u32) -> bool {
        if let Some(level) = self.levels.get_mut(&self.current) {
            stash_entities(world, &mut level.stash);
        }

        let newly_generated = !self.levels.contains_key(&target);
        if newly_generated {
            let level = self.generate(target);
            self.levels.insert(target, level);
        }
        self.current = target;

        if let Some(level) = self.levels.get_mut(&target) {
            restore_entities(&mut level.stash, world);
        }

        self.evict_distant_levels();
        newly_generated
    }

    /// Drop cached levels furthest from the current one
    fn evict_distant_levels(&mut self) {
        while self.levels.len() > self.max_cached {
            let current = self.current;
            let furthest = self
                .levels
                .keys()
                .copied()
                .filter(|n| *n != current)
                .max_by_key(|n| (n.abs_diff(current), std::cmp::Reverse(*n)));
            match furthest {
                Some(n) => {
                    tracing::debug!(level = n, "Evicting cached level");
                    self.levels.remove(&n);
                }
                None => break,
            }
        }
    }
}

fn place_player(world: &mut World, player: Entity, at: Option<Position>) {
    if let (Some(at), Ok(mut pos)) = (at, world.get::<&mut Position>(player)) {
        *pos = at;
    }
}

/// Move every positioned non-player entity from `world` into `stash`
fn stash_entities(world: &mut World, stash: &mut World) {
    let to_move: Vec<Entity> = world
        .query::<(&Position, Option<&Player>)>()
        .iter()
        .filter(|(_, (_, player))| player.is_none())
        .map(|(e, _)| e)
        .collect();
    for entity in to_move {
        if let Ok(taken) = world.take(entity) {
            stash.spawn(taken);
        }
    }
}

fn restore_entities(stash: &mut World, world: &mut World) {
    let ids: Vec<Entity> = stash.iter().map(|e| e.entity()).collect();
    for entity in ids {
        if let Ok(taken) = stash.take(entity) {
            world.spawn(taken);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Name;

    fn manager() -> LevelManager {
        let config = GameConfig {
            victory_level: 4,
            level_cache_size: 3,
            ..GameConfig::default()
        };
        let mut manager = LevelManager::new(&config, 1234);
        manager.initialize_first_level();
        manager
    }

    #[test]
    fn test_cannot_ascend_from_first_level() {
        let mut manager = manager();
        let mut world = World::new();
        let player = world.spawn((Player, Position::new(1, 1)));
        let result = manager.ascend(&mut world, player);
        assert!(!result.success);
        assert_eq!(result.message, "You cannot ascend further.");
    }

    #[test]
    fn test_descend_stashes_and_restores_entities() {
        let mut manager = manager();
        let mut world = World::new();
        let player = world.spawn((Player, Position::new(1, 1)));
        world.spawn((Name("rat".into()), Position::new(3, 3)));

        let down = manager.descend(&mut world, player);
        assert!(down.success);
        assert_eq!(down.new_level, 2);
        assert!(down.new_record_depth);
        assert!(down.newly_generated);
        assert_eq!(world.len(), 1, "only the player travels");

        let up = manager.ascend(&mut world, player);
        assert!(up.success);
        assert!(!up.newly_generated);
        let names: Vec<String> = world.query::<&Name>().iter().map(|(_, n)| n.0.clone()).collect();
        assert_eq!(names, vec!["rat".to_string()]);
    }

    #[test]
    fn test_player_arrives_on_stairs() {
        let mut manager = manager();
        let mut world = World::new();
        let player = world.spawn((Player, Position::new(1, 1)));
        manager.descend(&mut world, player);
        let pos = *world.get::<&Position>(player).unwrap();
        let map = manager.current_map().unwrap();
        assert_eq!(map.tile(pos), Tile::StairsUp);
    }

    #[test]
    fn test_victory_level_has_no_down_stairs() {
        let mut manager = manager();
        let mut world = World::new();
        let player = world.spawn((Player, Position::new(1, 1)));
        for _ in 0..3 {
            let step = manager.descend(&mut world, player);
            assert!(!step.victory_triggered);
        }
        assert_eq!(manager.current_level(), 4);
        assert!(manager.current().unwrap().down_stairs.is_none());
        // Arriving is not enough; leaving the chamber's floor wins the run
        let result = manager.descend(&mut world, player);
        assert!(result.victory_triggered);
        assert_eq!(manager.current_level(), 4);
    }

    #[test]
    fn test_cache_evicts_distant_levels() {
        let config = GameConfig {
            victory_level: 50,
            level_cache_size: 3,
            ..GameConfig::default()
        };
        let mut manager = LevelManager::new(&config, 9);
        manager.initialize_first_level();
        let mut world = World::new();
        let player = world.spawn((Player, Position::new(1, 1)));
        for _ in 0..5 {
            manager.descend(&mut world, player);
        }
        assert_eq!(manager.cached_levels(), 3);
        assert!(manager.is_level_cached(6));
        assert!(!manager.is_level_cached(1));
    }
}
