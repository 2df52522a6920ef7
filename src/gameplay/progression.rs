//! Experience and character levels

use hecs::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::components::{BaseStats, EnemyKind, Health};
use crate::events::{GameEvent, PlayerLeveledUp};
use crate::game::log::LogSeverity;
use crate::gameplay::{inventory, spells::Mana};
use crate::systems::difficulty;

pub const BASE_XP: f64 = 100.0;
pub const XP_SCALING: f64 = 1.8;
pub const MAX_LEVEL: u32 = 50;

/// Experience toward the next level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experience {
    /// XP earned since the last level up
    pub current: i64,
    pub level: u32,
    pub to_next_level: i64,
    /// Lifetime XP, never reset
    pub total: i64,
}

impl Experience {
    pub fn new() -> Self {
        Self {
            current: 0,
            level: 1,
            to_next_level: xp_for_level(2),
            total: 0,
        }
    }

    /// Progress to next level in `[0, 1]`
    pub fn progress(&self) -> f32 {
        if self.to_next_level <= 0 {
            0.0
        } else {
            (self.current as f32 / self.to_next_level as f32).min(1.0)
        }
    }
}

impl Default for Experience {
    fn default() -> Self {
        Self::new()
    }
}

/// XP needed to advance into `level`
pub fn xp_for_level(level: u32) -> i64 {
    if level <= 1 {
        return 0;
    }
    if level > MAX_LEVEL {
        return i64::MAX;
    }
    (BASE_XP * (level as f64).powf(XP_SCALING)).floor() as i64
}

/// Stat gains for reaching `level`; bigger every ten levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelUpStats {
    pub health: i32,
    pub attack: i32,
    pub defense: i32,
    pub mana: i32,
    pub speed: i32,
}

pub fn level_up_stats(level: u32) -> LevelUpStats {
    let scaling = 1 + (level / 10) as i32;
    LevelUpStats {
        health: 10 * scaling,
        attack: 2 * scaling,
        defense: scaling,
        mana: 5 * scaling,
        speed: scaling,
    }
}

/// XP for killing an enemy at a given depth
pub fn kill_reward(kind: EnemyKind, dungeon_level: u32) -> i64 {
    difficulty::xp_reward(kind.base_xp(), dungeon_level)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AwardResult {
    pub leveled_up: bool,
    pub new_level: u32,
    pub events: Vec<GameEvent>,
}

#[derive(Debug, Default)]
pub struct ProgressionService;

impl ProgressionService {
    pub fn new() -> Self {
        Self
    }

    /// Grant XP, resolving as many level ups as the amount covers
    pub fn award(&self, world: &mut World, entity: Entity, amount: i64) -> AwardResult {
        let mut result = AwardResult::default();
        if amount <= 0 {
            return result;
        }
        let mut gained = Vec::new();
        {
            let Ok(mut exp) = world.get::<&mut Experience>(entity) else {
                return result;
            };
            if exp.level >= MAX_LEVEL {
                return result;
            }
            exp.current += amount;
            exp.total += amount;
            while exp.current >= exp.to_next_level && exp.level < MAX_LEVEL {
                exp.current -= exp.to_next_level;
                exp.level += 1;
                exp.to_next_level = xp_for_level(exp.level + 1);
                gained.push(exp.level);
            }
            if exp.level >= MAX_LEVEL {
                exp.current = 0;
            }
            result.new_level = exp.level;
        }

        for level in gained {
            result.events.extend(self.apply_level_up(world, entity, level));
        }
        result.leveled_up = !result.events.is_empty();
        result
    }

    /// Advance one level regardless of XP
    pub fn level_up(&self, world: &mut World, entity: Entity) -> Vec<GameEvent> {
        let new_level = {
            let Ok(mut exp) = world.get::<&mut Experience>(entity) else {
                return Vec::new();
            };
            if exp.level >= MAX_LEVEL {
                return Vec::new();
            }
            exp.level += 1;
            exp.current = 0;
            exp.to_next_level = xp_for_level(exp.level + 1);
            exp.level
        };
        self.apply_level_up(world, entity, new_level)
    }

    fn apply_level_up(&self, world: &mut World, entity: Entity, level: u32) -> Vec<GameEvent> {
        let bonus = level_up_stats(level);
        if let Ok(mut hp) = world.get::<&mut Health>(entity) {
            hp.maximum += bonus.health;
            hp.current = hp.maximum;
        }
        if let Ok(mut mana) = world.get::<&mut Mana>(entity) {
            mana.maximum += bonus.mana;
            mana.current = mana.maximum;
        }
        if let Ok(mut base) = world.get::<&mut BaseStats>(entity) {
            base.attack += bonus.attack;
            base.defense += bonus.defense;
            base.speed += bonus.speed;
        }
        inventory::recalculate_stats(world, entity);
        tracing::info!(level, "Level up");

        vec![
            GameEvent::message(
                format!(
                    "You reached level {}! HP +{}, ATK +{}, DEF +{}",
                    level, bonus.health, bonus.attack, bonus.defense
                ),
                LogSeverity::Success,
            ),
            GameEvent::LeveledUp(PlayerLeveledUp { new_level: level }),
        ]
    }

    pub fn level(&self, world: &World, entity: Entity) -> u32 {
        world.get::<&Experience>(entity).map(|e| e.level).unwrap_or(0)
    }

    pub fn meets_level_requirement(&self, world: &World, entity: Entity, required: u32) -> bool {
        self.level(world, entity) >= required
    }

    pub fn progress(&self, world: &World, entity: Entity) -> f32 {
        world.get::<&Experience>(entity).map(|e| e.progress()).unwrap_or(0.0)
    }

    pub fn experience(&self, world: &World, entity: Entity) -> Option<Experience> {
        world.get::<&Experience>(entity).ok().map(|e| *e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Actor, Combat};
    use proptest::prelude::*;

    fn hero(world: &mut World) -> Entity {
        world.spawn((
            Experience::new(),
            Health::new(100),
            Mana::new(50),
            BaseStats::default(),
            Combat::new(10, 5),
            Actor::new(100),
        ))
    }

    #[test]
    fn test_xp_curve() {
        assert_eq!(xp_for_level(1), 0);
        assert_eq!(xp_for_level(2), 348);
        assert_eq!(xp_for_level(51), i64::MAX);
    }

    #[test]
    fn test_award_rejects_non_positive() {
        let mut world = World::new();
        let e = hero(&mut world);
        let svc = ProgressionService::new();
        assert!(!svc.award(&mut world, e, 0).leveled_up);
        assert!(!svc.award(&mut world, e, -5).leveled_up);
        assert_eq!(svc.experience(&world, e).unwrap().total, 0);
    }

    #[test]
    fn test_cascading_level_ups_apply_bonuses() {
        let mut world = World::new();
        let e = hero(&mut world);
        let svc = ProgressionService::new();
        let amount = xp_for_level(2) + xp_for_level(3) + 10;
        let result = svc.award(&mut world, e, amount);
        assert!(result.leveled_up);
        assert_eq!(result.new_level, 3);

        let exp = svc.experience(&world, e).unwrap();
        assert_eq!(exp.current, 10);
        assert_eq!(exp.total, amount);
        assert_eq!(world.get::<&Health>(e).unwrap().maximum, 120);
        assert_eq!(world.get::<&Combat>(e).unwrap().attack, 14);
        assert_eq!(world.get::<&Actor>(e).unwrap().speed, 102);
    }

    #[test]
    fn test_forced_level_up() {
        let mut world = World::new();
        let e = hero(&mut world);
        let svc = ProgressionService::new();
        let events = svc.level_up(&mut world, e);
        assert!(events.contains(&GameEvent::LeveledUp(PlayerLeveledUp { new_level: 2 })));
        assert!(svc.meets_level_requirement(&world, e, 2));
        assert!(!svc.meets_level_requirement(&world, e, 3));
    }

    proptest! {
        #[test]
        fn test_xp_curve_increasing(level in 2u32..50) {
            prop_assert!(xp_for_level(level + 1) > xp_for_level(level));
        }
    }
}
