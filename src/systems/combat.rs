//! Melee combat resolution and death handling

use hecs::{Entity, World};

use crate::components::{
    Actor, Ai, BlocksMovement, Corpse, Enemy, Health, Name, Player, Position, Renderable,
};
use crate::core::dice::DiceRoller;
use crate::core::types::GlyphColor;
use crate::events::{CombatOccurred, EntityDied, GameEvent};
use crate::game::log::LogSeverity;
use crate::systems::{item_spawn, status_effects};

/// Damage before clamping: `(attack - defense/2) * roll`, truncated
///
/// `roll` is the variance multiplier in `[0.8, 1.2]`.
pub fn calculate_damage(attack: i32, defense: i32, roll: f64) -> i32 {
    let raw = (attack - defense / 2) as f64 * roll;
    (raw as i32).max(0)
}

/// Variance multiplier drawn uniformly from `[0.8, 1.2)`
pub fn damage_roll(dice: &mut DiceRoller) -> f64 {
    0.8 + dice.float() * 0.4
}

fn display_name(world: &World, entity: Entity) -> String {
    if world.get::<&Player>(entity).is_ok() {
        return "You".to_string();
    }
    world
        .get::<&Name>(entity)
        .map(|n| format!("the {}", n.0))
        .unwrap_or_else(|_| "something".to_string())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One melee attack from `attacker` against `defender`
pub fn attack(
    world: &mut World,
    attacker: Entity,
    defender: Entity,
    dice: &mut DiceRoller,
    level: u32,
) -> Vec<GameEvent> {
    let mut events = Vec::new();
    let (Some(atk), Some(def)) = (
        status_effects::effective_combat(world, attacker),
        status_effects::effective_combat(world, defender),
    ) else {
        return events;
    };
    if !world
        .get::<&Health>(defender)
        .map(|h| h.is_alive())
        .unwrap_or(false)
    {
        return events;
    }

    let attacker_name = display_name(world, attacker);
    let defender_name = display_name(world, defender);
    let player_hurt = world.get::<&Player>(defender).is_ok();

    let damage = calculate_damage(atk.attack, def.defense, damage_roll(dice));
    let (dealt, killed) = match world.get::<&mut Health>(defender) {
        Ok(mut hp) => {
            let dealt = hp.damage(damage);
            (dealt, !hp.is_alive())
        }
        Err(_) => return events,
    };

    let target = if player_hurt { "you" } else { defender_name.as_str() };
    let text = match (dealt > 0, attacker_name == "You") {
        (false, true) => format!("You miss {}.", target),
        (false, false) => format!("{} misses {}.", capitalize(&attacker_name), target),
        (true, true) => format!("You hit {} for {} damage.", target, dealt),
        (true, false) => format!("{} hits {} for {} damage.", capitalize(&attacker_name), target, dealt),
    };
    let severity = if player_hurt && dealt > 0 {
        LogSeverity::Danger
    } else {
        LogSeverity::Combat
    };
    events.push(GameEvent::message(text, severity));
    events.push(GameEvent::Combat(CombatOccurred {
        attacker,
        defender,
        attacker_name,
        defender_name,
        damage: dealt,
        killed,
    }));

    if killed {
        events.extend(handle_death(world, defender, dice, level));
    }
    events
}

/// Turn a dead entity into a corpse and roll its loot
///
/// The player keeps its components; the game loop ends the run instead.
pub fn handle_death(world: &mut World, entity: Entity, dice: &mut DiceRoller, level: u32) -> Vec<GameEvent> {
    let mut events = Vec::new();
    let Ok(position) = world.get::<&Position>(entity).map(|p| *p) else {
        return events;
    };
    let name = world
        .get::<&Name>(entity)
        .map(|n| n.0.clone())
        .unwrap_or_else(|_| "Something".to_string());
    let was_player = world.get::<&Player>(entity).is_ok();
    let enemy_kind = world.get::<&Enemy>(entity).ok().map(|e| e.kind);

    if was_player {
        events.push(GameEvent::message("You have been defeated!", LogSeverity::Danger));
    } else {
        let _ = world.remove_one::<Ai>(entity);
        let _ = world.remove_one::<Actor>(entity);
        let _ = world.remove_one::<BlocksMovement>(entity);
        let _ = world.insert(
            entity,
            (Corpse, Renderable::new('%', GlyphColor::Red, Renderable::LAYER_CORPSE)),
        );
        events.push(GameEvent::message(format!("{} has been defeated!", name), LogSeverity::Combat));
        if enemy_kind.is_some() {
            events.extend(item_spawn::drop_enemy_loot(world, position, dice, level));
        }
    }
    tracing::debug!(?entity, %name, was_player, "Entity died");

    events.push(GameEvent::Died(EntityDied {
        entity,
        name,
        position,
        enemy_kind,
        was_player,
    }));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Combat, EnemyKind};
    use proptest::prelude::*;

    #[test]
    fn test_damage_formula() {
        assert_eq!(calculate_damage(10, 5, 1.0), 8);
        assert_eq!(calculate_damage(10, 5, 0.8), 6);
        assert_eq!(calculate_damage(10, 5, 1.2), 9);
        assert_eq!(calculate_damage(2, 10, 1.2), 0);
    }

    #[test]
    fn test_kill_leaves_corpse() {
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(3);
        let hero = world.spawn((Player, Name("Hero".into()), Position::new(1, 1), Health::new(100), Combat::new(100, 5)));
        let goblin = world.spawn((
            Name("Goblin".into()),
            Enemy { kind: EnemyKind::Goblin },
            Position::new(2, 1),
            Health::new(10),
            Combat::new(5, 2),
            Actor::new(100),
            Ai::default(),
            BlocksMovement,
        ));

        let events = attack(&mut world, hero, goblin, &mut dice, 1);
        assert!(events.iter().any(|e| matches!(e, GameEvent::Died(d) if d.enemy_kind == Some(EnemyKind::Goblin))));
        assert!(world.get::<&Corpse>(goblin).is_ok());
        assert!(world.get::<&BlocksMovement>(goblin).is_err());
        assert_eq!(world.get::<&Renderable>(goblin).unwrap().glyph, '%');
    }

    #[test]
    fn test_dead_defender_is_ignored() {
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(3);
        let a = world.spawn((Position::new(0, 0), Health::new(10), Combat::new(10, 0)));
        let b = world.spawn((Position::new(1, 0), Health { current: 0, maximum: 10 }, Combat::new(1, 1)));
        assert!(attack(&mut world, a, b, &mut dice, 1).is_empty());
    }

    proptest! {
        #[test]
        fn test_damage_never_negative(atk in -50i32..200, def in -50i32..200, roll in 0.8f64..1.2) {
            prop_assert!(calculate_damage(atk, def, roll) >= 0);
        }

        #[test]
        fn test_damage_bounded_by_roll(atk in 0i32..200, def in 0i32..200, roll in 0.8f64..1.2) {
            let base = (atk - def / 2).max(0) as f64;
            prop_assert!(calculate_damage(atk, def, roll) as f64 <= base * 1.2);
        }
    }
}
