//! Applying, ticking and removing status effects

use hecs::{Entity, World};

use crate::components::{
    Actor, Combat, EffectCategory, EffectSource, EffectType, Health, Name, Player, StatusEffect,
    StatusEffects,
};
use crate::core::dice::DiceRoller;
use crate::events::GameEvent;
use crate::game::log::LogSeverity;
use crate::systems::{combat, Outcome};

/// Net stat change from all active buffs and debuffs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatModifiers {
    pub attack: i32,
    pub defense: i32,
    pub speed: i32,
}

/// Apply an effect, using the table default for any missing value
///
/// Re-applying an active effect refreshes its duration and keeps the
/// stronger magnitude.
pub fn apply_effect(
    world: &mut World,
    entity: Entity,
    effect: EffectType,
    magnitude: Option<i32>,
    duration: Option<i32>,
    source: EffectSource,
) -> Outcome {
    if !world.contains(entity) {
        return Outcome::fail("Entity no longer exists");
    }
    let def = effect.definition();
    let magnitude = magnitude.unwrap_or(def.default_magnitude);
    let duration = duration.unwrap_or(def.default_duration);
    if duration < 1 {
        return Outcome::fail("Effect duration must be at least 1 turn");
    }

    if world.get::<&StatusEffects>(entity).is_err() {
        let _ = world.insert_one(entity, StatusEffects::default());
    }
    let Ok(mut effects) = world.get::<&mut StatusEffects>(entity) else {
        return Outcome::fail("Entity no longer exists");
    };

    if let Some(existing) = effects.active.iter_mut().find(|e| e.effect == effect) {
        existing.duration = duration;
        existing.magnitude = existing.magnitude.max(magnitude);
        return Outcome::ok(format!("{} duration refreshed!", effect));
    }
    if effects.is_full() {
        return Outcome::fail("Cannot apply effect: maximum effects reached");
    }

    effects.active.push(StatusEffect {
        effect,
        magnitude,
        duration,
        category: def.category,
        source,
    });
    tracing::debug!(?entity, %effect, magnitude, duration, "Status effect applied");
    Outcome::ok(effect.applied_message())
}

pub fn remove_effect(world: &mut World, entity: Entity, effect: EffectType) -> Outcome {
    let Ok(mut effects) = world.get::<&mut StatusEffects>(entity) else {
        return Outcome::fail(format!("Not affected by {}", effect));
    };
    let before = effects.active.len();
    effects.active.retain(|e| e.effect != effect);
    if effects.active.len() == before {
        Outcome::fail(format!("Not affected by {}", effect))
    } else {
        Outcome::ok(format!("{} removed!", effect))
    }
}

pub fn remove_all_negative(world: &mut World, entity: Entity) -> Outcome {
    let Ok(mut effects) = world.get::<&mut StatusEffects>(entity) else {
        return Outcome::fail("No negative effects active");
    };
    let before = effects.active.len();
    effects.active.retain(|e| !e.category.is_negative());
    if effects.active.len() == before {
        Outcome::fail("No negative effects active")
    } else {
        Outcome::ok("All negative effects removed!")
    }
}

pub fn has_effect(world: &World, entity: Entity, effect: EffectType) -> bool {
    world
        .get::<&StatusEffects>(entity)
        .map(|e| e.has(effect))
        .unwrap_or(false)
}

pub fn stat_modifiers(world: &World, entity: Entity) -> StatModifiers {
    let mut mods = StatModifiers::default();
    let Ok(effects) = world.get::<&StatusEffects>(entity) else {
        return mods;
    };
    for e in &effects.active {
        match e.effect {
            EffectType::Strength => mods.attack += e.magnitude,
            EffectType::Weakness => mods.attack -= e.magnitude,
            EffectType::IronSkin => mods.defense += e.magnitude,
            EffectType::Fragile => mods.defense -= e.magnitude,
            EffectType::Haste => mods.speed += e.magnitude,
            EffectType::Slow => mods.speed -= e.magnitude,
            _ => {}
        }
    }
    mods
}

/// Combat stats after status modifiers; attack never drops below 1
pub fn effective_combat(world: &World, entity: Entity) -> Option<Combat> {
    let combat = *world.get::<&Combat>(entity).ok()?;
    let mods = stat_modifiers(world, entity);
    Some(Combat {
        attack: (combat.attack + mods.attack).max(1),
        defense: (combat.defense + mods.defense).max(0),
    })
}

pub fn effective_speed(world: &World, entity: Entity) -> Option<i32> {
    let speed = world.get::<&Actor>(entity).ok()?.speed;
    Some((speed + stat_modifiers(world, entity).speed).max(1))
}

/// Tick every entity's effects once
///
/// Damage and healing over time resolve before durations count down, so
/// a one-turn poison still hurts. Entities killed by an effect go through
/// the normal death handling.
pub fn process_status_effects(world: &mut World, dice: &mut DiceRoller, level: u32) -> Vec<GameEvent> {
    let mut events = Vec::new();
    let mut killed = Vec::new();

    for (entity, (effects, health, name, player)) in world
        .query::<(&mut StatusEffects, &mut Health, Option<&Name>, Option<&Player>)>()
        .iter()
    {
        if !health.is_alive() || effects.active.is_empty() {
            continue;
        }
        let is_player = player.is_some();
        let who = name.map(|n| n.0.as_str()).unwrap_or("Something");

        for effect in effects.active.iter_mut() {
            let label = effect.effect.to_string().to_lowercase();
            match effect.category {
                EffectCategory::DamageOverTime => {
                    let taken = health.damage(effect.magnitude);
                    let text = if is_player {
                        format!("You take {} damage from {}.", taken, label)
                    } else {
                        format!("{} takes {} damage from {}.", who, taken, label)
                    };
                    let severity = if is_player { LogSeverity::Danger } else { LogSeverity::Combat };
                    events.push(GameEvent::message(text, severity));
                }
                EffectCategory::HealingOverTime => {
                    let restored = health.heal(effect.magnitude);
                    if restored > 0 && is_player {
                        events.push(GameEvent::message(
                            format!("You heal {} HP from {}.", restored, label),
                            LogSeverity::Success,
                        ));
                    }
                }
                _ => {}
            }
            effect.duration -= 1;
            if effect.is_expired() && is_player {
                events.push(GameEvent::message(
                    format!("{} has worn off.", effect.effect),
                    LogSeverity::Info,
                ));
            }
        }
        effects.active.retain(|e| !e.is_expired());

        if !health.is_alive() {
            killed.push(entity);
        }
    }

    for entity in killed {
        events.extend(combat::handle_death(world, entity, dice, level));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(world: &mut World) -> Entity {
        world.spawn((Player, Name("Hero".into()), Health::new(50), Combat::new(10, 5), Actor::new(100)))
    }

    #[test]
    fn test_apply_and_refresh() {
        let mut world = World::new();
        let e = target(&mut world);
        let first = apply_effect(&mut world, e, EffectType::Poison, None, None, EffectSource::EnemyAttack);
        assert!(first.success);
        assert_eq!(first.message, "You are poisoned!");

        let again = apply_effect(&mut world, e, EffectType::Poison, Some(6), Some(2), EffectSource::Other);
        assert_eq!(again.message, "Poison duration refreshed!");
        let effects = world.get::<&StatusEffects>(e).unwrap();
        assert_eq!(effects.active.len(), 1);
        assert_eq!(effects.active[0].magnitude, 6);
        assert_eq!(effects.active[0].duration, 2);
    }

    #[test]
    fn test_rejects_zero_duration_and_dead_entity() {
        let mut world = World::new();
        let e = target(&mut world);
        let zero = apply_effect(&mut world, e, EffectType::Haste, None, Some(0), EffectSource::Spell);
        assert!(!zero.success);
        world.despawn(e).unwrap();
        let gone = apply_effect(&mut world, e, EffectType::Haste, None, None, EffectSource::Spell);
        assert_eq!(gone.message, "Entity no longer exists");
    }

    #[test]
    fn test_cap_on_concurrent_effects() {
        let mut world = World::new();
        let e = target(&mut world);
        world
            .insert_one(e, StatusEffects { active: Vec::new(), max_effects: 2 })
            .unwrap();
        apply_effect(&mut world, e, EffectType::Poison, None, None, EffectSource::Other);
        apply_effect(&mut world, e, EffectType::Bleed, None, None, EffectSource::Other);
        let third = apply_effect(&mut world, e, EffectType::Slow, None, None, EffectSource::Other);
        assert!(!third.success);
        // refreshing an existing effect still works when full
        assert!(apply_effect(&mut world, e, EffectType::Bleed, None, None, EffectSource::Other).success);
    }

    #[test]
    fn test_process_damage_and_expiry() {
        let mut world = World::new();
        let e = target(&mut world);
        let mut dice = DiceRoller::seeded(1);
        apply_effect(&mut world, e, EffectType::Poison, Some(3), Some(2), EffectSource::Other);

        let events = process_status_effects(&mut world, &mut dice, 1);
        assert!(events.contains(&GameEvent::message("You take 3 damage from poison.", LogSeverity::Danger)));
        assert_eq!(world.get::<&Health>(e).unwrap().current, 47);

        let events = process_status_effects(&mut world, &mut dice, 1);
        assert!(events.contains(&GameEvent::message("Poison has worn off.", LogSeverity::Info)));
        assert!(!has_effect(&world, e, EffectType::Poison));
    }

    #[test]
    fn test_stat_modifiers_and_floor() {
        let mut world = World::new();
        let e = target(&mut world);
        apply_effect(&mut world, e, EffectType::Strength, Some(4), None, EffectSource::Spell);
        apply_effect(&mut world, e, EffectType::Slow, Some(500), None, EffectSource::Spell);
        let mods = stat_modifiers(&world, e);
        assert_eq!(mods.attack, 4);
        assert_eq!(effective_combat(&world, e).unwrap().attack, 14);
        assert_eq!(effective_speed(&world, e), Some(1));
    }

    #[test]
    fn test_remove_negative_keeps_buffs() {
        let mut world = World::new();
        let e = target(&mut world);
        apply_effect(&mut world, e, EffectType::Poison, None, None, EffectSource::Other);
        apply_effect(&mut world, e, EffectType::IronSkin, None, None, EffectSource::Other);
        assert_eq!(remove_all_negative(&mut world, e).message, "All negative effects removed!");
        assert!(has_effect(&world, e, EffectType::IronSkin));
        assert_eq!(remove_all_negative(&mut world, e).message, "No negative effects active");
        assert_eq!(remove_effect(&mut world, e, EffectType::Poison).message, "Not affected by Poison");
    }
}
