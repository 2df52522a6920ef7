//! Traps and environmental hazards
//!
//! Hazards are entities with a `Position`, so they travel with their
//! level's stash like everything else on the map. Hidden traps render
//! only once detected or sprung.

use std::collections::{BTreeMap, HashMap};

use hecs::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::components::{Corpse, Health, Name, Player, Position, Renderable};
use crate::core::dice::DiceRoller;
use crate::core::error::{LablabError, Result};
use crate::core::types::GlyphColor;
use crate::events::GameEvent;
use crate::game::log::LogSeverity;
use crate::map::dungeon::DungeonMap;
use crate::systems::{combat, Outcome};

const DEFAULT_HAZARDS: &str = include_str!("../../data/hazards.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HazardType {
    SpikeTrap,
    BearTrap,
    ArrowTrap,
    Lava,
    PoisonGas,
    AcidPool,
    ElectricFloor,
    FallingRocks,
    Pitfall,
    Fire,
}

impl HazardType {
    /// Lingering damage after contact: (turns, damage per turn, label)
    pub fn ongoing_effect(&self) -> Option<(i32, i32, &'static str)> {
        match self {
            HazardType::Fire => Some((5, 2, "Burning")),
            HazardType::Lava => Some((3, 5, "Burning")),
            HazardType::PoisonGas => Some((10, 1, "Poisoned")),
            HazardType::AcidPool => Some((5, 3, "Corroding")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    OnEnter,
    /// Fires when something comes within `proximity_range` (Manhattan)
    Proximity,
    /// Fires every `period` turns on whatever stands on it
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HazardState {
    Active,
    Triggered,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: HazardType,
    pub damage: i32,
    pub activation_chance: f64,
    pub visible: bool,
    #[serde(default)]
    pub detection_difficulty: i32,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub can_retrigger: bool,
    #[serde(default)]
    pub retrigger_delay: i32,
    #[serde(default)]
    pub period: i32,
    #[serde(default)]
    pub proximity_range: i32,
    pub glyph: char,
    #[serde(default)]
    pub color: GlyphColor,
}

#[derive(Debug, Deserialize)]
struct HazardFile {
    hazard: Vec<HazardDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hazard {
    pub id: String,
    pub name: String,
    pub kind: HazardType,
    pub damage: i32,
    pub activation_chance: f64,
    pub visible: bool,
    pub requires_detection: bool,
    pub detection_difficulty: i32,
    pub state: HazardState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HazardTrigger {
    pub kind: TriggerKind,
    pub can_retrigger: bool,
    pub retrigger_delay: i32,
    pub period: i32,
    pub proximity_range: i32,
    /// Negative while cooling down after a trigger
    pub turns_since_trigger: i32,
}

/// Lingering damage on an entity that touched a hazard
#[derive(Debug, Clone, PartialEq)]
pub struct HazardEffect {
    pub source: HazardType,
    pub damage_per_turn: i32,
    pub remaining_turns: i32,
    pub name: String,
}

/// Fractional damage reduction per hazard type, `0.0..=1.0`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HazardResistance {
    pub values: HashMap<HazardType, f32>,
}

impl HazardResistance {
    pub fn get(&self, kind: HazardType) -> f32 {
        self.values.get(&kind).copied().unwrap_or(0.0)
    }
}

fn resisted(world: &World, entity: Entity, kind: HazardType, damage: i32) -> i32 {
    let resistance = world
        .get::<&HazardResistance>(entity)
        .map(|r| r.get(kind))
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);
    (damage as f32 * (1.0 - resistance)) as i32
}

#[derive(Debug, Clone)]
pub struct HazardService {
    definitions: BTreeMap<String, HazardDefinition>,
}

impl HazardService {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: HazardFile = toml::from_str(source)?;
        Ok(Self {
            definitions: file.hazard.into_iter().map(|d| (d.id.clone(), d)).collect(),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::from_toml_str(DEFAULT_HAZARDS)
    }

    pub fn definition(&self, id: &str) -> Option<&HazardDefinition> {
        self.definitions.get(id)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &HazardDefinition> {
        self.definitions.values()
    }

    pub fn create_hazard(&self, world: &mut World, id: &str, at: Position) -> Result<Entity> {
        let def = self
            .definitions
            .get(id)
            .ok_or_else(|| LablabError::InvalidAction(format!("Unknown hazard: {}", id)))?;
        Ok(spawn_from_definition(world, def, at))
    }

    /// Scatter `count` random hazards over walkable tiles of a rectangle
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_hazards_in_area(
        &self,
        world: &mut World,
        map: &DungeonMap,
        dice: &mut DiceRoller,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        count: usize,
    ) -> Vec<Entity> {
        let defs: Vec<&HazardDefinition> = self.definitions.values().collect();
        let mut spawned = Vec::new();
        for _ in 0..count {
            let at = Position::new(dice.range(x, x + width - 1), dice.range(y, y + height - 1));
            if !map.is_walkable(at) || !hazards_at(world, at).is_empty() {
                continue;
            }
            if let Some(def) = dice.choose(&defs) {
                spawned.push(spawn_from_definition(world, def, at));
            }
        }
        tracing::debug!(count = spawned.len(), "Spawned hazards");
        spawned
    }

    /// Check OnEnter and Proximity hazards after `entity` moved to `to`
    pub fn on_entity_moved(
        &self,
        world: &mut World,
        entity: Entity,
        to: Position,
        dice: &mut DiceRoller,
        level: u32,
    ) -> Vec<GameEvent> {
        let candidates: Vec<(Entity, TriggerKind)> = world
            .query::<(&Hazard, &HazardTrigger, &Position)>()
            .iter()
            .filter(|(_, (h, t, p))| {
                h.state == HazardState::Active
                    && t.turns_since_trigger >= 0
                    && match t.kind {
                        TriggerKind::OnEnter => **p == to,
                        TriggerKind::Proximity => p.manhattan(&to) <= t.proximity_range,
                        TriggerKind::Periodic => false,
                    }
            })
            .map(|(e, (_, t, _))| (e, t.kind))
            .collect();

        let mut events = Vec::new();
        for (hazard, kind) in candidates {
            let chance = world.get::<&Hazard>(hazard).map(|h| h.activation_chance).unwrap_or(0.0);
            if kind == TriggerKind::OnEnter && !dice.chance(chance) {
                continue;
            }
            events.extend(trigger_hazard(world, hazard, entity));
        }
        events.extend(settle_deaths(world, dice, level));
        events
    }

    /// Per-turn update: cooldowns, periodic hazards, lingering effects
    pub fn update(&self, world: &mut World, dice: &mut DiceRoller, level: u32) -> Vec<GameEvent> {
        let mut events = Vec::new();

        let mut firing = Vec::new();
        for (entity, (hazard, trigger, pos)) in world.query::<(&Hazard, &mut HazardTrigger, &Position)>().iter() {
            if hazard.state != HazardState::Active {
                continue;
            }
            trigger.turns_since_trigger += 1;
            if trigger.kind == TriggerKind::Periodic && trigger.turns_since_trigger >= trigger.period.max(1) {
                trigger.turns_since_trigger = 0;
                firing.push((entity, *pos));
            }
        }
        for (hazard, at) in firing {
            let victims: Vec<Entity> = world
                .query::<(&Position, &Health)>()
                .iter()
                .filter(|(_, (p, h))| **p == at && h.is_alive())
                .map(|(e, _)| e)
                .collect();
            for victim in victims {
                events.extend(trigger_hazard(world, hazard, victim));
            }
        }

        let mut expired = Vec::new();
        for (entity, (effect, health, player)) in world
            .query::<(&mut HazardEffect, &mut Health, Option<&Player>)>()
            .iter()
        {
            if !health.is_alive() {
                continue;
            }
            let damage = effect.damage_per_turn;
            let taken = health.damage(damage);
            if player.is_some() && taken > 0 {
                events.push(GameEvent::message(
                    format!("You take {} damage from {}.", taken, effect.name.to_lowercase()),
                    LogSeverity::Danger,
                ));
            }
            effect.remaining_turns -= 1;
            if effect.remaining_turns <= 0 {
                expired.push(entity);
            }
        }
        for entity in expired {
            let _ = world.remove_one::<HazardEffect>(entity);
        }

        events.extend(settle_deaths(world, dice, level));
        events
    }

    /// Search for hidden hazards within `range` of `from`
    pub fn detect_hazards(
        &self,
        world: &mut World,
        from: Position,
        range: i32,
        skill: i32,
        dice: &mut DiceRoller,
    ) -> Vec<Entity> {
        let hidden: Vec<(Entity, i32)> = world
            .query::<(&Hazard, &Position)>()
            .iter()
            .filter(|(_, (h, p))| h.requires_detection && !h.visible && p.manhattan(&from) <= range)
            .map(|(e, (h, _))| (e, h.detection_difficulty))
            .collect();

        let mut found = Vec::new();
        for (entity, difficulty) in hidden {
            if dice.d20() + skill >= difficulty {
                reveal_hazard(world, entity);
                found.push(entity);
            }
        }
        found
    }

    /// Attempt to disarm; a natural 1 springs the trap on `actor`
    pub fn disarm(
        &self,
        world: &mut World,
        actor: Entity,
        hazard: Entity,
        skill: i32,
        dice: &mut DiceRoller,
    ) -> (Outcome, Vec<GameEvent>) {
        let Ok((name, state, difficulty)) = world
            .get::<&Hazard>(hazard)
            .map(|h| (h.name.clone(), h.state, h.detection_difficulty))
        else {
            return (Outcome::fail("There is nothing to disarm."), Vec::new());
        };
        if state == HazardState::Disabled {
            return (Outcome::fail(format!("The {} is already disabled.", name)), Vec::new());
        }

        let roll = dice.d20();
        if roll + skill >= difficulty + 5 {
            if let Ok(mut h) = world.get::<&mut Hazard>(hazard) {
                h.state = HazardState::Disabled;
            }
            tracing::info!(hazard = %name, "Hazard disarmed");
            return (Outcome::ok(format!("You disarm the {}.", name)), Vec::new());
        }
        if roll == 1 {
            let events = trigger_hazard(world, hazard, actor);
            return (Outcome::fail(format!("You fumble and trigger the {}!", name)), events);
        }
        (Outcome::fail(format!("You fail to disarm the {}.", name)), Vec::new())
    }

    pub fn add_resistance(&self, world: &mut World, entity: Entity, kind: HazardType, amount: f32) {
        if world.get::<&HazardResistance>(entity).is_err() {
            let _ = world.insert_one(entity, HazardResistance::default());
        }
        if let Ok(mut r) = world.get::<&mut HazardResistance>(entity) {
            r.values.insert(kind, amount.clamp(0.0, 1.0));
        }
    }

    pub fn remove_hazard_effect(&self, world: &mut World, entity: Entity) -> bool {
        world.remove_one::<HazardEffect>(entity).is_ok()
    }
}

/// Non-player entities that hazards left at zero HP become corpses
fn settle_deaths(world: &mut World, dice: &mut DiceRoller, level: u32) -> Vec<GameEvent> {
    let dead: Vec<Entity> = world
        .query::<(&Health, &Position)>()
        .without::<&Player>()
        .without::<&Corpse>()
        .without::<&Hazard>()
        .iter()
        .filter(|(_, (h, _))| !h.is_alive())
        .map(|(e, _)| e)
        .collect();
    let mut events = Vec::new();
    for entity in dead {
        events.extend(combat::handle_death(world, entity, dice, level));
    }
    events
}

fn spawn_from_definition(world: &mut World, def: &HazardDefinition, at: Position) -> Entity {
    let hazard = Hazard {
        id: def.id.clone(),
        name: def.name.clone(),
        kind: def.kind,
        damage: def.damage,
        activation_chance: def.activation_chance,
        visible: def.visible,
        requires_detection: !def.visible,
        detection_difficulty: def.detection_difficulty,
        state: HazardState::Active,
    };
    let trigger = HazardTrigger {
        kind: def.trigger,
        can_retrigger: def.can_retrigger,
        retrigger_delay: def.retrigger_delay,
        period: def.period,
        proximity_range: def.proximity_range,
        turns_since_trigger: 0,
    };
    let entity = world.spawn((hazard, trigger, at, Name(def.name.clone())));
    if def.visible {
        let _ = world.insert_one(entity, Renderable::new(def.glyph, def.color, Renderable::LAYER_ITEM));
    }
    entity
}

fn reveal_hazard(world: &mut World, entity: Entity) {
    let glyph = match world.get::<&mut Hazard>(entity) {
        Ok(mut h) => {
            h.visible = true;
            hazard_glyph(h.kind)
        }
        Err(_) => return,
    };
    if world.get::<&Renderable>(entity).is_err() {
        let _ = world.insert_one(entity, Renderable::new(glyph, GlyphColor::Gray, Renderable::LAYER_ITEM));
    }
}

fn hazard_glyph(kind: HazardType) -> char {
    match kind {
        HazardType::SpikeTrap => '^',
        HazardType::BearTrap => 'v',
        HazardType::ArrowTrap => '>',
        HazardType::FallingRocks => ':',
        HazardType::Pitfall => 'O',
        _ => '^',
    }
}

/// Spring `hazard` on `target`: damage, lingering effect, rearm or spend
fn trigger_hazard(world: &mut World, hazard: Entity, target: Entity) -> Vec<GameEvent> {
    let mut events = Vec::new();
    let Ok((name, kind, damage)) = world.get::<&Hazard>(hazard).map(|h| (h.name.clone(), h.kind, h.damage)) else {
        return events;
    };
    let is_player = world.get::<&Player>(target).is_ok();
    let actual = resisted(world, target, kind, damage);

    let taken = match world.get::<&mut Health>(target) {
        Ok(mut hp) => hp.damage(actual),
        Err(_) => 0,
    };
    if is_player {
        events.push(GameEvent::message(
            format!("You trigger the {}! You take {} damage.", name, taken),
            LogSeverity::Danger,
        ));
    }

    if let Some((turns, per_turn, label)) = kind.ongoing_effect() {
        let _ = world.insert_one(
            target,
            HazardEffect {
                source: kind,
                damage_per_turn: resisted(world, target, kind, per_turn),
                remaining_turns: turns,
                name: label.to_string(),
            },
        );
        if is_player {
            events.push(GameEvent::message(format!("You are {}!", label.to_lowercase()), LogSeverity::Warning));
        }
    }

    let rearm = world.get::<&HazardTrigger>(hazard).map(|t| (t.can_retrigger, t.retrigger_delay));
    match rearm {
        Ok((true, delay)) => {
            if let Ok(mut t) = world.get::<&mut HazardTrigger>(hazard) {
                t.turns_since_trigger = -delay;
            }
            if let Ok(mut h) = world.get::<&mut Hazard>(hazard) {
                h.state = HazardState::Active;
            }
        }
        _ => {
            if let Ok(mut h) = world.get::<&mut Hazard>(hazard) {
                h.state = HazardState::Triggered;
            }
        }
    }
    reveal_hazard(world, hazard);
    tracing::debug!(hazard = %name, damage = taken, "Hazard triggered");
    events
}

pub fn hazards_at(world: &World, at: Position) -> Vec<Entity> {
    world
        .query::<(&Hazard, &Position)>()
        .iter()
        .filter(|(_, (_, p))| **p == at)
        .map(|(e, _)| e)
        .collect()
}

/// Description of a hazard; numbers only once it has been seen
pub fn hazard_info(world: &World, hazard: Entity) -> String {
    let Ok(h) = world.get::<&Hazard>(hazard) else {
        return "Unknown hazard".to_string();
    };
    let mut info = format!("{} ({:?})", h.name, h.state);
    if h.visible {
        info.push_str(&format!("\nDamage: {}", h.damage));
        info.push_str(&format!("\nActivation: {}%", (h.activation_chance * 100.0).round()));
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::dungeon::Tile;

    fn setup() -> (World, Entity, HazardService) {
        let mut world = World::new();
        let hero = world.spawn((Player, Position::new(1, 1), Health::new(100)));
        (world, hero, HazardService::with_defaults().unwrap())
    }

    #[test]
    fn test_catalog() {
        let svc = HazardService::with_defaults().unwrap();
        assert_eq!(svc.definitions().count(), 10);
        let arrow = svc.definition("arrow_trap").unwrap();
        assert_eq!(arrow.trigger, TriggerKind::Proximity);
        assert_eq!(arrow.retrigger_delay, 3);
    }

    #[test]
    fn test_unknown_hazard_errors() {
        let (mut world, _, svc) = setup();
        assert!(svc.create_hazard(&mut world, "quicksand", Position::new(0, 0)).is_err());
    }

    #[test]
    fn test_lava_burns_and_lingers() {
        let (mut world, hero, svc) = setup();
        let mut dice = DiceRoller::seeded(4);
        svc.create_hazard(&mut world, "lava", Position::new(2, 1)).unwrap();
        let events = svc.on_entity_moved(&mut world, hero, Position::new(2, 1), &mut dice, 1);
        assert!(!events.is_empty());
        assert_eq!(world.get::<&Health>(hero).unwrap().current, 80);
        assert_eq!(world.get::<&HazardEffect>(hero).unwrap().remaining_turns, 3);

        for _ in 0..3 {
            svc.update(&mut world, &mut dice, 1);
        }
        assert_eq!(world.get::<&Health>(hero).unwrap().current, 65);
        assert!(world.get::<&HazardEffect>(hero).is_err());
    }

    #[test]
    fn test_resistance_reduces_damage() {
        let (mut world, hero, svc) = setup();
        let mut dice = DiceRoller::seeded(4);
        svc.add_resistance(&mut world, hero, HazardType::Pitfall, 0.5);
        svc.create_hazard(&mut world, "pitfall", Position::new(3, 3)).unwrap();
        svc.on_entity_moved(&mut world, hero, Position::new(3, 3), &mut dice, 1);
        assert_eq!(world.get::<&Health>(hero).unwrap().current, 90);
    }

    #[test]
    fn test_arrow_trap_cooldown() {
        let (mut world, hero, svc) = setup();
        let mut dice = DiceRoller::seeded(4);
        let trap = svc.create_hazard(&mut world, "arrow_trap", Position::new(5, 5)).unwrap();
        svc.on_entity_moved(&mut world, hero, Position::new(5, 6), &mut dice, 1);
        assert_eq!(world.get::<&HazardTrigger>(trap).unwrap().turns_since_trigger, -3);
        assert!(world.get::<&Hazard>(trap).unwrap().visible);

        svc.on_entity_moved(&mut world, hero, Position::new(5, 4), &mut dice, 1);
        assert_eq!(world.get::<&Health>(hero).unwrap().current, 88);
    }

    #[test]
    fn test_periodic_gas() {
        let (mut world, hero, svc) = setup();
        let mut dice = DiceRoller::seeded(4);
        svc.create_hazard(&mut world, "poison_gas", Position::new(1, 1)).unwrap();
        svc.update(&mut world, &mut dice, 1);
        assert_eq!(world.get::<&Health>(hero).unwrap().current, 100);
        svc.update(&mut world, &mut dice, 1);
        // 5 from the gas, then 1 from lingering poison
        assert_eq!(world.get::<&Health>(hero).unwrap().current, 94);
    }

    #[test]
    fn test_spawn_in_area_and_info() {
        let (mut world, _, svc) = setup();
        let mut map = DungeonMap::new(10, 10);
        map.fill(Tile::Floor);
        let mut dice = DiceRoller::seeded(8);
        let spawned = svc.spawn_hazards_in_area(&mut world, &map, &mut dice, 0, 0, 10, 10, 5);
        assert!(!spawned.is_empty());
        for h in &spawned {
            let pos = *world.get::<&Position>(*h).unwrap();
            assert!(hazards_at(&world, pos).contains(h));
            assert!(hazard_info(&world, *h).contains('('));
        }
    }
}
