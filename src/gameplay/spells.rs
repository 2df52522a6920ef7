//! Mana, spell books and spell casting

use std::collections::{BTreeMap, HashMap};

use hecs::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::components::{EffectSource, EffectType, Health, Player, Position};
use crate::core::dice::DiceRoller;
use crate::core::error::{LablabError, Result};
use crate::events::GameEvent;
use crate::game::log::LogSeverity;
use crate::map::dungeon::DungeonMap;
use crate::systems::{combat, movement, status_effects};

const DEFAULT_SPELLS: &str = include_str!("../../data/spells.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mana {
    pub current: i32,
    pub maximum: i32,
    /// Per turn while no enemy is in view
    pub regen_rate: i32,
    pub combat_regen_rate: i32,
}

impl Mana {
    pub fn new(maximum: i32) -> Self {
        Self {
            current: maximum,
            maximum,
            regen_rate: 2,
            combat_regen_rate: 1,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current >= self.maximum
    }

    /// Spend mana; false and unchanged if there is not enough
    pub fn consume(&mut self, amount: i32) -> bool {
        if self.current < amount {
            return false;
        }
        self.current -= amount;
        true
    }

    pub fn restore(&mut self, amount: i32) -> i32 {
        let before = self.current;
        self.current = (self.current + amount.max(0)).min(self.maximum);
        self.current - before
    }

    pub fn regenerate(&mut self, in_combat: bool) -> i32 {
        let rate = if in_combat {
            self.combat_regen_rate
        } else {
            self.regen_rate
        };
        self.restore(rate)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellBook {
    pub known: Vec<String>,
    /// Quick-cast slots
    pub equipped: Vec<String>,
    pub cooldowns: HashMap<String, i32>,
}

impl SpellBook {
    pub const MAX_EQUIPPED: usize = 5;

    pub fn learn(&mut self, spell_id: &str) -> bool {
        if self.knows(spell_id) {
            return false;
        }
        self.known.push(spell_id.to_string());
        if self.equipped.len() < Self::MAX_EQUIPPED {
            self.equipped.push(spell_id.to_string());
        }
        true
    }

    pub fn knows(&self, spell_id: &str) -> bool {
        self.known.iter().any(|s| s == spell_id)
    }

    pub fn equip(&mut self, spell_id: &str) -> bool {
        if !self.knows(spell_id)
            || self.equipped.len() >= Self::MAX_EQUIPPED
            || self.equipped.iter().any(|s| s == spell_id)
        {
            return false;
        }
        self.equipped.push(spell_id.to_string());
        true
    }

    pub fn unequip(&mut self, spell_id: &str) -> bool {
        let before = self.equipped.len();
        self.equipped.retain(|s| s != spell_id);
        self.equipped.len() != before
    }

    pub fn cooldown_remaining(&self, spell_id: &str) -> i32 {
        self.cooldowns.get(spell_id).copied().unwrap_or(0)
    }

    pub fn start_cooldown(&mut self, spell_id: &str, turns: i32) {
        if turns > 0 {
            self.cooldowns.insert(spell_id.to_string(), turns);
        }
    }

    pub fn tick_cooldowns(&mut self) {
        for turns in self.cooldowns.values_mut() {
            *turns -= 1;
        }
        self.cooldowns.retain(|_, t| *t > 0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellKind {
    Offensive,
    Defensive,
    Buff,
    Utility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Targeting {
    Single,
    SelfOnly,
    /// Centred on a chosen tile
    Area,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellEffectKind {
    Damage,
    Heal,
    Shield,
    Buff,
    Debuff,
    StatusEffect,
    Teleport,
    Reveal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellEffect {
    pub kind: SpellEffectKind,
    pub value: i32,
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub status: Option<EffectType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spell {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: SpellKind,
    pub targeting: Targeting,
    pub mana_cost: i32,
    #[serde(default)]
    pub cooldown: i32,
    /// Chebyshev distance; 0 means unlimited
    #[serde(default)]
    pub range: i32,
    #[serde(default)]
    pub area_radius: i32,
    #[serde(default = "default_min_level")]
    pub min_level: u32,
    pub effects: Vec<SpellEffect>,
}

fn default_min_level() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct SpellFile {
    #[serde(default)]
    unlocks: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    spell: Vec<Spell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpellTarget {
    None,
    Entity(Entity),
    Position(Position),
}

/// World state a cast may touch
pub struct CastContext<'a> {
    pub world: &'a mut World,
    pub map: &'a mut DungeonMap,
    pub dice: &'a mut DiceRoller,
    pub dungeon_level: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpellCastResult {
    pub success: bool,
    pub message: String,
    pub damage_dealt: i32,
    pub healing_done: i32,
    pub affected: Vec<Entity>,
    pub events: Vec<GameEvent>,
}

impl SpellCastResult {
    fn fail(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpellService {
    spells: HashMap<String, Spell>,
    unlocks: BTreeMap<u32, Vec<String>>,
}

impl SpellService {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: SpellFile = toml::from_str(source)?;
        let mut unlocks = BTreeMap::new();
        for (level, ids) in file.unlocks {
            let level: u32 = level
                .parse()
                .map_err(|_| LablabError::Config(format!("Invalid unlock level '{}'", level)))?;
            unlocks.insert(level, ids);
        }
        let spells = file.spell.into_iter().map(|s| (s.id.clone(), s)).collect();
        Ok(Self { spells, unlocks })
    }

    /// Built-in spell catalog
    pub fn with_defaults() -> Result<Self> {
        Self::from_toml_str(DEFAULT_SPELLS)
    }

    pub fn spell(&self, id: &str) -> Option<&Spell> {
        self.spells.get(id)
    }

    pub fn all(&self) -> Vec<&Spell> {
        let mut all: Vec<&Spell> = self.spells.values().collect();
        all.sort_by(|a, b| a.min_level.cmp(&b.min_level).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn unlocked_at(&self, level: u32) -> Vec<&Spell> {
        self.unlocks
            .get(&level)
            .map(|ids| ids.iter().filter_map(|id| self.spells.get(id)).collect())
            .unwrap_or_default()
    }

    /// Teach every spell unlocked at or below `level` that is not known yet
    pub fn learn_unlocked(&self, world: &mut World, caster: Entity, level: u32) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let Ok(mut book) = world.get::<&mut SpellBook>(caster) else {
            return events;
        };
        for (_, ids) in self.unlocks.range(..=level) {
            for id in ids {
                let Some(spell) = self.spells.get(id) else {
                    continue;
                };
                if book.learn(id) {
                    events.push(GameEvent::message(
                        format!("You learned {}!", spell.name),
                        LogSeverity::Success,
                    ));
                }
            }
        }
        events
    }

    pub fn can_cast(&self, world: &World, caster: Entity, spell_id: &str) -> bool {
        let Some(spell) = self.spells.get(spell_id) else {
            return false;
        };
        let Ok(book) = world.get::<&SpellBook>(caster) else {
            return false;
        };
        let mana = world.get::<&Mana>(caster).map(|m| m.current).unwrap_or(0);
        book.knows(spell_id) && book.cooldown_remaining(spell_id) == 0 && mana >= spell.mana_cost
    }

    pub fn cast(
        &self,
        ctx: &mut CastContext<'_>,
        caster: Entity,
        spell_id: &str,
        target: SpellTarget,
    ) -> SpellCastResult {
        let Some(spell) = self.spells.get(spell_id) else {
            return SpellCastResult::fail("Spell not found");
        };
        if let Err(reason) = validate(ctx.world, spell, caster, target) {
            return SpellCastResult::fail(reason);
        }
        let consumed = ctx
            .world
            .get::<&mut Mana>(caster)
            .map(|mut m| m.consume(spell.mana_cost))
            .unwrap_or(false);
        if !consumed {
            return SpellCastResult::fail("Insufficient mana");
        }
        if let Ok(mut book) = ctx.world.get::<&mut SpellBook>(caster) {
            book.start_cooldown(&spell.id, spell.cooldown);
        }

        let mut result = SpellCastResult {
            success: true,
            message: format!("You cast {}!", spell.name),
            ..Default::default()
        };

        let targets: Vec<Entity> = match (spell.targeting, target) {
            (Targeting::SelfOnly, _) => vec![caster],
            (Targeting::Single, SpellTarget::Entity(e)) => vec![e],
            (Targeting::Area, SpellTarget::Position(center)) => ctx
                .world
                .query::<(&Position, &Health)>()
                .iter()
                .filter(|(e, (p, h))| *e != caster && h.is_alive() && p.chebyshev(&center) <= spell.area_radius)
                .map(|(e, _)| e)
                .collect(),
            _ => Vec::new(),
        };

        for effect in &spell.effects {
            match effect.kind {
                SpellEffectKind::Teleport => {
                    if let SpellTarget::Position(to) = target {
                        teleport(ctx, caster, to, &mut result);
                    }
                }
                SpellEffectKind::Reveal => {
                    if let Ok(origin) = ctx.world.get::<&Position>(caster).map(|p| *p) {
                        reveal(ctx.map, origin, effect.value);
                        result.events.push(GameEvent::message(
                            "The surrounding dungeon is revealed.",
                            LogSeverity::Info,
                        ));
                    }
                }
                _ => {
                    for &t in &targets {
                        apply_effect(ctx, t, effect, &mut result);
                    }
                }
            }
        }
        result.affected = targets;

        let mut killed = Vec::new();
        for &t in &result.affected {
            if t != caster && ctx.world.get::<&Health>(t).map(|h| !h.is_alive()).unwrap_or(false) {
                killed.push(t);
            }
        }
        for t in killed {
            let events = combat::handle_death(ctx.world, t, ctx.dice, ctx.dungeon_level);
            result.events.extend(events);
        }

        if result.damage_dealt > 0 {
            result.message = format!("{} deals {} damage!", spell.name, result.damage_dealt);
        } else if result.healing_done > 0 {
            result.message = format!("{} restores {} HP.", spell.name, result.healing_done);
        }
        tracing::debug!(spell = %spell.id, damage = result.damage_dealt, "Spell cast");
        result
    }
}

fn validate(world: &World, spell: &Spell, caster: Entity, target: SpellTarget) -> std::result::Result<(), String> {
    let Ok(book) = world.get::<&SpellBook>(caster) else {
        return Err("Caster has no spellbook".into());
    };
    if !book.knows(&spell.id) {
        return Err("Spell not learned".into());
    }
    let remaining = book.cooldown_remaining(&spell.id);
    if remaining > 0 {
        return Err(format!("On cooldown ({} turns)", remaining));
    }
    let mana = world.get::<&Mana>(caster).map(|m| m.current).unwrap_or(0);
    if mana < spell.mana_cost {
        return Err("Insufficient mana".into());
    }

    let target_pos = match (spell.targeting, target) {
        (Targeting::Single, SpellTarget::Entity(e)) => world.get::<&Position>(e).ok().map(|p| *p),
        (Targeting::Single, _) => return Err("No target specified".into()),
        (Targeting::Area, SpellTarget::Position(p)) => Some(p),
        (Targeting::Area, _) => return Err("No target position specified".into()),
        (Targeting::SelfOnly, _) => None,
    };
    if let (Some(to), true) = (target_pos, spell.range > 0) {
        let from = world.get::<&Position>(caster).map(|p| *p);
        match from {
            Ok(from) if from.chebyshev(&to) <= spell.range => {}
            _ => return Err("Target out of range".into()),
        }
    }
    Ok(())
}

fn apply_effect(ctx: &mut CastContext<'_>, target: Entity, effect: &SpellEffect, result: &mut SpellCastResult) {
    let duration = effect.duration.max(1);
    match effect.kind {
        SpellEffectKind::Damage => {
            if let Ok(mut hp) = ctx.world.get::<&mut Health>(target) {
                let dealt = effect.value.min(hp.current).max(0);
                hp.current -= dealt;
                result.damage_dealt += dealt;
            }
        }
        SpellEffectKind::Heal => {
            if let Ok(mut hp) = ctx.world.get::<&mut Health>(target) {
                result.healing_done += hp.heal(effect.value);
            }
        }
        SpellEffectKind::Shield => {
            push_status(ctx, target, EffectType::IronSkin, effect.value, duration, result);
        }
        SpellEffectKind::Buff => {
            push_status(ctx, target, EffectType::Strength, effect.value, duration, result);
        }
        SpellEffectKind::Debuff => {
            push_status(ctx, target, EffectType::Weakness, effect.value, duration, result);
        }
        SpellEffectKind::StatusEffect => {
            if let Some(status) = effect.status {
                push_status(ctx, target, status, effect.value, duration, result);
            }
        }
        SpellEffectKind::Teleport | SpellEffectKind::Reveal => {}
    }
}

fn push_status(
    ctx: &mut CastContext<'_>,
    target: Entity,
    effect: EffectType,
    magnitude: i32,
    duration: i32,
    result: &mut SpellCastResult,
) {
    let outcome = status_effects::apply_effect(
        ctx.world,
        target,
        effect,
        Some(magnitude),
        Some(duration),
        EffectSource::Spell,
    );
    if outcome.success && ctx.world.get::<&Player>(target).is_ok() {
        result.events.push(GameEvent::message(outcome.message, LogSeverity::Info));
    }
}

fn teleport(ctx: &mut CastContext<'_>, caster: Entity, to: Position, result: &mut SpellCastResult) {
    if movement::is_blocked(ctx.world, ctx.map, to) {
        result.events.push(GameEvent::message("The spell fizzles against solid rock.", LogSeverity::Warning));
        return;
    }
    if let Ok(mut pos) = ctx.world.get::<&mut Position>(caster) {
        *pos = to;
        result.message = "You blink across the room.".into();
    }
}

fn reveal(map: &mut DungeonMap, origin: Position, radius: i32) {
    for y in origin.y - radius..=origin.y + radius {
        for x in origin.x - radius..=origin.x + radius {
            map.mark_explored(Position::new(x, y));
        }
    }
}

/// Per-turn mana regeneration and cooldown countdown
pub fn tick_spellcasters(world: &mut World, in_combat: bool) {
    for (_, (mana, book)) in world.query::<(Option<&mut Mana>, Option<&mut SpellBook>)>().iter() {
        if let Some(mana) = mana {
            mana.regenerate(in_combat);
        }
        if let Some(book) = book {
            book.tick_cooldowns();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Combat, Name};
    use crate::map::dungeon::Tile;

    fn arena() -> (World, DungeonMap, Entity, Entity) {
        let mut map = DungeonMap::new(20, 20);
        map.fill(Tile::Floor);
        map.create_perimeter_walls();
        let mut world = World::new();
        let hero = world.spawn((
            Player,
            Position::new(5, 5),
            Health { current: 50, maximum: 100 },
            Combat::new(10, 5),
            Mana::new(50),
            SpellBook::default(),
        ));
        let rat = world.spawn((Name("Rat".into()), Position::new(7, 5), Health::new(40), Combat::new(2, 0)));
        (world, map, hero, rat)
    }

    #[test]
    fn test_default_catalog_loads() {
        let svc = SpellService::with_defaults().unwrap();
        let missile = svc.spell("magic_missile").unwrap();
        assert_eq!(missile.mana_cost, 8);
        assert_eq!(missile.range, 4);
        assert_eq!(svc.unlocked_at(1).len(), 1);
    }

    #[test]
    fn test_cast_validation_messages() {
        let svc = SpellService::with_defaults().unwrap();
        let (mut world, mut map, hero, rat) = arena();
        let mut dice = DiceRoller::seeded(1);
        let mut ctx = CastContext { world: &mut world, map: &mut map, dice: &mut dice, dungeon_level: 1 };

        assert_eq!(svc.cast(&mut ctx, hero, "nope", SpellTarget::None).message, "Spell not found");
        assert_eq!(svc.cast(&mut ctx, hero, "magic_missile", SpellTarget::Entity(rat)).message, "Spell not learned");
        svc.learn_unlocked(ctx.world, hero, 1);
        assert_eq!(svc.cast(&mut ctx, hero, "magic_missile", SpellTarget::None).message, "No target specified");
        ctx.world.get::<&mut Position>(rat).unwrap().x = 15;
        assert_eq!(
            svc.cast(&mut ctx, hero, "magic_missile", SpellTarget::Entity(rat)).message,
            "Target out of range"
        );
        ctx.world.get::<&mut Mana>(hero).unwrap().current = 2;
        assert_eq!(svc.cast(&mut ctx, hero, "magic_missile", SpellTarget::Entity(rat)).message, "Insufficient mana");
    }

    #[test]
    fn test_damage_spell_and_cooldown() {
        let svc = SpellService::with_defaults().unwrap();
        let (mut world, mut map, hero, rat) = arena();
        let mut dice = DiceRoller::seeded(1);
        svc.learn_unlocked(&mut world, hero, 2);
        let mut ctx = CastContext { world: &mut world, map: &mut map, dice: &mut dice, dungeon_level: 1 };

        let result = svc.cast(&mut ctx, hero, "ice_shard", SpellTarget::Entity(rat));
        assert!(result.success);
        assert_eq!(result.damage_dealt, 12);
        assert!(status_effects::has_effect(ctx.world, rat, EffectType::Slow));
        assert_eq!(ctx.world.get::<&Mana>(hero).unwrap().current, 42);

        let again = svc.cast(&mut ctx, hero, "ice_shard", SpellTarget::Entity(rat));
        assert_eq!(again.message, "On cooldown (2 turns)");
    }

    #[test]
    fn test_self_heal_and_area() {
        let svc = SpellService::with_defaults().unwrap();
        let (mut world, mut map, hero, rat) = arena();
        let mut dice = DiceRoller::seeded(1);
        svc.learn_unlocked(&mut world, hero, 3);
        let mut ctx = CastContext { world: &mut world, map: &mut map, dice: &mut dice, dungeon_level: 1 };

        let heal = svc.cast(&mut ctx, hero, "mend", SpellTarget::None);
        assert_eq!(heal.healing_done, 20);

        let fire = svc.cast(&mut ctx, hero, "fireball", SpellTarget::Position(Position::new(8, 5)));
        assert_eq!(fire.affected, vec![rat]);
        assert_eq!(fire.damage_dealt, 25);
    }

    #[test]
    fn test_mana_and_cooldown_tick() {
        let mut world = World::new();
        let mut book = SpellBook::default();
        book.learn("x");
        book.start_cooldown("x", 1);
        let mut mana = Mana::new(10);
        mana.current = 0;
        let e = world.spawn((mana, book));
        tick_spellcasters(&mut world, false);
        assert_eq!(world.get::<&Mana>(e).unwrap().current, 2);
        assert_eq!(world.get::<&SpellBook>(e).unwrap().cooldown_remaining("x"), 0);
    }
}
