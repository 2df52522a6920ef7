//! Boss encounters: phases, abilities, enrage and loot
//!
//! A boss is an ordinary hostile actor that also carries a [`Boss`]
//! component. Melee still goes through the regular AI; [`BossService::update`]
//! layers phase changes and ability use on top once per turn.

use std::collections::{BTreeMap, HashMap};

use hecs::{Entity, World};
use serde::{Deserialize, Serialize};

use crate::components::{
    Actor, Ai, AiBehavior, BlocksMovement, Combat, Corpse, EffectSource, EffectType, Health, Item, ItemKind, Name,
    Player, Position, Renderable,
};
use crate::core::dice::DiceRoller;
use crate::core::error::{LablabError, Result};
use crate::core::types::GlyphColor;
use crate::events::{CombatOccurred, GameEvent};
use crate::game::log::LogSeverity;
use crate::map::dungeon::DungeonMap;
use crate::systems::{combat, item_spawn, movement, status_effects};

const DEFAULT_BOSSES: &str = include_str!("../../data/bosses.toml");

pub const ENRAGE_THRESHOLD: f32 = 0.2;
pub const ENRAGE_AFTER_SECONDS: f32 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BossKind {
    Mini,
    Standard,
    Epic,
    Raid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbilityType {
    Summon,
    AoE,
    SingleTarget,
    Buff,
    Debuff,
    Heal,
    Teleport,
    Shield,
    Transform,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BossPhase {
    pub number: u32,
    /// Entered once health drops to this fraction of max
    pub health_threshold: f32,
    pub abilities: Vec<String>,
    #[serde(default = "one")]
    pub damage_modifier: f32,
    #[serde(default = "one")]
    pub defense_modifier: f32,
    pub text: String,
    #[serde(default)]
    pub heal_on_transition: bool,
    #[serde(default)]
    pub heal_amount: i32,
}

fn one() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummonSpec {
    pub name: String,
    pub glyph: char,
    pub count: u32,
    pub hp: i32,
    pub attack: i32,
    pub defense: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BossAbility {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: AbilityType,
    pub cooldown: f32,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub range: f32,
    #[serde(default)]
    pub effects: Vec<EffectType>,
    #[serde(default)]
    pub duration: Option<i32>,
    #[serde(default)]
    pub heal_amount: i32,
    #[serde(default)]
    pub heal_percent: f32,
    #[serde(default)]
    pub summon: Option<SummonSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LootEntry {
    pub item: String,
    #[serde(default)]
    pub rarity: String,
    #[serde(default = "one")]
    pub chance: f32,
    #[serde(default = "one_unit")]
    pub min: i32,
    #[serde(default = "one_unit")]
    pub max: i32,
}

fn one_unit() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BossLoot {
    #[serde(default)]
    pub guaranteed: Vec<LootEntry>,
    #[serde(default)]
    pub random: Vec<LootEntry>,
    pub min_gold: i32,
    pub max_gold: i32,
    pub experience: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BossDefinition {
    pub id: String,
    pub name: String,
    pub kind: BossKind,
    pub base_hp: i32,
    pub base_damage: i32,
    pub glyph: char,
    #[serde(default)]
    pub color: GlyphColor,
    pub phases: Vec<BossPhase>,
    pub abilities: Vec<BossAbility>,
    #[serde(default)]
    pub loot: BossLoot,
}

#[derive(Debug, Deserialize)]
struct BossFile {
    boss: Vec<BossDefinition>,
}

/// Per-fight state carried by the boss entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boss {
    pub id: String,
    pub name: String,
    pub kind: BossKind,
    pub current_phase: u32,
    pub is_enraged: bool,
    /// Seconds since the fight started
    pub enrage_timer: f32,
    pub player_level: u32,
    pub scaling: f32,
    /// Seconds left per ability id
    pub cooldowns: HashMap<String, f32>,
}

/// A creature called in by a boss ability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Minion {
    pub summoner: Entity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTransition {
    pub phase: u32,
    pub text: String,
    pub healed: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LootDrop {
    pub gold: i32,
    pub experience: i64,
    /// (item name, rarity, quantity)
    pub items: Vec<(String, String, i32)>,
}

/// `1 + (level - 1) * 0.1`
pub fn scaling_multiplier(player_level: u32) -> f32 {
    1.0 + player_level.saturating_sub(1) as f32 * 0.1
}

/// Ability ordering: higher goes first
pub fn ability_priority(ability: &BossAbility, health_percent: f32, enraged: bool) -> u32 {
    match ability.kind {
        AbilityType::Heal if health_percent < 0.3 => 100,
        AbilityType::AoE if enraged => 90,
        AbilityType::Summon if health_percent < 0.5 => 80,
        AbilityType::Buff if !enraged => 70,
        AbilityType::SingleTarget => 50,
        _ => 40,
    }
}

pub struct BossService {
    definitions: BTreeMap<String, BossDefinition>,
}

impl BossService {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let file: BossFile = toml::from_str(src)?;
        let mut definitions = BTreeMap::new();
        for def in file.boss {
            if !def.phases.iter().any(|p| p.number == 1) {
                return Err(LablabError::Config(format!("Boss {} has no phase 1", def.id)));
            }
            definitions.insert(def.id.clone(), def);
        }
        Ok(Self { definitions })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::from_toml_str(DEFAULT_BOSSES)
    }

    pub fn definition(&self, id: &str) -> Option<&BossDefinition> {
        self.definitions.get(id)
    }

    pub fn boss_ids(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn create_boss(&self, id: &str, player_level: u32) -> Result<Boss> {
        let def = self.definitions.get(id).ok_or_else(|| {
            tracing::error!(boss = id, "boss not found in database");
            LablabError::InvalidAction(format!("Boss {} not found", id))
        })?;
        let scaling = scaling_multiplier(player_level);
        tracing::info!(boss = %def.name, player_level, scaling, "created boss");
        Ok(Boss {
            id: def.id.clone(),
            name: def.name.clone(),
            kind: def.kind,
            current_phase: 1,
            is_enraged: false,
            enrage_timer: 0.0,
            player_level,
            scaling,
            cooldowns: HashMap::new(),
        })
    }

    /// Put a level-scaled boss on the map
    pub fn spawn_boss(&self, world: &mut World, id: &str, player_level: u32, at: Position) -> Result<Entity> {
        let boss = self.create_boss(id, player_level)?;
        let def = &self.definitions[id];
        let hp = (def.base_hp as f32 * boss.scaling) as i32;
        let attack = (def.base_damage as f32 * boss.scaling) as i32;
        let defense = (5.0 * self.phase(&boss).map(|p| p.defense_modifier).unwrap_or(1.0)) as i32;
        let name = boss.name.clone();
        let entity = world.spawn((
            boss,
            Name(name),
            at,
            Health::new(hp),
            Combat::new(attack, defense),
            Actor::new(100),
            Ai::new(AiBehavior::Idle),
            BlocksMovement,
            Renderable::new(def.glyph, def.color, Renderable::LAYER_ACTOR),
        ));
        Ok(entity)
    }

    pub fn abilities(&self, id: &str) -> &[BossAbility] {
        self.definitions.get(id).map(|d| d.abilities.as_slice()).unwrap_or(&[])
    }

    pub fn phase(&self, boss: &Boss) -> Option<&BossPhase> {
        self.definitions
            .get(&boss.id)?
            .phases
            .iter()
            .find(|p| p.number == boss.current_phase)
    }

    pub fn can_use_ability(&self, boss: &Boss, ability: &str) -> bool {
        boss.cooldowns.get(ability).map(|c| *c <= 0.0).unwrap_or(true)
    }

    /// Highest-priority ability that the current phase enables and that
    /// is off cooldown; ties go to the first listed
    pub fn select_next_ability(&self, boss: &Boss, health_percent: f32) -> Option<&BossAbility> {
        let phase = self.phase(boss)?;
        self.abilities(&boss.id)
            .iter()
            .filter(|a| phase.abilities.contains(&a.id))
            .filter(|a| self.can_use_ability(boss, &a.id))
            .min_by_key(|a| std::cmp::Reverse(ability_priority(a, health_percent, boss.is_enraged)))
    }

    pub fn update_cooldowns(&self, boss: &mut Boss, dt: f32) {
        for cd in boss.cooldowns.values_mut() {
            *cd = (*cd - dt).max(0.0);
        }
        boss.enrage_timer += dt;
    }

    /// Returns true on the update the boss becomes enraged
    pub fn check_enrage(&self, boss: &mut Boss, health_percent: f32) -> bool {
        if boss.is_enraged {
            return false;
        }
        if health_percent <= ENRAGE_THRESHOLD && boss.enrage_timer >= ENRAGE_AFTER_SECONDS {
            boss.is_enraged = true;
            tracing::warn!(boss = %boss.name, "boss is enraged");
            return true;
        }
        false
    }

    /// Deepest phase whose threshold the boss has crossed, if past the current one
    pub fn due_phase(&self, boss: &Boss, health_percent: f32) -> Option<u32> {
        self.definitions
            .get(&boss.id)?
            .phases
            .iter()
            .filter(|p| p.number > boss.current_phase && health_percent <= p.health_threshold)
            .map(|p| p.number)
            .max()
    }

    pub fn trigger_phase_transition(&self, boss: &mut Boss, phase: u32) -> Option<PhaseTransition> {
        let Some(def) = self.definitions.get(&boss.id).and_then(|d| d.phases.iter().find(|p| p.number == phase)) else {
            tracing::warn!(phase, boss = %boss.name, "phase not found for boss");
            return None;
        };
        boss.current_phase = phase;
        tracing::info!(boss = %boss.name, phase, "boss enters new phase");
        Some(PhaseTransition {
            phase,
            text: def.text.clone(),
            healed: if def.heal_on_transition { def.heal_amount } else { 0 },
        })
    }

    pub fn loot(&self, id: &str) -> Option<&BossLoot> {
        self.definitions.get(id).map(|d| &d.loot)
    }

    pub fn roll_loot(&self, id: &str, dice: &mut DiceRoller) -> LootDrop {
        let Some(loot) = self.loot(id) else {
            return LootDrop::default();
        };
        let mut items = Vec::new();
        for entry in &loot.guaranteed {
            items.push((entry.item.clone(), entry.rarity.clone(), dice.range(entry.min, entry.max)));
        }
        for entry in &loot.random {
            if dice.chance(entry.chance as f64) {
                items.push((entry.item.clone(), entry.rarity.clone(), dice.range(entry.min, entry.max)));
            }
        }
        LootDrop {
            gold: dice.range(loot.min_gold, loot.max_gold),
            experience: loot.experience,
            items,
        }
    }

    /// Spill a defeated boss's items on the floor
    ///
    /// Trophies outside the item catalog become plain miscellaneous items.
    pub fn drop_loot(&self, world: &mut World, at: Position, drop: &LootDrop) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for (name, rarity, quantity) in &drop.items {
            for _ in 0..(*quantity).max(1) {
                if item_spawn::spawn_by_name(world, name, Some(at)).is_none() {
                    let item = Item::new(name.clone(), '*', ItemKind::Miscellaneous)
                        .with_description(format!("{} trophy", rarity));
                    world.spawn((item, at, Renderable::new('*', GlyphColor::Magenta, Renderable::LAYER_ITEM)));
                }
            }
            let label = if *quantity > 1 { format!("{} x{}", name, quantity) } else { name.clone() };
            events.push(GameEvent::message(format!("{} ({}) drops to the floor.", label, rarity), LogSeverity::Loot));
        }
        events
    }

    /// Roll and place loot for a dead boss; the caller awards gold and XP
    ///
    /// Strips the `Boss` component so the same kill is never paid twice.
    pub fn defeat(&self, world: &mut World, boss: Entity, dice: &mut DiceRoller) -> Option<(LootDrop, Vec<GameEvent>)> {
        let id = world.get::<&Boss>(boss).ok()?.id.clone();
        let at = world.get::<&Position>(boss).map(|p| *p).ok()?;
        let _ = world.remove_one::<Boss>(boss);
        let drop = self.roll_loot(&id, dice);
        let mut events = self.drop_loot(world, at, &drop);
        events.push(GameEvent::message(
            format!("Victory! +{} XP +{} gold", drop.experience, drop.gold),
            LogSeverity::Success,
        ));
        Some((drop, events))
    }

    /// One turn of boss behavior for every living boss
    pub fn update(&self, world: &mut World, map: &DungeonMap, dice: &mut DiceRoller, dt: f32, level: u32) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let bosses: Vec<Entity> = world
            .query::<(&Boss, &Health)>()
            .without::<&Corpse>()
            .iter()
            .filter(|(_, (_, hp))| hp.is_alive())
            .map(|(e, _)| e)
            .collect();
        let target = world.query::<&Player>().iter().map(|(e, _)| e).next();

        for entity in bosses {
            let health_percent = world.get::<&Health>(entity).map(|h| h.percentage()).unwrap_or(0.0);
            let mut heal = 0;
            let (ability, name) = {
                let Ok(mut boss) = world.get::<&mut Boss>(entity) else {
                    continue;
                };
                self.update_cooldowns(&mut boss, dt);
                if let Some(next) = self.due_phase(&boss, health_percent) {
                    if let Some(t) = self.trigger_phase_transition(&mut boss, next) {
                        events.push(GameEvent::message(t.text, LogSeverity::Warning));
                        heal = t.healed;
                    }
                }
                if self.check_enrage(&mut boss, health_percent) {
                    events.push(GameEvent::message(format!("{} is ENRAGED!", boss.name), LogSeverity::Danger));
                }
                (self.select_next_ability(&boss, health_percent).cloned(), boss.name.clone())
            };
            if heal > 0 {
                if let Ok(mut hp) = world.get::<&mut Health>(entity) {
                    let healed = hp.heal(heal);
                    events.push(GameEvent::message(format!("{} recovers {} HP!", name, healed), LogSeverity::Warning));
                }
            }
            let Some(ability) = ability else {
                continue;
            };
            events.extend(self.execute_ability(world, map, entity, target, &ability, dice, level));
        }
        events
    }

    /// Carry out one ability; does nothing (and keeps it off cooldown)
    /// when an attack has no target in range
    #[allow(clippy::too_many_arguments)]
    pub fn execute_ability(
        &self,
        world: &mut World,
        map: &DungeonMap,
        boss: Entity,
        target: Option<Entity>,
        ability: &BossAbility,
        dice: &mut DiceRoller,
        level: u32,
    ) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let Ok(origin) = world.get::<&Position>(boss).map(|p| *p) else {
            return events;
        };
        let (name, damage) = {
            let Ok(state) = world.get::<&Boss>(boss) else {
                return events;
            };
            let modifier = self.phase(&state).map(|p| p.damage_modifier).unwrap_or(1.0);
            (state.name.clone(), (ability.damage as f32 * state.scaling * modifier) as i32)
        };
        let in_range = |world: &World, e: Entity| {
            world
                .get::<&Position>(e)
                .map(|p| p.chebyshev(&origin) as f32 <= ability.range)
                .unwrap_or(false)
        };

        let hits: Vec<Entity> = match ability.kind {
            AbilityType::SingleTarget | AbilityType::Debuff | AbilityType::Teleport => {
                match target.filter(|t| in_range(world, *t)) {
                    Some(t) => vec![t],
                    None => return events,
                }
            }
            AbilityType::AoE => {
                let hits: Vec<Entity> = world
                    .query::<(&Player, &Position)>()
                    .iter()
                    .filter(|(_, (_, p))| p.chebyshev(&origin) as f32 <= ability.range)
                    .map(|(e, _)| e)
                    .collect();
                if hits.is_empty() {
                    return events;
                }
                hits
            }
            _ => Vec::new(),
        };

        if let Ok(mut state) = world.get::<&mut Boss>(boss) {
            state.cooldowns.insert(ability.id.clone(), ability.cooldown);
        }
        events.push(GameEvent::message(format!("{} uses {}!", name, ability.name), LogSeverity::Warning));
        tracing::info!(boss = %name, ability = %ability.name, "boss uses ability");

        match ability.kind {
            AbilityType::Teleport => {
                if let Some(t) = hits.first() {
                    if let Some(spot) = self.free_tile_near(world, map, *t) {
                        if let Ok(mut p) = world.get::<&mut Position>(boss) {
                            *p = spot;
                        }
                    }
                }
            }
            AbilityType::Heal => {
                if let Ok(mut hp) = world.get::<&mut Health>(boss) {
                    let amount = ability.heal_amount + (hp.maximum as f32 * ability.heal_percent) as i32;
                    let healed = hp.heal(amount);
                    events.push(GameEvent::message(format!("{} recovers {} HP!", name, healed), LogSeverity::Warning));
                }
            }
            AbilityType::Buff | AbilityType::Shield | AbilityType::Transform => {
                let mut allies = vec![boss];
                if ability.range > 0.0 {
                    allies.extend(
                        world
                            .query::<(&Minion, &Position)>()
                            .iter()
                            .filter(|(_, (m, p))| m.summoner == boss && p.chebyshev(&origin) as f32 <= ability.range)
                            .map(|(e, _)| e),
                    );
                }
                for ally in allies {
                    for effect in &ability.effects {
                        status_effects::apply_effect(world, ally, *effect, None, ability.duration, EffectSource::EnemySpell);
                    }
                }
            }
            AbilityType::Summon => {
                if let Some(spec) = &ability.summon {
                    let called = self.summon(world, map, boss, origin, spec);
                    events.push(GameEvent::message(
                        format!("{} {} answer the call!", called, spec.name),
                        LogSeverity::Danger,
                    ));
                }
            }
            _ => {}
        }

        for hit in hits {
            events.extend(self.strike(world, boss, &name, hit, ability, damage, dice, level));
        }
        events
    }

    #[allow(clippy::too_many_arguments)]
    fn strike(
        &self,
        world: &mut World,
        boss: Entity,
        boss_name: &str,
        target: Entity,
        ability: &BossAbility,
        damage: i32,
        dice: &mut DiceRoller,
        level: u32,
    ) -> Vec<GameEvent> {
        let mut events = Vec::new();
        let (dealt, killed) = match world.get::<&mut Health>(target) {
            Ok(mut hp) if hp.is_alive() => {
                let dealt = hp.damage(damage);
                (dealt, !hp.is_alive())
            }
            _ => return events,
        };
        let defender_name = world.get::<&Name>(target).map(|n| n.0.clone()).unwrap_or_else(|_| "you".into());
        if dealt > 0 {
            events.push(GameEvent::message(
                format!("{} hits you for {} damage.", ability.name, dealt),
                LogSeverity::Danger,
            ));
        }
        events.push(GameEvent::Combat(CombatOccurred {
            attacker: boss,
            defender: target,
            attacker_name: boss_name.to_string(),
            defender_name,
            damage: dealt,
            killed,
        }));
        for effect in &ability.effects {
            let out = status_effects::apply_effect(world, target, *effect, None, ability.duration, EffectSource::EnemySpell);
            if out.success {
                events.push(GameEvent::message(out.message, LogSeverity::Warning));
            }
        }
        if killed {
            events.extend(combat::handle_death(world, target, dice, level));
        }
        events
    }

    fn free_tile_near(&self, world: &World, map: &DungeonMap, target: Entity) -> Option<Position> {
        let at = world.get::<&Position>(target).map(|p| *p).ok()?;
        at.neighbors().find(|p| !movement::is_blocked(world, map, *p))
    }

    fn summon(&self, world: &mut World, map: &DungeonMap, boss: Entity, origin: Position, spec: &SummonSpec) -> u32 {
        let mut called = 0;
        for _ in 0..spec.count {
            let Some(spot) = origin.neighbors().find(|p| !movement::is_blocked(world, map, *p)) else {
                break;
            };
            world.spawn((
                Minion { summoner: boss },
                Name(spec.name.clone()),
                spot,
                Health::new(spec.hp),
                Combat::new(spec.attack, spec.defense),
                Actor::new(100),
                Ai::new(AiBehavior::Chase),
                BlocksMovement,
                Renderable::new(spec.glyph, GlyphColor::LightRed, Renderable::LAYER_ACTOR),
            ));
            called += 1;
        }
        called
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::dungeon::Tile;

    fn open_map() -> DungeonMap {
        let mut map = DungeonMap::new(20, 20);
        map.fill(Tile::Floor);
        map.create_perimeter_walls();
        map
    }

    fn ability(kind: AbilityType) -> BossAbility {
        BossAbility {
            id: "x".into(),
            name: "X".into(),
            description: String::new(),
            kind,
            cooldown: 1.0,
            damage: 0,
            range: 0.0,
            effects: Vec::new(),
            duration: None,
            heal_amount: 0,
            heal_percent: 0.0,
            summon: None,
        }
    }

    #[test]
    fn test_default_roster() {
        let svc = BossService::with_defaults().unwrap();
        assert_eq!(svc.boss_ids().count(), 5);
        let dragon = svc.definition("ancient_dragon").unwrap();
        assert_eq!(dragon.kind, BossKind::Epic);
        assert_eq!(dragon.base_hp, 3000);
        assert_eq!(dragon.phases.len(), 4);
        assert_eq!(svc.definition("goblin_king").unwrap().kind, BossKind::Mini);
        assert!(svc.create_boss("lich", 1).is_err());
    }

    #[test]
    fn test_priority_table() {
        assert_eq!(ability_priority(&ability(AbilityType::Heal), 0.2, false), 100);
        assert_eq!(ability_priority(&ability(AbilityType::Heal), 0.5, false), 40);
        assert_eq!(ability_priority(&ability(AbilityType::AoE), 0.9, true), 90);
        assert_eq!(ability_priority(&ability(AbilityType::Summon), 0.4, false), 80);
        assert_eq!(ability_priority(&ability(AbilityType::Buff), 0.9, false), 70);
        assert_eq!(ability_priority(&ability(AbilityType::Buff), 0.9, true), 40);
        assert_eq!(ability_priority(&ability(AbilityType::SingleTarget), 0.9, false), 50);
    }

    #[test]
    fn test_selection_respects_phase_and_cooldown() {
        let svc = BossService::with_defaults().unwrap();
        let mut king = svc.create_boss("goblin_king", 1).unwrap();
        // phase 1 has war_cry (Buff 70) and cleave (AoE 40)
        assert_eq!(svc.select_next_ability(&king, 0.9).unwrap().id, "war_cry");
        king.cooldowns.insert("war_cry".into(), 5.0);
        assert_eq!(svc.select_next_ability(&king, 0.9).unwrap().id, "cleave");

        svc.update_cooldowns(&mut king, 5.0);
        assert!(svc.can_use_ability(&king, "war_cry"));

        let next = svc.due_phase(&king, 0.45).unwrap();
        svc.trigger_phase_transition(&mut king, next).unwrap();
        assert_eq!(svc.select_next_ability(&king, 0.45).unwrap().id, "goblin_rally");
    }

    #[test]
    fn test_enrage_needs_time_and_low_health() {
        let svc = BossService::with_defaults().unwrap();
        let mut boss = svc.create_boss("flame_warden", 1).unwrap();
        assert!(!svc.check_enrage(&mut boss, 0.1));
        svc.update_cooldowns(&mut boss, 60.0);
        assert!(!svc.check_enrage(&mut boss, 0.5));
        assert!(svc.check_enrage(&mut boss, 0.2));
        assert!(!svc.check_enrage(&mut boss, 0.1));
        assert!(boss.is_enraged);
    }

    #[test]
    fn test_phase_skip_and_heal() {
        let svc = BossService::with_defaults().unwrap();
        let mut treant = svc.create_boss("corrupted_treant", 1).unwrap();
        assert_eq!(svc.due_phase(&treant, 0.9), None);
        assert_eq!(svc.due_phase(&treant, 0.3), Some(3));
        let t = svc.trigger_phase_transition(&mut treant, 3).unwrap();
        assert_eq!(t.healed, 100);
        assert_eq!(treant.current_phase, 3);
        assert!(svc.trigger_phase_transition(&mut treant, 9).is_none());
    }

    #[test]
    fn test_scaling_and_spawn() {
        assert_eq!(scaling_multiplier(1), 1.0);
        assert!((scaling_multiplier(6) - 1.5).abs() < 1e-6);

        let svc = BossService::with_defaults().unwrap();
        let mut world = World::new();
        let e = svc.spawn_boss(&mut world, "goblin_king", 3, Position::new(5, 5)).unwrap();
        assert_eq!(world.get::<&Health>(e).unwrap().maximum, 600);
        assert_eq!(world.get::<&Renderable>(e).unwrap().glyph, 'G');
    }

    #[test]
    fn test_cleave_hits_player_in_range() {
        let svc = BossService::with_defaults().unwrap();
        let map = open_map();
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(1);
        let player = world.spawn((Player, Position::new(7, 5), Health::new(100)));
        let king = svc.spawn_boss(&mut world, "goblin_king", 1, Position::new(5, 5)).unwrap();
        world.get::<&mut Boss>(king).unwrap().cooldowns.insert("war_cry".into(), 20.0);

        let events = svc.update(&mut world, &map, &mut dice, 1.0, 1);
        assert!(events.iter().any(|e| matches!(e, GameEvent::Combat(c) if c.damage == 30)));
        assert_eq!(world.get::<&Health>(player).unwrap().current, 70);
        assert!(!svc.can_use_ability(&world.get::<&Boss>(king).unwrap(), "cleave"));
    }

    #[test]
    fn test_out_of_range_attack_waits() {
        let svc = BossService::with_defaults().unwrap();
        let map = open_map();
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(1);
        let player = world.spawn((Player, Position::new(15, 15), Health::new(100)));
        let king = svc.spawn_boss(&mut world, "goblin_king", 1, Position::new(2, 2)).unwrap();
        world.get::<&mut Boss>(king).unwrap().cooldowns.insert("war_cry".into(), 20.0);

        svc.update(&mut world, &map, &mut dice, 1.0, 1);
        assert_eq!(world.get::<&Health>(player).unwrap().current, 100);
        assert!(svc.can_use_ability(&world.get::<&Boss>(king).unwrap(), "cleave"));
    }

    #[test]
    fn test_teleport_lands_next_to_target() {
        let svc = BossService::with_defaults().unwrap();
        let map = open_map();
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(2);
        let player = world.spawn((Player, Position::new(12, 12), Health::new(100)));
        let king = svc.spawn_boss(&mut world, "goblin_king", 1, Position::new(3, 3)).unwrap();
        let blink = BossAbility {
            range: 20.0,
            ..ability(AbilityType::Teleport)
        };

        svc.execute_ability(&mut world, &map, king, Some(player), &blink, &mut dice, 1);
        let at = *world.get::<&Position>(king).unwrap();
        assert_eq!(at.chebyshev(&Position::new(12, 12)), 1);
    }

    #[test]
    fn test_summon_and_loot() {
        let svc = BossService::with_defaults().unwrap();
        let map = open_map();
        let mut world = World::new();
        let mut dice = DiceRoller::seeded(9);
        let king = svc.spawn_boss(&mut world, "goblin_king", 1, Position::new(5, 5)).unwrap();
        let rally = svc.abilities("goblin_king").iter().find(|a| a.id == "goblin_rally").unwrap().clone();
        svc.execute_ability(&mut world, &map, king, None, &rally, &mut dice, 1);
        assert_eq!(world.query::<&Minion>().iter().count(), 3);

        let (drop, events) = svc.defeat(&mut world, king, &mut dice).unwrap();
        assert!((100..=200).contains(&drop.gold));
        assert_eq!(drop.experience, 500);
        assert!(drop.items.iter().any(|(name, _, _)| name == "Crown of the Goblin King"));
        assert!(!events.is_empty());
        assert!(world.get::<&Boss>(king).is_err());
        assert!(svc.defeat(&mut world, king, &mut dice).is_none());
    }
}
