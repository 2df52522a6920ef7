//! Timed status effects (poison, buffs, debuffs)

use serde::{Deserialize, Serialize};

use crate::core::types::GlyphColor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectType {
    Poison,
    Bleed,
    Burning,
    Regeneration,
    Blessed,
    Strength,
    Haste,
    IronSkin,
    Weakness,
    Slow,
    Fragile,
}

impl std::fmt::Display for EffectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectCategory {
    DamageOverTime,
    HealingOverTime,
    StatBuff,
    StatDebuff,
}

impl EffectCategory {
    pub fn is_negative(&self) -> bool {
        matches!(self, EffectCategory::DamageOverTime | EffectCategory::StatDebuff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectSource {
    Consumable,
    EnemyAttack,
    EnemySpell,
    Environmental,
    Spell,
    Other,
}

/// Static description of an effect type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectDefinition {
    pub effect: EffectType,
    pub default_magnitude: i32,
    pub default_duration: i32,
    pub category: EffectCategory,
    pub color: GlyphColor,
    pub description: &'static str,
}

impl EffectType {
    pub const ALL: [EffectType; 11] = [
        EffectType::Poison,
        EffectType::Bleed,
        EffectType::Burning,
        EffectType::Regeneration,
        EffectType::Blessed,
        EffectType::Strength,
        EffectType::Haste,
        EffectType::IronSkin,
        EffectType::Weakness,
        EffectType::Slow,
        EffectType::Fragile,
    ];

    pub fn definition(&self) -> EffectDefinition {
        use EffectCategory::*;
        let (magnitude, duration, category, color, description) = match self {
            EffectType::Poison => (3, 5, DamageOverTime, GlyphColor::Red, "Deals 3 damage per turn for 5 turns"),
            EffectType::Bleed => (2, 8, DamageOverTime, GlyphColor::Red, "Deals 2 damage per turn for 8 turns"),
            EffectType::Burning => (4, 3, DamageOverTime, GlyphColor::LightRed, "Deals 4 damage per turn for 3 turns"),
            EffectType::Regeneration => (2, 10, HealingOverTime, GlyphColor::Green, "Heals 2 HP per turn for 10 turns"),
            EffectType::Blessed => (1, 20, HealingOverTime, GlyphColor::Yellow, "Heals 1 HP per turn for 20 turns"),
            EffectType::Strength => (5, 10, StatBuff, GlyphColor::Green, "Increases attack by 5 for 10 turns"),
            EffectType::Haste => (20, 8, StatBuff, GlyphColor::Cyan, "Increases speed by 20 for 8 turns"),
            EffectType::IronSkin => (5, 12, StatBuff, GlyphColor::Blue, "Increases defense by 5 for 12 turns"),
            EffectType::Weakness => (3, 6, StatDebuff, GlyphColor::Red, "Decreases attack by 3 for 6 turns"),
            EffectType::Slow => (30, 6, StatDebuff, GlyphColor::Red, "Decreases speed by 30 for 6 turns"),
            EffectType::Fragile => (3, 6, StatDebuff, GlyphColor::Red, "Decreases defense by 3 for 6 turns"),
        };
        EffectDefinition {
            effect: *self,
            default_magnitude: magnitude,
            default_duration: duration,
            category,
            color,
            description,
        }
    }

    pub fn category(&self) -> EffectCategory {
        self.definition().category
    }

    /// Message shown when the effect first lands
    pub fn applied_message(&self) -> &'static str {
        match self {
            EffectType::Poison => "You are poisoned!",
            EffectType::Bleed => "You are bleeding!",
            EffectType::Burning => "You are burning!",
            EffectType::Regeneration => "Regeneration active!",
            EffectType::Blessed => "You feel blessed!",
            EffectType::Strength => "Strength increased!",
            EffectType::Haste => "Movement accelerated!",
            EffectType::IronSkin => "Defense increased!",
            EffectType::Weakness => "You feel weakened!",
            EffectType::Slow => "You feel sluggish!",
            EffectType::Fragile => "Defense decreased!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub effect: EffectType,
    pub magnitude: i32,
    pub duration: i32,
    pub category: EffectCategory,
    pub source: EffectSource,
}

impl StatusEffect {
    pub fn is_expired(&self) -> bool {
        self.duration <= 0
    }
}

/// All effects currently on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffects {
    pub active: Vec<StatusEffect>,
    pub max_effects: usize,
}

impl StatusEffects {
    pub const MAX_EFFECTS: usize = 10;

    pub fn is_full(&self) -> bool {
        self.active.len() >= self.max_effects
    }

    pub fn has(&self, effect: EffectType) -> bool {
        self.active.iter().any(|e| e.effect == effect)
    }
}

impl Default for StatusEffects {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            max_effects: Self::MAX_EFFECTS,
        }
    }
}
