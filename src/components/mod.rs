//! ECS components for the dungeon world

pub mod actor;
pub mod item;
pub mod status;

pub use actor::{
    Actor, Ai, AiBehavior, BaseStats, BlocksMovement, Combat, Corpse, Enemy, EnemyKind, Health, Name, Player,
    Renderable, Visible,
};
pub use item::{
    Consumable, ConsumableEffect, EquipmentSlot, EquipmentSlots, Equippable, Gold, Inventory, Item,
    ItemKind, Stackable,
};
pub use status::{EffectCategory, EffectSource, EffectType, StatusEffect, StatusEffects};

pub use crate::core::types::Position;
