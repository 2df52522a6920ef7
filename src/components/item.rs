//! Item, inventory and equipment components

use serde::{Deserialize, Serialize};

use crate::components::status::EffectType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Consumable,
    Weapon,
    Armor,
    Accessory,
    Miscellaneous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub glyph: char,
    pub description: String,
    pub kind: ItemKind,
    pub weight: i32,
}

impl Item {
    pub fn new(name: impl Into<String>, glyph: char, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            glyph,
            description: String::new(),
            kind,
            weight: 1,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Carried items; entries are item entities without a `Position`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub items: Vec<hecs::Entity>,
    pub max_capacity: usize,
}

impl Inventory {
    pub const DEFAULT_CAPACITY: usize = 20;

    pub fn new(max_capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            max_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_capacity
    }

    pub fn contains(&self, item: hecs::Entity) -> bool {
        self.items.contains(&item)
    }

    /// Returns false when the inventory is full
    pub fn add(&mut self, item: hecs::Entity) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn remove(&mut self, item: hecs::Entity) -> bool {
        let before = self.items.len();
        self.items.retain(|i| *i != item);
        self.items.len() != before
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumableEffect {
    RestoreHealth,
    RestoreMana,
    IncreaseSpeed,
    CurePoison,
    ApplyStatusEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumable {
    pub effect: ConsumableEffect,
    pub value: i32,
    pub usable_out_of_combat: bool,
    pub applies_effect: Option<EffectType>,
    pub effect_magnitude: Option<i32>,
    pub effect_duration: Option<i32>,
    pub removes_effect: Option<EffectType>,
    pub removes_all_negative: bool,
}

impl Consumable {
    pub fn new(effect: ConsumableEffect, value: i32) -> Self {
        Self {
            effect,
            value,
            usable_out_of_combat: true,
            applies_effect: None,
            effect_magnitude: None,
            effect_duration: None,
            removes_effect: None,
            removes_all_negative: false,
        }
    }

    pub fn applying(effect: EffectType) -> Self {
        Self {
            applies_effect: Some(effect),
            ..Self::new(ConsumableEffect::ApplyStatusEffect, 0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EquipmentSlot {
    MainHand,
    OffHand,
    Head,
    Chest,
    Legs,
    Feet,
    Hands,
    Accessory1,
    Accessory2,
}

impl EquipmentSlot {
    pub const ALL: [EquipmentSlot; 9] = [
        EquipmentSlot::MainHand,
        EquipmentSlot::OffHand,
        EquipmentSlot::Head,
        EquipmentSlot::Chest,
        EquipmentSlot::Legs,
        EquipmentSlot::Feet,
        EquipmentSlot::Hands,
        EquipmentSlot::Accessory1,
        EquipmentSlot::Accessory2,
    ];
}

impl std::fmt::Display for EquipmentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equippable {
    pub slot: EquipmentSlot,
    pub attack_bonus: i32,
    pub defense_bonus: i32,
    pub speed_modifier: i32,
    pub two_handed: bool,
}

impl Equippable {
    pub fn new(slot: EquipmentSlot, attack_bonus: i32, defense_bonus: i32) -> Self {
        Self {
            slot,
            attack_bonus,
            defense_bonus,
            speed_modifier: 0,
            two_handed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stackable {
    pub count: i32,
    pub max_stack: i32,
}

impl Stackable {
    pub const DEFAULT_MAX: i32 = 99;

    pub fn new(count: i32) -> Self {
        Self {
            count,
            max_stack: Self::DEFAULT_MAX,
        }
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.max_stack
    }

    pub fn is_empty(&self) -> bool {
        self.count <= 0
    }
}

/// Worn and wielded items by slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EquipmentSlots {
    pub slots: std::collections::BTreeMap<EquipmentSlot, hecs::Entity>,
}

impl EquipmentSlots {
    pub fn get(&self, slot: EquipmentSlot) -> Option<hecs::Entity> {
        self.slots.get(&slot).copied()
    }

    /// Returns the previously equipped item
    pub fn set(&mut self, slot: EquipmentSlot, item: hecs::Entity) -> Option<hecs::Entity> {
        self.slots.insert(slot, item)
    }

    pub fn clear(&mut self, slot: EquipmentSlot) -> Option<hecs::Entity> {
        self.slots.remove(&slot)
    }

    pub fn is_equipped(&self, item: hecs::Entity) -> bool {
        self.slots.values().any(|e| *e == item)
    }

    pub fn equipped(&self) -> impl Iterator<Item = (EquipmentSlot, hecs::Entity)> + '_ {
        self.slots.iter().map(|(s, e)| (*s, *e))
    }
}

/// Carried currency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gold {
    pub amount: i32,
}

impl Gold {
    pub fn new(amount: i32) -> Self {
        Self { amount }
    }

    pub fn add(&mut self, amount: i32) {
        self.amount += amount.max(0);
    }

    /// Fails without change when the balance is too small
    pub fn remove(&mut self, amount: i32) -> bool {
        if amount < 0 || self.amount < amount {
            return false;
        }
        self.amount -= amount;
        true
    }

    pub fn has(&self, amount: i32) -> bool {
        self.amount >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_capacity() {
        let mut world = hecs::World::new();
        let mut inv = Inventory::new(2);
        let a = world.spawn(());
        let b = world.spawn(());
        let c = world.spawn(());
        assert!(inv.add(a));
        assert!(inv.add(b));
        assert!(inv.is_full());
        assert!(!inv.add(c));
        assert!(inv.remove(a));
        assert!(!inv.remove(a));
        assert_eq!(inv.len(), 1);
    }

    #[test]
    fn test_gold_remove_insufficient() {
        let mut gold = Gold::new(30);
        assert!(!gold.remove(31));
        assert_eq!(gold.amount, 30);
        assert!(gold.remove(30));
        assert!(!gold.has(1));
    }
}
