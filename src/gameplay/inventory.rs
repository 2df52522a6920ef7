//! Picking up, using, equipping and dropping items

use hecs::{Entity, World};
use serde::Serialize;

use crate::components::{
    Actor, BaseStats, Combat, Consumable, ConsumableEffect, EffectSource, EquipmentSlot,
    EquipmentSlots, Equippable, Health, Inventory, Item, ItemKind, Position, Renderable, Stackable,
    Visible,
};
use crate::core::types::GlyphColor;
use crate::gameplay::spells::Mana;
use crate::systems::{item_spawn, status_effects, Outcome};

/// Defaults for consumables that apply a status effect without saying how strongly
const CONSUMABLE_EFFECT_MAGNITUDE: i32 = 10;
const CONSUMABLE_EFFECT_DURATION: i32 = 5;

/// Summary row for inventory screens
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    #[serde(skip)]
    pub entity: Entity,
    pub name: String,
    pub glyph: char,
    pub kind: ItemKind,
    pub count: i32,
    pub equipped: bool,
}

#[derive(Debug, Default)]
pub struct InventoryService;

impl InventoryService {
    pub fn new() -> Self {
        Self
    }

    /// Items on the ground within one step of `player`
    pub fn pickupable_items(&self, world: &World, player: Entity) -> Vec<Entity> {
        let Ok(origin) = world.get::<&Position>(player).map(|p| *p) else {
            return Vec::new();
        };
        world
            .query::<(&Item, &Position)>()
            .iter()
            .filter(|(_, (_, pos))| pos.manhattan(&origin) <= 1)
            .map(|(e, _)| e)
            .collect()
    }

    pub fn pickup(&self, world: &mut World, player: Entity, item: Entity) -> Outcome {
        let Ok(player_pos) = world.get::<&Position>(player).map(|p| *p) else {
            return Outcome::fail("No inventory.");
        };
        if world.get::<&Inventory>(player).is_err() {
            return Outcome::fail("No inventory.");
        }
        let Ok(name) = world.get::<&Item>(item).map(|i| i.name.clone()) else {
            return Outcome::fail("Invalid item.");
        };
        let Ok(item_pos) = world.get::<&Position>(item).map(|p| *p) else {
            return Outcome::fail("Item not accessible.");
        };
        if item_pos.manhattan(&player_pos) > 1 {
            return Outcome::fail("Too far away.");
        }
        let count = stack_count(world, item);
        let label = if count > 1 {
            format!("Picked up {} x{}", name, count)
        } else {
            format!("Picked up {}", name)
        };

        if let Some(target) = self.mergeable_stack(world, player, item, &name) {
            if let Ok(mut stack) = world.get::<&mut Stackable>(target) {
                stack.count += count;
            }
            let _ = world.despawn(item);
            tracing::debug!(%name, count, "Merged item stack");
            return Outcome::ok(label);
        }

        let added = match world.get::<&mut Inventory>(player) {
            Ok(mut inv) => inv.add(item),
            Err(_) => return Outcome::fail("No inventory."),
        };
        if !added {
            return Outcome::fail("Inventory is full!");
        }
        let _ = world.remove_one::<Position>(item);
        let _ = world.remove_one::<Renderable>(item);
        let _ = world.remove_one::<Visible>(item);
        tracing::debug!(%name, count, "Picked up item");
        Outcome::ok(label)
    }

    fn mergeable_stack(&self, world: &World, player: Entity, item: Entity, name: &str) -> Option<Entity> {
        let incoming = *world.get::<&Stackable>(item).ok()?;
        let inv = world.get::<&Inventory>(player).ok()?;
        inv.items.iter().copied().find(|held| {
            let same = world.get::<&Item>(*held).map(|i| i.name == name).unwrap_or(false);
            let room = world
                .get::<&Stackable>(*held)
                .map(|s| s.count + incoming.count <= s.max_stack)
                .unwrap_or(false);
            same && room
        })
    }

    pub fn items(&self, world: &World, player: Entity) -> Vec<InventoryEntry> {
        let Ok(inv) = world.get::<&Inventory>(player) else {
            return Vec::new();
        };
        let slots = world.get::<&EquipmentSlots>(player).ok();
        inv.items
            .iter()
            .filter_map(|e| {
                let item = world.get::<&Item>(*e).ok()?;
                Some(InventoryEntry {
                    entity: *e,
                    name: item.name.clone(),
                    glyph: item.glyph,
                    kind: item.kind,
                    count: stack_count(world, *e),
                    equipped: slots.as_ref().map(|s| s.is_equipped(*e)).unwrap_or(false),
                })
            })
            .collect()
    }

    pub fn use_consumable(&self, world: &mut World, player: Entity, item: Entity) -> Outcome {
        match world.get::<&Inventory>(player) {
            Ok(inv) if inv.contains(item) => {}
            Ok(_) => return Outcome::fail("Item not in inventory."),
            Err(_) => return Outcome::fail("No inventory."),
        }
        let Ok(consumable) = world.get::<&Consumable>(item).map(|c| *c) else {
            return Outcome::fail("Item is not consumable.");
        };
        let name = world.get::<&Item>(item).map(|i| i.name.clone()).unwrap_or_default();

        let outcome = match consumable.effect {
            ConsumableEffect::RestoreHealth => {
                let Ok(mut hp) = world.get::<&mut Health>(player) else {
                    return Outcome::fail("Item is not consumable.");
                };
                if hp.is_full() {
                    return Outcome::fail("Already at full health!");
                }
                let restored = hp.heal(consumable.value);
                Outcome::ok(format!("You drink the {} and recover {} HP.", name, restored))
            }
            ConsumableEffect::RestoreMana => {
                let Ok(mut mana) = world.get::<&mut Mana>(player) else {
                    return Outcome::fail("Item is not consumable.");
                };
                if mana.is_full() {
                    return Outcome::fail("Already at full mana!");
                }
                let restored = mana.restore(consumable.value);
                Outcome::ok(format!("You drink the {} and recover {} mana.", name, restored))
            }
            ConsumableEffect::IncreaseSpeed => status_effects::apply_effect(
                world,
                player,
                crate::components::EffectType::Haste,
                Some(consumable.value),
                consumable.effect_duration,
                EffectSource::Consumable,
            ),
            ConsumableEffect::CurePoison => {
                status_effects::remove_effect(world, player, crate::components::EffectType::Poison)
            }
            ConsumableEffect::ApplyStatusEffect => self.apply_status_consumable(world, player, &consumable),
        };
        if !outcome.success {
            return outcome;
        }

        self.consume_one(world, player, item);
        tracing::debug!(%name, "Used consumable");
        outcome
    }

    fn apply_status_consumable(&self, world: &mut World, player: Entity, c: &Consumable) -> Outcome {
        if c.removes_all_negative {
            return status_effects::remove_all_negative(world, player);
        }
        if let Some(effect) = c.removes_effect {
            return status_effects::remove_effect(world, player, effect);
        }
        match c.applies_effect {
            Some(effect) => status_effects::apply_effect(
                world,
                player,
                effect,
                Some(c.effect_magnitude.unwrap_or(CONSUMABLE_EFFECT_MAGNITUDE)),
                Some(c.effect_duration.unwrap_or(CONSUMABLE_EFFECT_DURATION)),
                EffectSource::Consumable,
            ),
            None => Outcome::fail("Nothing happens."),
        }
    }

    /// Decrement a stack, destroying the item when it runs out
    fn consume_one(&self, world: &mut World, player: Entity, item: Entity) {
        let remaining = match world.get::<&mut Stackable>(item) {
            Ok(mut stack) => {
                stack.count -= 1;
                stack.count
            }
            Err(_) => 0,
        };
        if remaining <= 0 {
            if let Ok(mut inv) = world.get::<&mut Inventory>(player) {
                inv.remove(item);
            }
            let _ = world.despawn(item);
        }
    }

    pub fn equip(&self, world: &mut World, player: Entity, item: Entity) -> Outcome {
        match world.get::<&Inventory>(player) {
            Ok(inv) if inv.contains(item) => {}
            Ok(_) => return Outcome::fail("Item not in inventory."),
            Err(_) => return Outcome::fail("No inventory."),
        }
        let Ok(gear) = world.get::<&Equippable>(item).map(|e| *e) else {
            return Outcome::fail("Item is not equippable.");
        };
        let name = world.get::<&Item>(item).map(|i| i.name.clone()).unwrap_or_default();
        {
            let Ok(mut slots) = world.get::<&mut EquipmentSlots>(player) else {
                return Outcome::fail("Cannot equip items.");
            };
            if gear.two_handed {
                slots.clear(EquipmentSlot::OffHand);
            }
            if gear.slot == EquipmentSlot::OffHand {
                let main_two_handed = slots
                    .get(EquipmentSlot::MainHand)
                    .and_then(|m| world.get::<&Equippable>(m).ok().map(|e| e.two_handed))
                    .unwrap_or(false);
                if main_two_handed {
                    slots.clear(EquipmentSlot::MainHand);
                }
            }
            slots.set(gear.slot, item);
        }
        recalculate_stats(world, player);

        let changes = stat_changes(&gear);
        tracing::debug!(%name, slot = ?gear.slot, "Equipped item");
        if changes.is_empty() {
            Outcome::ok(format!("Equipped {}.", name))
        } else {
            Outcome::ok(format!("Equipped {}. {}", name, changes))
        }
    }

    pub fn unequip(&self, world: &mut World, player: Entity, slot: EquipmentSlot) -> Outcome {
        let removed = {
            let Ok(mut slots) = world.get::<&mut EquipmentSlots>(player) else {
                return Outcome::fail("No equipment slots.");
            };
            slots.clear(slot)
        };
        let Some(item) = removed else {
            return Outcome::fail(format!("No item equipped in {} slot.", slot));
        };
        recalculate_stats(world, player);
        let name = world.get::<&Item>(item).map(|i| i.name.clone()).unwrap_or_default();
        Outcome::ok(format!("Unequipped {}.", name))
    }

    /// Put an item back on the floor under the player
    pub fn drop_item(&self, world: &mut World, player: Entity, item: Entity) -> Outcome {
        let Ok(at) = world.get::<&Position>(player).map(|p| *p) else {
            return Outcome::fail("No inventory.");
        };
        let removed = match world.get::<&mut Inventory>(player) {
            Ok(mut inv) => inv.remove(item),
            Err(_) => return Outcome::fail("No inventory."),
        };
        if !removed {
            return Outcome::fail("Item not in inventory.");
        }
        let equipped_slot = match world.get::<&EquipmentSlots>(player) {
            Ok(slots) => EquipmentSlot::ALL.into_iter().find(|slot| slots.get(*slot) == Some(item)),
            Err(_) => None,
        };
        if let Some(slot) = equipped_slot {
            self.unequip(world, player, slot);
        }
        let Ok((name, glyph)) = world.get::<&Item>(item).map(|i| (i.name.clone(), i.glyph)) else {
            return Outcome::fail("Invalid item.");
        };
        let _ = world.insert(
            item,
            (at, Renderable::new(glyph, GlyphColor::White, Renderable::LAYER_ITEM)),
        );
        Outcome::ok(format!("Dropped {}.", name))
    }

    pub fn total_stats(&self, world: &World, player: Entity) -> BaseStats {
        total_stats(world, player)
    }

    pub fn equipped_in(&self, world: &World, player: Entity, slot: EquipmentSlot) -> Option<Entity> {
        world.get::<&EquipmentSlots>(player).ok()?.get(slot)
    }
}

/// Put `count` of a catalog item straight into `entity`'s pack
///
/// Used for quest rewards, trades and dialogue gifts. Overflow lands on the
/// floor under the receiver when the pack is full.
pub fn give_item(world: &mut World, entity: Entity, name: &str, count: i32) -> Outcome {
    let Some(template) = item_spawn::template(name) else {
        return Outcome::fail(format!("Unknown item: {}", name));
    };
    if world.get::<&Inventory>(entity).is_err() {
        return Outcome::fail("No inventory.");
    }
    let count = count.max(1);
    let mut dropped = 0;

    let units: Vec<i32> = if template.consumable.is_some() { vec![count] } else { vec![1; count as usize] };
    for unit in units {
        let item = item_spawn::spawn_item(world, template, None);
        if let Ok(mut stack) = world.get::<&mut Stackable>(item) {
            stack.count = unit;
        }
        let merge_target = InventoryService.mergeable_stack(world, entity, item, template.name);
        if let Some(target) = merge_target {
            if let Ok(mut stack) = world.get::<&mut Stackable>(target) {
                stack.count += unit;
            }
            let _ = world.despawn(item);
            continue;
        }
        let added = world.get::<&mut Inventory>(entity).map(|mut inv| inv.add(item)).unwrap_or(false);
        if !added {
            match world.get::<&Position>(entity).map(|p| *p) {
                Ok(at) => {
                    let _ = world.insert(
                        item,
                        (at, Renderable::new(template.glyph, template.color, Renderable::LAYER_ITEM)),
                    );
                    dropped += 1;
                }
                Err(_) => {
                    let _ = world.despawn(item);
                }
            }
        }
    }

    let label = if count > 1 { format!("{} x{}", template.name, count) } else { template.name.to_string() };
    if dropped > 0 {
        Outcome::ok(format!("Received {}. Inventory is full, so it lands at your feet.", label))
    } else {
        Outcome::ok(format!("Received {}.", label))
    }
}

/// How many of `name` the entity carries, counting stacks
pub fn count_item(world: &World, entity: Entity, name: &str) -> i32 {
    let Ok(inv) = world.get::<&Inventory>(entity) else {
        return 0;
    };
    inv.items
        .iter()
        .filter(|e| world.get::<&Item>(**e).map(|i| i.name.eq_ignore_ascii_case(name)).unwrap_or(false))
        .map(|e| stack_count(world, *e))
        .sum()
}

/// Remove `count` of `name` from the pack, unequipping gear as needed
pub fn take_item(world: &mut World, entity: Entity, name: &str, count: i32) -> Outcome {
    let count = count.max(1);
    if count_item(world, entity, name) < count {
        return Outcome::fail(format!("Not enough {}.", name));
    }
    let held: Vec<Entity> = match world.get::<&Inventory>(entity) {
        Ok(inv) => inv.items.clone(),
        Err(_) => return Outcome::fail("No inventory."),
    };

    let mut remaining = count;
    for item in held {
        if remaining == 0 {
            break;
        }
        let matches = world.get::<&Item>(item).map(|i| i.name.eq_ignore_ascii_case(name)).unwrap_or(false);
        if !matches {
            continue;
        }
        let available = stack_count(world, item);
        if available > remaining {
            if let Ok(mut stack) = world.get::<&mut Stackable>(item) {
                stack.count -= remaining;
            }
            remaining = 0;
            continue;
        }
        let slot = world
            .get::<&EquipmentSlots>(entity)
            .ok()
            .and_then(|slots| EquipmentSlot::ALL.into_iter().find(|s| slots.get(*s) == Some(item)));
        if let Some(slot) = slot {
            if let Ok(mut slots) = world.get::<&mut EquipmentSlots>(entity) {
                slots.clear(slot);
            }
        }
        if let Ok(mut inv) = world.get::<&mut Inventory>(entity) {
            inv.remove(item);
        }
        let _ = world.despawn(item);
        remaining -= available;
    }
    recalculate_stats(world, entity);
    Outcome::ok(format!("Handed over {} x{}.", name, count))
}

fn stack_count(world: &World, item: Entity) -> i32 {
    world.get::<&Stackable>(item).map(|s| s.count).unwrap_or(1)
}

fn stat_changes(gear: &Equippable) -> String {
    let mut parts = Vec::new();
    for (label, value) in [
        ("ATK", gear.attack_bonus),
        ("DEF", gear.defense_bonus),
        ("SPD", gear.speed_modifier),
    ] {
        if value != 0 {
            let sign = if value > 0 { "+" } else { "" };
            parts.push(format!("{} {}{}", label, sign, value));
        }
    }
    parts.join(", ")
}

/// Base stats plus every equipped item's bonuses
pub fn total_stats(world: &World, entity: Entity) -> BaseStats {
    let mut total = world.get::<&BaseStats>(entity).map(|b| *b).unwrap_or_default();
    if let Ok(slots) = world.get::<&EquipmentSlots>(entity) {
        for (_, item) in slots.equipped() {
            if let Ok(gear) = world.get::<&Equippable>(item) {
                total.attack += gear.attack_bonus;
                total.defense += gear.defense_bonus;
                total.speed += gear.speed_modifier;
            }
        }
    }
    total
}

/// Rewrite `Combat` and `Actor::speed` from base stats and equipment
pub fn recalculate_stats(world: &mut World, entity: Entity) {
    if world.get::<&BaseStats>(entity).is_err() {
        return;
    }
    let total = total_stats(world, entity);
    if let Ok(mut combat) = world.get::<&mut Combat>(entity) {
        *combat = Combat::new(total.attack, total.defense);
    }
    if let Ok(mut actor) = world.get::<&mut Actor>(entity) {
        actor.speed = total.speed.max(1);
    }
}
