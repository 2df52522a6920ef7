//! Item catalog and placement of loot on the map
//!
//! Rooms get potions and the occasional piece of equipment when a level
//! is generated; enemies roll for drops on death.

use hecs::{Entity, World};

use crate::components::{
    Consumable, ConsumableEffect, EffectType, EquipmentSlot, Equippable, Item, ItemKind, Position,
    Renderable, Stackable,
};
use crate::core::dice::DiceRoller;
use crate::core::types::GlyphColor;
use crate::events::{EntitySpawned, GameEvent};
use crate::game::log::LogSeverity;
use crate::map::dungeon::DungeonMap;
use crate::systems::difficulty;

/// Everything needed to build one kind of item
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemTemplate {
    pub name: &'static str,
    pub glyph: char,
    pub color: GlyphColor,
    pub kind: ItemKind,
    pub description: &'static str,
    pub consumable: Option<Consumable>,
    pub equippable: Option<Equippable>,
}

const fn consumable(effect: ConsumableEffect, value: i32) -> Consumable {
    Consumable {
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

const fn gear(slot: EquipmentSlot, attack: i32, defense: i32, speed: i32) -> Equippable {
    Equippable {
        slot,
        attack_bonus: attack,
        defense_bonus: defense,
        speed_modifier: speed,
        two_handed: false,
    }
}

pub const CONSUMABLES: &[ItemTemplate] = &[
    ItemTemplate {
        name: "Health Potion",
        glyph: '!',
        color: GlyphColor::Red,
        kind: ItemKind::Consumable,
        description: "Restores 30 HP",
        consumable: Some(consumable(ConsumableEffect::RestoreHealth, 30)),
        equippable: None,
    },
    ItemTemplate {
        name: "Mana Potion",
        glyph: '!',
        color: GlyphColor::Blue,
        kind: ItemKind::Consumable,
        description: "Restores 25 mana",
        consumable: Some(consumable(ConsumableEffect::RestoreMana, 25)),
        equippable: None,
    },
    ItemTemplate {
        name: "Antidote",
        glyph: '!',
        color: GlyphColor::Green,
        kind: ItemKind::Consumable,
        description: "Cures poison",
        consumable: Some(Consumable {
            removes_effect: Some(EffectType::Poison),
            ..consumable(ConsumableEffect::CurePoison, 0)
        }),
        equippable: None,
    },
    ItemTemplate {
        name: "Elixir of Strength",
        glyph: '!',
        color: GlyphColor::Yellow,
        kind: ItemKind::Consumable,
        description: "Temporarily increases attack",
        consumable: Some(Consumable {
            applies_effect: Some(EffectType::Strength),
            ..consumable(ConsumableEffect::ApplyStatusEffect, 0)
        }),
        equippable: None,
    },
    ItemTemplate {
        name: "Potion of Regeneration",
        glyph: '!',
        color: GlyphColor::Magenta,
        kind: ItemKind::Consumable,
        description: "Heals over time",
        consumable: Some(Consumable {
            applies_effect: Some(EffectType::Regeneration),
            ..consumable(ConsumableEffect::ApplyStatusEffect, 0)
        }),
        equippable: None,
    },
    ItemTemplate {
        name: "Purifying Tonic",
        glyph: '!',
        color: GlyphColor::Cyan,
        kind: ItemKind::Consumable,
        description: "Removes every harmful effect",
        consumable: Some(Consumable {
            removes_all_negative: true,
            ..consumable(ConsumableEffect::ApplyStatusEffect, 0)
        }),
        equippable: None,
    },
];

pub const EQUIPMENT: &[ItemTemplate] = &[
    ItemTemplate {
        name: "Dagger",
        glyph: '/',
        color: GlyphColor::Gray,
        kind: ItemKind::Weapon,
        description: "Light and quick",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::MainHand, 2, 0, 10)),
    },
    ItemTemplate {
        name: "Iron Sword",
        glyph: '/',
        color: GlyphColor::White,
        kind: ItemKind::Weapon,
        description: "A dependable blade",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::MainHand, 5, 0, 0)),
    },
    ItemTemplate {
        name: "Steel Sword",
        glyph: '/',
        color: GlyphColor::LightBlue,
        kind: ItemKind::Weapon,
        description: "Keen and well balanced",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::MainHand, 8, 0, 0)),
    },
    ItemTemplate {
        name: "Iron Shield",
        glyph: ')',
        color: GlyphColor::White,
        kind: ItemKind::Armor,
        description: "Blocks blows",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::OffHand, 0, 3, 0)),
    },
    ItemTemplate {
        name: "Leather Armor",
        glyph: '[',
        color: GlyphColor::Brown,
        kind: ItemKind::Armor,
        description: "Supple protection",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::Chest, 0, 2, 0)),
    },
    ItemTemplate {
        name: "Chain Mail",
        glyph: '[',
        color: GlyphColor::Gray,
        kind: ItemKind::Armor,
        description: "Heavy but sturdy",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::Chest, 0, 4, -10)),
    },
    ItemTemplate {
        name: "Iron Helmet",
        glyph: '^',
        color: GlyphColor::Gray,
        kind: ItemKind::Armor,
        description: "Protects the head",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::Head, 0, 1, 0)),
    },
    ItemTemplate {
        name: "Boots of Speed",
        glyph: '"',
        color: GlyphColor::Cyan,
        kind: ItemKind::Armor,
        description: "Your feet feel lighter",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::Feet, 0, 0, 15)),
    },
    ItemTemplate {
        name: "Ring of Power",
        glyph: '=',
        color: GlyphColor::Yellow,
        kind: ItemKind::Accessory,
        description: "Hums with force",
        consumable: None,
        equippable: Some(gear(EquipmentSlot::Accessory1, 2, 0, 0)),
    },
];

pub const MISC: &[ItemTemplate] = &[ItemTemplate {
    name: "Torch",
    glyph: '~',
    color: GlyphColor::Yellow,
    kind: ItemKind::Miscellaneous,
    description: "Lights the way",
    consumable: None,
    equippable: None,
}];

/// Look up an item by display name (case-insensitive)
pub fn template(name: &str) -> Option<&'static ItemTemplate> {
    CONSUMABLES
        .iter()
        .chain(EQUIPMENT)
        .chain(MISC)
        .find(|t| t.name.eq_ignore_ascii_case(name))
}

/// Build an item entity; `at` places it on the map, `None` creates it
/// ready for an inventory
pub fn spawn_item(world: &mut World, template: &ItemTemplate, at: Option<Position>) -> Entity {
    let item = Item::new(template.name, template.glyph, template.kind).with_description(template.description);
    let entity = world.spawn((item,));
    if let Some(c) = template.consumable {
        let _ = world.insert(entity, (c, Stackable::new(1)));
    }
    if let Some(eq) = template.equippable {
        let _ = world.insert_one(entity, eq);
    }
    if let Some(pos) = at {
        let _ = world.insert(
            entity,
            (pos, Renderable::new(template.glyph, template.color, Renderable::LAYER_ITEM)),
        );
    }
    entity
}

pub fn spawn_by_name(world: &mut World, name: &str, at: Option<Position>) -> Option<Entity> {
    template(name).map(|t| spawn_item(world, t, at))
}

/// Scatter items over a freshly generated level
///
/// Potions land in 20-50% of rooms and equipment in 10-20%, both rising
/// with depth. Caves without rooms get the same number of rolls on
/// random floor tiles.
pub fn populate_level(world: &mut World, map: &DungeonMap, dice: &mut DiceRoller, level: u32) -> Vec<GameEvent> {
    let potion_chance = (20 + 3 * level).min(50);
    let gear_chance = (10 + level / 2).min(20);

    let spots: Vec<Position> = if map.rooms.is_empty() {
        let floors: Vec<Position> = map.floor_tiles().collect();
        (0..8).filter_map(|_| dice.choose(&floors).copied()).collect()
    } else {
        map.rooms
            .iter()
            .map(|room| {
                Position::new(
                    dice.range(room.x + 1, room.x + room.width - 2),
                    dice.range(room.y + 1, room.y + room.height - 2),
                )
            })
            .collect()
    };

    let mut events = Vec::new();
    for spot in spots {
        if !map.is_walkable(spot) {
            continue;
        }
        let pick = if dice.percent(potion_chance) {
            dice.choose(CONSUMABLES)
        } else if dice.percent(gear_chance) {
            dice.choose(EQUIPMENT)
        } else {
            None
        };
        if let Some(t) = pick {
            let entity = spawn_item(world, t, Some(spot));
            events.push(GameEvent::Spawned(EntitySpawned {
                entity,
                kind: t.name.to_string(),
                position: spot,
            }));
        }
    }
    tracing::debug!(level, items = events.len(), "Populated level with items");
    events
}

/// Roll an enemy's drops at its corpse
pub fn drop_enemy_loot(world: &mut World, at: Position, dice: &mut DiceRoller, level: u32) -> Vec<GameEvent> {
    let mut events = Vec::new();
    let mut drops = Vec::new();
    if dice.percent(difficulty::loot_drop_rate(level)) {
        drops.extend(dice.choose(CONSUMABLES).copied());
    }
    if dice.percent(difficulty::equipment_drop_rate(level)) {
        drops.extend(dice.choose(EQUIPMENT).copied());
    }
    for t in drops {
        let entity = spawn_item(world, &t, Some(at));
        events.push(GameEvent::message(format!("The enemy dropped a {}.", t.name), LogSeverity::Loot));
        events.push(GameEvent::Spawned(EntitySpawned {
            entity,
            kind: t.name.to_string(),
            position: at,
        }));
    }
    events
}
