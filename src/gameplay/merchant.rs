//! Merchants, stock and trading
//!
//! A merchant is any entity carrying a [`MerchantInventory`]. The player
//! opens a trade session with one merchant at a time; buying and selling
//! only work inside that session.

use std::collections::{BTreeMap, HashMap};

use hecs::{Entity, World};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::components::{Gold, ItemKind, Name};
use crate::core::dice::DiceRoller;
use crate::core::error::{LablabError, Result};
use crate::gameplay::inventory;
use crate::gameplay::progression::Experience;
use crate::systems::{item_spawn, Outcome};

const DEFAULT_MERCHANTS: &str = include_str!("../../data/merchants.toml");

/// Finite stock is topped back up to at least this many units on refresh
pub const RESTOCK_BASE_QUANTITY: i32 = 5;
pub const DEFAULT_REFRESH_INTERVAL: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    pub base_price: i32,
    pub quantity: i32,
    pub infinite: bool,
    /// Player level needed before the merchant will sell it
    pub min_level: u32,
}

impl StockItem {
    pub fn has(&self, quantity: i32) -> bool {
        self.infinite || self.quantity >= quantity
    }
}

/// Merchant-side component: what they sell and at what markup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantInventory {
    pub stock: BTreeMap<String, StockItem>,
    /// Fraction of base price paid when buying from the player
    pub buy_multiplier: f32,
    /// Fraction of base price charged when selling to the player
    pub sell_multiplier: f32,
    pub refresh_interval: u32,
    pub last_refresh_level: u32,
}

impl Default for MerchantInventory {
    fn default() -> Self {
        Self {
            stock: BTreeMap::new(),
            buy_multiplier: 0.5,
            sell_multiplier: 1.0,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            last_refresh_level: 0,
        }
    }
}

impl MerchantInventory {
    fn entry(&self, item: &str) -> Option<(&String, &StockItem)> {
        self.stock.iter().find(|(name, _)| name.eq_ignore_ascii_case(item))
    }

    fn entry_mut(&mut self, item: &str) -> Option<&mut StockItem> {
        self.stock.iter_mut().find(|(name, _)| name.eq_ignore_ascii_case(item)).map(|(_, s)| s)
    }

    pub fn has_item(&self, item: &str, quantity: i32) -> bool {
        self.entry(item).map(|(_, s)| s.has(quantity)).unwrap_or(false)
    }

    pub fn sell_price(&self, base_price: i32) -> i32 {
        (base_price as f32 * self.sell_multiplier) as i32
    }

    pub fn buy_price(&self, base_price: i32) -> i32 {
        (base_price as f32 * self.buy_multiplier) as i32
    }

    /// Remove units from finite stock; infinite stock never runs down
    pub fn remove_stock(&mut self, item: &str, quantity: i32) -> bool {
        match self.entry_mut(item) {
            Some(s) if s.infinite => true,
            Some(s) if s.quantity >= quantity => {
                s.quantity -= quantity;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StockEntry {
    item: String,
    base_price: i32,
    #[serde(default)]
    quantity: Option<i32>,
    #[serde(default)]
    min_level: u32,
}

/// Stock template loaded from content
#[derive(Debug, Clone, Deserialize)]
pub struct MerchantDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_buy")]
    pub buy_multiplier: f32,
    #[serde(default = "default_sell")]
    pub sell_multiplier: f32,
    #[serde(default)]
    stock: Vec<StockEntry>,
}

fn default_buy() -> f32 {
    0.5
}

fn default_sell() -> f32 {
    1.0
}

impl MerchantDefinition {
    pub fn to_inventory(&self) -> MerchantInventory {
        let stock = self
            .stock
            .iter()
            .map(|e| {
                let item = StockItem {
                    base_price: e.base_price,
                    quantity: e.quantity.unwrap_or(0),
                    infinite: e.quantity.is_none(),
                    min_level: e.min_level,
                };
                (e.item.clone(), item)
            })
            .collect();
        MerchantInventory {
            stock,
            buy_multiplier: self.buy_multiplier,
            sell_multiplier: self.sell_multiplier,
            ..MerchantInventory::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct MerchantFile {
    #[serde(default)]
    merchant: Vec<MerchantDefinition>,
}

/// One row of a shop listing as the player sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockListing {
    pub item: String,
    pub price: i32,
    /// `None` for infinite stock
    pub quantity: Option<i32>,
    pub min_level: u32,
    pub available: bool,
}

/// Value of an item the merchant doesn't stock
pub fn appraise(kind: ItemKind) -> i32 {
    match kind {
        ItemKind::Consumable => 30,
        ItemKind::Weapon | ItemKind::Armor => 80,
        ItemKind::Accessory => 120,
        ItemKind::Miscellaneous => 5,
    }
}

pub struct MerchantService {
    definitions: BTreeMap<String, MerchantDefinition>,
    /// player -> merchant they are trading with
    sessions: Mutex<HashMap<Entity, Entity>>,
}

impl MerchantService {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let file: MerchantFile = toml::from_str(src)?;
        let definitions = file.merchant.into_iter().map(|d| (d.id.clone(), d)).collect();
        Ok(Self {
            definitions,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::from_toml_str(DEFAULT_MERCHANTS)
    }

    pub fn definition(&self, id: &str) -> Option<&MerchantDefinition> {
        self.definitions.get(id)
    }

    /// Attach a stock template to an existing entity, usually an NPC
    pub fn stock_merchant(&self, world: &mut World, merchant: Entity, template: &str) -> Result<()> {
        let def = self
            .definitions
            .get(template)
            .ok_or_else(|| LablabError::InvalidAction(format!("Unknown merchant template: {}", template)))?;
        world
            .insert_one(merchant, def.to_inventory())
            .map_err(|_| LablabError::EntityNotFound(merchant))?;
        tracing::debug!(template, "merchant stocked");
        Ok(())
    }

    pub fn is_merchant(&self, world: &World, entity: Entity) -> bool {
        world.get::<&MerchantInventory>(entity).is_ok()
    }

    pub fn start_trade(&self, world: &World, player: Entity, merchant: Entity) -> Outcome {
        if !self.is_merchant(world, merchant) {
            return Outcome::fail("Merchant has no inventory");
        }
        self.sessions.lock().insert(player, merchant);
        let name = world.get::<&Name>(merchant).map(|n| n.0.clone()).unwrap_or_else(|_| "the merchant".into());
        tracing::info!(?player, ?merchant, "trade started");
        Outcome::ok(format!("You browse {}'s wares.", name))
    }

    pub fn end_trade(&self, player: Entity) -> Outcome {
        match self.sessions.lock().remove(&player) {
            Some(_) => Outcome::ok("Trade ended."),
            None => Outcome::fail("No active trade session"),
        }
    }

    pub fn trading_with(&self, player: Entity) -> Option<Entity> {
        self.sessions.lock().get(&player).copied()
    }

    pub fn is_trading(&self, player: Entity) -> bool {
        self.sessions.lock().contains_key(&player)
    }

    /// Price the player pays per unit
    pub fn sell_price(&self, world: &World, merchant: Entity, base_price: i32) -> i32 {
        match world.get::<&MerchantInventory>(merchant) {
            Ok(inv) => inv.sell_price(base_price),
            Err(_) => base_price,
        }
    }

    /// Price the merchant pays per unit
    pub fn buy_price(&self, world: &World, merchant: Entity, base_price: i32) -> i32 {
        match world.get::<&MerchantInventory>(merchant) {
            Ok(inv) => inv.buy_price(base_price),
            Err(_) => (base_price as f32 * 0.5) as i32,
        }
    }

    pub fn has_in_stock(&self, world: &World, merchant: Entity, item: &str, quantity: i32) -> bool {
        world
            .get::<&MerchantInventory>(merchant)
            .map(|inv| inv.has_item(item, quantity))
            .unwrap_or(false)
    }

    pub fn listing(&self, world: &World, merchant: Entity, player_level: u32) -> Vec<StockListing> {
        let Ok(inv) = world.get::<&MerchantInventory>(merchant) else {
            return Vec::new();
        };
        inv.stock
            .iter()
            .map(|(item, s)| StockListing {
                item: item.clone(),
                price: inv.sell_price(s.base_price),
                quantity: (!s.infinite).then_some(s.quantity),
                min_level: s.min_level,
                available: s.has(1) && player_level >= s.min_level,
            })
            .collect()
    }

    /// Buy from the merchant the player is currently trading with
    pub fn buy(&self, world: &mut World, player: Entity, item: &str, quantity: i32) -> Outcome {
        let quantity = quantity.max(1);
        let Some(merchant) = self.trading_with(player) else {
            return Outcome::fail("No active trade session");
        };
        if world.get::<&Gold>(player).is_err() {
            return Outcome::fail("Player has no gold");
        }

        let (name, unit_price, min_level) = {
            let Ok(inv) = world.get::<&MerchantInventory>(merchant) else {
                return Outcome::fail("Merchant has no inventory");
            };
            match inv.entry(item) {
                Some((name, s)) if s.has(quantity) => (name.clone(), inv.sell_price(s.base_price), s.min_level),
                _ => return Outcome::fail("Item not in stock"),
            }
        };

        let level = world.get::<&Experience>(player).map(|e| e.level).unwrap_or(1);
        if level < min_level {
            return Outcome::fail(format!("Requires level {}", min_level));
        }

        let Some(total) = unit_price.checked_mul(quantity) else {
            return Outcome::fail(format!("Insufficient gold (need more than {})", i32::MAX));
        };
        let paid = world.get::<&mut Gold>(player).map(|mut g| g.remove(total)).unwrap_or(false);
        if !paid {
            return Outcome::fail(format!("Insufficient gold (need {})", total));
        }

        let removed = world
            .get::<&mut MerchantInventory>(merchant)
            .map(|mut inv| inv.remove_stock(&name, quantity))
            .unwrap_or(false);
        if !removed {
            if let Ok(mut g) = world.get::<&mut Gold>(player) {
                g.add(total);
            }
            return Outcome::fail("Failed to remove from stock");
        }

        let received = inventory::give_item(world, player, &name, quantity);
        tracing::info!(item = %name, quantity, price = total, "player purchased item");
        let label = if quantity > 1 { format!("{} x{}", name, quantity) } else { name };
        let mut message = format!("Bought {} for {} gold.", label, total);
        if received.message.contains("lands at your feet") {
            message.push_str(" Your pack is full, so it lands at your feet.");
        }
        Outcome::ok(message)
    }

    /// Sell carried items to the current merchant
    ///
    /// Items the merchant stocks are valued at their stock price and go
    /// back on the shelf; anything else is appraised by kind.
    pub fn sell(&self, world: &mut World, player: Entity, item: &str, quantity: i32) -> Outcome {
        let quantity = quantity.max(1);
        let Some(merchant) = self.trading_with(player) else {
            return Outcome::fail("No active trade session");
        };
        if world.get::<&Gold>(player).is_err() {
            return Outcome::fail("Player has no gold");
        }
        if inventory::count_item(world, player, item) < quantity {
            return Outcome::fail(format!("You don't have {} {}.", quantity, item));
        }

        let base = {
            let Ok(inv) = world.get::<&MerchantInventory>(merchant) else {
                return Outcome::fail("Merchant has no inventory");
            };
            match inv.entry(item) {
                Some((_, s)) => s.base_price,
                None => item_spawn::template(item).map(|t| appraise(t.kind)).unwrap_or(1),
            }
        };
        let Some(total) = self.buy_price(world, merchant, base).checked_mul(quantity) else {
            return Outcome::fail("The merchant cannot pay that much.");
        };

        let taken = inventory::take_item(world, player, item, quantity);
        if !taken.success {
            return taken;
        }
        if let Ok(mut g) = world.get::<&mut Gold>(player) {
            g.add(total);
        }
        if let Ok(mut inv) = world.get::<&mut MerchantInventory>(merchant) {
            if let Some(s) = inv.entry_mut(item) {
                if !s.infinite {
                    s.quantity += quantity;
                }
            }
        }
        tracing::info!(item, quantity, price = total, "player sold item");
        Outcome::ok(format!("Sold {} x{} for {} gold.", item, quantity, total))
    }

    /// Restock finite items once the player has gone `refresh_interval`
    /// levels deeper than the last refresh
    pub fn refresh_stock(&self, world: &mut World, merchant: Entity, level: u32, dice: &mut DiceRoller) -> bool {
        let Ok(mut inv) = world.get::<&mut MerchantInventory>(merchant) else {
            return false;
        };
        if level.saturating_sub(inv.last_refresh_level) < inv.refresh_interval {
            return false;
        }
        inv.last_refresh_level = level;
        for s in inv.stock.values_mut().filter(|s| !s.infinite) {
            let restore = dice.float_range(0.5, 1.0);
            s.quantity = s.quantity.max((RESTOCK_BASE_QUANTITY as f64 * restore) as i32);
        }
        tracing::info!(level, "refreshed merchant stock");
        true
    }

    pub fn refresh_all(&self, world: &mut World, level: u32, dice: &mut DiceRoller) -> usize {
        let merchants: Vec<Entity> = world.query::<&MerchantInventory>().iter().map(|(e, _)| e).collect();
        merchants
            .into_iter()
            .filter(|m| self.refresh_stock(world, *m, level, dice))
            .count()
    }

    pub fn gold(&self, world: &World, entity: Entity) -> i32 {
        world.get::<&Gold>(entity).map(|g| g.amount).unwrap_or(0)
    }

    pub fn can_afford(&self, world: &World, entity: Entity, cost: i32) -> bool {
        world.get::<&Gold>(entity).map(|g| g.has(cost)).unwrap_or(false)
    }

    /// Adds a purse if the entity has none
    pub fn add_gold(&self, world: &mut World, entity: Entity, amount: i32) {
        if let Ok(mut g) = world.get::<&mut Gold>(entity) {
            g.add(amount);
            return;
        }
        let _ = world.insert_one(entity, Gold::new(amount.max(0)));
    }

    pub fn remove_gold(&self, world: &mut World, entity: Entity, amount: i32) -> bool {
        world.get::<&mut Gold>(entity).map(|mut g| g.remove(amount)).unwrap_or(false)
    }
}
