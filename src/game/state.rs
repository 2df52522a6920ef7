//! Game state manager
//!
//! Owns the play/edit worlds, the level stack, the dice and the activity
//! log, and drives one player turn at a time:
//!
//! 1. the player's action runs and spends the hero's energy
//! 2. [`GameStateManager::update`] ticks status effects, hazards, mana and
//!    bosses, then lets every other actor act until the hero is ready again
//! 3. every event produced along the way is reacted to (XP, quest progress,
//!    boss loot, game over), written to the log and republished on the
//!    plugin event bus

use std::collections::VecDeque;
use std::sync::Arc;

use hecs::{Entity, World};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ai::IntelligentAi;
use crate::components::{Actor, Ai, AiBehavior, Combat, Gold, Health, Item, Name, Position, Stackable};
use crate::core::config::GameConfig;
use crate::core::dice::DiceRoller;
use crate::core::error::{LablabError, Result};
use crate::core::types::Direction;
use crate::events::{GameEvent, GameStateChanged, ItemPickedUp, ItemUsed, LevelChanged, LocationReached};
use crate::game::log::{ActivityLog, LogSeverity};
use crate::game::spawn;
use crate::game::world::{GameWorldManager, WorldMode};
use crate::gameplay::hazards::{hazards_at, Hazard, HazardState};
use crate::gameplay::npc::{DialogueEffect, DialogueView, Npc};
use crate::gameplay::progression::kill_reward;
use crate::gameplay::spells::{tick_spellcasters, CastContext, SpellTarget};
use crate::gameplay::{
    inventory, Boss, BossService, Experience, HazardService, InventoryService, Mana, MerchantService, NpcService,
    ProgressionService, QuestService, SpellService,
};
use crate::map::dungeon::{DungeonMap, Tile};
use crate::map::level::{LevelManager, LevelTransition};
use crate::plugins::events::EventBus;
use crate::plugins::registry::ServiceRegistry;
use crate::systems::{actor, ai, combat, difficulty, item_spawn, movement, status_effects, Outcome};

/// Boss guarding each of these depths
pub const BOSS_FLOORS: [(u32, &str); 5] = [
    (5, "goblin_king"),
    (10, "corrupted_treant"),
    (15, "flame_warden"),
    (18, "shadow_assassin"),
    (19, "ancient_dragon"),
];

/// Manhattan radius of a hazard search
pub const SEARCH_RANGE: i32 = 3;

/// Bound on actor passes between two player turns
const MAX_WORLD_PASSES: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum GameMode {
    #[default]
    Playing,
    GameOver,
    Victory,
}

impl GameMode {
    pub fn label(&self) -> &'static str {
        match self {
            GameMode::Playing => "playing",
            GameMode::GameOver => "game_over",
            GameMode::Victory => "victory",
        }
    }
}

/// Everything the player can ask for in one input
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerAction {
    /// Step, attack or talk depending on what is in the way
    Move(Direction),
    Wait,
    PickUp,
    UseItem(Entity),
    Equip(Entity),
    Descend,
    Ascend,
    ChooseDialogue(String),
    EndDialogue,
    Buy { item: String, quantity: i32 },
    Sell { item: String, quantity: i32 },
    EndTrade,
    Cast { spell: String, target: SpellTarget },
    /// Look for hidden hazards nearby
    Search,
    /// Disarm the nearest visible hazard within one tile
    Disarm,
}

/// Services the game loop calls into
///
/// Resolved from the plugin registry when a host is running, so a plugin
/// registering a higher-priority implementation takes over.
#[derive(Clone)]
pub struct GameServices {
    pub inventory: Arc<InventoryService>,
    pub progression: Arc<ProgressionService>,
    pub quests: Arc<QuestService>,
    pub npcs: Arc<NpcService>,
    pub merchants: Arc<MerchantService>,
    pub spells: Arc<SpellService>,
    pub hazards: Arc<HazardService>,
    pub bosses: Arc<BossService>,
    pub events: Arc<EventBus>,
}

impl GameServices {
    /// Built-in services over the embedded content
    pub fn with_defaults() -> Result<Self> {
        Ok(Self {
            inventory: Arc::new(InventoryService::new()),
            progression: Arc::new(ProgressionService::new()),
            quests: Arc::new(QuestService::with_defaults()?),
            npcs: Arc::new(NpcService::with_defaults()?),
            merchants: Arc::new(MerchantService::with_defaults()?),
            spells: Arc::new(SpellService::with_defaults()?),
            hazards: Arc::new(HazardService::with_defaults()?),
            bosses: Arc::new(BossService::with_defaults()?),
            events: Arc::new(EventBus::new()),
        })
    }

    /// Take each service from the registry, falling back to the built-in
    /// one when no plugin provides it
    pub fn from_registry(registry: &ServiceRegistry, events: Arc<EventBus>) -> Result<Self> {
        Ok(Self {
            inventory: resolve_or(registry, || Ok(InventoryService::new()))?,
            progression: resolve_or(registry, || Ok(ProgressionService::new()))?,
            quests: resolve_or(registry, QuestService::with_defaults)?,
            npcs: resolve_or(registry, NpcService::with_defaults)?,
            merchants: resolve_or(registry, MerchantService::with_defaults)?,
            spells: resolve_or(registry, SpellService::with_defaults)?,
            hazards: resolve_or(registry, HazardService::with_defaults)?,
            bosses: resolve_or(registry, BossService::with_defaults)?,
            events,
        })
    }
}

fn resolve_or<T, F>(registry: &ServiceRegistry, fallback: F) -> Result<Arc<T>>
where
    T: Send + Sync + 'static,
    F: FnOnce() -> Result<T>,
{
    match registry.resolve::<T>() {
        Ok(service) => Ok(service),
        Err(_) => {
            debug!(service = std::any::type_name::<T>(), "No plugin service, using built-in");
            Ok(Arc::new(fallback()?))
        }
    }
}

/// Hero stats for the HUD and run summaries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub health: i32,
    pub max_health: i32,
    pub attack: i32,
    pub defense: i32,
    pub speed: i32,
    pub level: u32,
    pub experience: i64,
    pub experience_to_next: i64,
    pub gold: i32,
    pub mana: i32,
    pub max_mana: i32,
    pub depth: u32,
    pub depth_feet: u32,
    pub position: Position,
}

pub struct GameStateManager {
    config: GameConfig,
    services: GameServices,
    worlds: GameWorldManager,
    levels: LevelManager,
    dice: DiceRoller,
    log: ActivityLog,
    player: Option<Entity>,
    mode: GameMode,
    turn: u64,
    kills: u32,
    /// Open conversation, if any
    dialogue: Option<DialogueView>,
}

impl GameStateManager {
    pub fn new(config: GameConfig, services: GameServices) -> Self {
        let levels = LevelManager::new(&config, 0);
        Self {
            config,
            services,
            worlds: GameWorldManager::new(),
            levels,
            dice: DiceRoller::seeded(0),
            log: ActivityLog::new(),
            player: None,
            mode: GameMode::Playing,
            turn: 0,
            kills: 0,
            dialogue: None,
        }
    }

    /// Generate level 1 and populate the play world
    pub fn new_game(&mut self, seed: u64) -> Result<()> {
        info!(seed, width = self.config.map_width, height = self.config.map_height, "Starting new game");
        self.dice = DiceRoller::seeded(seed);
        self.levels = LevelManager::new(&self.config, seed);
        self.worlds.clear(WorldMode::Play);
        self.worlds.clear(WorldMode::Edit);
        self.worlds.switch_mode(WorldMode::Play);
        self.log.clear();
        self.mode = GameMode::Playing;
        self.turn = 0;
        self.kills = 0;
        self.dialogue = None;

        let start = {
            let level = self.levels.initialize_first_level();
            spawn::player_start(&level.map)
        }
        .ok_or_else(|| LablabError::InvalidAction("Generated level has no floor".into()))?;

        let services = self.services.clone();
        let world = self.worlds.world_mut(WorldMode::Play);
        let player = spawn::spawn_player(world, &self.config, start);
        self.player = Some(player);

        let mut events = services.spells.learn_unlocked(world, player, 1);
        events.extend(self.populate_current_level(true));
        events.push(GameEvent::State(GameStateChanged {
            state: GameMode::Playing.label().to_string(),
        }));
        events.push(GameEvent::message(
            "Welcome to the dungeon! Find the stairs down to descend deeper.",
            LogSeverity::System,
        ));
        self.refresh_fov();
        self.dispatch(events);
        Ok(())
    }

    /// Enemies, items, hazards and (on guarded floors) a boss for the
    /// level the player just arrived on
    fn populate_current_level(&mut self, with_townsfolk: bool) -> Vec<GameEvent> {
        let number = self.levels.current_level();
        let services = self.services.clone();
        let world = self.worlds.world_mut(WorldMode::Play);
        let Some(map) = self.levels.current_map() else {
            return Vec::new();
        };
        let dice = &mut self.dice;
        let player_at = self
            .player
            .and_then(|p| world.get::<&Position>(p).ok().map(|p| *p));

        let mut events = Vec::new();
        if with_townsfolk {
            events.extend(spawn::spawn_townsfolk(
                world,
                map,
                dice,
                &services.npcs,
                &services.merchants,
                player_at,
            ));
        }
        let count = difficulty::enemy_count(self.config.base_enemy_count, number);
        events.extend(spawn::spawn_enemies(world, map, dice, number, count, player_at));
        events.extend(item_spawn::populate_level(world, map, dice, number));

        let hazard_count = 2 + number as usize / 2;
        let hazards = services
            .hazards
            .spawn_hazards_in_area(world, map, dice, 1, 1, map.width - 2, map.height - 2, hazard_count);
        debug!(level = number, hazards = hazards.len(), "Hazards placed");

        if let Some((_, boss_id)) = BOSS_FLOORS.iter().find(|(floor, _)| *floor == number) {
            let lair = map
                .rooms
                .last()
                .map(|r| r.center())
                .filter(|p| movement::blocker_at(world, *p).is_none() && Some(*p) != player_at)
                .or_else(|| spawn::random_open_tile(world, map, dice, player_at, 6));
            let player_level = self
                .player
                .map(|p| services.progression.level(world, p))
                .unwrap_or(1);
            if let Some(at) = lair {
                match services.bosses.spawn_boss(world, boss_id, player_level, at) {
                    Ok(boss) => {
                        let name = world.get::<&Name>(boss).map(|n| n.0.clone()).unwrap_or_default();
                        let _ = world.insert_one(boss, IntelligentAi::boss(name));
                        events.push(GameEvent::message(
                            "You sense a powerful presence on this level...",
                            LogSeverity::Danger,
                        ));
                    }
                    Err(e) => warn!(boss = boss_id, error = %e, "Could not spawn boss"),
                }
            }
        }
        events
    }

    pub fn handle_player_action(&mut self, action: PlayerAction) -> Result<bool> {
        let player = self.player.ok_or_else(|| LablabError::InvalidAction("No game in progress".into()))?;
        if self.mode != GameMode::Playing {
            return Ok(false);
        }
        if self.worlds.mode() != WorldMode::Play {
            self.log.warning(self.turn, "Switch to play mode to act.");
            return Ok(false);
        }
        if self.dialogue.is_some() && !matches!(action, PlayerAction::ChooseDialogue(_) | PlayerAction::EndDialogue) {
            self.end_dialogue(player);
        }

        let services = self.services.clone();
        let mut events = Vec::new();
        let took_turn = match action {
            PlayerAction::Move(direction) => self.player_move(player, direction, &mut events),
            PlayerAction::Wait => true,
            PlayerAction::PickUp => self.pick_up(player, &mut events),
            PlayerAction::UseItem(item) => {
                let name = item_name(self.play_world(), item);
                let outcome = services.inventory.use_consumable(self.play_world_mut(), player, item);
                if outcome.success {
                    events.push(GameEvent::Used(ItemUsed { item_name: name }));
                }
                self.report(&outcome, LogSeverity::Success)
            }
            PlayerAction::Equip(item) => {
                let outcome = services.inventory.equip(self.play_world_mut(), player, item);
                self.report(&outcome, LogSeverity::Info)
            }
            PlayerAction::Descend => self.take_stairs(player, true, &mut events),
            PlayerAction::Ascend => self.take_stairs(player, false, &mut events),
            PlayerAction::ChooseDialogue(choice) => {
                self.choose_dialogue(player, &choice, &mut events);
                false
            }
            PlayerAction::EndDialogue => {
                self.end_dialogue(player);
                false
            }
            PlayerAction::Buy { item, quantity } => {
                let outcome = services.merchants.buy(self.play_world_mut(), player, &item, quantity);
                self.report(&outcome, LogSeverity::Loot);
                false
            }
            PlayerAction::Sell { item, quantity } => {
                let outcome = services.merchants.sell(self.play_world_mut(), player, &item, quantity);
                self.report(&outcome, LogSeverity::Loot);
                false
            }
            PlayerAction::EndTrade => {
                let outcome = services.merchants.end_trade(player);
                self.report(&outcome, LogSeverity::Info);
                false
            }
            PlayerAction::Cast { spell, target } => self.cast(player, &spell, target, &mut events),
            PlayerAction::Search => self.search(player),
            PlayerAction::Disarm => self.disarm(player, &mut events),
        };

        if took_turn {
            actor::consume_energy(self.play_world_mut(), player);
        }
        self.dispatch(events);
        if took_turn && self.mode == GameMode::Playing {
            self.update();
        }
        Ok(took_turn)
    }

    fn report(&mut self, outcome: &Outcome, severity: LogSeverity) -> bool {
        let severity = if outcome.success { severity } else { LogSeverity::Warning };
        self.log.log(self.turn, outcome.message.clone(), severity);
        outcome.success
    }

    fn player_move(&mut self, player: Entity, direction: Direction, events: &mut Vec<GameEvent>) -> bool {
        if self.services.merchants.is_trading(player) {
            self.services.merchants.end_trade(player);
        }
        let world = self.worlds.world_mut(WorldMode::Play);
        let Some(map) = self.levels.current_map() else {
            return false;
        };
        match movement::try_move(world, map, player, direction) {
            movement::MoveResult::Moved(moved) => {
                events.push(GameEvent::Moved(moved));
                true
            }
            movement::MoveResult::Bumped(other) => {
                if world.get::<&Npc>(other).is_ok() && world.get::<&Ai>(other).is_err() {
                    self.talk_to(player, other, events);
                    false
                } else if world.get::<&Health>(other).is_ok() {
                    events.extend(combat::attack(world, player, other, &mut self.dice, self.levels.current_level()));
                    true
                } else {
                    false
                }
            }
            movement::MoveResult::Blocked | movement::MoveResult::NoPosition => false,
        }
    }

    fn pick_up(&mut self, player: Entity, events: &mut Vec<GameEvent>) -> bool {
        let services = self.services.clone();
        let items = services.inventory.pickupable_items(self.play_world(), player);
        let Some(&item) = items.first() else {
            self.log.info(self.turn, "There is nothing here to pick up.");
            return false;
        };
        let count = self
            .play_world()
            .get::<&Stackable>(item)
            .map(|s| s.count)
            .unwrap_or(1);
        let name = item_name(self.play_world(), item);
        let outcome = services.inventory.pickup(self.play_world_mut(), player, item);
        if outcome.success {
            events.push(GameEvent::PickedUp(ItemPickedUp {
                item_name: name.clone(),
                count,
            }));
            events.extend(services.quests.on_item_collected(self.play_world_mut(), player, &name, count));
        }
        self.report(&outcome, LogSeverity::Loot)
    }

    fn take_stairs(&mut self, player: Entity, down: bool, events: &mut Vec<GameEvent>) -> bool {
        let wanted = if down { Tile::StairsDown } else { Tile::StairsUp };
        let on_stairs = match (self.levels.current_map(), self.player_position()) {
            (Some(map), Some(pos)) => map.tile(pos) == wanted,
            _ => false,
        };
        // Standing on the last level's floor counts as reaching the victory chamber
        let at_victory = down && self.levels.is_victory_level(self.levels.current_level());
        if !on_stairs && !at_victory {
            let text = if down {
                "There are no stairs down here."
            } else {
                "There are no stairs up here."
            };
            self.log.info(self.turn, text);
            return false;
        }

        let from = self.levels.current_level();
        let world = self.worlds.world_mut(WorldMode::Play);
        let transition = if down {
            self.levels.descend(world, player)
        } else {
            self.levels.ascend(world, player)
        };
        self.arrive(from, transition, events)
    }

    fn arrive(&mut self, from: u32, transition: LevelTransition, events: &mut Vec<GameEvent>) -> bool {
        let severity = if transition.success {
            LogSeverity::System
        } else {
            LogSeverity::Warning
        };
        events.push(GameEvent::message(transition.message.clone(), severity));
        if !transition.success {
            return false;
        }
        if transition.victory_triggered {
            self.mode = GameMode::Victory;
            events.push(GameEvent::message(
                "You have conquered the dungeon! VICTORY!",
                LogSeverity::Success,
            ));
            events.push(GameEvent::State(GameStateChanged {
                state: GameMode::Victory.label().to_string(),
            }));
        }
        if transition.new_level == from {
            return false;
        }

        if transition.new_record_depth {
            events.push(GameEvent::message(
                format!(
                    "New depth record: {}!",
                    difficulty::depth_display(transition.new_level, self.config.feet_per_level)
                ),
                LogSeverity::Success,
            ));
        }
        events.push(GameEvent::Level(LevelChanged {
            from,
            to: transition.new_level,
            new_record: transition.new_record_depth,
        }));
        if transition.newly_generated {
            // An evicted first level comes back with its townsfolk
            events.extend(self.populate_current_level(transition.new_level == 1));
        } else if transition.new_level == 1 {
            let services = self.services.clone();
            let deepest = self.levels.personal_best();
            let refreshed = services
                .merchants
                .refresh_all(self.worlds.world_mut(WorldMode::Play), deepest, &mut self.dice);
            debug!(refreshed, "Merchant stock refreshed");
        }
        if let Some(pos) = self.player_position() {
            events.push(GameEvent::Reached(LocationReached {
                level: transition.new_level,
                position: pos,
            }));
        }
        self.refresh_fov();
        true
    }

    fn talk_to(&mut self, player: Entity, npc: Entity, events: &mut Vec<GameEvent>) {
        let services = self.services.clone();
        let world = self.worlds.world_mut(WorldMode::Play);
        let npc_id = world.get::<&Npc>(npc).map(|n| n.id.clone()).ok();
        match services.npcs.start_dialogue(world, player, npc) {
            Ok(step) => {
                if let Some(id) = npc_id {
                    events.extend(services.quests.on_npc_talked_to(world, player, &id));
                }
                self.dialogue = step.view;
                self.apply_dialogue_effects(player, step.effects, events);
            }
            Err(LablabError::InvalidAction(message)) => {
                if services.merchants.is_merchant(world, npc) {
                    let outcome = services.merchants.start_trade(world, player, npc);
                    self.report(&outcome, LogSeverity::Info);
                } else {
                    self.log.info(self.turn, message);
                }
            }
            Err(e) => warn!(error = %e, "Dialogue failed to start"),
        }
    }

    fn choose_dialogue(&mut self, player: Entity, choice: &str, events: &mut Vec<GameEvent>) {
        let services = self.services.clone();
        let world = self.worlds.world_mut(WorldMode::Play);
        if !services.npcs.in_dialogue(world, player) {
            // The last page of a finished conversation
            self.dialogue = None;
            return;
        }
        match services.npcs.select_choice(world, player, choice) {
            Ok(step) => {
                self.dialogue = step.view;
                self.apply_dialogue_effects(player, step.effects, events);
            }
            Err(e) => self.log.warning(self.turn, e.to_string()),
        }
    }

    fn end_dialogue(&mut self, player: Entity) {
        let services = self.services.clone();
        services.npcs.end_dialogue(self.play_world_mut(), player);
        self.dialogue = None;
    }

    fn apply_dialogue_effects(&mut self, player: Entity, effects: Vec<DialogueEffect>, events: &mut Vec<GameEvent>) {
        let services = self.services.clone();
        for effect in effects {
            let world = self.worlds.world_mut(WorldMode::Play);
            match effect {
                DialogueEffect::AcceptQuest(id) => {
                    let (outcome, quest_events) = services.quests.start(world, player, &id);
                    events.extend(quest_events);
                    if !outcome.success {
                        self.log.warning(self.turn, outcome.message);
                    }
                }
                DialogueEffect::CompleteQuest(id) => {
                    let (outcome, quest_events) = services.quests.complete(world, player, &id);
                    events.extend(quest_events);
                    if !outcome.success {
                        self.log.warning(self.turn, outcome.message);
                    }
                }
                DialogueEffect::GiveItem { item, count } => {
                    let outcome = inventory::give_item(world, player, &item, count);
                    self.report(&outcome, LogSeverity::Loot);
                }
                DialogueEffect::TakeItem { item, count } => {
                    let outcome = inventory::take_item(world, player, &item, count);
                    self.report(&outcome, LogSeverity::Info);
                }
                DialogueEffect::GiveGold(amount) => {
                    services.merchants.add_gold(world, player, amount);
                    self.log.log(self.turn, format!("You receive {} gold.", amount), LogSeverity::Loot);
                }
                DialogueEffect::TakeGold(amount) => {
                    if services.merchants.remove_gold(world, player, amount) {
                        self.log.info(self.turn, format!("You hand over {} gold.", amount));
                    }
                }
                DialogueEffect::OpenTrade { npc } => {
                    let outcome = services.merchants.start_trade(world, player, npc);
                    self.report(&outcome, LogSeverity::Info);
                }
                DialogueEffect::TriggerEvent(name) => {
                    debug!(event = %name, "Dialogue event");
                }
                DialogueEffect::StartCombat { npc } => {
                    turn_hostile(world, npc);
                    services.npcs.end_dialogue(world, player);
                    self.dialogue = None;
                    events.push(GameEvent::message("The conversation turns violent!", LogSeverity::Danger));
                }
            }
        }
    }

    fn cast(&mut self, player: Entity, spell: &str, target: SpellTarget, events: &mut Vec<GameEvent>) -> bool {
        let services = self.services.clone();
        let dungeon_level = self.levels.current_level();
        let Some(map) = self.levels.current_map_mut() else {
            return false;
        };
        let mut ctx = CastContext {
            world: self.worlds.world_mut(WorldMode::Play),
            map,
            dice: &mut self.dice,
            dungeon_level,
        };
        let result = services.spells.cast(&mut ctx, player, spell, target);
        let severity = if result.success {
            LogSeverity::Combat
        } else {
            LogSeverity::Warning
        };
        self.log.log(self.turn, result.message, severity);
        events.extend(result.events);
        result.success
    }

    fn search(&mut self, player: Entity) -> bool {
        let Some(pos) = self.player_position() else {
            return false;
        };
        let services = self.services.clone();
        let world = self.worlds.world_mut(WorldMode::Play);
        let skill = services.progression.level(world, player) as i32;
        let found = services.hazards.detect_hazards(world, pos, SEARCH_RANGE, skill, &mut self.dice);
        if found.is_empty() {
            self.log.info(self.turn, "You search the area but find nothing.");
        } else {
            self.log.warning(self.turn, format!("You discover {} hidden hazard(s)!", found.len()));
        }
        true
    }

    fn disarm(&mut self, player: Entity, events: &mut Vec<GameEvent>) -> bool {
        let Some(pos) = self.player_position() else {
            return false;
        };
        let target = {
            let world = self.play_world();
            Direction::ALL
                .iter()
                .map(|d| pos.step(*d))
                .chain(std::iter::once(pos))
                .flat_map(|p| hazards_at(world, p))
                .find(|h| {
                    world
                        .get::<&Hazard>(*h)
                        .map(|h| h.visible && h.state != HazardState::Disabled)
                        .unwrap_or(false)
                })
        };
        let Some(hazard) = target else {
            self.log.info(self.turn, "There is nothing here to disarm.");
            return false;
        };
        let services = self.services.clone();
        let world = self.worlds.world_mut(WorldMode::Play);
        let skill = services.progression.level(world, player) as i32;
        let (outcome, hazard_events) = services.hazards.disarm(world, player, hazard, skill, &mut self.dice);
        events.extend(hazard_events);
        self.report(&outcome, LogSeverity::Success);
        true
    }

    /// Run the world until the hero may act again
    ///
    /// Does nothing outside the play world or once the run is over.
    pub fn update(&mut self) {
        let Some(player) = self.player else {
            return;
        };
        if self.mode != GameMode::Playing || self.worlds.mode() != WorldMode::Play {
            return;
        }
        self.turn += 1;
        let level = self.levels.current_level();
        let services = self.services.clone();
        let mut events = Vec::new();
        {
            let world = self.worlds.world_mut(WorldMode::Play);
            let Some(map) = self.levels.current_map() else {
                return;
            };
            let dice = &mut self.dice;

            events.extend(status_effects::process_status_effects(world, dice, level));
            events.extend(services.hazards.update(world, dice, level));
            tick_spellcasters(world, enemy_in_view(world, map));
            events.extend(services.bosses.update(world, map, dice, 1.0, level));

            let mut passes = 0;
            while alive(world, player) && !actor::is_player_turn(world, player) && passes < MAX_WORLD_PASSES {
                actor::process_tick(world);
                events.extend(ai::run_ai(world, map, player, dice, level, &self.config));
                idle_stragglers(world, player);
                passes += 1;
            }
            if passes == MAX_WORLD_PASSES {
                warn!(turn = self.turn, "World did not hand control back to the player");
            }
            events.extend(services.quests.auto_complete(world, player));
        }
        self.dispatch(events);
        self.refresh_fov();
    }

    /// React to, log and publish a batch of events, including everything
    /// the reactions themselves produce
    fn dispatch(&mut self, events: Vec<GameEvent>) {
        let mut queue: VecDeque<GameEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            queue.extend(self.react(&event));
            if let GameEvent::Message { text, severity } = &event {
                self.log.log(self.turn, text.clone(), *severity);
            }
            self.services.events.publish_game_event(&event);
        }
    }

    fn react(&mut self, event: &GameEvent) -> Vec<GameEvent> {
        let Some(player) = self.player else {
            return Vec::new();
        };
        let services = self.services.clone();
        let level = self.levels.current_level();
        let world = self.worlds.world_mut(WorldMode::Play);
        let mut follow_up = Vec::new();

        match event {
            GameEvent::Moved(moved) => {
                follow_up.extend(services.hazards.on_entity_moved(world, moved.entity, moved.to, &mut self.dice, level));
                if moved.is_player {
                    follow_up.extend(services.quests.on_location_reached(world, player, level, moved.to));
                }
            }
            GameEvent::Reached(reached) => {
                follow_up.extend(services.quests.on_location_reached(world, player, reached.level, reached.position));
            }
            GameEvent::Died(died) if died.was_player => {
                if self.mode == GameMode::Playing {
                    info!(turn = self.turn, depth = level, "Player died");
                    self.mode = GameMode::GameOver;
                    follow_up.push(GameEvent::message("GAME OVER. Press R to start a new run.", LogSeverity::Danger));
                    follow_up.push(GameEvent::State(GameStateChanged {
                        state: GameMode::GameOver.label().to_string(),
                    }));
                }
            }
            GameEvent::Died(died) => {
                if let Some(kind) = died.enemy_kind {
                    self.kills += 1;
                    follow_up.extend(services.quests.on_enemy_killed(world, player, kind));
                    let xp = kill_reward(kind, level);
                    follow_up.push(GameEvent::message(format!("+{} XP", xp), LogSeverity::Info));
                    follow_up.extend(services.progression.award(world, player, xp).events);
                }
                if world.get::<&Boss>(died.entity).is_ok() {
                    self.kills += 1;
                    if let Some((drop, loot_events)) = services.bosses.defeat(world, died.entity, &mut self.dice) {
                        services.merchants.add_gold(world, player, drop.gold);
                        follow_up.extend(loot_events);
                        follow_up.extend(services.progression.award(world, player, drop.experience).events);
                    }
                }
            }
            GameEvent::LeveledUp(up) => {
                follow_up.extend(services.spells.learn_unlocked(world, player, up.new_level));
            }
            _ => {}
        }
        follow_up
    }

    fn refresh_fov(&mut self) {
        let Some(pos) = self.player_position() else {
            return;
        };
        let radius = self.config.fov_radius;
        if let Some(map) = self.levels.current_map_mut() {
            map.compute_fov(pos, radius);
        }
    }

    pub fn switch_mode(&mut self, mode: WorldMode) {
        if self.worlds.switch_mode(mode) {
            self.log.log(self.turn, format!("Switched to {:?} mode", mode), LogSeverity::System);
        }
    }

    /// The world gameplay runs in, whatever the current mode
    pub fn play_world(&self) -> &World {
        self.worlds.world(WorldMode::Play)
    }

    fn play_world_mut(&mut self) -> &mut World {
        self.worlds.world_mut(WorldMode::Play)
    }

    pub fn world(&self) -> &World {
        self.worlds.current()
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.worlds.current_mut()
    }

    pub fn worlds(&self) -> &GameWorldManager {
        &self.worlds
    }

    pub fn world_mode(&self) -> WorldMode {
        self.worlds.mode()
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn player(&self) -> Option<Entity> {
        self.player
    }

    pub fn player_position(&self) -> Option<Position> {
        let player = self.player?;
        self.play_world().get::<&Position>(player).ok().map(|p| *p)
    }

    pub fn map(&self) -> Option<&DungeonMap> {
        self.levels.current_map()
    }

    pub fn levels(&self) -> &LevelManager {
        &self.levels
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// Add a line from outside the turn loop, e.g. an avatar speaking
    pub fn note(&mut self, message: impl Into<String>, severity: LogSeverity) {
        self.log.log(self.turn, message, severity);
    }

    pub fn services(&self) -> &GameServices {
        &self.services
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn kills(&self) -> u32 {
        self.kills
    }

    pub fn dialogue(&self) -> Option<&DialogueView> {
        self.dialogue.as_ref()
    }

    pub fn trading_with(&self) -> Option<Entity> {
        self.services.merchants.trading_with(self.player?)
    }

    /// Closest living enemy the hero can see
    pub fn nearest_visible_enemy(&self) -> Option<Entity> {
        let origin = self.player_position()?;
        let map = self.levels.current_map()?;
        self.play_world()
            .query::<(&Position, &Health)>()
            .with::<&Ai>()
            .iter()
            .filter(|(_, (p, h))| h.is_alive() && map.is_visible(**p))
            .min_by_key(|(_, (p, _))| p.chebyshev(&origin))
            .map(|(e, _)| e)
    }

    pub fn player_snapshot(&self) -> Option<PlayerSnapshot> {
        let player = self.player?;
        let world = self.play_world();
        let health = world.get::<&Health>(player).ok().map(|h| *h)?;
        let combat = status_effects::effective_combat(world, player)?;
        let speed = status_effects::effective_speed(world, player).unwrap_or(0);
        let exp = world.get::<&Experience>(player).ok().map(|e| *e).unwrap_or_else(Experience::new);
        let mana = world.get::<&Mana>(player).ok().map(|m| *m).unwrap_or_else(|| Mana::new(0));
        let gold = world.get::<&Gold>(player).map(|g| g.amount).unwrap_or(0);
        let depth = self.levels.current_level();
        Some(PlayerSnapshot {
            health: health.current,
            max_health: health.maximum,
            attack: combat.attack,
            defense: combat.defense,
            speed,
            level: exp.level,
            experience: exp.current,
            experience_to_next: exp.to_next_level,
            gold,
            mana: mana.current,
            max_mana: mana.maximum,
            depth,
            depth_feet: self.levels.depth_feet(depth),
            position: self.player_position()?,
        })
    }
}

fn item_name(world: &World, item: Entity) -> String {
    world
        .get::<&Item>(item)
        .map(|i| i.name.clone())
        .unwrap_or_else(|_| "item".to_string())
}

fn alive(world: &World, entity: Entity) -> bool {
    world.get::<&Health>(entity).map(|h| h.is_alive()).unwrap_or(false)
}

/// Any living hostile inside the hero's field of view
fn enemy_in_view(world: &World, map: &DungeonMap) -> bool {
    world
        .query::<(&Position, &Health)>()
        .with::<&Ai>()
        .iter()
        .any(|(_, (p, h))| h.is_alive() && map.is_visible(*p))
}

/// Ready actors with nobody driving them would stall the turn loop
fn idle_stragglers(world: &mut World, player: Entity) {
    let stragglers: Vec<Entity> = world
        .query::<&Actor>()
        .without::<&Ai>()
        .iter()
        .filter(|(e, a)| *e != player && a.can_act())
        .map(|(e, _)| e)
        .collect();
    for entity in stragglers {
        actor::consume_energy(world, entity);
    }
}

/// An NPC provoked in conversation becomes a regular melee enemy
fn turn_hostile(world: &mut World, npc: Entity) {
    if let Ok(mut n) = world.get::<&mut Npc>(npc) {
        n.interactable = false;
    }
    if world.get::<&Health>(npc).is_err() {
        let _ = world.insert_one(npc, Health::new(spawn::ENEMY_BASE_HEALTH));
    }
    let _ = world.insert(
        npc,
        (
            Combat::new(spawn::ENEMY_BASE_ATTACK + 3, spawn::ENEMY_BASE_DEFENSE),
            Actor::new(100),
            Ai::new(AiBehavior::Chase),
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Enemy, EnemyKind, Inventory};

    fn started(seed: u64) -> GameStateManager {
        let mut game = GameStateManager::new(GameConfig::default(), GameServices::with_defaults().unwrap());
        game.new_game(seed).unwrap();
        game
    }

    fn clear_hostiles(game: &mut GameStateManager) {
        let hostile: Vec<Entity> = game.world().query::<&Ai>().iter().map(|(e, _)| e).collect();
        for e in hostile {
            game.world_mut().despawn(e).unwrap();
        }
    }

    /// Two free floor tiles side by side
    fn open_pair(game: &GameStateManager) -> (Position, Position) {
        let map = game.map().unwrap();
        let world = game.world();
        map.floor_tiles()
            .find(|p| {
                !movement::is_blocked(world, map, *p) && !movement::is_blocked(world, map, p.step(Direction::East))
            })
            .map(|p| (p, p.step(Direction::East)))
            .unwrap()
    }

    fn place_player(game: &mut GameStateManager, at: Position) {
        let player = game.player().unwrap();
        *game.world_mut().get::<&mut Position>(player).unwrap() = at;
    }

    #[test]
    fn test_new_game_spawns_hero_and_enemies() {
        let game = started(42);
        let hero = game.player_snapshot().unwrap();
        assert_eq!(hero.max_health, 100);
        assert_eq!((hero.attack, hero.defense), (10, 5));
        assert_eq!(hero.depth, 1);
        assert_eq!(hero.level, 1);

        let player = game.player().unwrap();
        assert_eq!(game.world().get::<&Inventory>(player).unwrap().max_capacity, 20);
        let enemies = game.world().query::<&Enemy>().iter().count();
        assert_eq!(enemies, difficulty::enemy_count(10, 1));
        assert_eq!(game.mode(), GameMode::Playing);
        assert!(!game.log().is_empty());
    }

    #[test]
    fn test_same_seed_same_dungeon() {
        let a = started(9);
        let b = started(9);
        assert_eq!(a.player_position(), b.player_position());
        assert_eq!(a.map().unwrap().rooms.len(), b.map().unwrap().rooms.len());
    }

    #[test]
    fn test_killing_an_enemy_pays_out() {
        let mut game = started(3);
        clear_hostiles(&mut game);
        let (a, b) = open_pair(&game);
        place_player(&mut game, a);
        let goblin = spawn::spawn_enemy(game.world_mut(), EnemyKind::Goblin, b, &mut DiceRoller::seeded(1), 1);
        game.world_mut().get::<&mut Health>(goblin).unwrap().current = 1;
        game.world_mut().get::<&mut Combat>(goblin).unwrap().defense = 0;

        let took = game.handle_player_action(PlayerAction::Move(Direction::East)).unwrap();
        assert!(took);
        assert_eq!(game.kills(), 1);
        let hero = game.player_snapshot().unwrap();
        assert!(hero.experience > 0 || hero.level > 1);
    }

    #[test]
    fn test_player_death_ends_the_run() {
        let mut game = started(11);
        clear_hostiles(&mut game);
        let (a, b) = open_pair(&game);
        place_player(&mut game, a);
        let troll = spawn::spawn_enemy(game.world_mut(), EnemyKind::Troll, b, &mut DiceRoller::seeded(2), 1);
        game.world_mut().get::<&mut Combat>(troll).unwrap().attack = 500;

        for _ in 0..10 {
            if game.mode() != GameMode::Playing {
                break;
            }
            game.handle_player_action(PlayerAction::Wait).unwrap();
        }
        assert_eq!(game.mode(), GameMode::GameOver);
        assert!(!game.handle_player_action(PlayerAction::Wait).unwrap());
    }

    #[test]
    fn test_stairs_must_be_underfoot() {
        let mut game = started(5);
        clear_hostiles(&mut game);
        assert!(!game.handle_player_action(PlayerAction::Descend).unwrap());
        assert_eq!(game.levels().current_level(), 1);

        let stairs = game.levels().current().unwrap().down_stairs.unwrap();
        place_player(&mut game, stairs);
        assert!(game.handle_player_action(PlayerAction::Descend).unwrap());
        assert_eq!(game.levels().current_level(), 2);
        assert_eq!(game.levels().personal_best(), 2);
    }

    #[test]
    fn test_bumping_an_npc_opens_dialogue() {
        let mut game = started(8);
        clear_hostiles(&mut game);
        let elder = game.services().npcs.find_npc(game.world(), "elder").unwrap();
        let at = *game.world().get::<&Position>(elder).unwrap();
        let map = game.map().unwrap();
        let (stand, dir) = Direction::ALL
            .iter()
            .map(|d| (at.step(*d), *d))
            .find(|(p, _)| !movement::is_blocked(game.world(), map, *p))
            .map(|(p, d)| (p, Direction::toward(p, at).unwrap_or(d)))
            .unwrap();
        place_player(&mut game, stand);

        let took = game.handle_player_action(PlayerAction::Move(dir)).unwrap();
        assert!(!took);
        let view = game.dialogue().unwrap();
        assert_eq!(view.speaker, "Elder Maren");

        game.handle_player_action(PlayerAction::EndDialogue).unwrap();
        assert!(game.dialogue().is_none());
    }

    #[test]
    fn test_edit_mode_pauses_play() {
        let mut game = started(1);
        let turn = game.turn();
        game.switch_mode(WorldMode::Edit);
        assert!(!game.handle_player_action(PlayerAction::Wait).unwrap());
        assert_eq!(game.turn(), turn);
        assert_eq!(game.world().len(), 0);

        game.switch_mode(WorldMode::Play);
        assert!(game.handle_player_action(PlayerAction::Wait).unwrap());
        assert_eq!(game.turn(), turn + 1);
    }

    #[test]
    fn test_actions_need_a_game() {
        let mut game = GameStateManager::new(GameConfig::default(), GameServices::with_defaults().unwrap());
        assert!(game.handle_player_action(PlayerAction::Wait).is_err());
    }
}
