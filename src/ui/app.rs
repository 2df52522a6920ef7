//! Front-end state: which overlay is open and how keys become actions

use crossterm::event::KeyEvent;
use tracing::debug;

use crate::components::ItemKind;
use crate::core::error::Result;
use crate::game::log::LogSeverity;
use crate::game::state::{GameMode, GameStateManager, PlayerAction};
use crate::game::world::WorldMode;
use crate::gameplay::inventory::InventoryEntry;
use crate::gameplay::merchant::StockListing;
use crate::gameplay::spells::{Spell, SpellBook, SpellTarget, Targeting};
use crate::ui::input::{map_key, Command, KeyContext};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overlay {
    #[default]
    None,
    Help,
    Inventory,
    Spells,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TradePage {
    #[default]
    Buy,
    Sell,
}

pub struct App {
    game: GameStateManager,
    overlay: Overlay,
    trade_page: TradePage,
    seed: u64,
    quit: bool,
}

impl App {
    pub fn new(game: GameStateManager, seed: u64) -> Self {
        Self {
            game,
            overlay: Overlay::None,
            trade_page: TradePage::Buy,
            seed,
            quit: false,
        }
    }

    pub fn game(&self) -> &GameStateManager {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut GameStateManager {
        &mut self.game
    }

    pub fn overlay(&self) -> Overlay {
        self.overlay
    }

    pub fn trade_page(&self) -> TradePage {
        self.trade_page
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn key_context(&self) -> KeyContext {
        let menu = matches!(self.overlay, Overlay::Inventory | Overlay::Spells)
            || self.game.dialogue().is_some()
            || self.game.trading_with().is_some();
        if menu {
            KeyContext::Menu
        } else {
            KeyContext::Map
        }
    }

    /// Returns true when the key cost the hero a turn
    pub fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        // Any key dismisses help, bound or not
        if self.overlay == Overlay::Help && self.key_context() == KeyContext::Map {
            self.overlay = Overlay::None;
            return Ok(false);
        }
        match map_key(key, self.key_context()) {
            Some(command) => self.apply(command),
            None => Ok(false),
        }
    }

    pub fn apply(&mut self, command: Command) -> Result<bool> {
        if command == Command::Quit {
            self.quit = true;
            return Ok(false);
        }
        if let Some(view) = self.game.dialogue() {
            let action = match command {
                Command::Select(i) => match view.choices.get(i) {
                    Some(choice) => PlayerAction::ChooseDialogue(choice.id.clone()),
                    None => return Ok(false),
                },
                Command::Back => PlayerAction::EndDialogue,
                _ => return Ok(false),
            };
            return self.game.handle_player_action(action);
        }
        if self.game.trading_with().is_some() {
            return self.apply_trade(command);
        }

        match self.overlay {
            Overlay::Help => {
                self.overlay = Overlay::None;
                return Ok(false);
            }
            Overlay::Inventory => return self.apply_inventory(command),
            Overlay::Spells => return self.apply_spells(command),
            Overlay::None => {}
        }

        let action = match command {
            Command::Move(direction) => PlayerAction::Move(direction),
            Command::Wait => PlayerAction::Wait,
            Command::PickUp => PlayerAction::PickUp,
            Command::Descend => PlayerAction::Descend,
            Command::Ascend => PlayerAction::Ascend,
            Command::Search => PlayerAction::Search,
            Command::Disarm => PlayerAction::Disarm,
            Command::Inventory => {
                self.overlay = Overlay::Inventory;
                return Ok(false);
            }
            Command::Spells => {
                self.overlay = Overlay::Spells;
                return Ok(false);
            }
            Command::Help => {
                self.overlay = Overlay::Help;
                return Ok(false);
            }
            Command::ToggleEditMode => {
                let next = match self.game.world_mode() {
                    WorldMode::Play => WorldMode::Edit,
                    WorldMode::Edit => WorldMode::Play,
                };
                self.game.switch_mode(next);
                return Ok(false);
            }
            Command::Restart => {
                if self.game.mode() != GameMode::Playing {
                    self.seed = self.seed.wrapping_add(1);
                    debug!(seed = self.seed, "Restarting");
                    self.game.new_game(self.seed)?;
                }
                return Ok(false);
            }
            Command::Select(_) | Command::NextTab | Command::Back | Command::Quit => return Ok(false),
        };
        self.game.handle_player_action(action)
    }

    fn apply_trade(&mut self, command: Command) -> Result<bool> {
        let action = match command {
            Command::Back => {
                self.trade_page = TradePage::Buy;
                PlayerAction::EndTrade
            }
            Command::NextTab => {
                self.trade_page = match self.trade_page {
                    TradePage::Buy => TradePage::Sell,
                    TradePage::Sell => TradePage::Buy,
                };
                return Ok(false);
            }
            Command::Select(i) => match self.trade_page {
                TradePage::Buy => match self.shop_listing().into_iter().nth(i) {
                    Some(row) if row.available => PlayerAction::Buy {
                        item: row.item,
                        quantity: 1,
                    },
                    _ => return Ok(false),
                },
                TradePage::Sell => match self.inventory_entries().into_iter().nth(i) {
                    Some(entry) if !entry.equipped => PlayerAction::Sell {
                        item: entry.name,
                        quantity: 1,
                    },
                    _ => return Ok(false),
                },
            },
            _ => return Ok(false),
        };
        self.game.handle_player_action(action)
    }

    fn apply_inventory(&mut self, command: Command) -> Result<bool> {
        let entry = match command {
            Command::Select(i) => self.inventory_entries().into_iter().nth(i),
            _ => {
                self.overlay = Overlay::None;
                return Ok(false);
            }
        };
        let Some(entry) = entry else {
            return Ok(false);
        };
        let action = match entry.kind {
            ItemKind::Consumable => PlayerAction::UseItem(entry.entity),
            ItemKind::Weapon | ItemKind::Armor | ItemKind::Accessory => PlayerAction::Equip(entry.entity),
            ItemKind::Miscellaneous => {
                self.game
                    .note(format!("You can't use the {}.", entry.name), LogSeverity::Warning);
                return Ok(false);
            }
        };
        self.overlay = Overlay::None;
        self.game.handle_player_action(action)
    }

    fn apply_spells(&mut self, command: Command) -> Result<bool> {
        let spell = match command {
            Command::Select(i) => self.known_spells().into_iter().nth(i),
            _ => {
                self.overlay = Overlay::None;
                return Ok(false);
            }
        };
        let Some(spell) = spell else {
            return Ok(false);
        };
        let enemy = self.game.nearest_visible_enemy();
        let target = match spell.targeting {
            Targeting::SelfOnly => SpellTarget::None,
            Targeting::Single => match enemy {
                Some(e) => SpellTarget::Entity(e),
                None => {
                    self.game.note("No target in sight.", LogSeverity::Warning);
                    return Ok(false);
                }
            },
            Targeting::Area => {
                let center = enemy
                    .and_then(|e| self.game.play_world().get::<&crate::components::Position>(e).ok().map(|p| *p))
                    .or_else(|| self.game.player_position());
                match center {
                    Some(p) => SpellTarget::Position(p),
                    None => return Ok(false),
                }
            }
        };
        self.overlay = Overlay::None;
        self.game.handle_player_action(PlayerAction::Cast {
            spell: spell.id,
            target,
        })
    }

    pub fn inventory_entries(&self) -> Vec<InventoryEntry> {
        match self.game.player() {
            Some(player) => self.game.services().inventory.items(self.game.play_world(), player),
            None => Vec::new(),
        }
    }

    pub fn known_spells(&self) -> Vec<Spell> {
        let Some(player) = self.game.player() else {
            return Vec::new();
        };
        let known = match self.game.play_world().get::<&SpellBook>(player) {
            Ok(book) => book.known.clone(),
            Err(_) => return Vec::new(),
        };
        let spells = &self.game.services().spells;
        known.iter().filter_map(|id| spells.spell(id).cloned()).collect()
    }

    pub fn shop_listing(&self) -> Vec<StockListing> {
        let Some(merchant) = self.game.trading_with() else {
            return Vec::new();
        };
        let level = self.game.player_snapshot().map_or(1, |s| s.level);
        self.game
            .services()
            .merchants
            .listing(self.game.play_world(), merchant, level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GameConfig;
    use crate::core::types::Direction;
    use crate::game::state::GameServices;
    use crossterm::event::{KeyCode, KeyModifiers};

    fn app() -> App {
        let mut game = GameStateManager::new(GameConfig::default(), GameServices::with_defaults().unwrap());
        game.new_game(42).unwrap();
        App::new(game, 42)
    }

    fn press(app: &mut App, code: KeyCode) -> bool {
        app.handle_key(KeyEvent::new(code, KeyModifiers::NONE)).unwrap()
    }

    #[test]
    fn test_overlays_open_and_close() {
        let mut app = app();
        press(&mut app, KeyCode::Char('i'));
        assert_eq!(app.overlay(), Overlay::Inventory);
        assert_eq!(app.key_context(), KeyContext::Menu);
        press(&mut app, KeyCode::Esc);
        assert_eq!(app.overlay(), Overlay::None);

        press(&mut app, KeyCode::Char('?'));
        assert_eq!(app.overlay(), Overlay::Help);
        press(&mut app, KeyCode::Char('x'));
        assert_eq!(app.overlay(), Overlay::None);

        press(&mut app, KeyCode::Char('?'));
        let before = app.game().turn();
        assert!(!press(&mut app, KeyCode::Char('.')), "closing help costs no turn");
        assert_eq!(app.overlay(), Overlay::None);
        assert_eq!(app.game().turn(), before);
    }

    #[test]
    fn test_waiting_spends_a_turn() {
        let mut app = app();
        let before = app.game().turn();
        assert!(press(&mut app, KeyCode::Char('.')));
        assert!(app.game().turn() > before);
    }

    #[test]
    fn test_edit_mode_blocks_movement() {
        let mut app = app();
        press(&mut app, KeyCode::Char('e'));
        assert_eq!(app.game().world_mode(), WorldMode::Edit);
        assert!(!app.apply(Command::Move(Direction::North)).unwrap());
        press(&mut app, KeyCode::Char('e'));
        assert_eq!(app.game().world_mode(), WorldMode::Play);
    }

    #[test]
    fn test_quit() {
        let mut app = app();
        press(&mut app, KeyCode::Char('q'));
        assert!(app.should_quit());
    }
}
