//! Scripted player for headless runs
//!
//! Priorities, highest first: leave menus, drink when hurt, grab loot
//! underfoot, fight whatever is in view, take known stairs down, explore.

use hecs::World;

use crate::components::{Item, ItemKind, Position};
use crate::core::dice::DiceRoller;
use crate::core::types::Direction;
use crate::game::state::{GameStateManager, PlayerAction};
use crate::map::dungeon::{DungeonMap, Tile};
use crate::map::pathfinding::find_path;
use crate::systems::movement;

/// Health fraction below which the autopilot reaches for a consumable
const DRINK_BELOW: f32 = 0.4;

pub struct Autopilot {
    dice: DiceRoller,
}

impl Autopilot {
    pub fn new(seed: u64) -> Self {
        Self {
            dice: DiceRoller::seeded(seed),
        }
    }

    pub fn next_action(&mut self, game: &GameStateManager) -> PlayerAction {
        if game.dialogue().is_some() {
            return PlayerAction::EndDialogue;
        }
        if game.trading_with().is_some() {
            return PlayerAction::EndTrade;
        }
        let (Some(player), Some(at), Some(map)) = (game.player(), game.player_position(), game.map()) else {
            return PlayerAction::Wait;
        };
        let world = game.play_world();

        if let Some(stats) = game.player_snapshot() {
            let hurt = (stats.health as f32) < stats.max_health as f32 * DRINK_BELOW;
            if hurt {
                let potion = game
                    .services()
                    .inventory
                    .items(world, player)
                    .into_iter()
                    .find(|e| e.kind == ItemKind::Consumable);
                if let Some(potion) = potion {
                    return PlayerAction::UseItem(potion.entity);
                }
            }
        }

        let loot_here = world
            .query::<(&Item, &Position)>()
            .iter()
            .any(|(_, (_, p))| *p == at);
        if loot_here {
            return PlayerAction::PickUp;
        }

        if let Some(enemy) = game.nearest_visible_enemy() {
            if let Some(target) = world.get::<&Position>(enemy).ok().map(|p| *p) {
                if let Some(step) = self.step_toward(world, map, at, target) {
                    return PlayerAction::Move(step);
                }
            }
        }

        if map.tile(at) == Tile::StairsDown {
            return PlayerAction::Descend;
        }
        if let Some(stairs) = map.find_tile(Tile::StairsDown).filter(|p| map.is_explored(*p)) {
            if let Some(step) = self.step_toward(world, map, at, stairs) {
                return PlayerAction::Move(step);
            }
        }

        let frontier = map
            .floor_tiles()
            .filter(|p| !map.is_explored(*p))
            .min_by_key(|p| p.manhattan(&at));
        if let Some(goal) = frontier {
            if let Some(step) = self.step_toward(world, map, at, goal) {
                return PlayerAction::Move(step);
            }
        }

        match self.dice.choose(&Direction::ALL) {
            Some(d) => PlayerAction::Move(*d),
            None => PlayerAction::Wait,
        }
    }

    fn step_toward(&mut self, world: &World, map: &DungeonMap, from: Position, to: Position) -> Option<Direction> {
        if from.chebyshev(&to) <= 1 {
            return Direction::toward(from, to);
        }
        let path = find_path(map, from, to, |p| p != to && movement::blocker_at(world, p).is_some())?;
        let next = path.first()?;
        Direction::toward(from, *next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GameConfig;
    use crate::game::state::{GameMode, GameServices};

    #[test]
    fn test_autopilot_plays_without_errors() {
        let mut game = GameStateManager::new(GameConfig::default(), GameServices::with_defaults().unwrap());
        game.new_game(11).unwrap();
        let mut pilot = Autopilot::new(11);
        for _ in 0..200 {
            if game.mode() != GameMode::Playing {
                break;
            }
            let action = pilot.next_action(&game);
            game.handle_player_action(action).unwrap();
        }
        assert!(game.turn() > 0);
    }
}
