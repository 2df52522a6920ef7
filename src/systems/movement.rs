//! Tile movement and blocking

use hecs::{Entity, World};

use crate::components::{BlocksMovement, Player, Position};
use crate::core::types::Direction;
use crate::events::EntityMoved;
use crate::map::dungeon::DungeonMap;

#[derive(Debug, Clone, PartialEq)]
pub enum MoveResult {
    Moved(EntityMoved),
    /// Another blocking entity occupies the destination
    Bumped(Entity),
    /// Wall or out of bounds
    Blocked,
    /// The mover has no position
    NoPosition,
}

/// The blocking entity standing on `pos`, if any
pub fn blocker_at(world: &World, pos: Position) -> Option<Entity> {
    world
        .query::<(&Position, &BlocksMovement)>()
        .iter()
        .find(|(_, (p, _))| **p == pos)
        .map(|(e, _)| e)
}

pub fn is_blocked(world: &World, map: &DungeonMap, pos: Position) -> bool {
    !map.is_walkable(pos) || blocker_at(world, pos).is_some()
}

/// Step `entity` one tile in `direction`
pub fn try_move(world: &mut World, map: &DungeonMap, entity: Entity, direction: Direction) -> MoveResult {
    let Ok(from) = world.get::<&Position>(entity).map(|p| *p) else {
        return MoveResult::NoPosition;
    };
    move_to(world, map, entity, from, from.step(direction))
}

/// Move `entity` to an adjacent tile chosen by the caller
pub fn move_to(world: &mut World, map: &DungeonMap, entity: Entity, from: Position, to: Position) -> MoveResult {
    if !map.is_walkable(to) {
        return MoveResult::Blocked;
    }
    if let Some(other) = blocker_at(world, to) {
        if other != entity {
            return MoveResult::Bumped(other);
        }
    }
    let is_player = world.get::<&Player>(entity).is_ok();
    match world.get::<&mut Position>(entity) {
        Ok(mut pos) => *pos = to,
        Err(_) => return MoveResult::NoPosition,
    }
    MoveResult::Moved(EntityMoved {
        entity,
        from,
        to,
        is_player,
    })
}
