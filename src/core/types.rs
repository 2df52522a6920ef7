//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for things that outlive a single ECS world
/// (quests, NPCs, scheduled tasks, dialogue sessions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Game turn counter
pub type Turn = u64;

/// Tile coordinate on a dungeon map
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn step(&self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        self.offset(dx, dy)
    }

    /// |dx| + |dy|
    pub fn manhattan(&self, other: &Self) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// max(|dx|, |dy|), the number of king moves between two tiles
    pub fn chebyshev(&self, other: &Self) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn euclidean(&self, other: &Self) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }

    /// The 8 surrounding tiles
    pub fn neighbors(self) -> impl Iterator<Item = Position> {
        Direction::ALL.iter().map(move |d| self.step(*d))
    }
}

/// Eight-way movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    pub fn delta(&self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, 1),
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, -1),
        }
    }

    /// Direction that best approximates moving from `from` toward `to`
    pub fn toward(from: Position, to: Position) -> Option<Direction> {
        let dx = (to.x - from.x).signum();
        let dy = (to.y - from.y).signum();
        Direction::ALL.iter().copied().find(|d| d.delta() == (dx, dy))
    }
}

/// Terminal colours used by renderables, independent of the UI backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlyphColor {
    #[default]
    White,
    Gray,
    DarkGray,
    Red,
    LightRed,
    Green,
    LightGreen,
    Yellow,
    Blue,
    LightBlue,
    Magenta,
    Cyan,
    Brown,
    Black,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distances() {
        let a = Position::new(0, 0);
        let b = Position::new(3, -4);
        assert_eq!(a.manhattan(&b), 7);
        assert_eq!(a.chebyshev(&b), 4);
        assert!((a.euclidean(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_direction_toward() {
        let from = Position::new(5, 5);
        assert_eq!(Direction::toward(from, Position::new(9, 1)), Some(Direction::NorthEast));
        assert_eq!(Direction::toward(from, Position::new(5, 8)), Some(Direction::South));
        assert_eq!(Direction::toward(from, from), None);
    }

    #[test]
    fn test_neighbors_are_adjacent() {
        let p = Position::new(2, 2);
        let neighbors: Vec<_> = p.neighbors().collect();
        assert_eq!(neighbors.len(), 8);
        assert!(neighbors.iter().all(|n| p.chebyshev(n) == 1));
    }
}
