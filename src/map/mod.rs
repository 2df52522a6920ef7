//! Dungeon maps: tiles, visibility, pathfinding, generation and levels

pub mod dungeon;
pub mod generator;
pub mod level;
pub mod pathfinding;

pub use dungeon::{DungeonMap, Room, Tile};
pub use generator::{CaveParams, MapGenerator, RoomParams};
pub use level::{DungeonLevel, LevelManager, LevelTransition};
pub use pathfinding::find_path;
