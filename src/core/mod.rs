pub mod config;
pub mod dice;
pub mod error;
pub mod types;

pub use config::{config, GameConfig};
pub use dice::DiceRoller;
pub use error::{LablabError, Result};
pub use types::{Direction, EntityId, GlyphColor, Position, Turn};
