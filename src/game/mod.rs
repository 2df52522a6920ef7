//! The running game: worlds, turn loop and activity log

pub mod autoplay;
pub mod log;
pub mod spawn;
pub mod state;
pub mod world;

pub use autoplay::Autopilot;
pub use log::{ActivityLog, LogCategory, LogEntry, LogSeverity};
pub use state::{GameMode, GameServices, GameStateManager, PlayerAction, PlayerSnapshot};
pub use world::{GameWorldManager, WorldMode};
