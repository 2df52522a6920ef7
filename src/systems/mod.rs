//! Game systems
//!
//! Systems are free functions over the hecs world. Each returns the
//! events it produced so the game loop can log and publish them.

pub mod actor;
pub mod ai;
pub mod combat;
pub mod difficulty;
pub mod item_spawn;
pub mod movement;
pub mod status_effects;

use serde::Serialize;

/// Result of a player-facing action that can fail for game reasons
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
