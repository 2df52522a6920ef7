//! Play and edit worlds
//!
//! The game keeps two independent ECS worlds. Gameplay runs against the
//! play world; the edit world is a scratch space for building content
//! and is never ticked.

use hecs::World;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorldMode {
    #[default]
    Play,
    Edit,
}

#[derive(Default)]
pub struct GameWorldManager {
    play: World,
    edit: World,
    mode: WorldMode,
}

impl GameWorldManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> WorldMode {
        self.mode
    }

    /// Returns false when already in `mode`
    pub fn switch_mode(&mut self, mode: WorldMode) -> bool {
        if self.mode == mode {
            return false;
        }
        info!(from = ?self.mode, to = ?mode, "Switching world mode");
        self.mode = mode;
        true
    }

    pub fn world(&self, mode: WorldMode) -> &World {
        match mode {
            WorldMode::Play => &self.play,
            WorldMode::Edit => &self.edit,
        }
    }

    pub fn world_mut(&mut self, mode: WorldMode) -> &mut World {
        match mode {
            WorldMode::Play => &mut self.play,
            WorldMode::Edit => &mut self.edit,
        }
    }

    pub fn current(&self) -> &World {
        self.world(self.mode)
    }

    pub fn current_mut(&mut self) -> &mut World {
        self.world_mut(self.mode)
    }

    pub fn clear(&mut self, mode: WorldMode) {
        self.world_mut(mode).clear();
    }

    pub fn entity_count(&self, mode: WorldMode) -> u32 {
        self.world(mode).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Name, Position};

    #[test]
    fn test_worlds_are_independent() {
        let mut worlds = GameWorldManager::new();
        worlds.world_mut(WorldMode::Play).spawn((Name("hero".into()), Position::new(1, 1)));
        assert_eq!(worlds.entity_count(WorldMode::Play), 1);
        assert_eq!(worlds.entity_count(WorldMode::Edit), 0);

        assert!(worlds.switch_mode(WorldMode::Edit));
        assert!(!worlds.switch_mode(WorldMode::Edit));
        worlds.current_mut().spawn((Name("wall marker".into()),));
        assert_eq!(worlds.current().len(), 1);

        worlds.clear(WorldMode::Play);
        assert_eq!(worlds.entity_count(WorldMode::Play), 0);
        assert_eq!(worlds.entity_count(WorldMode::Edit), 1);
    }
}
