//! Game configuration with documented constants
//!
//! All tuning numbers are collected here with explanations of their purpose
//! and how they interact with each other. A TOML file can override any
//! subset of them; missing keys keep their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::{LablabError, Result};

/// Configuration for the dungeon and its systems
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    // === MAP ===
    /// Width of every generated level in tiles
    pub map_width: i32,

    /// Height of every generated level in tiles
    pub map_height: i32,

    /// How far the player can see (tiles)
    ///
    /// Enemies outside this radius are hidden and the tiles they stand
    /// on are drawn from memory.
    pub fov_radius: i32,

    // === LEVELS ===
    /// Reaching this depth wins the game
    pub victory_level: u32,

    /// How many generated levels are kept in memory
    ///
    /// Evicted levels are regenerated from their seed when revisited,
    /// so the layout is stable but item/enemy state is not.
    pub level_cache_size: usize,

    /// Feet of depth per dungeon level, used for flavour text only
    pub feet_per_level: u32,

    // === PLAYER ===
    /// Starting hit points of the hero
    pub player_health: i32,

    /// Starting attack before equipment and effects
    pub player_attack: i32,

    /// Starting defense before equipment and effects
    pub player_defense: i32,

    /// Starting speed; 100 means one action per tick
    pub player_speed: i32,

    /// Starting mana pool
    pub player_mana: i32,

    /// Starting gold
    pub player_gold: i32,

    // === ENEMIES ===
    /// Enemies placed on level 1
    ///
    /// Deeper levels add one extra enemy per two levels.
    pub base_enemy_count: usize,

    /// Chebyshev range at which enemies will attack instead of move
    pub melee_range: f32,

    /// Tile range at which an enemy notices and chases the player
    pub chase_range: i32,

    // === AI ACTORS ===
    /// Manhattan distance at which intelligent actors notice the player
    pub ai_awareness_range: i32,

    /// Turns between decisions for an intelligent actor
    pub ai_decision_cooldown: u32,

    // === PLUGINS ===
    /// Preferred plugin when more than one provides a `ui` capability
    pub preferred_ui: Option<String>,

    /// Preferred plugin when more than one provides a `renderer` capability
    pub preferred_renderer: Option<String>,

    /// Reject extra ui/renderer plugins as errors instead of warnings
    pub strict_capability_mode: bool,

    /// Plugin ids never loaded
    pub skip_plugins: Vec<String>,

    /// When non-empty, only these plugin ids are loaded
    pub only_plugins: Vec<String>,

    // === PATHS ===
    /// Root for saves, vector collections, locale files and logs
    pub data_dir: PathBuf,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            // Map
            map_width: 80,
            map_height: 50,
            fov_radius: 8,

            // Levels
            victory_level: 20,
            level_cache_size: 10,
            feet_per_level: 30,

            // Player
            player_health: 100,
            player_attack: 10,
            player_defense: 5,
            player_speed: 100,
            player_mana: 50,
            player_gold: 100,

            // Enemies
            base_enemy_count: 10,
            melee_range: 1.5,
            chase_range: 10,

            // AI actors
            ai_awareness_range: 10,
            ai_decision_cooldown: 3,

            // Plugins
            preferred_ui: None,
            preferred_renderer: None,
            strict_capability_mode: true,
            skip_plugins: Vec::new(),
            only_plugins: Vec::new(),

            data_dir: PathBuf::from("data/runtime"),
        }
    }
}

impl GameConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document, keeping defaults for missing keys
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: GameConfig = toml::from_str(contents)?;
        config.validate().map_err(LablabError::Config)?;
        Ok(config)
    }

    /// Load from a TOML file on disk
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        // Rooms are up to 10 tiles wide plus a wall border
        if self.map_width < 20 || self.map_height < 20 {
            return Err(format!(
                "map must be at least 20x20 (got {}x{})",
                self.map_width, self.map_height
            ));
        }

        if self.fov_radius <= 0 {
            return Err("fov_radius must be positive".into());
        }

        if self.victory_level == 0 {
            return Err("victory_level must be at least 1".into());
        }

        if self.level_cache_size == 0 {
            return Err("level_cache_size must be at least 1".into());
        }

        if self.player_health <= 0 || self.player_speed <= 0 {
            return Err("player health and speed must be positive".into());
        }

        Ok(())
    }
}

// === GLOBAL CONFIG ACCESS ===

use std::sync::OnceLock;

static CONFIG: OnceLock<GameConfig> = OnceLock::new();

/// Get the global game config (initializes with defaults if not set)
pub fn config() -> &'static GameConfig {
    CONFIG.get_or_init(GameConfig::default)
}

/// Set the global game config (can only be called once)
///
/// Returns Err if config was already set.
pub fn set_config(config: GameConfig) -> std::result::Result<(), GameConfig> {
    CONFIG.set(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GameConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = GameConfig::from_toml_str("victory_level = 5\nfov_radius = 6\n").unwrap();
        assert_eq!(config.victory_level, 5);
        assert_eq!(config.fov_radius, 6);
        assert_eq!(config.map_width, 80);
        assert_eq!(config.player_health, 100);
    }

    #[test]
    fn test_invalid_toml_values_rejected() {
        let result = GameConfig::from_toml_str("map_width = 5\n");
        assert!(matches!(result, Err(LablabError::Config(_))));
    }

    #[test]
    fn test_plugin_lists_parse() {
        let config = GameConfig::from_toml_str(
            "skip_plugins = [\"analytics\"]\npreferred_ui = \"terminal-ui\"\n",
        )
        .unwrap();
        assert_eq!(config.skip_plugins, vec!["analytics".to_string()]);
        assert_eq!(config.preferred_ui.as_deref(), Some("terminal-ui"));
    }
}
