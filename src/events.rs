//! Game events
//!
//! Systems return these from each update; the game state manager turns
//! them into activity-log lines and republishes each payload on the
//! plugin event bus so plugins can react.

use hecs::Entity;
use serde::Serialize;

use crate::components::EnemyKind;
use crate::core::types::Position;
use crate::game::log::LogSeverity;
use crate::gameplay::quest::QuestState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySpawned {
    #[serde(skip)]
    pub entity: Entity,
    pub kind: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMoved {
    #[serde(skip)]
    pub entity: Entity,
    pub from: Position,
    pub to: Position,
    pub is_player: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDied {
    #[serde(skip)]
    pub entity: Entity,
    pub name: String,
    pub position: Position,
    pub enemy_kind: Option<EnemyKind>,
    pub was_player: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombatOccurred {
    #[serde(skip)]
    pub attacker: Entity,
    #[serde(skip)]
    pub defender: Entity,
    pub attacker_name: String,
    pub defender_name: String,
    pub damage: i32,
    pub killed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemPickedUp {
    pub item_name: String,
    pub count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemUsed {
    pub item_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelChanged {
    pub from: u32,
    pub to: u32,
    pub new_record: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerLeveledUp {
    pub new_level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationReached {
    pub level: u32,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestStateChanged {
    pub quest_id: String,
    pub quest_name: String,
    pub state: QuestState,
}

/// Published by the config service when a key changes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigChanged {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameStateChanged {
    pub state: String,
}

/// Everything a system can report back to the game loop
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Spawned(EntitySpawned),
    Moved(EntityMoved),
    Died(EntityDied),
    Combat(CombatOccurred),
    PickedUp(ItemPickedUp),
    Used(ItemUsed),
    Level(LevelChanged),
    LeveledUp(PlayerLeveledUp),
    Reached(LocationReached),
    Quest(QuestStateChanged),
    State(GameStateChanged),
    /// Free-form line for the activity log
    Message { text: String, severity: LogSeverity },
}

impl GameEvent {
    pub fn message(text: impl Into<String>, severity: LogSeverity) -> Self {
        GameEvent::Message {
            text: text.into(),
            severity,
        }
    }
}
