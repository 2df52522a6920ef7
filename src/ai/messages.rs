//! Mailbox protocol for avatar actors
//!
//! Requests carry a oneshot sender for the reply; notices are fire and
//! forget and can be broadcast to every actor.

use std::collections::BTreeMap;
use std::time::SystemTime;

use hecs::Entity;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::component::AvatarKind;
use super::memory::MemoryEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub parameters: BTreeMap<String, f32>,
}

impl Decision {
    pub fn new(action: impl Into<String>, reasoning: impl Into<String>, confidence: f32) -> Self {
        Self {
            action: action.into(),
            reasoning: reasoning.into(),
            confidence: confidence.clamp(0.0, 1.0),
            parameters: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueReply {
    #[serde(default)]
    pub target: String,
    pub text: String,
    #[serde(default)]
    pub emotion: Option<String>,
    /// Trust change the conversation caused, in `[-1, 1]`
    #[serde(default)]
    pub relationship_delta: f32,
}

/// Partial state change; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub emotion: Option<String>,
    pub stress: Option<f32>,
    pub fatigue: Option<f32>,
    pub modifiers: BTreeMap<String, f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateReport {
    pub name: String,
    pub kind: AvatarKind,
    pub emotion: String,
    pub stress: f32,
    pub fatigue: f32,
    pub behavior: String,
    pub modifiers: BTreeMap<String, f32>,
    pub memory_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipReport {
    pub target: String,
    pub affinity: f32,
    /// `[0, 1]`, 0.5 for strangers
    pub trust: f32,
    pub kind: String,
    pub interactions: usize,
}

/// Fire-and-forget messages, cloneable for broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum AvatarNotice {
    PlayerNearby { player: Entity, distance: i32 },
    WorldEvent { description: String, importance: f32 },
}

#[derive(Debug)]
pub enum AvatarMessage {
    Notice(AvatarNotice),
    MakeDecision {
        situation: String,
        factors: BTreeMap<String, f32>,
        reply: oneshot::Sender<Decision>,
    },
    InitiateDialogue {
        target: String,
        topic: String,
        context: Option<String>,
        reply: oneshot::Sender<DialogueReply>,
    },
    UpdateState {
        update: StateUpdate,
        reply: oneshot::Sender<bool>,
    },
    GetState {
        reply: oneshot::Sender<StateReport>,
    },
    AddMemory {
        content: String,
        category: String,
        importance: f32,
        reply: oneshot::Sender<bool>,
    },
    QueryMemory {
        category: Option<String>,
        since: Option<SystemTime>,
        max_results: usize,
        reply: oneshot::Sender<Vec<MemoryEntry>>,
    },
    UpdateRelationship {
        target: String,
        trust_delta: f32,
        respect_delta: f32,
        reason: Option<String>,
        reply: oneshot::Sender<RelationshipReport>,
    },
    GetRelationship {
        target: String,
        reply: oneshot::Sender<RelationshipReport>,
    },
}

/// Published on the event bus when an avatar settles on an action
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarDecided {
    pub entity: Entity,
    pub name: String,
    pub decision: Decision,
}

/// Published when an avatar speaks
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarSpoke {
    pub entity: Entity,
    pub name: String,
    pub target: String,
    pub text: String,
}

/// Published when an avatar's emotion changes
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarMoodChanged {
    pub entity: Entity,
    pub name: String,
    pub from: String,
    pub to: String,
}
