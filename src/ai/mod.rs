//! Intelligent avatars for bosses and townsfolk
//!
//! Entities tagged with [`IntelligentAi`] get a dedicated actor task that
//! remembers, holds grudges and decides through an [`IntelligenceAgent`].
//! The turn loop stays synchronous; [`IntelligentAiSystem::update`] only
//! queues notices, and actors report back through the event bus.

pub mod actor;
pub mod agent;
pub mod component;
pub mod memory;
pub mod messages;
pub mod system;

pub use actor::{AvatarActor, AvatarHandle};
pub use agent::{DecisionContext, DialogueContext, IntelligenceAgent, LlmAgent, RuleBasedAgent};
pub use component::{AiCapabilities, AvatarKind, IntelligentAi, Personality};
pub use memory::{AvatarMemory, AvatarState, MemoryEntry, Relationship};
pub use messages::{
    AvatarDecided, AvatarMessage, AvatarMoodChanged, AvatarNotice, AvatarSpoke, Decision, DialogueReply,
    RelationshipReport, StateReport, StateUpdate,
};
pub use system::IntelligentAiSystem;
