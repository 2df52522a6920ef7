//! ECS side of the intelligent avatars

use std::collections::BTreeMap;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// Seconds between decisions for a freshly tagged entity
pub const DEFAULT_DECISION_COOLDOWN: f32 = 2.0;

/// What an avatar is able to do, as a small bitset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AiCapabilities(u8);

impl AiCapabilities {
    pub const NONE: Self = Self(0);
    pub const DIALOGUE: Self = Self(1);
    pub const MEMORY: Self = Self(1 << 1);
    pub const TACTICAL_ADAPTATION: Self = Self(1 << 2);
    pub const QUEST_GENERATION: Self = Self(1 << 3);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Which kind of actor these capabilities call for, if any.
    /// Bosses win when both sets are present.
    pub fn avatar_kind(self) -> Option<AvatarKind> {
        if self.contains(Self::TACTICAL_ADAPTATION.union(Self::QUEST_GENERATION)) {
            Some(AvatarKind::Boss)
        } else if self.contains(Self::DIALOGUE.union(Self::MEMORY)) {
            Some(AvatarKind::Npc)
        } else {
            None
        }
    }
}

impl BitOr for AiCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvatarKind {
    Boss,
    Npc,
}

impl AvatarKind {
    pub fn label(self) -> &'static str {
        match self {
            AvatarKind::Boss => "boss",
            AvatarKind::Npc => "npc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub name: String,
    pub kind: AvatarKind,
    pub default_emotion: String,
    /// Emotions this avatar may be put into; anything else is refused
    pub emotions: Vec<String>,
    pub short_term_capacity: usize,
    #[serde(default)]
    pub traits: BTreeMap<String, f32>,
}

impl Personality {
    pub fn boss(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AvatarKind::Boss,
            default_emotion: "calm".to_string(),
            emotions: ["calm", "focused", "angry", "enraged", "desperate"]
                .map(String::from)
                .to_vec(),
            short_term_capacity: 10,
            traits: BTreeMap::from([("aggression".to_string(), 0.7), ("cunning".to_string(), 0.5)]),
        }
    }

    pub fn npc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AvatarKind::Npc,
            default_emotion: "neutral".to_string(),
            emotions: ["neutral", "happy", "curious", "nervous", "annoyed"]
                .map(String::from)
                .to_vec(),
            short_term_capacity: 5,
            traits: BTreeMap::from([("friendliness".to_string(), 0.6)]),
        }
    }

    pub fn allows(&self, emotion: &str) -> bool {
        self.emotions.iter().any(|e| e == emotion)
    }

    pub fn trait_value(&self, name: &str) -> f32 {
        self.traits.get(name).copied().unwrap_or(0.0)
    }
}

/// Marks an entity as driven by an avatar actor
#[derive(Debug, Clone, PartialEq)]
pub struct IntelligentAi {
    pub capabilities: AiCapabilities,
    pub decision_cooldown: f32,
    pub time_since_decision: f32,
    pub personality: Option<Personality>,
}

impl IntelligentAi {
    pub fn new(capabilities: AiCapabilities) -> Self {
        Self {
            capabilities,
            decision_cooldown: DEFAULT_DECISION_COOLDOWN,
            time_since_decision: 0.0,
            personality: None,
        }
    }

    pub fn boss(name: impl Into<String>) -> Self {
        Self {
            personality: Some(Personality::boss(name)),
            ..Self::new(AiCapabilities::TACTICAL_ADAPTATION | AiCapabilities::QUEST_GENERATION)
        }
    }

    pub fn npc(name: impl Into<String>) -> Self {
        Self {
            personality: Some(Personality::npc(name)),
            ..Self::new(AiCapabilities::DIALOGUE | AiCapabilities::MEMORY)
        }
    }

    pub fn with_cooldown(mut self, seconds: f32) -> Self {
        self.decision_cooldown = seconds.max(0.0);
        self
    }

    /// Advance the cooldown clock; true (and reset) once it has elapsed
    pub fn tick(&mut self, dt: f32) -> bool {
        self.time_since_decision += dt;
        if self.time_since_decision >= self.decision_cooldown {
            self.time_since_decision = 0.0;
            true
        } else {
            false
        }
    }
}
