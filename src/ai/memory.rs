//! Avatar mood, memories and relationships
//!
//! Plain data owned by a single actor task; nothing here is shared.

use std::collections::{BTreeMap, VecDeque};
use std::time::SystemTime;

use serde::Serialize;

/// Long-term memories kept per avatar
pub const LONG_TERM_CAPACITY: usize = 50;
/// Memories at least this important survive leaving short-term memory
pub const PROMOTION_THRESHOLD: f32 = 0.5;
pub const AFFINITY_LIMIT: f32 = 100.0;
/// Interactions remembered per relationship
const HISTORY_LIMIT: usize = 20;

/// Mood of an avatar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvatarState {
    pub emotion: String,
    /// 0 = relaxed, 1 = breaking point
    pub stress: f32,
    pub fatigue: f32,
    /// Named adjustments in `[-1, 1]`
    pub modifiers: BTreeMap<String, f32>,
    pub behavior: String,
    pub last_updated: SystemTime,
}

impl AvatarState {
    pub fn new(emotion: impl Into<String>) -> Self {
        Self {
            emotion: emotion.into(),
            stress: 0.0,
            fatigue: 0.0,
            modifiers: BTreeMap::new(),
            behavior: "Idle".to_string(),
            last_updated: SystemTime::now(),
        }
    }

    pub fn set_stress(&mut self, value: f32) {
        self.stress = value.clamp(0.0, 1.0);
        self.last_updated = SystemTime::now();
    }

    pub fn set_fatigue(&mut self, value: f32) {
        self.fatigue = value.clamp(0.0, 1.0);
        self.last_updated = SystemTime::now();
    }

    pub fn set_modifier(&mut self, key: impl Into<String>, value: f32) {
        self.modifiers.insert(key.into(), value.clamp(-1.0, 1.0));
        self.last_updated = SystemTime::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryEntry {
    /// Insertion order, for stable newest-first sorting
    pub sequence: u64,
    pub content: String,
    pub category: String,
    /// 0..1
    pub importance: f32,
    pub timestamp: SystemTime,
}

/// Short-term ring that spills important memories into a capped
/// long-term store
#[derive(Debug, Clone)]
pub struct AvatarMemory {
    short_term: VecDeque<MemoryEntry>,
    long_term: VecDeque<MemoryEntry>,
    short_term_capacity: usize,
    next_sequence: u64,
}

impl AvatarMemory {
    pub fn new(short_term_capacity: usize) -> Self {
        Self {
            short_term: VecDeque::new(),
            long_term: VecDeque::new(),
            short_term_capacity: short_term_capacity.max(1),
            next_sequence: 0,
        }
    }

    pub fn add(&mut self, content: impl Into<String>, category: impl Into<String>, importance: f32) {
        let entry = MemoryEntry {
            sequence: self.next_sequence,
            content: content.into(),
            category: category.into(),
            importance: importance.clamp(0.0, 1.0),
            timestamp: SystemTime::now(),
        };
        self.next_sequence += 1;
        self.short_term.push_back(entry);

        while self.short_term.len() > self.short_term_capacity {
            let Some(oldest) = self.short_term.pop_front() else {
                break;
            };
            if oldest.importance >= PROMOTION_THRESHOLD {
                self.long_term.push_back(oldest);
                if self.long_term.len() > LONG_TERM_CAPACITY {
                    self.long_term.pop_front();
                }
            }
        }
    }

    /// Newest first, optionally filtered
    pub fn query(&self, category: Option<&str>, since: Option<SystemTime>, max_results: usize) -> Vec<MemoryEntry> {
        let mut found: Vec<&MemoryEntry> = self
            .long_term
            .iter()
            .chain(self.short_term.iter())
            .filter(|m| category.map_or(true, |c| m.category == c))
            .filter(|m| since.map_or(true, |s| m.timestamp >= s))
            .collect();
        found.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        found.into_iter().take(max_results).cloned().collect()
    }

    pub fn short_term_len(&self) -> usize {
        self.short_term.len()
    }

    pub fn long_term_len(&self) -> usize {
        self.long_term.len()
    }

    pub fn len(&self) -> usize {
        self.short_term.len() + self.long_term.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How one avatar feels about someone else
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub target: String,
    /// `[-100, 100]`
    pub affinity: f32,
    pub history: Vec<String>,
    pub last_interaction: SystemTime,
}

impl Relationship {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            affinity: 0.0,
            history: Vec::new(),
            last_interaction: SystemTime::now(),
        }
    }

    pub fn adjust_affinity(&mut self, delta: f32) {
        self.affinity = (self.affinity + delta).clamp(-AFFINITY_LIMIT, AFFINITY_LIMIT);
    }

    /// Affinity mapped onto `[0, 1]`
    pub fn trust(&self) -> f32 {
        ((self.affinity + AFFINITY_LIMIT) / (2.0 * AFFINITY_LIMIT)).clamp(0.0, 1.0)
    }

    pub fn kind(&self) -> &'static str {
        match self.affinity {
            a if a >= 50.0 => "Friendly",
            a if a <= -50.0 => "Hostile",
            _ => "Neutral",
        }
    }

    pub fn record(&mut self, interaction: impl Into<String>) {
        self.history.push(interaction.into());
        if self.history.len() > HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.last_interaction = SystemTime::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_important_memories_are_promoted() {
        let mut memory = AvatarMemory::new(2);
        memory.add("saw a goblin", "observation", 0.1);
        memory.add("was struck by the hero", "combat", 0.9);
        memory.add("heard footsteps", "observation", 0.2);
        memory.add("ate lunch", "routine", 0.0);

        assert_eq!(memory.short_term_len(), 2);
        assert_eq!(memory.long_term_len(), 1);
        let combat = memory.query(Some("combat"), None, 10);
        assert_eq!(combat.len(), 1);
        assert_eq!(combat[0].content, "was struck by the hero");
    }

    #[test]
    fn test_long_term_is_capped() {
        let mut memory = AvatarMemory::new(1);
        for i in 0..(LONG_TERM_CAPACITY + 10) {
            memory.add(format!("event {}", i), "combat", 1.0);
        }
        assert_eq!(memory.long_term_len(), LONG_TERM_CAPACITY);
        let newest = memory.query(None, None, 1);
        assert_eq!(newest[0].content, format!("event {}", LONG_TERM_CAPACITY + 9));
    }

    #[test]
    fn test_state_clamps() {
        let mut state = AvatarState::new("calm");
        state.set_stress(1.7);
        state.set_fatigue(-0.3);
        state.set_modifier("aggression", 4.0);
        assert_eq!(state.stress, 1.0);
        assert_eq!(state.fatigue, 0.0);
        assert_eq!(state.modifiers["aggression"], 1.0);
    }

    proptest! {
        #[test]
        fn test_affinity_and_trust_stay_in_range(deltas in proptest::collection::vec(-300.0f32..300.0, 1..20)) {
            let mut rel = Relationship::new("hero");
            for d in deltas {
                rel.adjust_affinity(d);
                prop_assert!(rel.affinity >= -AFFINITY_LIMIT && rel.affinity <= AFFINITY_LIMIT);
                prop_assert!((0.0..=1.0).contains(&rel.trust()));
            }
        }
    }

    #[test]
    fn test_trust_midpoint() {
        let mut rel = Relationship::new("hero");
        assert_eq!(rel.trust(), 0.5);
        rel.adjust_affinity(100.0);
        assert_eq!(rel.trust(), 1.0);
        assert_eq!(rel.kind(), "Friendly");
    }
}
