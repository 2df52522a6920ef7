//! Gather game context for LLM prompts
//!
//! Builds a short text picture of the dungeon around the player: who is
//! nearby, how hurt they are, and what just happened. Quest, dialogue and
//! NPC decision prompts all embed this summary.

use hecs::{Entity, World};

use crate::components::{Enemy, Health, Name, Player, Position};
use crate::gameplay::npc::Npc;
use crate::gameplay::progression::Experience;

const MAX_RECENT_EVENTS: usize = 5;
const MAX_NAMED_ENTITIES: usize = 10;

/// Game context for LLM prompts
#[derive(Debug, Clone)]
pub struct GameContext {
    /// Current dungeon floor
    pub dungeon_level: u32,
    /// Player character level
    pub player_level: u32,
    /// Player (current, maximum) health
    pub player_health: (i32, i32),
    pub player_position: Option<Position>,
    /// Named creatures near the player
    pub named_entities: Vec<NamedEntity>,
    pub recent_events: Vec<String>,
    pub threats: Vec<String>,
    pub current_turn: u64,
}

/// A creature the prompt can refer to by name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedEntity {
    pub name: String,
    /// "enemy", "npc" or "creature"
    pub role: String,
    /// healthy, injured, badly wounded
    pub status: String,
    pub distance: i32,
}

fn health_status(health: Option<&Health>) -> String {
    match health.map(|h| h.percentage()) {
        Some(p) if p < 0.3 => "badly wounded".into(),
        Some(p) if p < 0.7 => "injured".into(),
        _ => "healthy".into(),
    }
}

impl GameContext {
    /// Snapshot everything within `radius` (Manhattan) of the player
    pub fn from_world(world: &World, player: Entity, dungeon_level: u32, turn: u64, radius: i32) -> Self {
        let mut ctx = Self::empty();
        ctx.dungeon_level = dungeon_level;
        ctx.current_turn = turn;

        ctx.player_position = world.get::<&Position>(player).ok().map(|p| *p);
        if let Ok(hp) = world.get::<&Health>(player) {
            ctx.player_health = (hp.current, hp.maximum);
        }
        ctx.player_level = world.get::<&Experience>(player).map(|x| x.level).unwrap_or(1);

        let Some(origin) = ctx.player_position else {
            return ctx;
        };

        let mut nearby: Vec<NamedEntity> = world
            .query::<(&Name, &Position, Option<&Health>, Option<&Enemy>, Option<&Npc>)>()
            .without::<&Player>()
            .iter()
            .filter(|(_, (_, pos, health, ..))| pos.manhattan(&origin) <= radius && health.map_or(true, |h| h.is_alive()))
            .map(|(_, (name, pos, health, enemy, npc))| NamedEntity {
                name: name.0.clone(),
                role: if enemy.is_some() {
                    "enemy".into()
                } else if npc.is_some() {
                    "npc".into()
                } else {
                    "creature".into()
                },
                status: health_status(health),
                distance: pos.manhattan(&origin),
            })
            .filter(|e| e.role != "creature" || e.status != "healthy")
            .collect();
        nearby.sort_by_key(|e| e.distance);
        nearby.truncate(MAX_NAMED_ENTITIES);

        for e in nearby.iter().filter(|e| e.role == "enemy" && e.distance <= 3) {
            ctx.threats.push(format!("{} {} tiles away", e.name, e.distance));
        }
        ctx.named_entities = nearby;
        ctx
    }

    /// Text summary for prompt construction
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str(&format!("Dungeon floor: {}\n", self.dungeon_level));
        s.push_str(&format!("Turn: {}\n", self.current_turn));
        s.push_str(&format!(
            "Player: level {}, HP {}/{}\n",
            self.player_level, self.player_health.0, self.player_health.1
        ));

        if !self.named_entities.is_empty() {
            s.push_str("\nNearby:\n");
            for entity in &self.named_entities {
                s.push_str(&format!(
                    "- {} ({}, {}, {} tiles)\n",
                    entity.name, entity.role, entity.status, entity.distance
                ));
            }
        }

        if !self.recent_events.is_empty() {
            s.push_str("\nRecent Events:\n");
            for event in &self.recent_events {
                s.push_str(&format!("- {}\n", event));
            }
        }

        if !self.threats.is_empty() {
            s.push_str(&format!("\nThreats: {}\n", self.threats.join(", ")));
        }

        s
    }

    pub fn empty() -> Self {
        Self {
            dungeon_level: 1,
            player_level: 1,
            player_health: (0, 0),
            player_position: None,
            named_entities: vec![],
            recent_events: vec![],
            threats: vec![],
            current_turn: 0,
        }
    }

    pub fn add_event(&mut self, event: impl Into<String>) {
        self.recent_events.push(event.into());
        if self.recent_events.len() > MAX_RECENT_EVENTS {
            self.recent_events.remove(0);
        }
    }

    pub fn add_threat(&mut self, threat: impl Into<String>) {
        self.threats.push(threat.into());
    }

    pub fn has_threats(&self) -> bool {
        !self.threats.is_empty()
    }

    /// Case-insensitive partial name match
    pub fn find_entity(&self, name: &str) -> Option<&NamedEntity> {
        let name_lower = name.to_lowercase();
        self.named_entities
            .iter()
            .find(|e| e.name.to_lowercase().contains(&name_lower))
    }

    pub fn entities_with_role(&self, role: &str) -> Vec<&NamedEntity> {
        self.named_entities.iter().filter(|e| e.role == role).collect()
    }

    /// Names of nearby enemies, for quest prompts
    pub fn enemy_names(&self) -> Vec<String> {
        self.entities_with_role("enemy").into_iter().map(|e| e.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{EnemyKind, Health};

    fn named(name: &str, role: &str, distance: i32) -> NamedEntity {
        NamedEntity {
            name: name.into(),
            role: role.into(),
            status: "healthy".into(),
            distance,
        }
    }

    #[test]
    fn test_context_from_world() {
        let mut world = World::new();
        let hero = world.spawn((Player, Position::new(5, 5), Health::new(100)));
        world.spawn((
            Name("Goblin".into()),
            Enemy { kind: EnemyKind::Goblin },
            Position::new(6, 5),
            Health::new(30),
        ));
        world.spawn((
            Name("Orc".into()),
            Enemy { kind: EnemyKind::Orc },
            Position::new(40, 40),
            Health::new(30),
        ));

        let ctx = GameContext::from_world(&world, hero, 3, 42, 10);
        assert_eq!(ctx.dungeon_level, 3);
        assert_eq!(ctx.player_health, (100, 100));
        assert_eq!(ctx.named_entities.len(), 1);
        assert_eq!(ctx.enemy_names(), vec!["Goblin".to_string()]);
        assert!(ctx.has_threats());
    }

    #[test]
    fn test_context_summary() {
        let mut ctx = GameContext::empty();
        ctx.dungeon_level = 4;
        ctx.named_entities.push(named("Old Sage", "npc", 2));
        let summary = ctx.summary();
        assert!(summary.contains("Dungeon floor: 4"));
        assert!(summary.contains("Old Sage (npc, healthy, 2 tiles)"));
    }

    #[test]
    fn test_event_limit() {
        let mut ctx = GameContext::empty();
        for i in 0..10 {
            ctx.add_event(format!("Event {}", i));
        }
        assert_eq!(ctx.recent_events.len(), 5);
        assert!(ctx.recent_events.contains(&"Event 9".to_string()));
        assert!(!ctx.recent_events.contains(&"Event 0".to_string()));
    }

    #[test]
    fn test_find_entity() {
        let mut ctx = GameContext::empty();
        ctx.named_entities.push(named("Marcus the Smith", "npc", 1));
        assert_eq!(ctx.find_entity("marc").map(|e| e.distance), Some(1));
        assert!(ctx.find_entity("Elena").is_none());
    }
}
