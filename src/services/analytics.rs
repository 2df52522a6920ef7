//! In-process analytics
//!
//! Events are kept in memory and summarised on flush. `attach` wires the
//! service to the event bus so spawns, moves and combat are counted without
//! the game loop knowing analytics exists.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::core::error::{LablabError, Result};
use crate::events::{CombatOccurred, EntityMoved, EntitySpawned};
use crate::plugins::events::{EventBus, SubscriptionId};

/// Moves are sampled; only every Nth one becomes an analytics event
pub const MOVE_SAMPLE_RATE: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub name: String,
    pub timestamp: SystemTime,
    pub user_id: Option<String>,
    pub screen: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub total_events: usize,
    pub total_screen_views: u64,
    pub user_id: Option<String>,
    pub current_screen: Option<String>,
    pub user_property_count: usize,
    /// Event name to count
    pub events_by_name: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GameEventCounters {
    pub spawns: u64,
    pub moves: u64,
    pub combats: u64,
}

#[derive(Default)]
pub struct AnalyticsService {
    events: RwLock<Vec<AnalyticsEvent>>,
    user_properties: RwLock<BTreeMap<String, Value>>,
    user_id: RwLock<Option<String>>,
    current_screen: RwLock<Option<String>>,
    screen_views: AtomicU64,
    spawns: AtomicU64,
    moves: AtomicU64,
    combats: AtomicU64,
}

fn require_name(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LablabError::InvalidAction(format!("{} cannot be empty", what)));
    }
    Ok(())
}

impl AnalyticsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_event(&self, name: &str, parameters: Value) -> Result<()> {
        require_name(name, "Event name")?;
        let event = AnalyticsEvent {
            name: name.to_string(),
            timestamp: SystemTime::now(),
            user_id: self.user_id.read().clone(),
            screen: self.current_screen.read().clone(),
            parameters,
        };
        let mut events = self.events.write();
        events.push(event);
        debug!(event = name, total = events.len(), "Event tracked");
        Ok(())
    }

    /// Sets the current screen and records a `screen_view` event
    pub fn track_screen(&self, screen: &str) -> Result<()> {
        require_name(screen, "Screen name")?;
        *self.current_screen.write() = Some(screen.to_string());
        let views = self.screen_views.fetch_add(1, Ordering::Relaxed) + 1;
        self.track_event("screen_view", json!({ "screen_name": screen }))?;
        info!(screen, total = views, "Screen tracked");
        Ok(())
    }

    pub fn set_user_id(&self, user_id: &str) -> Result<()> {
        require_name(user_id, "User ID")?;
        *self.user_id.write() = Some(user_id.to_string());
        info!(user_id, "User ID set");
        Ok(())
    }

    pub fn set_user_property(&self, name: &str, value: Value) -> Result<()> {
        require_name(name, "Property name")?;
        debug!(property = name, %value, "User property set");
        self.user_properties.write().insert(name.to_string(), value);
        Ok(())
    }

    pub fn user_property(&self, name: &str) -> Option<Value> {
        self.user_properties.read().get(name).cloned()
    }

    pub fn events_named(&self, name: &str) -> Vec<AnalyticsEvent> {
        self.events.read().iter().filter(|e| e.name == name).cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn clear_events(&self) {
        self.events.write().clear();
    }

    pub fn summary(&self) -> AnalyticsSummary {
        let events = self.events.read();
        let mut events_by_name = BTreeMap::new();
        for event in events.iter() {
            *events_by_name.entry(event.name.clone()).or_insert(0) += 1;
        }
        AnalyticsSummary {
            total_events: events.len(),
            total_screen_views: self.screen_views.load(Ordering::Relaxed),
            user_id: self.user_id.read().clone(),
            current_screen: self.current_screen.read().clone(),
            user_property_count: self.user_properties.read().len(),
            events_by_name,
        }
    }

    /// Log a per-name summary of everything tracked so far
    pub fn flush(&self) -> AnalyticsSummary {
        let summary = self.summary();
        info!(count = summary.total_events, "Flushing analytics events");
        for (name, count) in &summary.events_by_name {
            debug!("  {}: {}", name, count);
        }
        summary
    }

    pub fn counters(&self) -> GameEventCounters {
        GameEventCounters {
            spawns: self.spawns.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
            combats: self.combats.load(Ordering::Relaxed),
        }
    }

    pub fn on_entity_spawned(&self, event: &EntitySpawned) -> Result<()> {
        let total = self.spawns.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(kind = %event.kind, x = event.position.x, y = event.position.y, total, "Entity spawned");
        self.track_event(
            "entity_spawned",
            json!({
                "entity_type": event.kind,
                "position_x": event.position.x,
                "position_y": event.position.y,
            }),
        )
    }

    pub fn on_entity_moved(&self, event: &EntityMoved) -> Result<()> {
        let total = self.moves.fetch_add(1, Ordering::Relaxed) + 1;
        if total % MOVE_SAMPLE_RATE != 0 {
            return Ok(());
        }
        self.track_event(
            "entity_moved",
            json!({
                "is_player": event.is_player,
                "distance": event.from.manhattan(&event.to),
            }),
        )
    }

    pub fn on_combat(&self, event: &CombatOccurred) -> Result<()> {
        let total = self.combats.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            attacker = %event.attacker_name,
            defender = %event.defender_name,
            damage = event.damage,
            total,
            "Combat"
        );
        self.track_event(
            "combat",
            json!({
                "attacker": event.attacker_name,
                "target": event.defender_name,
                "damage": event.damage,
                "is_hit": event.damage > 0,
                "is_kill": event.killed,
            }),
        )
    }

    /// Subscribe the game-event counters to `bus`
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<SubscriptionId> {
        let spawned = Arc::clone(self);
        let moved = Arc::clone(self);
        let combat = Arc::clone(self);
        vec![
            bus.subscribe(move |e: &EntitySpawned| spawned.on_entity_spawned(e)),
            bus.subscribe(move |e: &EntityMoved| moved.on_entity_moved(e)),
            bus.subscribe(move |e: &CombatOccurred| combat.on_combat(e)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Position;

    #[test]
    fn test_empty_names_rejected() {
        let analytics = AnalyticsService::new();
        assert!(analytics.track_event("", Value::Null).is_err());
        assert!(analytics.track_event("   ", Value::Null).is_err());
        assert!(analytics.set_user_id("").is_err());
        assert_eq!(analytics.event_count(), 0);
    }

    #[test]
    fn test_track_screen_emits_screen_view() {
        let analytics = AnalyticsService::new();
        analytics.set_user_id("player-1").unwrap();
        analytics.track_screen("main_menu").unwrap();
        analytics.track_event("game_started", json!({ "seed": 7 })).unwrap();

        let views = analytics.events_named("screen_view");
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].parameters["screen_name"], "main_menu");

        let started = &analytics.events_named("game_started")[0];
        assert_eq!(started.screen.as_deref(), Some("main_menu"));
        assert_eq!(started.user_id.as_deref(), Some("player-1"));

        let summary = analytics.flush();
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.total_screen_views, 1);
        assert_eq!(summary.events_by_name["screen_view"], 1);
    }

    #[test]
    fn test_bus_counters_sample_moves() {
        let bus = EventBus::new();
        let analytics = Arc::new(AnalyticsService::new());
        analytics.attach(&bus);

        let mut world = hecs::World::new();
        let entity = world.spawn(());
        for i in 0..25 {
            bus.publish(&EntityMoved {
                entity,
                from: Position::new(i, 0),
                to: Position::new(i + 1, 0),
                is_player: true,
            });
        }
        bus.publish(&EntitySpawned {
            entity,
            kind: "goblin".into(),
            position: Position::new(3, 4),
        });

        let counters = analytics.counters();
        assert_eq!(counters.moves, 25);
        assert_eq!(counters.spawns, 1);
        assert_eq!(analytics.events_named("entity_moved").len(), 2);
        assert_eq!(analytics.events_named("entity_spawned")[0].parameters["entity_type"], "goblin");
    }
}
