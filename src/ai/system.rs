//! Keeps one avatar actor alive per `IntelligentAi` entity

use std::sync::Arc;

use ahash::AHashMap;
use hecs::{Entity, World};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::actor::{AvatarActor, AvatarHandle};
use super::agent::IntelligenceAgent;
use super::component::{AvatarKind, IntelligentAi, Personality};
use super::messages::{AvatarMessage, AvatarNotice};
use crate::components::{Name, Player, Position};
use crate::plugins::events::EventBus;

/// Manhattan distance at which avatars notice the hero
pub const AWARENESS_RANGE: i32 = 10;

pub struct IntelligentAiSystem {
    actors: AHashMap<Entity, AvatarHandle>,
    agent: Option<Arc<dyn IntelligenceAgent>>,
    events: Arc<EventBus>,
    runtime: Handle,
}

impl IntelligentAiSystem {
    pub fn new(runtime: Handle, agent: Option<Arc<dyn IntelligenceAgent>>, events: Arc<EventBus>) -> Self {
        Self {
            actors: AHashMap::new(),
            agent,
            events,
            runtime,
        }
    }

    pub fn update(&mut self, world: &mut World, dt: f32) {
        let player = world
            .query::<(&Player, &Position)>()
            .iter()
            .next()
            .map(|(e, (_, p))| (e, *p));

        let mut nearby = Vec::new();
        for (entity, (ai, pos, name)) in world.query_mut::<(&mut IntelligentAi, Option<&Position>, Option<&Name>)>() {
            if !self.actors.contains_key(&entity) {
                let label = name.map_or_else(|| format!("{:?}", entity), |n| n.0.clone());
                match ai.capabilities.avatar_kind() {
                    Some(kind) => {
                        let personality = ai.personality.clone().unwrap_or_else(|| match kind {
                            AvatarKind::Boss => Personality::boss(label),
                            AvatarKind::Npc => Personality::npc(label),
                        });
                        self.start(entity, personality);
                    }
                    None => {
                        // Checked again next frame in case capabilities change
                        warn!(?entity, "Entity has no usable AI capabilities");
                        continue;
                    }
                }
            }

            if !ai.tick(dt) {
                continue;
            }
            if let (Some((hero, hero_at)), Some(pos)) = (player, pos) {
                let distance = pos.manhattan(&hero_at);
                if distance <= AWARENESS_RANGE {
                    nearby.push((entity, hero, distance));
                }
            }
        }

        for (entity, player, distance) in nearby {
            if let Some(actor) = self.actors.get(&entity) {
                actor.tell(AvatarNotice::PlayerNearby { player, distance });
            }
        }

        self.cleanup(world);
    }

    fn start(&mut self, entity: Entity, personality: Personality) {
        info!(?entity, name = %personality.name, kind = personality.kind.label(), "Spawning avatar");
        let actor = AvatarActor::new(entity, personality, self.agent.clone(), self.events.clone());
        self.actors.insert(entity, AvatarHandle::spawn(actor, &self.runtime));
    }

    /// Drop actors whose entity is gone or lost its `IntelligentAi`
    fn cleanup(&mut self, world: &World) {
        self.actors.retain(|entity, actor| {
            let alive = world.get::<&IntelligentAi>(*entity).is_ok();
            if !alive {
                debug!(?entity, name = actor.name(), "Stopping avatar");
            }
            alive
        });
    }

    pub fn handle(&self, entity: Entity) -> Option<&AvatarHandle> {
        self.actors.get(&entity)
    }

    /// False when the entity has no actor or its mailbox is full
    pub fn send(&self, entity: Entity, message: AvatarMessage) -> bool {
        self.actors.get(&entity).is_some_and(|a| a.try_send(message))
    }

    /// Number of actors that accepted the notice
    pub fn broadcast(&self, notice: AvatarNotice) -> usize {
        self.actors.values().filter(|a| a.tell(notice.clone())).count()
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Close every mailbox and wait for the actors to drain
    pub async fn shutdown(&mut self) {
        info!(actors = self.actors.len(), "Shutting down avatars");
        let tasks: Vec<_> = self.actors.drain().map(|(_, a)| a.stop()).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Avatar task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::agent::RuleBasedAgent;
    use crate::ai::messages::AvatarDecided;
    use parking_lot::Mutex;

    fn system(events: Arc<EventBus>) -> IntelligentAiSystem {
        IntelligentAiSystem::new(Handle::current(), Some(Arc::new(RuleBasedAgent)), events)
    }

    #[tokio::test]
    async fn test_actors_follow_entities() {
        let mut world = World::new();
        let boss = world.spawn((Name("Goblin King".into()), Position::new(5, 5), IntelligentAi::boss("Goblin King")));
        let _npc = world.spawn((Position::new(1, 1), IntelligentAi::npc("Pip")));
        let _dud = world.spawn((IntelligentAi::new(Default::default()),));

        let mut ai = system(Arc::new(EventBus::new()));
        ai.update(&mut world, 0.1);
        assert_eq!(ai.actor_count(), 2);
        assert_eq!(ai.handle(boss).map(|h| h.kind()), Some(AvatarKind::Boss));

        world.despawn(boss).unwrap();
        ai.update(&mut world, 0.1);
        assert_eq!(ai.actor_count(), 1);
        assert!(ai.handle(boss).is_none());

        ai.shutdown().await;
        assert_eq!(ai.actor_count(), 0);
    }

    #[tokio::test]
    async fn test_nearby_hero_triggers_decision() {
        let events = Arc::new(EventBus::new());
        let decisions = Arc::new(Mutex::new(Vec::new()));
        let sink = decisions.clone();
        events.subscribe::<AvatarDecided, _>(move |e| {
            sink.lock().push(e.decision.action.clone());
            Ok(())
        });

        let mut world = World::new();
        world.spawn((Player, Position::new(0, 0)));
        let boss = world.spawn((Position::new(1, 0), IntelligentAi::boss("Flame Warden").with_cooldown(1.0)));
        world.spawn((Position::new(30, 30), IntelligentAi::boss("Far Away").with_cooldown(1.0)));

        let mut ai = system(events);
        ai.update(&mut world, 0.5);
        ai.update(&mut world, 0.5);

        let state = ai.handle(boss).unwrap().state().await.unwrap();
        assert_eq!(state.behavior, "melee_attack");
        assert_eq!(state.emotion, "focused");
        assert_eq!(decisions.lock().as_slice(), ["melee_attack".to_string()]);
        ai.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_actor() {
        let mut world = World::new();
        let a = world.spawn((IntelligentAi::npc("A"),));
        world.spawn((IntelligentAi::npc("B"),));
        let mut ai = system(Arc::new(EventBus::new()));
        ai.update(&mut world, 0.0);

        let sent = ai.broadcast(AvatarNotice::WorldEvent {
            description: "The bells rang".into(),
            importance: 0.8,
        });
        assert_eq!(sent, 2);
        let state = ai.handle(a).unwrap().state().await.unwrap();
        assert_eq!(state.memory_count, 1);
        ai.shutdown().await;
    }
}
