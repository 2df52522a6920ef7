//! Avatar actors: one tokio task per intelligent entity
//!
//! Each actor owns its mood, memory and relationships outright and is only
//! reachable through its mailbox, so none of that state needs locking.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use hecs::Entity;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::agent::{DecisionContext, DialogueContext, IntelligenceAgent};
use super::component::{AvatarKind, Personality};
use super::memory::{AvatarMemory, AvatarState, Relationship};
use super::messages::{
    AvatarDecided, AvatarMessage, AvatarMoodChanged, AvatarNotice, AvatarSpoke, Decision, DialogueReply,
    RelationshipReport, StateReport, StateUpdate,
};
use crate::core::error::{LablabError, Result};
use crate::plugins::events::EventBus;

pub const MAILBOX_CAPACITY: usize = 64;
/// Memories fed into each decision or conversation
const CONTEXT_MEMORIES: usize = 5;
/// Affinity points per unit of trust plus respect
const AFFINITY_SCALE: f32 = 50.0;

pub struct AvatarActor {
    entity: Entity,
    personality: Personality,
    state: AvatarState,
    memory: AvatarMemory,
    relationships: HashMap<String, Relationship>,
    agent: Option<Arc<dyn IntelligenceAgent>>,
    events: Arc<EventBus>,
}

impl AvatarActor {
    pub fn new(
        entity: Entity,
        personality: Personality,
        agent: Option<Arc<dyn IntelligenceAgent>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            entity,
            state: AvatarState::new(personality.default_emotion.clone()),
            memory: AvatarMemory::new(personality.short_term_capacity),
            relationships: HashMap::new(),
            personality,
            agent,
            events,
        }
    }

    async fn run(mut self, mut mailbox: mpsc::Receiver<AvatarMessage>) {
        info!(avatar = %self.personality.name, kind = self.personality.kind.label(), "Avatar started");
        while let Some(message) = mailbox.recv().await {
            self.handle(message).await;
        }
        info!(avatar = %self.personality.name, "Avatar stopped");
    }

    async fn handle(&mut self, message: AvatarMessage) {
        match message {
            AvatarMessage::Notice(notice) => self.on_notice(notice).await,
            AvatarMessage::MakeDecision { situation, factors, reply } => {
                let decision = self.decide(situation, factors).await;
                let _ = reply.send(decision);
            }
            AvatarMessage::InitiateDialogue {
                target,
                topic,
                context,
                reply,
            } => {
                let answer = self.converse(target, topic, context).await;
                let _ = reply.send(answer);
            }
            AvatarMessage::UpdateState { update, reply } => {
                let _ = reply.send(self.update_state(update));
            }
            AvatarMessage::GetState { reply } => {
                let _ = reply.send(self.report());
            }
            AvatarMessage::AddMemory {
                content,
                category,
                importance,
                reply,
            } => {
                self.memory.add(content, category, importance);
                let _ = reply.send(true);
            }
            AvatarMessage::QueryMemory {
                category,
                since,
                max_results,
                reply,
            } => {
                let _ = reply.send(self.memory.query(category.as_deref(), since, max_results));
            }
            AvatarMessage::UpdateRelationship {
                target,
                trust_delta,
                respect_delta,
                reason,
                reply,
            } => {
                let rel = self
                    .relationships
                    .entry(target.clone())
                    .or_insert_with(|| Relationship::new(target));
                rel.adjust_affinity((trust_delta + respect_delta) * AFFINITY_SCALE);
                if let Some(reason) = reason {
                    rel.record(reason);
                }
                let _ = reply.send(relationship_report(rel));
            }
            AvatarMessage::GetRelationship { target, reply } => {
                let report = match self.relationships.get(&target) {
                    Some(rel) => relationship_report(rel),
                    None => relationship_report(&Relationship::new(target)),
                };
                let _ = reply.send(report);
            }
        }
    }

    async fn on_notice(&mut self, notice: AvatarNotice) {
        match notice {
            AvatarNotice::PlayerNearby { distance, .. } => {
                let importance = match self.personality.kind {
                    AvatarKind::Boss => 0.4,
                    AvatarKind::Npc => 0.2,
                };
                self.memory
                    .add(format!("Saw the hero {} tiles away", distance), "observation", importance);
                if self.personality.kind == AvatarKind::Boss {
                    self.state.set_stress(self.state.stress + 0.05);
                    if distance <= 3 && self.state.emotion == self.personality.default_emotion {
                        self.set_emotion("focused");
                    }
                }
                let factors = BTreeMap::from([("distance".to_string(), distance as f32)]);
                self.decide("The hero is nearby".to_string(), factors).await;
            }
            AvatarNotice::WorldEvent { description, importance } => {
                self.memory.add(description, "world", importance);
            }
        }
    }

    fn recent_memories(&self) -> Vec<String> {
        self.memory
            .query(None, None, CONTEXT_MEMORIES)
            .into_iter()
            .map(|m| m.content)
            .collect()
    }

    async fn decide(&mut self, situation: String, factors: BTreeMap<String, f32>) -> Decision {
        let Some(agent) = self.agent.clone() else {
            return Decision::new("wait", "No decision agent available", 0.0);
        };
        let ctx = DecisionContext {
            name: self.personality.name.clone(),
            kind: self.personality.kind,
            situation,
            emotion: self.state.emotion.clone(),
            stress: self.state.stress,
            fatigue: self.state.fatigue,
            factors,
            recent_memories: self.recent_memories(),
        };
        let decision = match agent.decide(&ctx).await {
            Ok(d) => d,
            Err(e) => {
                warn!(avatar = %self.personality.name, error = %e, "Decision failed");
                Decision::new("wait", format!("Decision failed: {}", e), 0.0)
            }
        };
        debug!(avatar = %self.personality.name, action = %decision.action, "Decided");
        self.state.behavior = decision.action.clone();
        self.events.publish(&AvatarDecided {
            entity: self.entity,
            name: self.personality.name.clone(),
            decision: decision.clone(),
        });
        decision
    }

    async fn converse(&mut self, target: String, topic: String, context: Option<String>) -> DialogueReply {
        let affinity = self.relationships.get(&target).map_or(0.0, |r| r.affinity);
        let reply = match self.agent.clone() {
            Some(agent) => {
                let ctx = DialogueContext {
                    speaker: self.personality.name.clone(),
                    kind: self.personality.kind,
                    emotion: self.state.emotion.clone(),
                    target: target.clone(),
                    topic: topic.clone(),
                    context,
                    affinity,
                    recent_memories: self.recent_memories(),
                };
                agent.converse(&ctx).await.unwrap_or_else(|e| {
                    warn!(avatar = %self.personality.name, error = %e, "Dialogue failed");
                    silent_reply(&target)
                })
            }
            None => silent_reply(&target),
        };

        let rel = self
            .relationships
            .entry(target.clone())
            .or_insert_with(|| Relationship::new(target.clone()));
        rel.adjust_affinity(reply.relationship_delta * AFFINITY_SCALE);
        rel.record(format!("Talked about {}", topic));
        self.memory
            .add(format!("Talked with {} about {}", target, topic), "dialogue", 0.3);

        if let Some(emotion) = reply.emotion.clone() {
            self.set_emotion(&emotion);
        }
        self.events.publish(&AvatarSpoke {
            entity: self.entity,
            name: self.personality.name.clone(),
            target,
            text: reply.text.clone(),
        });
        reply
    }

    /// Returns true when anything changed
    fn update_state(&mut self, update: StateUpdate) -> bool {
        let mut changed = false;
        if let Some(emotion) = update.emotion {
            changed |= self.set_emotion(&emotion);
        }
        if let Some(stress) = update.stress {
            self.state.set_stress(stress);
            changed = true;
        }
        if let Some(fatigue) = update.fatigue {
            self.state.set_fatigue(fatigue);
            changed = true;
        }
        for (key, value) in update.modifiers {
            self.state.set_modifier(key, value);
            changed = true;
        }
        changed
    }

    /// Emotions outside the personality's range are refused
    fn set_emotion(&mut self, emotion: &str) -> bool {
        if !self.personality.allows(emotion) || self.state.emotion == emotion {
            return false;
        }
        let from = std::mem::replace(&mut self.state.emotion, emotion.to_string());
        self.events.publish(&AvatarMoodChanged {
            entity: self.entity,
            name: self.personality.name.clone(),
            from,
            to: emotion.to_string(),
        });
        true
    }

    fn report(&self) -> StateReport {
        StateReport {
            name: self.personality.name.clone(),
            kind: self.personality.kind,
            emotion: self.state.emotion.clone(),
            stress: self.state.stress,
            fatigue: self.state.fatigue,
            behavior: self.state.behavior.clone(),
            modifiers: self.state.modifiers.clone(),
            memory_count: self.memory.len(),
        }
    }
}

fn silent_reply(target: &str) -> DialogueReply {
    DialogueReply {
        target: target.to_string(),
        text: "...".to_string(),
        emotion: None,
        relationship_delta: 0.0,
    }
}

fn relationship_report(rel: &Relationship) -> RelationshipReport {
    RelationshipReport {
        target: rel.target.clone(),
        affinity: rel.affinity,
        trust: rel.trust(),
        kind: rel.kind().to_string(),
        interactions: rel.history.len(),
    }
}

/// Address of a running avatar
pub struct AvatarHandle {
    entity: Entity,
    name: String,
    kind: AvatarKind,
    mailbox: mpsc::Sender<AvatarMessage>,
    task: JoinHandle<()>,
}

impl AvatarHandle {
    pub fn spawn(actor: AvatarActor, runtime: &Handle) -> Self {
        let (mailbox, inbox) = mpsc::channel(MAILBOX_CAPACITY);
        let entity = actor.entity;
        let name = actor.personality.name.clone();
        let kind = actor.personality.kind;
        let task = runtime.spawn(actor.run(inbox));
        Self {
            entity,
            name,
            kind,
            mailbox,
            task,
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AvatarKind {
        self.kind
    }

    /// Queue a notice without waiting; false when the mailbox is full or closed
    pub fn tell(&self, notice: AvatarNotice) -> bool {
        match self.mailbox.try_send(AvatarMessage::Notice(notice)) {
            Ok(()) => true,
            Err(e) => {
                debug!(avatar = %self.name, error = %e, "Notice dropped");
                false
            }
        }
    }

    pub fn try_send(&self, message: AvatarMessage) -> bool {
        self.mailbox.try_send(message).is_ok()
    }

    /// Send a request and wait for its reply
    pub async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> AvatarMessage) -> Result<T> {
        let (reply, answer) = oneshot::channel();
        self.mailbox
            .send(build(reply))
            .await
            .map_err(|_| LablabError::Actor(self.name.clone()))?;
        answer.await.map_err(|_| LablabError::Actor(self.name.clone()))
    }

    pub async fn decide(&self, situation: impl Into<String>, factors: BTreeMap<String, f32>) -> Result<Decision> {
        let situation = situation.into();
        self.request(|reply| AvatarMessage::MakeDecision {
            situation,
            factors,
            reply,
        })
        .await
    }

    pub async fn talk(&self, target: impl Into<String>, topic: impl Into<String>) -> Result<DialogueReply> {
        let (target, topic) = (target.into(), topic.into());
        self.request(|reply| AvatarMessage::InitiateDialogue {
            target,
            topic,
            context: None,
            reply,
        })
        .await
    }

    pub async fn state(&self) -> Result<StateReport> {
        self.request(|reply| AvatarMessage::GetState { reply }).await
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Close the mailbox; the task finishes what is queued and exits
    pub fn stop(self) -> JoinHandle<()> {
        self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::agent::RuleBasedAgent;
    use parking_lot::Mutex;

    fn spawn(personality: Personality, agent: bool) -> (AvatarHandle, Arc<EventBus>) {
        let events = Arc::new(EventBus::new());
        let agent = if agent {
            Some(Arc::new(RuleBasedAgent) as Arc<dyn IntelligenceAgent>)
        } else {
            None
        };
        let entity = hecs::World::new().spawn(());
        let actor = AvatarActor::new(entity, personality, agent, events.clone());
        (AvatarHandle::spawn(actor, &Handle::current()), events)
    }

    #[tokio::test]
    async fn test_emotion_must_be_in_range() {
        let (boss, events) = spawn(Personality::boss("Goblin King"), true);
        let moods = Arc::new(Mutex::new(Vec::new()));
        let sink = moods.clone();
        events.subscribe::<AvatarMoodChanged, _>(move |e| {
            sink.lock().push(e.to.clone());
            Ok(())
        });

        let refused = boss
            .request(|reply| AvatarMessage::UpdateState {
                update: StateUpdate {
                    emotion: Some("happy".into()),
                    ..Default::default()
                },
                reply,
            })
            .await
            .unwrap();
        assert!(!refused);

        let accepted = boss
            .request(|reply| AvatarMessage::UpdateState {
                update: StateUpdate {
                    emotion: Some("enraged".into()),
                    stress: Some(3.0),
                    ..Default::default()
                },
                reply,
            })
            .await
            .unwrap();
        assert!(accepted);

        let state = boss.state().await.unwrap();
        assert_eq!(state.emotion, "enraged");
        assert_eq!(state.stress, 1.0);
        assert_eq!(moods.lock().as_slice(), ["enraged".to_string()]);
    }

    #[tokio::test]
    async fn test_relationships_default_to_neutral_trust() {
        let (npc, _) = spawn(Personality::npc("Pip"), true);
        let stranger = npc
            .request(|reply| AvatarMessage::GetRelationship {
                target: "Hero".into(),
                reply,
            })
            .await
            .unwrap();
        assert_eq!(stranger.trust, 0.5);
        assert_eq!(stranger.interactions, 0);

        let friend = npc
            .request(|reply| AvatarMessage::UpdateRelationship {
                target: "Hero".into(),
                trust_delta: 0.5,
                respect_delta: 0.5,
                reason: Some("Saved the shop".into()),
                reply,
            })
            .await
            .unwrap();
        assert_eq!(friend.affinity, 50.0);
        assert_eq!(friend.trust, 0.75);
        assert_eq!(friend.kind, "Friendly");
        assert_eq!(friend.interactions, 1);
    }

    #[tokio::test]
    async fn test_without_agent_decisions_are_empty() {
        let (npc, _) = spawn(Personality::npc("Pip"), false);
        let decision = npc.decide("anything", BTreeMap::new()).await.unwrap();
        assert_eq!(decision.reasoning, "No decision agent available");
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_dialogue_is_published_and_remembered() {
        let (npc, events) = spawn(Personality::npc("Pip"), true);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        events.subscribe::<AvatarSpoke, _>(move |e| {
            sink.lock().push(e.text.clone());
            Ok(())
        });

        let reply = npc.talk("Hero", "the mines").await.unwrap();
        assert!(reply.text.contains("the mines"));
        assert_eq!(lines.lock().len(), 1);

        let memories = npc
            .request(|reply| AvatarMessage::QueryMemory {
                category: Some("dialogue".into()),
                since: None,
                max_results: 10,
                reply,
            })
            .await
            .unwrap();
        assert_eq!(memories.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_ends_the_task() {
        let (npc, _) = spawn(Personality::npc("Pip"), true);
        assert!(npc.tell(AvatarNotice::WorldEvent {
            description: "The gate fell".into(),
            importance: 0.9,
        }));
        let task = npc.stop();
        task.await.unwrap();
    }
}
