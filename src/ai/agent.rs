//! Decision makers behind the avatars
//!
//! An agent turns an avatar's situation into a [`Decision`] or a line of
//! dialogue. [`RuleBasedAgent`] is deterministic and always available;
//! [`LlmAgent`] asks a language model and falls back to the rules when the
//! request or the reply goes wrong.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::component::AvatarKind;
use super::messages::{Decision, DialogueReply};
use crate::core::error::Result;
use crate::llm::{parse_response, LlmClient};

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionContext {
    pub name: String,
    pub kind: AvatarKind,
    pub situation: String,
    pub emotion: String,
    pub stress: f32,
    pub fatigue: f32,
    /// Numeric facts about the situation, e.g. `health` (0..1) or `distance`
    pub factors: BTreeMap<String, f32>,
    pub recent_memories: Vec<String>,
}

impl DecisionContext {
    fn factor(&self, key: &str) -> Option<f32> {
        self.factors.get(key).copied()
    }

    fn prompt(&self) -> String {
        let mut prompt = format!(
            "You are {} ({}), currently feeling {} (stress {:.2}, fatigue {:.2}).\nSituation: {}\n",
            self.name,
            self.kind.label(),
            self.emotion,
            self.stress,
            self.fatigue,
            self.situation
        );
        for (k, v) in &self.factors {
            prompt.push_str(&format!("- {}: {:.2}\n", k, v));
        }
        if !self.recent_memories.is_empty() {
            prompt.push_str("Recent memories:\n");
            for m in &self.recent_memories {
                prompt.push_str(&format!("- {}\n", m));
            }
        }
        prompt
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogueContext {
    pub speaker: String,
    pub kind: AvatarKind,
    pub emotion: String,
    pub target: String,
    pub topic: String,
    pub context: Option<String>,
    pub affinity: f32,
    pub recent_memories: Vec<String>,
}

#[async_trait]
pub trait IntelligenceAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn decide(&self, ctx: &DecisionContext) -> Result<Decision>;

    async fn converse(&self, ctx: &DialogueContext) -> Result<DialogueReply>;
}

/// Fixed tactics for bosses, simple manners for townsfolk
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedAgent;

impl RuleBasedAgent {
    pub fn decide_now(&self, ctx: &DecisionContext) -> Decision {
        let distance = ctx.factor("distance").unwrap_or(f32::MAX);
        match ctx.kind {
            AvatarKind::Boss => {
                let health = ctx.factor("health").unwrap_or(1.0);
                if health < 0.25 {
                    Decision::new("desperate_assault", "Wounded badly, nothing left to lose", 0.8)
                } else if distance <= 1.5 {
                    Decision::new("melee_attack", "The intruder is within reach", 0.9)
                } else if distance <= 8.0 {
                    Decision::new("use_ability", "Strike before the intruder closes in", 0.7)
                } else {
                    Decision::new("hold_position", "Guard the lair", 0.6)
                }
            }
            AvatarKind::Npc => {
                if ctx.stress > 0.7 {
                    Decision::new("avoid_player", "Too shaken to talk", 0.7)
                } else if distance <= 3.0 {
                    Decision::new("greet_player", "A visitor is close by", 0.8)
                } else {
                    Decision::new("idle", "Nothing needs attention", 0.5)
                }
            }
        }
    }

    pub fn converse_now(&self, ctx: &DialogueContext) -> DialogueReply {
        let (text, delta) = match ctx.kind {
            AvatarKind::Boss if ctx.affinity <= -50.0 => (format!("You again, {}? This ends now.", ctx.target), -0.02),
            AvatarKind::Boss => (format!("Turn back, {}. {} is not for you.", ctx.target, ctx.topic), 0.0),
            AvatarKind::Npc if ctx.affinity >= 50.0 => {
                (format!("Good to see you, {}! About {}, ask me anything.", ctx.target, ctx.topic), 0.02)
            }
            AvatarKind::Npc if ctx.affinity <= -50.0 => (format!("I've nothing to say about {}.", ctx.topic), 0.0),
            AvatarKind::Npc => (format!("Hello, {}. You want to know about {}?", ctx.target, ctx.topic), 0.02),
        };
        DialogueReply {
            target: ctx.target.clone(),
            text,
            emotion: Some(ctx.emotion.clone()),
            relationship_delta: delta,
        }
    }
}

#[async_trait]
impl IntelligenceAgent for RuleBasedAgent {
    fn name(&self) -> &str {
        "rules"
    }

    async fn decide(&self, ctx: &DecisionContext) -> Result<Decision> {
        Ok(self.decide_now(ctx))
    }

    async fn converse(&self, ctx: &DialogueContext) -> Result<DialogueReply> {
        Ok(self.converse_now(ctx))
    }
}

const DECISION_SYSTEM_PROMPT: &str = "You control a character in a roguelike dungeon. \
Reply with a JSON object: {\"action\": string, \"reasoning\": string, \"confidence\": number between 0 and 1}.";

const DIALOGUE_SYSTEM_PROMPT: &str = "You voice a character in a roguelike dungeon. Stay in character, \
answer in one or two sentences. Reply with a JSON object: {\"text\": string, \"emotion\": string, \
\"relationship_delta\": number between -1 and 1}.";

#[derive(Debug, Deserialize)]
struct DialoguePayload {
    text: String,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    relationship_delta: f32,
}

pub struct LlmAgent {
    client: LlmClient,
    fallback: RuleBasedAgent,
}

impl LlmAgent {
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            fallback: RuleBasedAgent,
        }
    }

    async fn ask_decision(&self, ctx: &DecisionContext) -> Result<Decision> {
        let response = self.client.complete(DECISION_SYSTEM_PROMPT, &ctx.prompt()).await?;
        let mut decision: Decision = parse_response(&response)?;
        decision.confidence = decision.confidence.clamp(0.0, 1.0);
        Ok(decision)
    }

    async fn ask_dialogue(&self, ctx: &DialogueContext) -> Result<DialogueReply> {
        let mut prompt = format!(
            "You are {}, feeling {}. {} (affinity {:.0}) asks about: {}\n",
            ctx.speaker, ctx.emotion, ctx.target, ctx.affinity, ctx.topic
        );
        if let Some(extra) = &ctx.context {
            prompt.push_str(&format!("Context: {}\n", extra));
        }
        for m in &ctx.recent_memories {
            prompt.push_str(&format!("You remember: {}\n", m));
        }
        let response = self.client.complete(DIALOGUE_SYSTEM_PROMPT, &prompt).await?;
        let payload: DialoguePayload = parse_response(&response)?;
        Ok(DialogueReply {
            target: ctx.target.clone(),
            text: payload.text,
            emotion: payload.emotion,
            relationship_delta: payload.relationship_delta.clamp(-1.0, 1.0),
        })
    }
}

#[async_trait]
impl IntelligenceAgent for LlmAgent {
    fn name(&self) -> &str {
        self.client.model()
    }

    async fn decide(&self, ctx: &DecisionContext) -> Result<Decision> {
        match self.ask_decision(ctx).await {
            Ok(decision) => {
                debug!(avatar = %ctx.name, action = %decision.action, "LLM decision");
                Ok(decision)
            }
            Err(e) => {
                warn!(avatar = %ctx.name, error = %e, "LLM decision failed, using rules");
                Ok(self.fallback.decide_now(ctx))
            }
        }
    }

    async fn converse(&self, ctx: &DialogueContext) -> Result<DialogueReply> {
        match self.ask_dialogue(ctx).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!(avatar = %ctx.speaker, error = %e, "LLM dialogue failed, using rules");
                Ok(self.fallback.converse_now(ctx))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(kind: AvatarKind, factors: &[(&str, f32)]) -> DecisionContext {
        DecisionContext {
            name: "Test".into(),
            kind,
            situation: "player nearby".into(),
            emotion: "calm".into(),
            stress: 0.0,
            fatigue: 0.0,
            factors: factors.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            recent_memories: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_boss_tactics() {
        let agent = RuleBasedAgent;
        let close = agent.decide(&ctx(AvatarKind::Boss, &[("distance", 1.0)])).await.unwrap();
        assert_eq!(close.action, "melee_attack");
        let hurt = agent
            .decide(&ctx(AvatarKind::Boss, &[("distance", 1.0), ("health", 0.1)]))
            .await
            .unwrap();
        assert_eq!(hurt.action, "desperate_assault");
        let far = agent.decide(&ctx(AvatarKind::Boss, &[])).await.unwrap();
        assert_eq!(far.action, "hold_position");
    }

    #[tokio::test]
    async fn test_npc_greets_close_visitors() {
        let agent = RuleBasedAgent;
        let near = agent.decide(&ctx(AvatarKind::Npc, &[("distance", 2.0)])).await.unwrap();
        assert_eq!(near.action, "greet_player");
        let mut shaken = ctx(AvatarKind::Npc, &[("distance", 2.0)]);
        shaken.stress = 0.9;
        assert_eq!(agent.decide(&shaken).await.unwrap().action, "avoid_player");
    }

    #[tokio::test]
    async fn test_friendly_npc_dialogue_builds_trust() {
        let reply = RuleBasedAgent
            .converse(&DialogueContext {
                speaker: "Pip".into(),
                kind: AvatarKind::Npc,
                emotion: "happy".into(),
                target: "Hero".into(),
                topic: "potions".into(),
                context: None,
                affinity: 60.0,
                recent_memories: Vec::new(),
            })
            .await
            .unwrap();
        assert!(reply.text.contains("potions"));
        assert!(reply.relationship_delta > 0.0);
        assert_eq!(reply.target, "Hero");
    }

    #[test]
    fn test_prompt_mentions_factors() {
        let prompt = ctx(AvatarKind::Boss, &[("distance", 4.0)]).prompt();
        assert!(prompt.contains("distance: 4.00"));
        assert!(prompt.contains("(boss)"));
    }
}
