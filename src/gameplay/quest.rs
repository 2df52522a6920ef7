//! Quests: templates, per-player progress, rewards and generation
//!
//! Quest definitions are shared content loaded from TOML. Progress lives on
//! the player in a [`QuestLog`] component, so two players never share
//! counters and a stashed level never loses quest state.

use std::collections::BTreeMap;

use hecs::{Entity, World};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::components::{EnemyKind, Gold, Position};
use crate::core::error::{LablabError, Result};
use crate::events::{GameEvent, QuestStateChanged};
use crate::game::log::LogSeverity;
use crate::gameplay::inventory;
use crate::gameplay::progression::{Experience, ProgressionService};
use crate::llm::{parse_response, GameContext, LlmClient};
use crate::systems::Outcome;

const DEFAULT_QUESTS: &str = include_str!("../../data/quests.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestState {
    NotStarted,
    Active,
    Completed,
    Failed,
    Abandoned,
}

impl QuestState {
    pub fn is_finished(&self) -> bool {
        matches!(self, QuestState::Completed | QuestState::Failed | QuestState::Abandoned)
    }
}

/// What an objective counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ObjectiveGoal {
    KillEnemies { enemy: String },
    CollectItems { item: String },
    ReachLocation {
        level: u32,
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
    },
    TalkToNpc { npc: String },
}

impl ObjectiveGoal {
    fn matches_kill(&self, kind: EnemyKind) -> bool {
        matches!(self, ObjectiveGoal::KillEnemies { enemy } if enemy.eq_ignore_ascii_case(kind.name()) || enemy == "any")
    }

    fn matches_item(&self, name: &str) -> bool {
        matches!(self, ObjectiveGoal::CollectItems { item } if item.eq_ignore_ascii_case(name))
    }

    fn matches_location(&self, at_level: u32, at: Position) -> bool {
        match self {
            ObjectiveGoal::ReachLocation { level, x, y } => {
                *level == at_level && x.map_or(true, |x| x == at.x) && y.map_or(true, |y| y == at.y)
            }
            _ => false,
        }
    }

    fn matches_npc(&self, npc_id: &str) -> bool {
        matches!(self, ObjectiveGoal::TalkToNpc { npc } if npc == npc_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveDefinition {
    pub description: String,
    #[serde(default = "one")]
    pub required: u32,
    pub goal: ObjectiveGoal,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestRewards {
    #[serde(default)]
    pub experience: i64,
    #[serde(default)]
    pub gold: i32,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestPrerequisites {
    #[serde(default)]
    pub min_level: u32,
    #[serde(default)]
    pub quests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// NPC id that takes the turn-in; `None` completes automatically
    #[serde(default)]
    pub giver: Option<String>,
    pub objectives: Vec<ObjectiveDefinition>,
    #[serde(default)]
    pub rewards: QuestRewards,
    #[serde(default)]
    pub prerequisites: QuestPrerequisites,
}

#[derive(Debug, Deserialize)]
struct QuestFile {
    quest: Vec<QuestDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectiveProgress {
    pub description: String,
    pub goal: ObjectiveGoal,
    pub current: u32,
    pub required: u32,
}

impl ObjectiveProgress {
    pub fn is_complete(&self) -> bool {
        self.current >= self.required
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestProgress {
    pub quest_id: String,
    pub state: QuestState,
    pub objectives: Vec<ObjectiveProgress>,
}

impl QuestProgress {
    pub fn objectives_complete(&self) -> bool {
        self.objectives.iter().all(|o| o.is_complete())
    }
}

/// Every quest the player has touched, keyed by quest id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestLog {
    pub quests: BTreeMap<String, QuestProgress>,
}

impl QuestLog {
    pub fn state(&self, quest_id: &str) -> QuestState {
        self.quests.get(quest_id).map(|q| q.state).unwrap_or(QuestState::NotStarted)
    }

    pub fn has_completed(&self, quest_id: &str) -> bool {
        self.state(quest_id) == QuestState::Completed
    }

    fn ids_in(&self, state: QuestState) -> Vec<String> {
        self.quests.values().filter(|q| q.state == state).map(|q| q.quest_id.clone()).collect()
    }
}

/// Read-only view for UIs and dialogue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub state: QuestState,
    pub objectives: Vec<ObjectiveProgress>,
    pub rewards: QuestRewards,
}

fn state_event(def: &QuestDefinition, state: QuestState) -> GameEvent {
    GameEvent::Quest(QuestStateChanged {
        quest_id: def.id.clone(),
        quest_name: def.name.clone(),
        state,
    })
}

#[derive(Debug)]
pub struct QuestService {
    definitions: RwLock<BTreeMap<String, QuestDefinition>>,
    progression: ProgressionService,
}

impl QuestService {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: QuestFile = toml::from_str(source)?;
        let service = Self {
            definitions: RwLock::new(BTreeMap::new()),
            progression: ProgressionService::new(),
        };
        for def in file.quest {
            service.register(def)?;
        }
        Ok(service)
    }

    pub fn with_defaults() -> Result<Self> {
        Self::from_toml_str(DEFAULT_QUESTS)
    }

    /// Add a quest template; generated quests come through here too
    pub fn register(&self, def: QuestDefinition) -> Result<()> {
        if def.id.trim().is_empty() {
            return Err(LablabError::InvalidAction("Quest id must not be empty".into()));
        }
        if def.objectives.is_empty() {
            return Err(LablabError::InvalidAction(format!("Quest '{}' has no objectives", def.id)));
        }
        self.definitions.write().insert(def.id.clone(), def);
        Ok(())
    }

    pub fn definition(&self, quest_id: &str) -> Option<QuestDefinition> {
        self.definitions.read().get(quest_id).cloned()
    }

    pub fn quest_ids(&self) -> Vec<String> {
        self.definitions.read().keys().cloned().collect()
    }

    pub fn state(&self, world: &World, player: Entity, quest_id: &str) -> QuestState {
        world
            .get::<&QuestLog>(player)
            .map(|log| log.state(quest_id))
            .unwrap_or(QuestState::NotStarted)
    }

    pub fn meets_prerequisites(&self, world: &World, player: Entity, quest_id: &str) -> bool {
        let Some(def) = self.definition(quest_id) else {
            return false;
        };
        let level = world.get::<&Experience>(player).map(|x| x.level).unwrap_or(1);
        if level < def.prerequisites.min_level {
            return false;
        }
        let Ok(log) = world.get::<&QuestLog>(player) else {
            return def.prerequisites.quests.is_empty();
        };
        def.prerequisites.quests.iter().all(|q| log.has_completed(q))
    }

    pub fn start(&self, world: &mut World, player: Entity, quest_id: &str) -> (Outcome, Vec<GameEvent>) {
        let Some(def) = self.definition(quest_id) else {
            return (Outcome::fail(format!("Unknown quest: {}", quest_id)), Vec::new());
        };
        if world.get::<&QuestLog>(player).is_err() {
            return (Outcome::fail("No quest log."), Vec::new());
        }
        let state = self.state(world, player, quest_id);
        if state != QuestState::NotStarted {
            return (Outcome::fail(format!("{} is already {:?}.", def.name, state)), Vec::new());
        }
        if !self.meets_prerequisites(world, player, quest_id) {
            return (Outcome::fail(format!("You are not ready for {} yet.", def.name)), Vec::new());
        }

        let progress = QuestProgress {
            quest_id: def.id.clone(),
            state: QuestState::Active,
            objectives: def
                .objectives
                .iter()
                .map(|o| ObjectiveProgress {
                    description: o.description.clone(),
                    goal: o.goal.clone(),
                    current: 0,
                    required: o.required.max(1),
                })
                .collect(),
        };
        if let Ok(mut log) = world.get::<&mut QuestLog>(player) {
            log.quests.insert(def.id.clone(), progress);
        }
        tracing::info!(quest = %def.id, "Quest started");
        let message = format!("Quest started: {}", def.name);
        let events = vec![
            GameEvent::message(message.clone(), LogSeverity::Info),
            state_event(&def, QuestState::Active),
        ];
        (Outcome::ok(message), events)
    }

    /// Turn in an active quest whose objectives are all done
    pub fn complete(&self, world: &mut World, player: Entity, quest_id: &str) -> (Outcome, Vec<GameEvent>) {
        let Some(def) = self.definition(quest_id) else {
            return (Outcome::fail(format!("Unknown quest: {}", quest_id)), Vec::new());
        };
        if self.state(world, player, quest_id) != QuestState::Active {
            return (Outcome::fail(format!("{} is not active.", def.name)), Vec::new());
        }
        if !self.objectives_complete(world, player, quest_id) {
            return (Outcome::fail(format!("{} is not finished yet.", def.name)), Vec::new());
        }
        self.set_state(world, player, quest_id, QuestState::Completed);

        let mut events = Vec::new();
        let rewards = &def.rewards;
        if rewards.gold > 0 {
            let has_purse = world.get::<&mut Gold>(player).map(|mut g| g.add(rewards.gold)).is_ok();
            if !has_purse {
                let _ = world.insert_one(player, Gold::new(rewards.gold));
            }
        }
        for item in &rewards.items {
            let given = inventory::give_item(world, player, item, 1);
            events.push(GameEvent::message(given.message, LogSeverity::Loot));
        }

        let mut summary = format!("Quest completed: {}!", def.name);
        if rewards.experience > 0 {
            summary.push_str(&format!(" +{} XP", rewards.experience));
        }
        if rewards.gold > 0 {
            summary.push_str(&format!(" +{} gold", rewards.gold));
        }
        events.insert(0, GameEvent::message(summary.clone(), LogSeverity::Success));
        events.push(state_event(&def, QuestState::Completed));
        if rewards.experience > 0 {
            events.extend(self.progression.award(world, player, rewards.experience).events);
        }
        tracing::info!(quest = %def.id, "Quest completed");
        (Outcome::ok(summary), events)
    }

    pub fn fail(&self, world: &mut World, player: Entity, quest_id: &str) -> (Outcome, Vec<GameEvent>) {
        self.close(world, player, quest_id, QuestState::Failed, "Quest failed")
    }

    pub fn abandon(&self, world: &mut World, player: Entity, quest_id: &str) -> (Outcome, Vec<GameEvent>) {
        self.close(world, player, quest_id, QuestState::Abandoned, "Quest abandoned")
    }

    fn close(
        &self,
        world: &mut World,
        player: Entity,
        quest_id: &str,
        state: QuestState,
        verb: &str,
    ) -> (Outcome, Vec<GameEvent>) {
        let Some(def) = self.definition(quest_id) else {
            return (Outcome::fail(format!("Unknown quest: {}", quest_id)), Vec::new());
        };
        if self.state(world, player, quest_id) != QuestState::Active {
            return (Outcome::fail(format!("{} is not active.", def.name)), Vec::new());
        }
        self.set_state(world, player, quest_id, state);
        let message = format!("{}: {}", verb, def.name);
        let events = vec![
            GameEvent::message(message.clone(), LogSeverity::Warning),
            state_event(&def, state),
        ];
        (Outcome::ok(message), events)
    }

    fn set_state(&self, world: &mut World, player: Entity, quest_id: &str, state: QuestState) {
        if let Ok(mut log) = world.get::<&mut QuestLog>(player) {
            if let Some(progress) = log.quests.get_mut(quest_id) {
                progress.state = state;
            }
        }
    }

    pub fn objectives_complete(&self, world: &World, player: Entity, quest_id: &str) -> bool {
        world
            .get::<&QuestLog>(player)
            .ok()
            .and_then(|log| log.quests.get(quest_id).map(|q| q.objectives_complete()))
            .unwrap_or(false)
    }

    pub fn on_enemy_killed(&self, world: &mut World, player: Entity, kind: EnemyKind) -> Vec<GameEvent> {
        self.advance(world, player, 1, |goal| goal.matches_kill(kind))
    }

    pub fn on_item_collected(&self, world: &mut World, player: Entity, item: &str, count: i32) -> Vec<GameEvent> {
        self.advance(world, player, count.max(0) as u32, |goal| goal.matches_item(item))
    }

    pub fn on_location_reached(&self, world: &mut World, player: Entity, level: u32, at: Position) -> Vec<GameEvent> {
        self.advance(world, player, 1, |goal| goal.matches_location(level, at))
    }

    pub fn on_npc_talked_to(&self, world: &mut World, player: Entity, npc_id: &str) -> Vec<GameEvent> {
        self.advance(world, player, 1, |goal| goal.matches_npc(npc_id))
    }

    fn advance(
        &self,
        world: &mut World,
        player: Entity,
        amount: u32,
        matches: impl Fn(&ObjectiveGoal) -> bool,
    ) -> Vec<GameEvent> {
        let mut events = Vec::new();
        if amount == 0 {
            return events;
        }
        let Ok(mut log) = world.get::<&mut QuestLog>(player) else {
            return events;
        };
        let definitions = self.definitions.read();
        for progress in log.quests.values_mut().filter(|q| q.state == QuestState::Active) {
            let was_done = progress.objectives_complete();
            for objective in progress.objectives.iter_mut().filter(|o| !o.is_complete()) {
                if !matches(&objective.goal) {
                    continue;
                }
                objective.current = (objective.current + amount).min(objective.required);
                if objective.is_complete() {
                    events.push(GameEvent::message(
                        format!("Objective complete: {}", objective.description),
                        LogSeverity::Success,
                    ));
                }
            }
            if !was_done && progress.objectives_complete() {
                let name = definitions
                    .get(&progress.quest_id)
                    .map(|d| d.name.clone())
                    .unwrap_or_else(|| progress.quest_id.clone());
                events.push(GameEvent::message(
                    format!("{}: all objectives complete!", name),
                    LogSeverity::Success,
                ));
            }
        }
        events
    }

    /// Active quests with every objective done
    pub fn ready_to_turn_in(&self, world: &World, player: Entity) -> Vec<String> {
        world
            .get::<&QuestLog>(player)
            .map(|log| {
                log.quests
                    .values()
                    .filter(|q| q.state == QuestState::Active && q.objectives_complete())
                    .map(|q| q.quest_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Finished quests that have no giver complete on their own
    pub fn auto_complete(&self, world: &mut World, player: Entity) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for id in self.ready_to_turn_in(world, player) {
            let self_contained = self.definition(&id).map(|d| d.giver.is_none()).unwrap_or(false);
            if self_contained {
                events.extend(self.complete(world, player, &id).1);
            }
        }
        events
    }

    pub fn active_quests(&self, world: &World, player: Entity) -> Vec<QuestInfo> {
        self.quests_in(world, player, QuestState::Active)
    }

    pub fn completed_quests(&self, world: &World, player: Entity) -> Vec<QuestInfo> {
        self.quests_in(world, player, QuestState::Completed)
    }

    fn quests_in(&self, world: &World, player: Entity, state: QuestState) -> Vec<QuestInfo> {
        let Ok(log) = world.get::<&QuestLog>(player) else {
            return Vec::new();
        };
        log.ids_in(state)
            .into_iter()
            .filter_map(|id| {
                let def = self.definition(&id)?;
                let progress = log.quests.get(&id)?;
                Some(QuestInfo {
                    id: def.id,
                    name: def.name,
                    description: def.description,
                    state,
                    objectives: progress.objectives.clone(),
                    rewards: def.rewards,
                })
            })
            .collect()
    }

    /// Not started and prerequisites met
    pub fn available_quests(&self, world: &World, player: Entity) -> Vec<QuestInfo> {
        self.quest_ids()
            .into_iter()
            .filter(|id| self.state(world, player, id) == QuestState::NotStarted)
            .filter(|id| self.meets_prerequisites(world, player, id))
            .filter_map(|id| self.definition(&id))
            .map(|def| QuestInfo {
                objectives: def
                    .objectives
                    .iter()
                    .map(|o| ObjectiveProgress {
                        description: o.description.clone(),
                        goal: o.goal.clone(),
                        current: 0,
                        required: o.required,
                    })
                    .collect(),
                id: def.id,
                name: def.name,
                description: def.description,
                state: QuestState::NotStarted,
                rewards: def.rewards,
            })
            .collect()
    }

    /// Quests a given NPC hands out
    pub fn offered_by(&self, npc_id: &str) -> Vec<String> {
        self.definitions
            .read()
            .values()
            .filter(|d| d.giver.as_deref() == Some(npc_id))
            .map(|d| d.id.clone())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedQuest {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    objectives: Vec<GeneratedObjective>,
    rewards: Option<GeneratedRewards>,
    #[serde(rename = "minimumLevel")]
    minimum_level: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GeneratedObjective {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    target: String,
    #[serde(default = "one")]
    required: u32,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeneratedRewards {
    #[serde(rename = "experiencePoints")]
    experience_points: Option<i64>,
    gold: Option<i32>,
}

const QUEST_SYSTEM_PROMPT: &str = r#"You are a quest generator for a dungeon crawler RPG.
Generate one short quest that matches the player's level and the current floor.
Enemies in this dungeon: Goblin, Orc, Troll, Skeleton.

Return JSON only:
{
  "name": "Quest Name",
  "description": "One or two sentences of story",
  "objectives": [
    {"type": "KillEnemies", "target": "Goblin", "required": 5, "description": "Defeat 5 goblins"}
  ],
  "rewards": {"experiencePoints": 100, "gold": 50},
  "minimumLevel": 1
}

Objective types: KillEnemies (target = enemy), CollectItems (target = item name),
ReachLocation (target = dungeon level number), TalkToNpc (target = npc id)."#;

/// Builds new quest templates, from an LLM when one is configured
#[derive(Debug, Default)]
pub struct QuestGenerator {
    client: Option<LlmClient>,
}

impl QuestGenerator {
    pub fn new(client: Option<LlmClient>) -> Self {
        Self { client }
    }

    /// Never fails: any LLM or parse problem yields the template quest
    pub async fn generate(&self, context: &GameContext) -> QuestDefinition {
        let Some(client) = &self.client else {
            return fallback_quest(context.player_level);
        };
        let prompt = format!(
            "Generate a quest with the following context:\n\n{}\nNearby enemies: {}",
            context.summary(),
            context.enemy_names().join(", ")
        );
        match client.complete(QUEST_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => parse_generated_quest(&reply).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Generated quest unusable, using template");
                fallback_quest(context.player_level)
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Quest generation failed, using template");
                fallback_quest(context.player_level)
            }
        }
    }
}

fn generated_id() -> String {
    format!("generated_{}", uuid::Uuid::new_v4().simple())
}

/// Convert an LLM reply into a quest; unknown objective types are dropped
pub fn parse_generated_quest(reply: &str) -> Result<QuestDefinition> {
    let data: GeneratedQuest = parse_response(reply)?;
    let objectives: Vec<ObjectiveDefinition> = data
        .objectives
        .into_iter()
        .filter_map(|o| {
            let goal = match o.kind.to_ascii_lowercase().as_str() {
                "killenemies" | "kill" => ObjectiveGoal::KillEnemies { enemy: o.target.clone() },
                "collectitems" | "collect" => ObjectiveGoal::CollectItems { item: o.target.clone() },
                "reachlocation" | "reach" => ObjectiveGoal::ReachLocation {
                    level: o.target.trim().parse().ok()?,
                    x: None,
                    y: None,
                },
                "talktonpc" | "talk" => ObjectiveGoal::TalkToNpc { npc: o.target.clone() },
                _ => return None,
            };
            Some(ObjectiveDefinition {
                description: o.description.unwrap_or_else(|| "Complete objective".into()),
                required: o.required.max(1),
                goal,
            })
        })
        .collect();
    if objectives.is_empty() {
        return Err(LablabError::Llm("Generated quest has no usable objectives".into()));
    }
    let rewards = data.rewards.unwrap_or(GeneratedRewards {
        experience_points: None,
        gold: None,
    });
    Ok(QuestDefinition {
        id: generated_id(),
        name: data.name.unwrap_or_else(|| "Unknown Quest".into()),
        description: data.description.unwrap_or_else(|| "A mysterious quest".into()),
        giver: None,
        objectives,
        rewards: QuestRewards {
            experience: rewards.experience_points.unwrap_or(100),
            gold: rewards.gold.unwrap_or(50),
            items: Vec::new(),
        },
        prerequisites: QuestPrerequisites {
            min_level: data.minimum_level.unwrap_or(1),
            quests: Vec::new(),
        },
    })
}

/// Template quest scaled to the player's level
pub fn fallback_quest(player_level: u32) -> QuestDefinition {
    let level = player_level.max(1);
    QuestDefinition {
        id: generated_id(),
        name: "Goblin Extermination".into(),
        description: "The dungeon is overrun with goblins. Clear them out!".into(),
        giver: None,
        objectives: vec![ObjectiveDefinition {
            description: "Defeat goblins".into(),
            required: 5,
            goal: ObjectiveGoal::KillEnemies { enemy: "Goblin".into() },
        }],
        rewards: QuestRewards {
            experience: 100 * level as i64,
            gold: 50 * level as i32,
            items: Vec::new(),
        },
        prerequisites: QuestPrerequisites::default(),
    }
}
