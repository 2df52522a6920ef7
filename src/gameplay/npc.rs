//! Non-player characters and conversations with them
//!
//! An active conversation is a [`DialogueSession`] component on the
//! player. State-setting actions are applied here; everything that touches
//! other services (quests, items, gold, trade, combat) comes back as a
//! [`DialogueEffect`] for the game loop to carry out.

use std::collections::BTreeMap;

use hecs::{Entity, World};
use serde::Serialize;

use crate::components::{BlocksMovement, Gold, Name, Position, Renderable};
use crate::core::error::{LablabError, Result};
use crate::core::types::GlyphColor;
use crate::gameplay::dialogue::{check_condition, ConditionFacts, DialogueAction, DialogueLibrary, DialogueNode};
use crate::gameplay::inventory;
use crate::gameplay::progression::Experience;
use crate::gameplay::quest::{QuestLog, QuestState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Npc {
    pub id: String,
    pub name: String,
    /// quest_giver, merchant, blacksmith, ...
    pub role: String,
    pub dialogue_tree: Option<String>,
    pub interactable: bool,
    pub state: BTreeMap<String, String>,
}

impl Npc {
    pub fn glyph(&self) -> char {
        match self.role.as_str() {
            "merchant" | "blacksmith" => '$',
            "quest_giver" => '!',
            _ => '&',
        }
    }
}

/// Flags set on the player by dialogue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerFlags(pub BTreeMap<String, String>);

/// Present on the player while talking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueSession {
    pub npc: Entity,
    pub tree_id: String,
    pub node_id: String,
}

/// Work a dialogue choice asks of other services
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueEffect {
    AcceptQuest(String),
    CompleteQuest(String),
    GiveItem { item: String, count: i32 },
    TakeItem { item: String, count: i32 },
    GiveGold(i32),
    TakeGold(i32),
    OpenTrade { npc: Entity },
    TriggerEvent(String),
    StartCombat { npc: Entity },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceView {
    pub id: String,
    pub text: String,
}

/// What the UI shows for the current node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogueView {
    pub speaker: String,
    pub text: String,
    pub emotion: Option<String>,
    /// Only choices whose conditions currently hold
    pub choices: Vec<ChoiceView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueStep {
    /// `None` once the conversation is over
    pub view: Option<DialogueView>,
    pub effects: Vec<DialogueEffect>,
}

/// Condition facts read straight from the world
pub struct WorldFacts<'a> {
    pub world: &'a World,
    pub player: Entity,
    pub npc: Option<Entity>,
}

impl ConditionFacts for WorldFacts<'_> {
    fn level(&self) -> i64 {
        self.world.get::<&Experience>(self.player).map(|x| x.level as i64).unwrap_or(1)
    }

    fn gold(&self) -> i64 {
        self.world.get::<&Gold>(self.player).map(|g| g.amount as i64).unwrap_or(0)
    }

    fn item_count(&self, name: &str) -> i64 {
        inventory::count_item(self.world, self.player, name) as i64
    }

    fn quest_state(&self, quest_id: &str) -> QuestState {
        self.world
            .get::<&QuestLog>(self.player)
            .map(|log| log.state(quest_id))
            .unwrap_or(QuestState::NotStarted)
    }

    fn player_state(&self, key: &str) -> Option<String> {
        self.world.get::<&PlayerFlags>(self.player).ok()?.0.get(key).cloned()
    }

    fn npc_state(&self, key: &str) -> Option<String> {
        let npc = self.npc?;
        self.world.get::<&Npc>(npc).ok()?.state.get(key).cloned()
    }
}

#[derive(Debug, Default)]
pub struct NpcService {
    library: DialogueLibrary,
}

impl NpcService {
    pub fn new(library: DialogueLibrary) -> Self {
        Self { library }
    }

    pub fn with_defaults() -> Result<Self> {
        Ok(Self::new(DialogueLibrary::with_defaults()?))
    }

    pub fn library(&self) -> &DialogueLibrary {
        &self.library
    }

    pub fn create_npc(
        &self,
        world: &mut World,
        id: &str,
        name: &str,
        role: &str,
        dialogue_tree: Option<&str>,
        at: Position,
    ) -> Entity {
        let npc = Npc {
            id: id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            dialogue_tree: dialogue_tree.map(str::to_string),
            interactable: true,
            state: BTreeMap::new(),
        };
        let glyph = npc.glyph();
        tracing::debug!(npc = id, ?at, "Spawned NPC");
        world.spawn((
            npc,
            Name(name.to_string()),
            at,
            Renderable::new(glyph, GlyphColor::LightBlue, Renderable::LAYER_ACTOR),
            BlocksMovement,
        ))
    }

    pub fn find_npc(&self, world: &World, id: &str) -> Option<Entity> {
        world
            .query::<&Npc>()
            .iter()
            .find(|(_, npc)| npc.id == id)
            .map(|(e, _)| e)
    }

    pub fn npc_state(&self, world: &World, npc: Entity, key: &str) -> Option<String> {
        world.get::<&Npc>(npc).ok()?.state.get(key).cloned()
    }

    pub fn set_npc_state(&self, world: &mut World, npc: Entity, key: &str, value: &str) {
        if let Ok(mut n) = world.get::<&mut Npc>(npc) {
            n.state.insert(key.to_string(), value.to_string());
        }
    }

    pub fn in_dialogue(&self, world: &World, player: Entity) -> bool {
        world.get::<&DialogueSession>(player).is_ok()
    }

    pub fn start_dialogue(&self, world: &mut World, player: Entity, npc: Entity) -> Result<DialogueStep> {
        let (interactable, tree_id, npc_name) = {
            let n = world.get::<&Npc>(npc).map_err(|_| LablabError::EntityNotFound(npc))?;
            (n.interactable, n.dialogue_tree.clone(), n.name.clone())
        };
        if !interactable {
            return Err(LablabError::InvalidAction(format!("{} does not want to talk.", npc_name)));
        }
        let tree_id = tree_id.ok_or_else(|| LablabError::InvalidAction(format!("{} has nothing to say.", npc_name)))?;
        let start = self
            .library
            .get(&tree_id)
            .and_then(|t| t.start())
            .cloned()
            .ok_or_else(|| LablabError::InvalidAction(format!("Dialogue tree '{}' not found", tree_id)))?;

        let _ = world.insert_one(
            player,
            DialogueSession {
                npc,
                tree_id,
                node_id: start.id.clone(),
            },
        );
        tracing::debug!(npc = %npc_name, "Dialogue started");
        Ok(self.enter_node(world, player, npc, &start))
    }

    pub fn select_choice(&self, world: &mut World, player: Entity, choice_id: &str) -> Result<DialogueStep> {
        let session = world
            .get::<&DialogueSession>(player)
            .map(|s| (*s).clone())
            .map_err(|_| LablabError::InvalidAction("Not in dialogue".into()))?;
        let tree = self
            .library
            .get(&session.tree_id)
            .ok_or_else(|| LablabError::InvalidAction(format!("Dialogue tree '{}' not found", session.tree_id)))?;
        let node = tree
            .node(&session.node_id)
            .ok_or_else(|| LablabError::InvalidAction(format!("Node '{}' not found", session.node_id)))?;
        let choice = node
            .choices
            .iter()
            .find(|c| c.id == choice_id)
            .ok_or_else(|| LablabError::InvalidAction(format!("Choice '{}' not found", choice_id)))?;

        let facts = WorldFacts { world, player, npc: Some(session.npc) };
        if !check_condition(choice.condition.as_deref(), &facts) {
            return Err(LablabError::InvalidAction(format!("Choice '{}' is not available", choice_id)));
        }

        let mut effects = self.run_actions(world, player, session.npc, &choice.actions);

        let next = if choice.ends_dialogue { None } else { choice.next.as_ref().and_then(|id| tree.node(id)) };
        let Some(next) = next else {
            self.end_dialogue(world, player);
            return Ok(DialogueStep { view: None, effects });
        };
        if let Ok(mut s) = world.get::<&mut DialogueSession>(player) {
            s.node_id = next.id.clone();
        }
        let step = self.enter_node(world, player, session.npc, next);
        effects.extend(step.effects);
        Ok(DialogueStep { view: step.view, effects })
    }

    /// The current node with choices filtered by condition
    pub fn current_view(&self, world: &World, player: Entity) -> Option<DialogueView> {
        let session = world.get::<&DialogueSession>(player).ok()?;
        let node = self.library.get(&session.tree_id)?.node(&session.node_id)?;
        Some(self.view(world, player, session.npc, node))
    }

    pub fn end_dialogue(&self, world: &mut World, player: Entity) {
        let _ = world.remove_one::<DialogueSession>(player);
    }

    fn enter_node(&self, world: &mut World, player: Entity, npc: Entity, node: &DialogueNode) -> DialogueStep {
        let effects = self.run_actions(world, player, npc, &node.on_enter);
        let view = self.view(world, player, npc, node);
        // A node without choices is read once and closes the conversation
        if node.is_end_node() {
            self.end_dialogue(world, player);
        }
        DialogueStep { view: Some(view), effects }
    }

    fn view(&self, world: &World, player: Entity, npc: Entity, node: &DialogueNode) -> DialogueView {
        let facts = WorldFacts { world, player, npc: Some(npc) };
        DialogueView {
            speaker: node.speaker.clone(),
            text: node.text.clone(),
            emotion: node.emotion.clone(),
            choices: node
                .choices
                .iter()
                .filter(|c| check_condition(c.condition.as_deref(), &facts))
                .map(|c| ChoiceView {
                    id: c.id.clone(),
                    text: c.text.clone(),
                })
                .collect(),
        }
    }

    fn run_actions(&self, world: &mut World, player: Entity, npc: Entity, actions: &[DialogueAction]) -> Vec<DialogueEffect> {
        let mut effects = Vec::new();
        for action in actions {
            match action {
                DialogueAction::SetNpcState { key, value } => self.set_npc_state(world, npc, key, value),
                DialogueAction::SetPlayerState { key, value } => {
                    if world.get::<&PlayerFlags>(player).is_err() {
                        let _ = world.insert_one(player, PlayerFlags::default());
                    }
                    if let Ok(mut flags) = world.get::<&mut PlayerFlags>(player) {
                        flags.0.insert(key.clone(), value.clone());
                    }
                }
                DialogueAction::AcceptQuest { quest } => effects.push(DialogueEffect::AcceptQuest(quest.clone())),
                DialogueAction::CompleteQuest { quest } => effects.push(DialogueEffect::CompleteQuest(quest.clone())),
                DialogueAction::GiveItem { item, count } => effects.push(DialogueEffect::GiveItem {
                    item: item.clone(),
                    count: *count,
                }),
                DialogueAction::TakeItem { item, count } => effects.push(DialogueEffect::TakeItem {
                    item: item.clone(),
                    count: *count,
                }),
                DialogueAction::GiveGold { amount } => effects.push(DialogueEffect::GiveGold(*amount)),
                DialogueAction::TakeGold { amount } => effects.push(DialogueEffect::TakeGold(*amount)),
                DialogueAction::OpenTrade => effects.push(DialogueEffect::OpenTrade { npc }),
                DialogueAction::TriggerEvent { event } => effects.push(DialogueEffect::TriggerEvent(event.clone())),
                DialogueAction::StartCombat => effects.push(DialogueEffect::StartCombat { npc }),
            }
        }
        effects
    }
}
