//! Dialogue trees and the condition language that gates their choices
//!
//! Trees are content: nodes keyed by id, each with NPC text and player
//! choices. A choice may carry a condition such as
//! `level >= 3 && quest:goblin_extermination == Completed` and a list of
//! actions that run when it is picked.

use std::collections::BTreeMap;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, i64 as integer, multispace0};
use nom::combinator::{all_consuming, map, value};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use serde::{Deserialize, Serialize};

use crate::core::error::{LablabError, Result};
use crate::gameplay::quest::QuestState;
use crate::llm::{parse_response, LlmClient};

const DEFAULT_DIALOGUE: &str = include_str!("../../data/dialogue.toml");

/// Something a choice does when selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DialogueAction {
    AcceptQuest { quest: String },
    CompleteQuest { quest: String },
    SetNpcState { key: String, value: String },
    GiveItem {
        item: String,
        #[serde(default = "one")]
        count: i32,
    },
    TakeItem {
        item: String,
        #[serde(default = "one")]
        count: i32,
    },
    GiveGold { amount: i32 },
    TakeGold { amount: i32 },
    OpenTrade,
    TriggerEvent { event: String },
    SetPlayerState { key: String, value: String },
    StartCombat,
}

fn one() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueChoice {
    pub id: String,
    pub text: String,
    #[serde(default, alias = "nextNodeId")]
    pub next: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub actions: Vec<DialogueAction>,
    #[serde(default, alias = "endsDialogue")]
    pub ends_dialogue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueNode {
    pub id: String,
    #[serde(default)]
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub choices: Vec<DialogueChoice>,
    #[serde(default, alias = "onEnterActions")]
    pub on_enter: Vec<DialogueAction>,
}

impl DialogueNode {
    pub fn is_end_node(&self) -> bool {
        self.choices.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueTree {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "startNodeId")]
    pub start_node: String,
    pub nodes: BTreeMap<String, DialogueNode>,
}

impl DialogueTree {
    pub fn node(&self, id: &str) -> Option<&DialogueNode> {
        self.nodes.get(id)
    }

    pub fn start(&self) -> Option<&DialogueNode> {
        self.node(&self.start_node)
    }

    /// Every structural problem in the tree, in a stable order
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.start_node.is_empty() {
            errors.push("StartNodeId is not set".to_string());
        } else if !self.nodes.contains_key(&self.start_node) {
            errors.push(format!("Start node '{}' not found", self.start_node));
        }

        for (key, node) in &self.nodes {
            if node.id != *key {
                errors.push(format!("Node ID mismatch: key '{}' vs node '{}'", key, node.id));
            }
            for choice in &node.choices {
                if let Some(target) = &choice.next {
                    if !self.nodes.contains_key(target) {
                        errors.push(format!(
                            "Choice '{}' in node '{}' points to missing node '{}'",
                            choice.id, key, target
                        ));
                    }
                }
                if let Some(condition) = &choice.condition {
                    if let Err(e) = Condition::parse(condition) {
                        errors.push(format!("Choice '{}' in node '{}': {}", choice.id, key, e));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Deserialize)]
struct DialogueFile {
    tree: Vec<DialogueTree>,
}

/// All known dialogue trees, validated on load
#[derive(Debug, Clone, Default)]
pub struct DialogueLibrary {
    trees: BTreeMap<String, DialogueTree>,
}

impl DialogueLibrary {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: DialogueFile = toml::from_str(source)?;
        let mut library = Self::default();
        for tree in file.tree {
            library.insert(tree)?;
        }
        Ok(library)
    }

    pub fn with_defaults() -> Result<Self> {
        Self::from_toml_str(DEFAULT_DIALOGUE)
    }

    pub fn insert(&mut self, tree: DialogueTree) -> Result<()> {
        tree.validate().map_err(|errors| {
            LablabError::InvalidAction(format!("Dialogue tree '{}' is invalid: {}", tree.id, errors.join("; ")))
        })?;
        self.trees.insert(tree.id.clone(), tree);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&DialogueTree> {
        self.trees.get(id)
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl CompareOp {
    fn compare<T: PartialOrd>(&self, left: T, right: T) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Ge => left >= right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Lt => left < right,
        }
    }
}

/// A parsed choice condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Level(CompareOp, i64),
    Gold(CompareOp, i64),
    /// `item:"Health Potion" >= 2`
    Item { name: String, op: CompareOp, count: i64 },
    Quest { id: String, op: CompareOp, state: QuestState },
    /// Player flag set by `SetPlayerState`
    PlayerState { key: String, op: CompareOp, value: String },
    /// Flag on the NPC being spoken to
    NpcState { key: String, op: CompareOp, value: String },
    All(Vec<Condition>),
}

/// What a condition can ask about the world
pub trait ConditionFacts {
    fn level(&self) -> i64;
    fn gold(&self) -> i64;
    fn item_count(&self, name: &str) -> i64;
    fn quest_state(&self, quest_id: &str) -> QuestState;
    fn player_state(&self, key: &str) -> Option<String>;
    fn npc_state(&self, key: &str) -> Option<String>;
}

impl Condition {
    pub fn parse(input: &str) -> Result<Condition> {
        match all_consuming(delimited(multispace0, conjunction, multispace0)).parse(input) {
            Ok((_, condition)) => Ok(condition),
            Err(e) => Err(LablabError::InvalidAction(format!("Invalid condition '{}': {}", input, e))),
        }
    }

    pub fn evaluate(&self, facts: &dyn ConditionFacts) -> bool {
        match self {
            Condition::Level(op, n) => op.compare(facts.level(), *n),
            Condition::Gold(op, n) => op.compare(facts.gold(), *n),
            Condition::Item { name, op, count } => op.compare(facts.item_count(name), *count),
            Condition::Quest { id, op, state } => match op {
                CompareOp::Ne => facts.quest_state(id) != *state,
                _ => facts.quest_state(id) == *state,
            },
            Condition::PlayerState { key, op, value } => compare_flag(facts.player_state(key), *op, value),
            Condition::NpcState { key, op, value } => compare_flag(facts.npc_state(key), *op, value),
            Condition::All(parts) => parts.iter().all(|c| c.evaluate(facts)),
        }
    }
}

/// Missing flags compare as the empty string
fn compare_flag(actual: Option<String>, op: CompareOp, expected: &str) -> bool {
    let actual = actual.unwrap_or_default();
    match op {
        CompareOp::Ne => actual != expected,
        CompareOp::Eq => actual == expected,
        _ => match (actual.parse::<i64>(), expected.parse::<i64>()) {
            (Ok(a), Ok(b)) => op.compare(a, b),
            _ => false,
        },
    }
}

/// Evaluate an optional condition string; unparsable conditions fail closed
pub fn check_condition(condition: Option<&str>, facts: &dyn ConditionFacts) -> bool {
    match condition.map(str::trim) {
        None | Some("") => true,
        Some(text) => Condition::parse(text).map(|c| c.evaluate(facts)).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Dialogue condition rejected");
            false
        }),
    }
}

type Error<'a> = nom::error::Error<&'a str>;

fn ws<'a, O>(
    inner: impl Parser<&'a str, Output = O, Error = Error<'a>>,
) -> impl Parser<&'a str, Output = O, Error = Error<'a>> {
    delimited(multispace0, inner, multispace0)
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    ws(alt((
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Gt, tag(">")),
        value(CompareOp::Lt, tag("<")),
    )))
    .parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.').parse(input)
}

fn quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while1(|c: char| c != '"'), char('"')).parse(input)
}

fn word_or_quoted(input: &str) -> IResult<&str, &str> {
    alt((quoted, identifier)).parse(input)
}

fn quest_state(input: &str) -> IResult<&str, QuestState> {
    ws(alt((
        value(QuestState::NotStarted, tag("NotStarted")),
        value(QuestState::Active, tag("Active")),
        value(QuestState::Completed, tag("Completed")),
        value(QuestState::Failed, tag("Failed")),
        value(QuestState::Abandoned, tag("Abandoned")),
    )))
    .parse(input)
}

fn numeric<'a>(keyword: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, (CompareOp, i64)> {
    move |input| (preceded(tag(keyword), compare_op), ws(integer)).parse(input)
}

fn term(input: &str) -> IResult<&str, Condition> {
    ws(alt((
        map(numeric("level"), |(op, n)| Condition::Level(op, n)),
        map(numeric("gold"), |(op, n)| Condition::Gold(op, n)),
        map(
            (preceded(tag("item:"), word_or_quoted), compare_op, ws(integer)),
            |(name, op, count)| Condition::Item { name: name.to_string(), op, count },
        ),
        map(
            (preceded(tag("quest:"), identifier), compare_op, quest_state),
            |(id, op, state)| Condition::Quest { id: id.to_string(), op, state },
        ),
        map(
            (preceded(tag("state:"), identifier), compare_op, ws(word_or_quoted)),
            |(key, op, value)| Condition::PlayerState { key: key.to_string(), op, value: value.to_string() },
        ),
        map(
            (preceded(tag("npc:"), identifier), compare_op, ws(word_or_quoted)),
            |(key, op, value)| Condition::NpcState { key: key.to_string(), op, value: value.to_string() },
        ),
    )))
    .parse(input)
}

fn conjunction(input: &str) -> IResult<&str, Condition> {
    map(separated_list1(tag("&&"), term), |mut parts| {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::All(parts)
        }
    })
    .parse(input)
}

const DIALOGUE_SYSTEM_PROMPT: &str = r#"You are a dialogue generator for a dungeon crawler RPG.
Return a dialogue tree as JSON only:
{
  "id": "tree-id",
  "name": "Dialogue Name",
  "startNodeId": "greeting",
  "nodes": {
    "greeting": {"id": "greeting", "text": "NPC speech",
                 "choices": [{"id": "bye", "text": "Farewell.", "endsDialogue": true}]}
  }
}
Use 2-4 choices per node and 3-6 nodes. Every nextNodeId must exist."#;

/// LLM-written trees and replies, with canned fallbacks
#[derive(Debug, Default)]
pub struct DialogueGenerator {
    client: Option<LlmClient>,
}

impl DialogueGenerator {
    pub fn new(client: Option<LlmClient>) -> Self {
        Self { client }
    }

    pub async fn generate_tree(&self, npc_id: &str, npc_name: &str, role: &str, personality: &str) -> DialogueTree {
        let Some(client) = &self.client else {
            return fallback_tree(npc_id, npc_name);
        };
        let prompt = format!(
            "Generate a dialogue tree for an NPC.\nNPC Name: {}\nNPC Role: {}\nPersonality: {}\nTree id: {}",
            npc_name, role, personality, npc_id
        );
        let reply = match client.complete(DIALOGUE_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, npc = npc_id, "Dialogue generation failed");
                return fallback_tree(npc_id, npc_name);
            }
        };
        parse_generated_tree(&reply, npc_id).unwrap_or_else(|e| {
            tracing::warn!(error = %e, npc = npc_id, "Generated dialogue unusable");
            fallback_tree(npc_id, npc_name)
        })
    }

    /// One in-character line answering the player
    pub async fn generate_response(&self, npc_name: &str, role: &str, player_line: &str) -> String {
        let Some(client) = &self.client else {
            return fallback_response(role);
        };
        let prompt = format!(
            "You are {}, a {} in a dungeon crawler RPG.\nPlayer says: \"{}\"\nRespond in character in one or two sentences.",
            npc_name, role, player_line
        );
        match client
            .complete("You are an NPC in a dungeon crawler game. Stay in character and be concise.", &prompt)
            .await
        {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            _ => fallback_response(role),
        }
    }
}

/// Parse and validate an LLM tree; the tree id is forced to `tree_id`
pub fn parse_generated_tree(reply: &str, tree_id: &str) -> Result<DialogueTree> {
    let mut tree: DialogueTree = parse_response(reply)?;
    tree.id = tree_id.to_string();
    if tree.nodes.is_empty() {
        return Err(LablabError::Llm("Generated dialogue has no nodes".into()));
    }
    tree.validate()
        .map_err(|errors| LablabError::Llm(format!("Generated dialogue invalid: {}", errors.join("; "))))?;
    Ok(tree)
}

pub fn fallback_tree(tree_id: &str, npc_name: &str) -> DialogueTree {
    let mut nodes = BTreeMap::new();
    nodes.insert(
        "greeting".to_string(),
        DialogueNode {
            id: "greeting".into(),
            speaker: npc_name.to_string(),
            text: "Greetings, traveler. What brings you to these depths?".into(),
            emotion: None,
            choices: vec![
                DialogueChoice {
                    id: "ask".into(),
                    text: "Tell me about this place.".into(),
                    next: Some("lore".into()),
                    condition: None,
                    actions: Vec::new(),
                    ends_dialogue: false,
                },
                DialogueChoice {
                    id: "bye".into(),
                    text: "Farewell.".into(),
                    next: None,
                    condition: None,
                    actions: Vec::new(),
                    ends_dialogue: true,
                },
            ],
            on_enter: Vec::new(),
        },
    );
    nodes.insert(
        "lore".to_string(),
        DialogueNode {
            id: "lore".into(),
            speaker: npc_name.to_string(),
            text: "The deeper you go, the older the stone. Mind the traps.".into(),
            emotion: None,
            choices: Vec::new(),
            on_enter: Vec::new(),
        },
    );
    DialogueTree {
        id: tree_id.to_string(),
        name: format!("{} (default)", npc_name),
        start_node: "greeting".into(),
        nodes,
    }
}

fn fallback_response(role: &str) -> String {
    match role {
        "merchant" | "blacksmith" => "Coin first, questions later.".into(),
        "quest_giver" => "There is always more work for a steady blade.".into(),
        _ => "...".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Facts {
        level: i64,
        gold: i64,
        quests: HashMap<String, QuestState>,
        flags: HashMap<String, String>,
        items: HashMap<String, i64>,
    }

    impl ConditionFacts for Facts {
        fn level(&self) -> i64 {
            self.level
        }
        fn gold(&self) -> i64 {
            self.gold
        }
        fn item_count(&self, name: &str) -> i64 {
            self.items.get(name).copied().unwrap_or(0)
        }
        fn quest_state(&self, quest_id: &str) -> QuestState {
            self.quests.get(quest_id).copied().unwrap_or(QuestState::NotStarted)
        }
        fn player_state(&self, key: &str) -> Option<String> {
            self.flags.get(key).cloned()
        }
        fn npc_state(&self, _key: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_parse_conditions() {
        assert_eq!(Condition::parse("level >= 3").unwrap(), Condition::Level(CompareOp::Ge, 3));
        assert_eq!(Condition::parse("  gold<50 ").unwrap(), Condition::Gold(CompareOp::Lt, 50));
        assert_eq!(
            Condition::parse("quest:goblin_extermination == Completed").unwrap(),
            Condition::Quest {
                id: "goblin_extermination".into(),
                op: CompareOp::Eq,
                state: QuestState::Completed
            }
        );
        assert_eq!(
            Condition::parse(r#"item:"Health Potion" >= 2"#).unwrap(),
            Condition::Item { name: "Health Potion".into(), op: CompareOp::Ge, count: 2 }
        );
        match Condition::parse("level >= 2 && state:met_elder == yes && gold >= 10").unwrap() {
            Condition::All(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected conjunction, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("level >=").is_err());
        assert!(Condition::parse("quest:x == Sleeping").is_err());
        assert!(Condition::parse("level >= 3 &&").is_err());
    }

    #[test]
    fn test_evaluate() {
        let mut facts = Facts { level: 4, gold: 30, ..Default::default() };
        facts.quests.insert("goblin_extermination".into(), QuestState::Completed);
        facts.flags.insert("met_elder".into(), "yes".into());

        let check = |text: &str, facts: &Facts| check_condition(Some(text), facts);
        assert!(check("level >= 3", &facts));
        assert!(!check("gold >= 50", &facts));
        assert!(check("quest:goblin_extermination == Completed && state:met_elder == yes", &facts));
        assert!(check("quest:bone_collector != Active", &facts));
        assert!(check("state:unset_flag != yes", &facts));
        assert!(!check(r#"item:"Health Potion" >= 1"#, &facts));
        assert!(check_condition(None, &facts));
        assert!(!check("nonsense here", &facts));
    }

    #[test]
    fn test_validate_errors() {
        let mut tree = fallback_tree("t", "Sage");
        assert!(tree.validate().is_ok());

        tree.start_node = "missing".into();
        tree.nodes.get_mut("greeting").unwrap().choices[0].next = Some("nowhere".into());
        tree.nodes.get_mut("lore").unwrap().id = "wrong".into();
        let errors = tree.validate().unwrap_err();
        assert!(errors.contains(&"Start node 'missing' not found".to_string()));
        assert!(errors.contains(&"Choice 'ask' in node 'greeting' points to missing node 'nowhere'".to_string()));
        assert!(errors.contains(&"Node ID mismatch: key 'lore' vs node 'wrong'".to_string()));

        tree.start_node.clear();
        assert!(tree.validate().unwrap_err().contains(&"StartNodeId is not set".to_string()));
    }

    #[test]
    fn test_default_library_is_valid() {
        let library = DialogueLibrary::with_defaults().unwrap();
        assert!(library.get("elder").is_some());
        assert!(library.get("blacksmith").is_some());
        assert!(library.get("shopkeeper").is_some());
    }

    #[test]
    fn test_parse_generated_tree() {
        let reply = r#"```json
{"id": "x", "name": "Chat", "startNodeId": "a",
 "nodes": {"a": {"id": "a", "text": "Hi", "choices": [{"id": "go", "text": "Next", "nextNodeId": "b"}]},
           "b": {"id": "b", "text": "Bye"}}}
```"#;
        let tree = parse_generated_tree(reply, "hermit").unwrap();
        assert_eq!(tree.id, "hermit");
        assert_eq!(tree.start().map(|n| n.text.as_str()), Some("Hi"));

        let broken = r#"{"id": "x", "startNodeId": "a", "nodes": {"a": {"id": "a", "text": "Hi",
            "choices": [{"id": "go", "text": "Next", "nextNodeId": "zzz"}]}}}"#;
        assert!(parse_generated_tree(broken, "hermit").is_err());
    }
}
