//! Gameplay services layered over the core systems
//!
//! Each service owns its content tables (loaded from `data/`) and works on
//! a `&mut World` handed in by the caller, so the same service drives both
//! the play world and the editor world.

pub mod boss;
pub mod dialogue;
pub mod hazards;
pub mod inventory;
pub mod merchant;
pub mod npc;
pub mod progression;
pub mod quest;
pub mod spells;

pub use boss::{Boss, BossService, LootDrop, Minion};
pub use dialogue::{DialogueGenerator, DialogueLibrary, DialogueTree};
pub use hazards::{Hazard, HazardService};
pub use inventory::{InventoryEntry, InventoryService};
pub use merchant::{MerchantInventory, MerchantService};
pub use npc::{DialogueEffect, DialogueStep, DialogueView, Npc, NpcService, PlayerFlags};
pub use progression::{Experience, ProgressionService};
pub use quest::{QuestGenerator, QuestLog, QuestService, QuestState};
pub use spells::{Mana, SpellBook, SpellService};
