//! LablabBean - terminal dungeon crawler with a plugin architecture
//!
//! The hero descends through procedurally generated levels, fighting,
//! looting and talking their way down. Gameplay features (inventory,
//! quests, spells, merchants, hazards, bosses) and infrastructure services
//! (scheduling, storage, localization, diagnostics) are delivered as
//! plugins that register services with a shared registry; the game loop
//! resolves them from there.

pub mod ai;
pub mod components;
pub mod core;
pub mod events;
pub mod game;
pub mod gameplay;
pub mod llm;
pub mod map;
pub mod plugins;
pub mod services;
pub mod systems;
pub mod ui;
