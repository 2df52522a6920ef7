//! Terminal front-end built on ratatui and crossterm

pub mod app;
pub mod input;
pub mod render;
pub mod theme;

pub use app::{App, Overlay, TradePage};
pub use input::{map_key, Command, KeyContext};
pub use render::render;
