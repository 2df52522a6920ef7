//! LLM integration: HTTP client, prompt context and reply parsing

pub mod client;
pub mod context;
pub mod parser;

pub use client::{ApiFormat, LlmClient};
pub use context::{GameContext, NamedEntity};
pub use parser::{extract_json, parse_response};
