use thiserror::Error;

#[derive(Error, Debug)]
pub enum LablabError {
    #[error("Entity not found: {0:?}")]
    EntityNotFound(hecs::Entity),

    #[error("Component not found for entity: {0}")]
    ComponentNotFound(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("No implementations registered for service type {0}")]
    ServiceNotFound(String),

    #[error("{0}")]
    Dependency(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Circuit breaker is open for: {0}")]
    CircuitOpen(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Actor unavailable: {0}")]
    Actor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<hecs::NoSuchEntity> for LablabError {
    fn from(_: hecs::NoSuchEntity) -> Self {
        LablabError::InvalidAction("no such entity".into())
    }
}

impl From<hecs::ComponentError> for LablabError {
    fn from(e: hecs::ComponentError) -> Self {
        LablabError::ComponentNotFound(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LablabError>;
