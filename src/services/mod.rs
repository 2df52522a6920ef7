//! Infrastructure services provided by the built-in plugins

pub mod analytics;
pub mod config;
pub mod diagnostics;
pub mod localization;
pub mod pool;
pub mod resilience;
pub mod scheduler;
pub mod storage;
pub mod vector_store;

pub use analytics::AnalyticsService;
pub use config::ConfigService;
pub use diagnostics::{DiagnosticLevel, DiagnosticsService};
pub use localization::LocalizationService;
pub use pool::{ObjectPool, PoolService};
pub use resilience::{CircuitBreaker, ResilienceService, RetryPolicy};
pub use scheduler::SchedulerService;
pub use storage::JsonStorage;
pub use vector_store::{FileVectorStore, VectorStore};
