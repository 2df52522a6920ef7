//! Plugin framework: contract, service registry, event bus, manifests,
//! dependency ordering, capability selection and the host that drives it all

pub mod builtin;
pub mod capability;
pub mod events;
pub mod health;
pub mod loader;
pub mod manifest;
pub mod metrics;
pub mod plugin;
pub mod registry;
pub mod resolver;

pub use events::{EventBus, SubscriptionId};
pub use health::HealthStatus;
pub use loader::{PluginCatalog, PluginHost};
pub use manifest::{LoadStrategy, PluginDependency, PluginManifest};
pub use plugin::{Plugin, PluginContext, PluginState};
pub use registry::{SelectionMode, ServiceMetadata, ServiceRegistry};
