//! Priority-ordered service registry
//!
//! Services are keyed by type. Any number of implementations may be
//! registered for one type; callers choose between them with a
//! [`SelectionMode`]. Trait objects work as well as concrete types:
//! register an `Arc<dyn Trait>` and look it up as `dyn Trait`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::core::error::{LablabError, Result};

pub const DEFAULT_PRIORITY: i32 = 100;

/// How `get` chooses among several implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Exactly one implementation must be registered
    One,
    #[default]
    HighestPriority,
    /// Only meaningful for `get_all`
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMetadata {
    pub priority: i32,
    pub name: Option<String>,
    pub version: Option<String>,
    /// Owning plugin, used to drop its services on unload
    pub plugin_id: Option<String>,
}

impl Default for ServiceMetadata {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            name: None,
            version: None,
            plugin_id: None,
        }
    }
}

impl ServiceMetadata {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }
}

struct Registration {
    /// Always an `Arc<T>` for the key's `T`
    service: Box<dyn Any + Send + Sync>,
    metadata: ServiceMetadata,
}

impl Registration {
    fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.service.downcast_ref::<Arc<T>>().cloned()
    }
}

/// Short type name for error messages: `lablab_bean::x::Foo` → `Foo`
fn type_label<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let short = base.rsplit("::").next().unwrap_or(base);
    if full.starts_with("dyn ") && !short.starts_with("dyn") {
        format!("dyn {}", short)
    } else {
        short.to_string()
    }
}

#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<TypeId, Vec<Registration>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T>(&self, service: Arc<T>, metadata: ServiceMetadata)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        debug!(
            service = %type_label::<T>(),
            priority = metadata.priority,
            plugin = ?metadata.plugin_id,
            "Registering service"
        );
        self.services
            .write()
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Registration {
                service: Box::new(service),
                metadata,
            });
    }

    pub fn register_with_priority<T>(&self, service: Arc<T>, priority: i32)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register(service, ServiceMetadata::with_priority(priority));
    }

    pub fn get<T>(&self, mode: SelectionMode) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let services = self.services.read();
        let registrations = services
            .get(&TypeId::of::<T>())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| LablabError::ServiceNotFound(type_label::<T>()))?;

        let chosen = match mode {
            SelectionMode::One => {
                if registrations.len() > 1 {
                    return Err(LablabError::Plugin(format!(
                        "Multiple implementations registered for service type {}. \
                         Use SelectionMode::HighestPriority or get_all() instead.",
                        type_label::<T>()
                    )));
                }
                &registrations[0]
            }
            SelectionMode::HighestPriority => {
                // First registered wins a tie
                let mut best = &registrations[0];
                for r in registrations.iter().skip(1) {
                    if r.metadata.priority > best.metadata.priority {
                        best = r;
                    }
                }
                best
            }
            SelectionMode::All => {
                return Err(LablabError::Plugin(
                    "SelectionMode::All is not valid for get(). Use get_all() instead.".into(),
                ));
            }
        };

        chosen
            .downcast::<T>()
            .ok_or_else(|| LablabError::ServiceNotFound(type_label::<T>()))
    }

    /// Highest-priority implementation
    pub fn resolve<T>(&self) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get::<T>(SelectionMode::HighestPriority)
    }

    /// All implementations, highest priority first
    pub fn get_all<T>(&self) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_all_with_metadata::<T>()
            .into_iter()
            .map(|(service, _)| service)
            .collect()
    }

    pub fn get_all_with_metadata<T>(&self) -> Vec<(Arc<T>, ServiceMetadata)>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let services = self.services.read();
        let mut found: Vec<(Arc<T>, ServiceMetadata)> = services
            .get(&TypeId::of::<T>())
            .map(|regs| {
                regs.iter()
                    .filter_map(|r| r.downcast::<T>().map(|s| (s, r.metadata.clone())))
                    .collect()
            })
            .unwrap_or_default();
        // Stable: equal priorities keep registration order
        found.sort_by(|a, b| b.1.priority.cmp(&a.1.priority));
        found
    }

    pub fn is_registered<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .read()
            .get(&TypeId::of::<T>())
            .is_some_and(|r| !r.is_empty())
    }

    /// Remove one implementation, matched by pointer identity
    pub fn unregister<T>(&self, service: &Arc<T>) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let mut services = self.services.write();
        let Some(registrations) = services.get_mut(&TypeId::of::<T>()) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| {
            r.downcast::<T>()
                .map_or(true, |existing| !Arc::ptr_eq(&existing, service))
        });
        let removed = registrations.len() != before;
        if registrations.is_empty() {
            services.remove(&TypeId::of::<T>());
        }
        removed
    }

    /// Remove every service a plugin registered; returns how many went
    pub fn unregister_plugin(&self, plugin_id: &str) -> usize {
        let mut services = self.services.write();
        let mut removed = 0;
        for registrations in services.values_mut() {
            let before = registrations.len();
            registrations.retain(|r| r.metadata.plugin_id.as_deref() != Some(plugin_id));
            removed += before - registrations.len();
        }
        services.retain(|_, regs| !regs.is_empty());
        if removed > 0 {
            debug!(plugin = plugin_id, removed, "Unregistered plugin services");
        }
        removed
    }

    /// Total registrations across all types
    pub fn len(&self) -> usize {
        self.services.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;
    struct French;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    impl Greeter for French {
        fn greet(&self) -> String {
            "bonjour".into()
        }
    }

    #[test]
    fn test_missing_service_error_names_type() {
        let registry = ServiceRegistry::new();
        let err = registry.resolve::<String>().unwrap_err();
        assert_eq!(err.to_string(), "No implementations registered for service type String");
    }

    #[test]
    fn test_highest_priority_wins() {
        let registry = ServiceRegistry::new();
        let english: Arc<dyn Greeter> = Arc::new(English);
        let french: Arc<dyn Greeter> = Arc::new(French);
        registry.register_with_priority(english, 100);
        registry.register_with_priority(french, 200);

        let greeter = registry.resolve::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet(), "bonjour");
    }

    #[test]
    fn test_tie_goes_to_first_registered() {
        let registry = ServiceRegistry::new();
        registry.register_with_priority(Arc::new("first".to_string()), 100);
        registry.register_with_priority(Arc::new("second".to_string()), 100);
        assert_eq!(registry.resolve::<String>().unwrap().as_str(), "first");
    }

    #[test]
    fn test_one_mode_rejects_multiple() {
        let registry = ServiceRegistry::new();
        registry.register_with_priority(Arc::new(1u8), 1);
        assert_eq!(*registry.get::<u8>(SelectionMode::One).unwrap(), 1);

        registry.register_with_priority(Arc::new(2u8), 2);
        let err = registry.get::<u8>(SelectionMode::One).unwrap_err();
        assert!(err.to_string().contains("Multiple implementations"));
    }

    #[test]
    fn test_all_mode_is_invalid_for_get() {
        let registry = ServiceRegistry::new();
        registry.register_with_priority(Arc::new(1u8), 1);
        assert!(registry.get::<u8>(SelectionMode::All).is_err());
    }

    #[test]
    fn test_get_all_sorted_by_priority() {
        let registry = ServiceRegistry::new();
        registry.register_with_priority(Arc::new(10i32), 10);
        registry.register_with_priority(Arc::new(300i32), 300);
        registry.register_with_priority(Arc::new(100i32), 100);

        let values: Vec<i32> = registry.get_all::<i32>().iter().map(|v| **v).collect();
        assert_eq!(values, vec![300, 100, 10]);
    }

    #[test]
    fn test_unregister_by_identity() {
        let registry = ServiceRegistry::new();
        let a = Arc::new("same".to_string());
        let b = Arc::new("same".to_string());
        registry.register_with_priority(a.clone(), 1);
        registry.register_with_priority(b.clone(), 2);

        assert!(registry.unregister(&b));
        assert!(!registry.unregister(&b));
        let left = registry.resolve::<String>().unwrap();
        assert!(Arc::ptr_eq(&left, &a));

        assert!(registry.unregister(&a));
        assert!(!registry.is_registered::<String>());
    }

    #[test]
    fn test_unregister_plugin_removes_only_its_services() {
        let registry = ServiceRegistry::new();
        let owned = ServiceMetadata {
            plugin_id: Some("quests".into()),
            ..Default::default()
        };
        registry.register(Arc::new(1u16), owned.clone());
        registry.register(Arc::new(2u32), owned);
        registry.register_with_priority(Arc::new(3u32), 1);

        assert_eq!(registry.unregister_plugin("quests"), 2);
        assert!(!registry.is_registered::<u16>());
        assert_eq!(*registry.resolve::<u32>().unwrap(), 3);
        assert_eq!(registry.len(), 1);
    }
}
