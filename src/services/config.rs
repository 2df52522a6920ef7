//! Runtime key/value settings
//!
//! Keys are `:`-separated paths (`audio:volume`). Every `set` publishes a
//! [`ConfigChanged`] on the event bus with the previous value.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::events::ConfigChanged;
use crate::plugins::events::EventBus;

pub const SECTION_SEPARATOR: char = ':';

pub struct ConfigService {
    values: RwLock<BTreeMap<String, String>>,
    events: Arc<EventBus>,
}

impl ConfigService {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Parse the stored string; unparsable values are logged and read as absent
    pub fn get_as<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, target_type = std::any::type_name::<T>(), "Failed to convert config value");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let old_value = self.values.write().insert(key.to_string(), value.clone());
        debug!(key, value = %value, "Config set");
        self.events.publish(&ConfigChanged {
            key: key.to_string(),
            old_value,
            new_value: value,
        });
    }

    pub fn exists(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn section(&self, path: &str) -> ConfigSection<'_> {
        ConfigSection {
            service: self,
            path: path.to_string(),
        }
    }

    /// Flatten a TOML table into `section:key` entries, publishing a change
    /// for each one
    pub fn load_table(&self, table: &toml::Table) {
        let mut flat = Vec::new();
        flatten("", table, &mut flat);
        for (key, value) in flat {
            self.set(&key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut Vec<(String, String)>) {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, SECTION_SEPARATOR, key)
        };
        match value {
            toml::Value::Table(inner) => flatten(&path, inner, out),
            toml::Value::String(s) => out.push((path, s.clone())),
            other => out.push((path, other.to_string())),
        }
    }
}

/// View of every key under `path:`
pub struct ConfigSection<'a> {
    service: &'a ConfigService,
    path: String,
}

impl<'a> ConfigSection<'a> {
    pub fn path(&self) -> &str {
        &self.path
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}{}", self.path, SECTION_SEPARATOR, key)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.service.get(&self.full_key(key))
    }

    pub fn get_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.service.get_as(&self.full_key(key))
    }

    pub fn section(&self, key: &str) -> ConfigSection<'a> {
        ConfigSection {
            service: self.service,
            path: self.full_key(key),
        }
    }

    /// Immediate child names, deduplicated and sorted
    pub fn keys(&self) -> Vec<String> {
        let prefix = format!("{}{}", self.path, SECTION_SEPARATOR);
        let mut keys: Vec<String> = self
            .service
            .values
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|rest| rest.split(SECTION_SEPARATOR).next())
            .map(str::to_string)
            .collect();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_set_publishes_old_and_new() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |e: &ConfigChanged| {
            sink.lock().push(e.clone());
            Ok(())
        });

        let config = ConfigService::new(bus);
        config.set("audio:volume", "5");
        config.set("audio:volume", "8");

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].old_value, None);
        assert_eq!(seen[1].old_value.as_deref(), Some("5"));
        assert_eq!(seen[1].new_value, "8");
    }

    #[test]
    fn test_typed_get() {
        let config = ConfigService::new(Arc::new(EventBus::new()));
        config.set("fov", "8");
        config.set("name", "bean");
        assert_eq!(config.get_as::<i32>("fov"), Some(8));
        assert_eq!(config.get_as::<i32>("name"), None);
        assert_eq!(config.get_as::<i32>("missing"), None);
        assert!(config.exists("fov"));
    }

    #[test]
    fn test_sections_from_toml() {
        let config = ConfigService::new(Arc::new(EventBus::new()));
        let table: toml::Table = toml::from_str(
            r#"
            [display]
            width = 80
            theme = "dark"
            [display.font]
            size = 12
            "#,
        )
        .unwrap();
        config.load_table(&table);

        let display = config.section("display");
        assert_eq!(display.keys(), vec!["font", "theme", "width"]);
        assert_eq!(display.get("theme").as_deref(), Some("dark"));
        assert_eq!(display.section("font").get_as::<u32>("size"), Some(12));
        assert_eq!(config.len(), 3);
    }
}
