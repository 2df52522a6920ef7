//! `plugin.json` manifests

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{LablabError, Result};
use crate::plugins::registry::DEFAULT_PRIORITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadStrategy {
    #[default]
    Eager,
    Lazy,
    /// Loaded only when asked for by id
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDependency {
    pub id: String,
    #[serde(default)]
    pub version_range: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl PluginDependency {
    pub fn hard(id: &str) -> Self {
        Self {
            id: id.to_string(),
            version_range: None,
            optional: false,
        }
    }

    pub fn soft(id: &str) -> Self {
        Self {
            optional: true,
            ..Self::hard(id)
        }
    }
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    /// Profile (`console`, `headless`, ...) → catalog entry
    #[serde(default)]
    pub entry_point: BTreeMap<String, String>,
    /// Single entry used for every profile
    #[serde(default)]
    pub entry_type: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub supported_profiles: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub load_strategy: LoadStrategy,
}

impl PluginManifest {
    /// Minimal manifest for a built-in plugin whose entry is its own id
    pub fn builtin(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: None,
            author: None,
            license: None,
            entry_point: BTreeMap::new(),
            entry_type: Some(id.to_string()),
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            supported_profiles: Vec::new(),
            priority: DEFAULT_PRIORITY,
            load_strategy: LoadStrategy::Eager,
        }
    }

    pub fn depends_on(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_capability(mut self, capability: &str) -> Self {
        self.capabilities.push(capability.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Catalog entry for a profile, falling back to `entry_type`
    pub fn entry_for(&self, profile: &str) -> Option<&str> {
        self.entry_point
            .get(profile)
            .or_else(|| self.entry_point.get("default"))
            .map(String::as_str)
            .or(self.entry_type.as_deref())
    }

    /// Empty profile list means every profile
    pub fn supports_profile(&self, profile: &str) -> bool {
        self.supported_profiles.is_empty()
            || self
                .supported_profiles
                .iter()
                .any(|p| p.eq_ignore_ascii_case(profile))
    }

    pub fn hard_dependencies(&self) -> impl Iterator<Item = &PluginDependency> {
        self.dependencies.iter().filter(|d| !d.optional)
    }
}

pub fn parse(json: &str) -> Result<PluginManifest> {
    let manifest: PluginManifest = serde_json::from_str(json)?;
    validate(&manifest)?;
    Ok(manifest)
}

pub fn parse_file(path: &Path) -> Result<PluginManifest> {
    if !path.exists() {
        return Err(LablabError::Manifest(format!(
            "Manifest file not found: {}",
            path.display()
        )));
    }
    let json = std::fs::read_to_string(path)?;
    parse(&json)
}

pub fn validate(manifest: &PluginManifest) -> Result<()> {
    if manifest.id.trim().is_empty() {
        return Err(LablabError::Manifest("Manifest must have a non-empty Id".into()));
    }
    if manifest.name.trim().is_empty() {
        return Err(LablabError::Manifest("Manifest must have a non-empty Name".into()));
    }
    if manifest.version.trim().is_empty() {
        return Err(LablabError::Manifest("Manifest must have a non-empty Version".into()));
    }
    let has_entry = !manifest.entry_point.is_empty()
        || manifest
            .entry_type
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
    if !has_entry {
        return Err(LablabError::Manifest("Manifest must have an entry point".into()));
    }
    Ok(())
}
