//! Skip/only filters and single-provider capabilities
//!
//! At most one `ui*` plugin and one `renderer*` plugin may load. When
//! several are present the configured preference wins, otherwise the
//! highest manifest priority.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::plugins::manifest::PluginManifest;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityPolicy {
    pub preferred_ui: Option<String>,
    pub preferred_renderer: Option<String>,
    pub strict: bool,
    pub skip: Vec<String>,
    pub only: Vec<String>,
}

impl CapabilityPolicy {
    pub fn from_config(config: &crate::core::config::GameConfig) -> Self {
        Self {
            preferred_ui: config.preferred_ui.clone(),
            preferred_renderer: config.preferred_renderer.clone(),
            strict: config.strict_capability_mode,
            skip: config.skip_plugins.clone(),
            only: config.only_plugins.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub to_load: Vec<PluginManifest>,
    pub excluded: BTreeMap<String, String>,
    pub selected_ui: Option<String>,
    pub selected_renderer: Option<String>,
}

pub fn validate(manifests: &[PluginManifest], policy: &CapabilityPolicy) -> ValidationResult {
    let mut result = ValidationResult::default();

    let mut remaining: Vec<&PluginManifest> = manifests.iter().collect();
    for skip in &policy.skip {
        if let Some(index) = remaining.iter().position(|m| &m.id == skip) {
            result
                .excluded
                .insert(skip.clone(), "Excluded via skip_plugins configuration".into());
            remaining.remove(index);
        }
    }

    if !policy.only.is_empty() {
        remaining.retain(|m| {
            let keep = policy.only.contains(&m.id);
            if !keep {
                result
                    .excluded
                    .insert(m.id.clone(), "Not in only_plugins list".into());
            }
            keep
        });
    }

    let ui: Vec<&PluginManifest> = remaining
        .iter()
        .copied()
        .filter(|m| m.capabilities.iter().any(|c| c.starts_with("ui")))
        .collect();
    let renderers: Vec<&PluginManifest> = remaining
        .iter()
        .copied()
        .filter(|m| m.capabilities.iter().any(|c| c.starts_with("renderer")))
        .collect();

    result.selected_ui = select_single(&ui, policy.preferred_ui.as_deref(), "ui", policy.strict, &mut result.excluded);
    result.selected_renderer = select_single(
        &renderers,
        policy.preferred_renderer.as_deref(),
        "renderer",
        policy.strict,
        &mut result.excluded,
    );

    result.to_load = remaining
        .into_iter()
        .filter(|m| !result.excluded.contains_key(&m.id))
        .cloned()
        .collect();

    let mut parts = Vec::new();
    if let Some(ui) = &result.selected_ui {
        parts.push(format!("UI={}", ui));
    }
    if let Some(renderer) = &result.selected_renderer {
        parts.push(format!("Renderer={}", renderer));
    }
    info!(
        selection = %parts.join(", "),
        excluded = ?result.excluded.keys().collect::<Vec<_>>(),
        "Plugin capability selection"
    );

    result
}

fn select_single(
    candidates: &[&PluginManifest],
    preferred: Option<&str>,
    capability: &str,
    strict: bool,
    excluded: &mut BTreeMap<String, String>,
) -> Option<String> {
    match candidates {
        [] => return None,
        [single] => {
            info!(capability, plugin = %single.id, "Selected single plugin");
            return Some(single.id.clone());
        }
        _ => {}
    }

    let mut selected = None;
    if let Some(preferred) = preferred.filter(|p| !p.trim().is_empty()) {
        selected = candidates.iter().find(|m| m.id == preferred).copied();
        match selected {
            Some(m) => info!(capability, plugin = %m.id, "Selected preferred plugin from config"),
            None => warn!(capability, preferred, "Preferred plugin not found"),
        }
    }

    // max_by_key keeps the last of equal maxima; reverse so the first wins
    let selected = selected.or_else(|| {
        candidates
            .iter()
            .rev()
            .max_by_key(|m| m.priority)
            .copied()
    })?;

    for candidate in candidates.iter().filter(|c| c.id != selected.id) {
        let reason = if strict {
            format!("Only one {} plugin allowed; '{}' was selected", capability, selected.id)
        } else {
            format!(
                "Multiple {} plugins found; '{}' was selected by priority",
                capability, selected.id
            )
        };
        if strict {
            error!(capability, plugin = %candidate.id, reason = %reason, "Excluded plugin");
        } else {
            warn!(capability, plugin = %candidate.id, reason = %reason, "Excluded plugin");
        }
        excluded.insert(candidate.id.clone(), reason);
    }

    Some(selected.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ui(id: &str, priority: i32) -> PluginManifest {
        PluginManifest::builtin(id, id)
            .with_capability("ui.terminal")
            .with_priority(priority)
    }

    #[test]
    fn test_skip_then_only() {
        let manifests = vec![
            PluginManifest::builtin("quest", "Quest"),
            PluginManifest::builtin("analytics", "Analytics"),
            PluginManifest::builtin("merchant", "Merchant"),
        ];
        let policy = CapabilityPolicy {
            skip: vec!["analytics".into()],
            only: vec!["quest".into(), "analytics".into()],
            ..Default::default()
        };
        let result = validate(&manifests, &policy);

        let ids: Vec<&str> = result.to_load.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["quest"]);
        assert_eq!(
            result.excluded.get("analytics").map(String::as_str),
            Some("Excluded via skip_plugins configuration")
        );
        assert_eq!(
            result.excluded.get("merchant").map(String::as_str),
            Some("Not in only_plugins list")
        );
    }

    #[test]
    fn test_highest_priority_ui_wins() {
        let manifests = vec![ui("plain-ui", 100), ui("fancy-ui", 200)];
        let result = validate(&manifests, &CapabilityPolicy { strict: true, ..Default::default() });

        assert_eq!(result.selected_ui.as_deref(), Some("fancy-ui"));
        assert_eq!(
            result.excluded.get("plain-ui").map(String::as_str),
            Some("Only one ui plugin allowed; 'fancy-ui' was selected")
        );
    }

    #[test]
    fn test_preferred_ui_overrides_priority() {
        let manifests = vec![ui("plain-ui", 100), ui("fancy-ui", 200)];
        let policy = CapabilityPolicy {
            preferred_ui: Some("plain-ui".into()),
            ..Default::default()
        };
        let result = validate(&manifests, &policy);

        assert_eq!(result.selected_ui.as_deref(), Some("plain-ui"));
        assert!(result.excluded["fancy-ui"].starts_with("Multiple ui plugins found"));
    }

    #[test]
    fn test_equal_priority_keeps_first() {
        let manifests = vec![ui("first-ui", 100), ui("second-ui", 100)];
        let result = validate(&manifests, &CapabilityPolicy::default());
        assert_eq!(result.selected_ui.as_deref(), Some("first-ui"));
    }

    #[test]
    fn test_single_renderer_selected() {
        let manifests = vec![PluginManifest::builtin("ascii", "ASCII").with_capability("renderer")];
        let result = validate(&manifests, &CapabilityPolicy::default());
        assert_eq!(result.selected_renderer.as_deref(), Some("ascii"));
        assert_eq!(result.to_load.len(), 1);
    }
}
