//! Load ordering from declared dependencies

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{error, warn};

use crate::core::error::{LablabError, Result};
use crate::plugins::manifest::PluginManifest;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveResult {
    /// Ids in an order where every hard dependency precedes its dependents
    pub load_order: Vec<String>,
    pub excluded: BTreeMap<String, String>,
}

impl ResolveResult {
    pub fn is_excluded(&self, id: &str) -> bool {
        self.excluded.contains_key(id)
    }
}

/// Drop manifests with missing hard dependencies, then order the rest.
///
/// Exclusion is a single pass: a plugin whose dependency is present but
/// itself excluded still resolves here; the loader skips it when that
/// dependency fails to load.
pub fn resolve(manifests: &[PluginManifest]) -> Result<ResolveResult> {
    let available: HashSet<&str> = manifests.iter().map(|m| m.id.as_str()).collect();
    let mut result = ResolveResult::default();

    for manifest in manifests {
        let mut missing_hard = Vec::new();
        let mut missing_soft = Vec::new();
        for dep in &manifest.dependencies {
            if available.contains(dep.id.as_str()) {
                continue;
            }
            if dep.optional {
                missing_soft.push(dep.id.as_str());
            } else {
                missing_hard.push(dep.id.as_str());
            }
        }

        if !missing_hard.is_empty() {
            let missing = missing_hard.join(", ");
            error!(plugin = %manifest.id, missing = %missing, "Plugin excluded: missing hard dependencies");
            result
                .excluded
                .insert(manifest.id.clone(), format!("Missing hard dependencies: {}", missing));
            continue;
        }

        if !missing_soft.is_empty() {
            warn!(
                plugin = %manifest.id,
                missing = %missing_soft.join(", "),
                "Plugin has missing soft dependencies"
            );
        }
    }

    let loadable: Vec<&PluginManifest> = manifests
        .iter()
        .filter(|m| !result.excluded.contains_key(&m.id))
        .collect();
    if loadable.is_empty() {
        return Ok(result);
    }

    let sorted = topological_sort(&loadable);
    if sorted.len() != loadable.len() {
        let cycles = detect_cycles(&loadable);
        let info = cycles
            .iter()
            .map(|c| c.join(" -> "))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(LablabError::Dependency(format!(
            "Circular dependencies detected: {}",
            info
        )));
    }

    result.load_order = sorted;
    Ok(result)
}

/// Kahn's algorithm; ties keep input order
fn topological_sort(manifests: &[&PluginManifest]) -> Vec<String> {
    let index: HashMap<&str, usize> = manifests
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id.as_str(), i))
        .collect();
    let mut in_degree = vec![0usize; manifests.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); manifests.len()];

    for (i, manifest) in manifests.iter().enumerate() {
        for dep in manifest.hard_dependencies() {
            if let Some(&d) = index.get(dep.id.as_str()) {
                dependents[d].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..manifests.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(manifests.len());
    while let Some(current) = queue.pop_front() {
        sorted.push(manifests[current].id.clone());
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }
    sorted
}

fn detect_cycles(manifests: &[&PluginManifest]) -> Vec<Vec<String>> {
    let by_id: HashMap<&str, &PluginManifest> =
        manifests.iter().map(|m| (m.id.as_str(), *m)).collect();
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path = Vec::new();
    let mut cycles = Vec::new();

    fn dfs<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a PluginManifest>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        if on_stack.contains(id) {
            if let Some(start) = path.iter().position(|p| *p == id) {
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                cycles.push(cycle);
            }
            return;
        }
        if !visited.insert(id) {
            return;
        }
        on_stack.insert(id);
        path.push(id);
        if let Some(&manifest) = by_id.get(id) {
            for dep in manifest.hard_dependencies() {
                if by_id.contains_key(dep.id.as_str()) {
                    dfs(dep.id.as_str(), by_id, visited, on_stack, path, cycles);
                }
            }
        }
        path.pop();
        on_stack.remove(id);
    }

    for manifest in manifests {
        if !visited.contains(manifest.id.as_str()) {
            dfs(
                manifest.id.as_str(),
                &by_id,
                &mut visited,
                &mut on_stack,
                &mut path,
                &mut cycles,
            );
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::PluginDependency;

    fn manifest(id: &str, deps: &[&str]) -> PluginManifest {
        deps.iter().fold(PluginManifest::builtin(id, id), |m, d| {
            m.depends_on(PluginDependency::hard(d))
        })
    }

    #[test]
    fn test_dependencies_come_first() {
        let manifests = vec![
            manifest("quest", &["inventory", "progression"]),
            manifest("inventory", &[]),
            manifest("progression", &["inventory"]),
        ];
        let result = resolve(&manifests).unwrap();
        assert_eq!(result.load_order, vec!["inventory", "progression", "quest"]);
    }

    #[test]
    fn test_independent_plugins_keep_input_order() {
        let manifests = vec![manifest("b", &[]), manifest("a", &[]), manifest("c", &[])];
        let result = resolve(&manifests).unwrap();
        assert_eq!(result.load_order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_missing_hard_dependency_excludes() {
        let manifests = vec![manifest("merchant", &["economy", "inventory"]), manifest("inventory", &[])];
        let result = resolve(&manifests).unwrap();
        assert_eq!(result.load_order, vec!["inventory"]);
        assert_eq!(
            result.excluded.get("merchant").map(String::as_str),
            Some("Missing hard dependencies: economy")
        );
    }

    #[test]
    fn test_missing_soft_dependency_is_tolerated() {
        let manifests = vec![PluginManifest::builtin("quest", "Quest")
            .depends_on(PluginDependency::soft("analytics"))];
        let result = resolve(&manifests).unwrap();
        assert_eq!(result.load_order, vec!["quest"]);
        assert!(result.excluded.is_empty());
    }

    #[test]
    fn test_cycle_is_reported() {
        let manifests = vec![manifest("a", &["b"]), manifest("b", &["a"]), manifest("c", &[])];
        let err = resolve(&manifests).unwrap_err();
        assert_eq!(err.to_string(), "Circular dependencies detected: a -> b -> a");
    }

    #[test]
    fn test_empty_input() {
        let result = resolve(&[]).unwrap();
        assert!(result.load_order.is_empty());
    }
}
