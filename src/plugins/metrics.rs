//! Plugin load timings

use std::fmt::Write as _;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct PluginLoadMetrics {
    pub plugin_id: String,
    pub profile: String,
    pub version: String,
    pub dependency_count: usize,
    #[serde(skip)]
    started: Instant,
    pub duration: Option<Duration>,
    pub loaded: bool,
    pub error: Option<String>,
}

impl PluginLoadMetrics {
    pub fn is_complete(&self) -> bool {
        self.duration.is_some()
    }
}

#[derive(Debug, Default)]
pub struct PluginSystemMetrics {
    plugins: Vec<PluginLoadMetrics>,
    system_started: Option<(SystemTime, Instant)>,
    total_load_time: Option<Duration>,
}

impl PluginSystemMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_system(&mut self) {
        self.system_started = Some((SystemTime::now(), Instant::now()));
        self.total_load_time = None;
    }

    pub fn complete_system(&mut self) {
        if let Some((_, started)) = self.system_started {
            self.total_load_time = Some(started.elapsed());
        }
    }

    pub fn system_start_time(&self) -> Option<SystemTime> {
        self.system_started.map(|(wall, _)| wall)
    }

    pub fn total_load_time(&self) -> Option<Duration> {
        self.total_load_time
    }

    /// Begin timing one plugin; returns its index for `complete_plugin_load`
    pub fn start_plugin_load(&mut self, plugin_id: &str, profile: &str, version: &str, dependency_count: usize) -> usize {
        self.plugins.push(PluginLoadMetrics {
            plugin_id: plugin_id.to_string(),
            profile: profile.to_string(),
            version: version.to_string(),
            dependency_count,
            started: Instant::now(),
            duration: None,
            loaded: false,
            error: None,
        });
        self.plugins.len() - 1
    }

    pub fn complete_plugin_load(&mut self, index: usize, success: bool, error: Option<String>) {
        if let Some(m) = self.plugins.get_mut(index) {
            m.duration = Some(m.started.elapsed());
            m.loaded = success;
            m.error = error;
        }
    }

    pub fn plugins(&self) -> &[PluginLoadMetrics] {
        &self.plugins
    }

    pub fn attempted(&self) -> usize {
        self.plugins.len()
    }

    pub fn loaded(&self) -> usize {
        self.plugins.iter().filter(|m| m.loaded).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.loaded()
    }

    /// Percentage in `[0, 100]`
    pub fn success_rate(&self) -> f64 {
        if self.plugins.is_empty() {
            return 0.0;
        }
        self.loaded() as f64 / self.attempted() as f64 * 100.0
    }

    pub fn average_load_time(&self) -> Duration {
        let loaded: Vec<Duration> = self
            .plugins
            .iter()
            .filter(|m| m.loaded)
            .filter_map(|m| m.duration)
            .collect();
        if loaded.is_empty() {
            return Duration::ZERO;
        }
        loaded.iter().sum::<Duration>() / loaded.len() as u32
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Plugin System Metrics ===");
        let _ = writeln!(
            out,
            "Total Load Time: {:.2}s",
            self.total_load_time.unwrap_or_default().as_secs_f64()
        );
        let _ = writeln!(out, "Plugins Attempted: {}", self.attempted());
        let _ = writeln!(out, "Plugins Loaded: {}", self.loaded());
        let _ = writeln!(out, "Plugins Failed: {}", self.failed());
        let _ = writeln!(out, "Success Rate: {:.1}%", self.success_rate());
        let _ = writeln!(out, "Average Load Time: {}ms", self.average_load_time().as_millis());

        if !self.plugins.is_empty() {
            let _ = writeln!(out, "\n=== Per-Plugin Metrics ===");
            for m in &self.plugins {
                let status = if m.loaded { "OK  " } else { "FAIL" };
                let _ = writeln!(out, "[{}] {} ({})", status, m.plugin_id, m.profile);
                let _ = writeln!(
                    out,
                    "   Load Time: {}ms",
                    m.duration.unwrap_or_default().as_millis()
                );
                if let Some(error) = &m.error {
                    let _ = writeln!(out, "   Error: {}", error);
                }
            }
        }
        out
    }
}
