//! Runtime diagnostics: leveled events, periodic provider snapshots,
//! sessions, spans and breadcrumbs, exportable as one JSON document.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::error::{LablabError, Result};

pub const MAX_BREADCRUMBS: usize = 100;
pub const MAX_EVENTS: usize = 1000;
pub const PROVIDERS: [&str; 4] = ["System", "Performance", "Memory", "Console"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SystemHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticEvent {
    pub timestamp: SystemTime,
    pub level: DiagnosticLevel,
    pub message: String,
    pub category: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub timestamp: SystemTime,
    pub provider: String,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breadcrumb {
    pub timestamp: SystemTime,
    pub message: String,
    pub category: String,
    pub level: DiagnosticLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub processor_count: usize,
    pub crate_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub uptime: Duration,
    pub processor_count: usize,
    /// Resident set size, when the platform exposes it
    pub resident_bytes: Option<u64>,
    pub active_spans: usize,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticHealth {
    pub health: SystemHealth,
    pub message: String,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub name: String,
    pub started: SystemTime,
    pub ended: SystemTime,
    pub event_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishedSpan {
    pub operation: String,
    pub tags: BTreeMap<String, String>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticStats {
    pub total_events: u64,
    pub total_errors: u64,
    pub total_warnings: u64,
    pub active_providers: usize,
    pub collected_points: usize,
    pub is_collecting: bool,
}

struct ActiveSpan {
    operation: String,
    tags: BTreeMap<String, String>,
    started: Instant,
}

struct Session {
    name: String,
    started: SystemTime,
    events_at_start: u64,
}

fn processor_count() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

pub struct DiagnosticsService {
    started: Instant,
    providers: RwLock<BTreeMap<String, bool>>,
    events: RwLock<VecDeque<DiagnosticEvent>>,
    data: RwLock<Vec<DataPoint>>,
    breadcrumbs: RwLock<VecDeque<Breadcrumb>>,
    tags: RwLock<BTreeMap<String, String>>,
    user: RwLock<Option<(String, BTreeMap<String, String>)>>,
    spans: Mutex<HashMap<SpanId, ActiveSpan>>,
    finished_spans: RwLock<Vec<FinishedSpan>>,
    sessions: Mutex<HashMap<String, Session>>,
    collector: Mutex<Option<JoinHandle<()>>>,
    next_span: AtomicU64,
    event_count: AtomicU64,
    error_count: AtomicU64,
    warning_count: AtomicU64,
}

impl Default for DiagnosticsService {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            providers: RwLock::new(PROVIDERS.iter().map(|p| (p.to_string(), true)).collect()),
            events: RwLock::new(VecDeque::new()),
            data: RwLock::new(Vec::new()),
            breadcrumbs: RwLock::new(VecDeque::new()),
            tags: RwLock::new(BTreeMap::new()),
            user: RwLock::new(None),
            spans: Mutex::new(HashMap::new()),
            finished_spans: RwLock::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            collector: Mutex::new(None),
            next_span: AtomicU64::new(0),
            event_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            warning_count: AtomicU64::new(0),
        }
    }
}

impl DiagnosticsService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect a snapshot from every enabled provider now and then every
    /// `interval` on the current tokio runtime
    pub fn start_collection(self: &Arc<Self>, interval: Duration) -> Result<()> {
        let mut collector = self.collector.lock();
        if collector.is_some() {
            warn!("Diagnostic collection already started");
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| LablabError::Scheduler(format!("No runtime for diagnostic collection: {}", e)))?;

        info!(?interval, "Starting diagnostic collection");
        let service = Arc::downgrade(self);
        *collector = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else { break };
                service.collect(None);
            }
        }));
        Ok(())
    }

    pub fn stop_collection(&self) {
        match self.collector.lock().take() {
            Some(task) => {
                task.abort();
                info!("Stopped diagnostic collection");
            }
            None => warn!("Diagnostic collection not started"),
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.collector.lock().is_some()
    }

    /// Snapshot the named providers (all enabled ones when `None`)
    pub fn collect(&self, providers: Option<&[&str]>) -> Vec<DataPoint> {
        let timestamp = SystemTime::now();
        let enabled: Vec<String> = self
            .providers
            .read()
            .iter()
            .filter(|(name, on)| **on && providers.map_or(true, |p| p.contains(&name.as_str())))
            .map(|(name, _)| name.clone())
            .collect();

        let points: Vec<DataPoint> = enabled
            .into_iter()
            .map(|provider| DataPoint {
                timestamp,
                data: self.provider_data(&provider),
                provider,
            })
            .collect();
        debug!(count = points.len(), "Collected diagnostic data points");
        self.data.write().extend(points.iter().cloned());
        points
    }

    fn provider_data(&self, provider: &str) -> BTreeMap<String, Value> {
        let pairs: Vec<(&str, Value)> = match provider {
            "System" => {
                let info = self.system_info();
                vec![
                    ("os", json!(info.os)),
                    ("arch", json!(info.arch)),
                    ("processor_count", json!(info.processor_count)),
                    ("uptime_secs", json!(self.started.elapsed().as_secs_f64())),
                ]
            }
            "Performance" => vec![
                ("active_spans", json!(self.spans.lock().len())),
                ("finished_spans", json!(self.finished_spans.read().len())),
            ],
            "Memory" => vec![("resident_bytes", json!(resident_bytes()))],
            "Console" => vec![
                ("event_count", json!(self.event_count.load(Ordering::Relaxed))),
                ("error_count", json!(self.error_count.load(Ordering::Relaxed))),
                ("warning_count", json!(self.warning_count.load(Ordering::Relaxed))),
            ],
            _ => Vec::new(),
        };
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    pub fn log_event(&self, level: DiagnosticLevel, message: &str, category: &str, source: Option<&str>) {
        self.event_count.fetch_add(1, Ordering::Relaxed);
        match level {
            DiagnosticLevel::Error | DiagnosticLevel::Critical => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                error!(category, "{}", message);
            }
            DiagnosticLevel::Warning => {
                self.warning_count.fetch_add(1, Ordering::Relaxed);
                warn!(category, "{}", message);
            }
            DiagnosticLevel::Info => info!(category, "{}", message),
            DiagnosticLevel::Debug => debug!(category, "{}", message),
        }

        let mut events = self.events.write();
        if events.len() == MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(DiagnosticEvent {
            timestamp: SystemTime::now(),
            level,
            message: message.to_string(),
            category: category.to_string(),
            source: source.unwrap_or("Unknown").to_string(),
        });
    }

    pub fn recent_events(&self, n: usize) -> Vec<DiagnosticEvent> {
        let events = self.events.read();
        events.iter().skip(events.len().saturating_sub(n)).cloned().collect()
    }

    pub fn performance(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            uptime: self.started.elapsed(),
            processor_count: processor_count(),
            resident_bytes: resident_bytes(),
            active_spans: self.spans.lock().len(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            processor_count: processor_count(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn set_provider_enabled(&self, provider: &str, enabled: bool) -> bool {
        match self.providers.write().get_mut(provider) {
            Some(slot) => {
                *slot = enabled;
                info!(provider, enabled, "Diagnostic provider toggled");
                true
            }
            None => false,
        }
    }

    pub fn health_check(&self) -> DiagnosticHealth {
        let all_enabled = self.providers.read().values().all(|on| *on);
        let (health, message) = if all_enabled {
            (SystemHealth::Healthy, "All systems operational")
        } else {
            (SystemHealth::Degraded, "Some providers unhealthy")
        };
        DiagnosticHealth {
            health,
            message: message.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn start_session(&self, name: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.lock().insert(
            id.clone(),
            Session {
                name: name.to_string(),
                started: SystemTime::now(),
                events_at_start: self.event_count.load(Ordering::Relaxed),
            },
        );
        info!(session = %id, name, "Started diagnostic session");
        id
    }

    /// Summary of events logged while the session was open
    pub fn stop_session(&self, session_id: &str) -> Option<SessionSummary> {
        let session = self.sessions.lock().remove(session_id)?;
        info!(session = session_id, "Stopped diagnostic session");
        Some(SessionSummary {
            session_id: session_id.to_string(),
            name: session.name,
            started: session.started,
            ended: SystemTime::now(),
            event_count: self.event_count.load(Ordering::Relaxed) - session.events_at_start,
        })
    }

    pub fn start_span(&self, operation: &str, tags: BTreeMap<String, String>) -> SpanId {
        let id = SpanId(self.next_span.fetch_add(1, Ordering::Relaxed));
        self.spans.lock().insert(
            id,
            ActiveSpan {
                operation: operation.to_string(),
                tags,
                started: Instant::now(),
            },
        );
        id
    }

    pub fn end_span(&self, id: SpanId) -> Option<Duration> {
        let span = self.spans.lock().remove(&id)?;
        let duration = span.started.elapsed();
        debug!(operation = %span.operation, ?duration, "Span ended");
        self.finished_spans.write().push(FinishedSpan {
            operation: span.operation,
            tags: span.tags,
            duration,
        });
        Some(duration)
    }

    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.finished_spans.read().clone()
    }

    /// Oldest crumbs fall off past [`MAX_BREADCRUMBS`]
    pub fn add_breadcrumb(&self, message: &str, category: &str, level: DiagnosticLevel) {
        debug!(category, "Breadcrumb: {}", message);
        let mut crumbs = self.breadcrumbs.write();
        if crumbs.len() == MAX_BREADCRUMBS {
            crumbs.pop_front();
        }
        crumbs.push_back(Breadcrumb {
            timestamp: SystemTime::now(),
            message: message.to_string(),
            category: category.to_string(),
            level,
        });
    }

    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.breadcrumbs.read().iter().cloned().collect()
    }

    pub fn set_user_context(&self, user_id: &str, properties: BTreeMap<String, String>) {
        *self.user.write() = Some((user_id.to_string(), properties));
        info!(user_id, "User context set");
    }

    pub fn set_global_tags(&self, tags: impl IntoIterator<Item = (String, String)>) {
        self.tags.write().extend(tags);
    }

    /// Remove the named tags, or every tag when `keys` is `None`
    pub fn remove_global_tags(&self, keys: Option<&[&str]>) {
        let mut tags = self.tags.write();
        match keys {
            Some(keys) => keys.iter().for_each(|k| {
                tags.remove(*k);
            }),
            None => tags.clear(),
        }
    }

    pub fn global_tags(&self) -> BTreeMap<String, String> {
        self.tags.read().clone()
    }

    /// Drop collected points older than `older_than`, or all of them
    pub fn clear_data(&self, older_than: Option<SystemTime>) -> usize {
        let mut data = self.data.write();
        let before = data.len();
        match older_than {
            Some(cutoff) => data.retain(|d| d.timestamp >= cutoff),
            None => data.clear(),
        }
        let removed = before - data.len();
        info!(removed, "Cleared diagnostic data points");
        removed
    }

    pub fn stats(&self) -> DiagnosticStats {
        DiagnosticStats {
            total_events: self.event_count.load(Ordering::Relaxed),
            total_errors: self.error_count.load(Ordering::Relaxed),
            total_warnings: self.warning_count.load(Ordering::Relaxed),
            active_providers: self.providers.read().values().filter(|on| **on).count(),
            collected_points: self.data.read().len(),
            is_collecting: self.is_collecting(),
        }
    }

    /// Pretty JSON of everything collected, optionally limited to providers
    pub fn export_json(&self, providers: Option<&[&str]>) -> Result<String> {
        let data: Vec<DataPoint> = self
            .data
            .read()
            .iter()
            .filter(|d| providers.map_or(true, |p| p.contains(&d.provider.as_str())))
            .cloned()
            .collect();
        let user = self.user.read().clone();
        let document = json!({
            "exported_at": SystemTime::now(),
            "system": self.system_info(),
            "stats": self.stats(),
            "tags": self.global_tags(),
            "user": user.map(|(id, props)| json!({ "id": id, "properties": props })),
            "data": data,
            "events": self.recent_events(MAX_EVENTS),
            "breadcrumbs": self.breadcrumbs(),
            "spans": self.finished_spans(),
        });
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

impl Drop for DiagnosticsService {
    fn drop(&mut self) {
        if let Some(task) = self.collector.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_counts_levels() {
        let diagnostics = DiagnosticsService::new();
        diagnostics.log_event(DiagnosticLevel::Info, "loaded", "Startup", None);
        diagnostics.log_event(DiagnosticLevel::Warning, "slow frame", "Render", Some("ui"));
        diagnostics.log_event(DiagnosticLevel::Critical, "crash", "Core", None);

        let stats = diagnostics.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.total_warnings, 1);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(diagnostics.recent_events(1)[0].message, "crash");
        assert_eq!(diagnostics.recent_events(5)[1].source, "ui");
    }

    #[test]
    fn test_breadcrumbs_are_bounded() {
        let diagnostics = DiagnosticsService::new();
        for i in 0..(MAX_BREADCRUMBS + 5) {
            diagnostics.add_breadcrumb(&format!("step {}", i), "game", DiagnosticLevel::Debug);
        }
        let crumbs = diagnostics.breadcrumbs();
        assert_eq!(crumbs.len(), MAX_BREADCRUMBS);
        assert_eq!(crumbs[0].message, "step 5");
    }

    #[test]
    fn test_sessions_and_spans() {
        let diagnostics = DiagnosticsService::new();
        let session = diagnostics.start_session("descent");
        diagnostics.log_event(DiagnosticLevel::Info, "floor 2", "Game", None);
        diagnostics.log_event(DiagnosticLevel::Info, "floor 3", "Game", None);
        let summary = diagnostics.stop_session(&session).unwrap();
        assert_eq!(summary.event_count, 2);
        assert!(diagnostics.stop_session(&session).is_none());

        let span = diagnostics.start_span("generate_level", BTreeMap::new());
        assert_eq!(diagnostics.performance().active_spans, 1);
        assert!(diagnostics.end_span(span).is_some());
        assert!(diagnostics.end_span(span).is_none());
        assert_eq!(diagnostics.finished_spans()[0].operation, "generate_level");
    }

    #[test]
    fn test_health_tags_and_export() {
        let diagnostics = DiagnosticsService::new();
        assert_eq!(diagnostics.health_check().health, SystemHealth::Healthy);
        assert!(diagnostics.set_provider_enabled("Memory", false));
        assert!(!diagnostics.set_provider_enabled("Gpu", false));
        assert_eq!(diagnostics.health_check().health, SystemHealth::Degraded);

        diagnostics.set_global_tags([("build".to_string(), "dev".to_string())]);
        assert_eq!(diagnostics.collect(None).len(), 3);
        assert_eq!(diagnostics.collect(Some(&["Console"][..])).len(), 1);

        let exported: Value = serde_json::from_str(&diagnostics.export_json(Some(&["Console"][..])).unwrap()).unwrap();
        assert_eq!(exported["tags"]["build"], "dev");
        assert_eq!(exported["data"].as_array().unwrap().len(), 2);

        diagnostics.remove_global_tags(None);
        assert!(diagnostics.global_tags().is_empty());
        assert_eq!(diagnostics.clear_data(None), 4);
    }

    #[tokio::test]
    async fn test_periodic_collection() {
        let diagnostics = Arc::new(DiagnosticsService::new());
        diagnostics.start_collection(Duration::from_millis(20)).unwrap();
        assert!(diagnostics.is_collecting());
        tokio::time::sleep(Duration::from_millis(70)).await;
        diagnostics.stop_collection();
        assert!(!diagnostics.is_collecting());
        assert!(diagnostics.stats().collected_points >= PROVIDERS.len());
    }
}
