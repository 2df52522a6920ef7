//! Player-facing activity log

use std::collections::VecDeque;

use serde::Serialize;

/// Maximum log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LogSeverity {
    Debug,
    Info,
    Success,
    Loot,
    Combat,
    Warning,
    Danger,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LogCategory {
    Combat,
    Movement,
    Items,
    Level,
    Quest,
    Dialogue,
    Trade,
    Magic,
    System,
}

impl LogSeverity {
    /// Best-guess category for a line that did not name one
    pub fn default_category(&self) -> LogCategory {
        match self {
            LogSeverity::Combat | LogSeverity::Danger => LogCategory::Combat,
            LogSeverity::Loot => LogCategory::Items,
            LogSeverity::System | LogSeverity::Debug => LogCategory::System,
            _ => LogCategory::Movement,
        }
    }
}

/// An entry in the activity log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub sequence: u64,
    pub turn: u64,
    pub message: String,
    pub severity: LogSeverity,
    pub category: LogCategory,
}

#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    sequence: u64,
    /// Entries below this severity are dropped
    pub minimum_severity: LogSeverity,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LOG_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            sequence: 0,
            minimum_severity: LogSeverity::Info,
        }
    }

    /// Add an entry, evicting the oldest when full
    pub fn append(
        &mut self,
        turn: u64,
        message: impl Into<String>,
        severity: LogSeverity,
        category: LogCategory,
    ) {
        if severity < self.minimum_severity {
            return;
        }
        let message = message.into();
        if message.is_empty() {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.sequence += 1;
        self.entries.push_back(LogEntry {
            sequence: self.sequence,
            turn,
            message,
            severity,
            category,
        });
    }

    pub fn log(&mut self, turn: u64, message: impl Into<String>, severity: LogSeverity) {
        self.append(turn, message, severity, severity.default_category());
    }

    pub fn info(&mut self, turn: u64, message: impl Into<String>) {
        self.log(turn, message, LogSeverity::Info);
    }

    pub fn success(&mut self, turn: u64, message: impl Into<String>) {
        self.log(turn, message, LogSeverity::Success);
    }

    pub fn warning(&mut self, turn: u64, message: impl Into<String>) {
        self.log(turn, message, LogSeverity::Warning);
    }

    pub fn combat(&mut self, turn: u64, message: impl Into<String>) {
        self.log(turn, message, LogSeverity::Combat);
    }

    /// Increments on every accepted entry; UIs redraw when it changes
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest `count` entries, oldest first
    pub fn recent(&self, count: usize) -> Vec<&LogEntry> {
        let start = self.entries.len().saturating_sub(count.max(1));
        self.entries.iter().skip(start).collect()
    }

    /// Entries added after `sequence`
    pub fn since(&self, sequence: u64) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.sequence > sequence).collect()
    }

    pub fn by_category(&self, category: LogCategory, max: usize) -> Vec<&LogEntry> {
        let matching: Vec<&LogEntry> = self.entries.iter().filter(|e| e.category == category).collect();
        let start = matching.len().saturating_sub(max);
        matching[start..].to_vec()
    }

    pub fn by_severity(&self, severity: LogSeverity, max: usize) -> Vec<&LogEntry> {
        let matching: Vec<&LogEntry> = self.entries.iter().filter(|e| e.severity == severity).collect();
        let start = matching.len().saturating_sub(max);
        matching[start..].to_vec()
    }

    /// Case-insensitive substring search
    pub fn search(&self, term: &str, max: usize) -> Vec<&LogEntry> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Vec::new();
        }
        let matching: Vec<&LogEntry> = self
            .entries
            .iter()
            .filter(|e| e.message.to_lowercase().contains(&term))
            .collect();
        let start = matching.len().saturating_sub(max);
        matching[start..].to_vec()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut log = ActivityLog::with_capacity(3);
        for i in 0..5 {
            log.info(i, format!("line {}", i));
        }
        let recent: Vec<&str> = log.recent(10).iter().map(|e| e.message.as_str()).collect();
        assert_eq!(recent, vec!["line 2", "line 3", "line 4"]);
        assert_eq!(log.sequence(), 5);
    }

    #[test]
    fn test_minimum_severity_filters() {
        let mut log = ActivityLog::new();
        log.log(0, "debug noise", LogSeverity::Debug);
        assert!(log.is_empty());
        log.minimum_severity = LogSeverity::Warning;
        log.info(0, "ignored");
        log.warning(0, "kept");
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_since_and_search() {
        let mut log = ActivityLog::new();
        log.combat(1, "The Goblin hits you");
        let mark = log.sequence();
        log.success(2, "Picked up Health Potion");
        assert_eq!(log.since(mark).len(), 1);
        assert_eq!(log.search("GOBLIN", 5).len(), 1);
        assert!(log.search("  ", 5).is_empty());
        assert_eq!(log.by_category(LogCategory::Combat, 5).len(), 1);
    }
}
