//! Evaluation trail kept per control.
//!
//! Each control key owns a bounded ring of [`TraceEntry`] values; once the
//! ring is full the oldest entry is dropped. The log is shared behind a std
//! `RwLock` and never awaits while holding it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered so that `level >= LogLevel::Warn` selects warnings and errors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Step of a control's evaluation that wrote the entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Compile,
    Expression,
    Threshold,
    Synthesis,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub at: DateTime<Utc>,
    pub control_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    pub level: LogLevel,
    pub phase: ExecutionPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TraceEntry {
    pub fn new(
        control_key: impl Into<String>,
        level: LogLevel,
        phase: ExecutionPhase,
        message: impl Into<String>,
    ) -> Self {
        Self {
            at: Utc::now(),
            control_key: control_key.into(),
            event_id: None,
            level,
            phase,
            message: message.into(),
            details: None,
            duration_ms: None,
        }
    }

    pub fn for_event(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn took(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Filters for [`AuditLog::query`]. All are optional and combine with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogQueryParams {
    /// Minimum level, inclusive.
    pub level: Option<LogLevel>,
    pub phase: Option<ExecutionPhase>,
    pub event_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    /// Defaults to 100.
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct AuditLog {
    rings: Arc<RwLock<BTreeMap<String, VecDeque<TraceEntry>>>>,
    capacity: usize,
}

impl AuditLog {
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Keep at most `capacity` entries per control.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rings: Arc::new(RwLock::new(BTreeMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, entry: TraceEntry) {
        let mut rings = self.rings.write().expect("audit log lock poisoned");
        let ring = rings.entry(entry.control_key.clone()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    /// Shorthand for an entry without event, details or timing.
    pub fn log(&self, control_key: &str, level: LogLevel, phase: ExecutionPhase, message: impl Into<String>) {
        self.push(TraceEntry::new(control_key, level, phase, message));
    }

    /// Entries for one control, newest first.
    pub fn query(&self, control_key: &str, params: &LogQueryParams) -> Vec<TraceEntry> {
        let rings = self.rings.read().expect("audit log lock poisoned");
        let Some(ring) = rings.get(control_key) else {
            return Vec::new();
        };
        ring.iter()
            .rev()
            .filter(|e| params.level.map_or(true, |min| e.level >= min))
            .filter(|e| params.phase.map_or(true, |p| e.phase == p))
            .filter(|e| params.event_id.map_or(true, |id| e.event_id == Some(id)))
            .filter(|e| params.since.map_or(true, |s| e.at >= s))
            .take(params.limit.unwrap_or(100))
            .cloned()
            .collect()
    }

    /// Control keys with at least one entry, sorted.
    pub fn controls(&self) -> Vec<String> {
        let rings = self.rings.read().expect("audit log lock poisoned");
        rings.keys().cloned().collect()
    }

    pub fn clear(&self, control_key: &str) {
        self.rings
            .write()
            .expect("audit log lock poisoned")
            .remove(control_key);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
