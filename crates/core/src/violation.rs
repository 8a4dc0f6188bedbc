use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{DetailMap, Event};

/// Control severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: '{}'", other)),
        }
    }
}

// ── Resolution state & action log ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Open,
    Acknowledged,
    Resolved,
}

impl ResolutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionState::Open => "open",
            ResolutionState::Acknowledged => "acknowledged",
            ResolutionState::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ResolutionState::Open),
            "acknowledged" => Some(ResolutionState::Acknowledged),
            "resolved" => Some(ResolutionState::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    Acknowledge,
    Resolve,
    Reopen,
}

impl ViolationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationAction::Acknowledge => "acknowledge",
            ViolationAction::Resolve => "resolve",
            ViolationAction::Reopen => "reopen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "acknowledge" => Some(ViolationAction::Acknowledge),
            "resolve" => Some(ViolationAction::Resolve),
            "reopen" => Some(ViolationAction::Reopen),
            _ => None,
        }
    }

    /// Next resolution state, or `None` when the action is illegal from `from`.
    pub fn apply(&self, from: ResolutionState) -> Option<ResolutionState> {
        use ResolutionState::*;
        match (self, from) {
            (ViolationAction::Acknowledge, Open) => Some(Acknowledged),
            (ViolationAction::Resolve, Open | Acknowledged) => Some(Resolved),
            (ViolationAction::Reopen, Acknowledged | Resolved) => Some(Open),
            _ => None,
        }
    }
}

/// Append-only record of one resolution action on a violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionLogEntry {
    pub id: Uuid,
    pub violation_id: Uuid,
    pub action: ViolationAction,
    pub from_state: ResolutionState,
    pub to_state: ResolutionState,
    pub actor: String,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

// ── Evidence ──────────────────────────────────────────────────

/// Copy of the triggering event, frozen at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSnapshot {
    pub id: Uuid,
    pub event_type: String,
    pub source: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub detail: DetailMap,
}

impl From<&Event> for EventSnapshot {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            subject: event.subject.clone(),
            timestamp: event.timestamp,
            detail: event.detail.clone(),
        }
    }
}

/// Frozen evidence attached to a violation on first creation.
///
/// Holds copies, never references, so later edits to rules or thresholds
/// cannot alter it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceSnapshot {
    pub event: EventSnapshot,
    /// Explanation tree of the expression evaluation.
    pub explanation: serde_json::Value,
    /// Threshold inputs (counts, window bounds) when the control is gated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<serde_json::Value>,
    /// Control definition as evaluated.
    pub control: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

// ── Violation ─────────────────────────────────────────────────

/// A violation candidate computed by the synthesizer, not yet committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewViolation {
    pub dedup_key: String,
    pub policy_id: Uuid,
    pub policy_name: String,
    pub policy_version: String,
    pub control_id: String,
    /// Set when a single rule alone decided the match.
    pub rule: Option<String>,
    pub subject: String,
    pub severity: Severity,
    pub bucket_start: DateTime<Utc>,
    pub triggering_event: Uuid,
    pub evidence: EvidenceSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub id: Uuid,
    pub dedup_key: String,
    pub policy_id: Uuid,
    pub policy_name: String,
    pub policy_version: String,
    pub control_id: String,
    pub rule: Option<String>,
    pub subject: String,
    pub severity: Severity,
    pub bucket_start: DateTime<Utc>,
    pub triggering_event: Uuid,
    pub evidence: EvidenceSnapshot,
    /// Denormalized from the action log.
    pub resolution: ResolutionState,
    pub created_at: DateTime<Utc>,
}

impl Violation {
    pub fn from_new(new: NewViolation, id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            dedup_key: new.dedup_key,
            policy_id: new.policy_id,
            policy_name: new.policy_name,
            policy_version: new.policy_version,
            control_id: new.control_id,
            rule: new.rule,
            subject: new.subject,
            severity: new.severity,
            bucket_start: new.bucket_start,
            triggering_event: new.triggering_event,
            evidence: new.evidence,
            resolution: ResolutionState::Open,
            created_at,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution == ResolutionState::Resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_by_impact() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!("critical".parse::<Severity>(), Ok(Severity::Critical));
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn action_transitions() {
        use ResolutionState::*;
        assert_eq!(ViolationAction::Acknowledge.apply(Open), Some(Acknowledged));
        assert_eq!(ViolationAction::Acknowledge.apply(Resolved), None);
        assert_eq!(ViolationAction::Resolve.apply(Acknowledged), Some(Resolved));
        assert_eq!(ViolationAction::Resolve.apply(Resolved), None);
        assert_eq!(ViolationAction::Reopen.apply(Resolved), Some(Open));
        assert_eq!(ViolationAction::Reopen.apply(Open), None);
    }

    #[test]
    fn state_names_round_trip() {
        for s in [
            ResolutionState::Open,
            ResolutionState::Acknowledged,
            ResolutionState::Resolved,
        ] {
            assert_eq!(ResolutionState::parse(s.as_str()), Some(s));
        }
    }
}
