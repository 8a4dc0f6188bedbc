//! Row types for the PostgreSQL store and their mapping into the domain model.

use chrono::{DateTime, Utc};
use comply_core::{
    ActionLogEntry, ChainLink, ChainState, DetailMap, Event, EventMetadata, EvidenceSnapshot,
    ResolutionState, ScorerArtifact, SignatureRecord, SignatureRotation, Violation, ViolationAction,
};
use comply_rules::lifecycle::{ApprovalRecord, LifecycleState, Transition};
use comply_rules::schema::{Control, Policy, PolicyMetadata};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{StoredEvent, StreamHalt};

pub(crate) const POLICY_COLUMNS: &str =
    "id, name, version, lifecycle, metadata, controls, created_at";

pub(crate) const EVENT_COLUMNS: &str =
    "e.id, e.event_type, e.source, e.subject, e.occurred_at, e.detail, e.ingested_at";

pub(crate) const METADATA_COLUMNS: &str = "m.event_id, m.stream, m.state, m.position, \
     m.prev_hash, m.content_hash, m.hashed_at, m.sig_algorithm, m.sig_key_id, m.signature, \
     m.signed_at, m.processed, m.processed_at";

pub(crate) const VIOLATION_COLUMNS: &str = "id, dedup_key, policy_id, policy_name, \
     policy_version, control_id, rule, subject, severity, bucket_start, triggering_event, \
     evidence, resolution, created_at";

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("unknown {} '{}'", what, value))
}

pub(crate) fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_u64(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

// ── Policies ─────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
pub(crate) struct PolicyRow {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub lifecycle: String,
    pub metadata: Json<PolicyMetadata>,
    pub controls: Json<Vec<Control>>,
    pub created_at: DateTime<Utc>,
}

impl PolicyRow {
    pub fn into_policy(self) -> StoreResult<Policy> {
        let lifecycle = LifecycleState::parse(&self.lifecycle)
            .ok_or_else(|| corrupt("lifecycle state", &self.lifecycle))?;
        Ok(Policy {
            id: self.id,
            name: self.name,
            version: self.version,
            lifecycle,
            metadata: self.metadata.0,
            controls: self.controls.0,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ApprovalRow {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub transition: String,
    pub from_state: String,
    pub to_state: String,
    pub approver: String,
    pub justification: String,
    pub at: DateTime<Utc>,
}

impl ApprovalRow {
    pub fn into_record(self) -> StoreResult<ApprovalRecord> {
        Ok(ApprovalRecord {
            id: self.id,
            policy_id: self.policy_id,
            transition: Transition::parse(&self.transition)
                .ok_or_else(|| corrupt("transition", &self.transition))?,
            from_state: LifecycleState::parse(&self.from_state)
                .ok_or_else(|| corrupt("lifecycle state", &self.from_state))?,
            to_state: LifecycleState::parse(&self.to_state)
                .ok_or_else(|| corrupt("lifecycle state", &self.to_state))?,
            approver: self.approver,
            justification: self.justification,
            at: self.at,
        })
    }
}

// ── Events ───────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
pub(crate) struct EventRow {
    pub id: Uuid,
    pub event_type: String,
    pub source: String,
    pub subject: String,
    pub occurred_at: DateTime<Utc>,
    pub detail: Json<DetailMap>,
    pub ingested_at: DateTime<Utc>,
}

impl EventRow {
    pub fn into_event(self) -> Event {
        Event {
            id: self.id,
            event_type: self.event_type,
            source: self.source,
            subject: self.subject,
            timestamp: self.occurred_at,
            detail: self.detail.0,
            ingested_at: self.ingested_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct MetadataRow {
    pub event_id: Uuid,
    pub stream: String,
    pub state: String,
    pub position: Option<i64>,
    pub prev_hash: Option<String>,
    pub content_hash: Option<String>,
    pub hashed_at: Option<DateTime<Utc>>,
    pub sig_algorithm: Option<String>,
    pub sig_key_id: Option<String>,
    pub signature: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl MetadataRow {
    pub fn into_metadata(self) -> StoreResult<EventMetadata> {
        let state = ChainState::parse(&self.state).ok_or_else(|| corrupt("chain state", &self.state))?;
        let link = match (self.position, self.prev_hash, self.content_hash, self.hashed_at) {
            (Some(position), Some(prev_hash), Some(content_hash), Some(hashed_at)) => Some(ChainLink {
                position: to_u64(position),
                prev_hash,
                content_hash,
                hashed_at,
            }),
            (None, None, None, None) => None,
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "partial chain link on event {}",
                    self.event_id
                )))
            }
        };
        let signature = match (self.sig_algorithm, self.sig_key_id, self.signature, self.signed_at) {
            (Some(algorithm), Some(key_id), Some(value), Some(signed_at)) => Some(SignatureRecord {
                algorithm,
                key_id,
                value,
                signed_at,
            }),
            _ => None,
        };
        Ok(EventMetadata {
            event_id: self.event_id,
            stream: self.stream,
            state,
            link,
            signature,
            processed: self.processed,
            processed_at: self.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct StoredEventRow {
    #[sqlx(flatten)]
    pub event: EventRow,
    #[sqlx(flatten)]
    pub metadata: MetadataRow,
}

impl StoredEventRow {
    pub fn into_stored(self) -> StoreResult<StoredEvent> {
        Ok(StoredEvent {
            event: self.event.into_event(),
            metadata: self.metadata.into_metadata()?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct HaltRow {
    pub stream: String,
    pub position: i64,
    pub reason: String,
    pub halted_at: DateTime<Utc>,
}

impl From<HaltRow> for StreamHalt {
    fn from(row: HaltRow) -> Self {
        StreamHalt {
            stream: row.stream,
            position: to_u64(row.position),
            reason: row.reason,
            halted_at: row.halted_at,
        }
    }
}

// ── Violations ───────────────────────────────────────────────

#[derive(sqlx::FromRow)]
pub(crate) struct ViolationRow {
    pub id: Uuid,
    pub dedup_key: String,
    pub policy_id: Uuid,
    pub policy_name: String,
    pub policy_version: String,
    pub control_id: String,
    pub rule: Option<String>,
    pub subject: String,
    pub severity: String,
    pub bucket_start: DateTime<Utc>,
    pub triggering_event: Uuid,
    pub evidence: Json<EvidenceSnapshot>,
    pub resolution: String,
    pub created_at: DateTime<Utc>,
}

impl ViolationRow {
    pub fn into_violation(self) -> StoreResult<Violation> {
        Ok(Violation {
            id: self.id,
            dedup_key: self.dedup_key,
            policy_id: self.policy_id,
            policy_name: self.policy_name,
            policy_version: self.policy_version,
            control_id: self.control_id,
            rule: self.rule,
            subject: self.subject,
            severity: self.severity.parse().map_err(StoreError::Corrupt)?,
            bucket_start: self.bucket_start,
            triggering_event: self.triggering_event,
            evidence: self.evidence.0,
            resolution: ResolutionState::parse(&self.resolution)
                .ok_or_else(|| corrupt("resolution state", &self.resolution))?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ActionRow {
    pub id: Uuid,
    pub violation_id: Uuid,
    pub action: String,
    pub from_state: String,
    pub to_state: String,
    pub actor: String,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

impl ActionRow {
    pub fn into_entry(self) -> StoreResult<ActionLogEntry> {
        Ok(ActionLogEntry {
            id: self.id,
            violation_id: self.violation_id,
            action: ViolationAction::parse(&self.action)
                .ok_or_else(|| corrupt("violation action", &self.action))?,
            from_state: ResolutionState::parse(&self.from_state)
                .ok_or_else(|| corrupt("resolution state", &self.from_state))?,
            to_state: ResolutionState::parse(&self.to_state)
                .ok_or_else(|| corrupt("resolution state", &self.to_state))?,
            actor: self.actor,
            note: self.note,
            at: self.at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RotationRow {
    pub event_id: Uuid,
    pub previous_algorithm: String,
    pub previous_key_id: String,
    pub previous_signature: String,
    pub previous_signed_at: DateTime<Utc>,
    pub algorithm: String,
    pub key_id: String,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
    pub rotated_at: DateTime<Utc>,
}

impl RotationRow {
    pub fn into_rotation(self) -> SignatureRotation {
        SignatureRotation {
            event_id: self.event_id,
            previous: SignatureRecord {
                algorithm: self.previous_algorithm,
                key_id: self.previous_key_id,
                value: self.previous_signature,
                signed_at: self.previous_signed_at,
            },
            current: SignatureRecord {
                algorithm: self.algorithm,
                key_id: self.key_id,
                value: self.signature,
                signed_at: self.signed_at,
            },
            rotated_at: self.rotated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ArtifactRow {
    pub name: String,
    pub version: String,
    pub sha256: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<ArtifactRow> for ScorerArtifact {
    fn from(row: ArtifactRow) -> Self {
        ScorerArtifact {
            name: row.name,
            version: row.version,
            sha256: row.sha256,
            config: row.config,
            created_at: row.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata_row() -> MetadataRow {
        MetadataRow {
            event_id: Uuid::nil(),
            stream: "u1".into(),
            state: "hashed".into(),
            position: Some(4),
            prev_hash: Some("aa".into()),
            content_hash: Some("bb".into()),
            hashed_at: Some(Utc::now()),
            sig_algorithm: None,
            sig_key_id: None,
            signature: None,
            signed_at: None,
            processed: false,
            processed_at: None,
        }
    }

    #[test]
    fn metadata_row_maps_link() {
        let meta = metadata_row().into_metadata().unwrap();
        assert_eq!(meta.state, ChainState::Hashed);
        assert_eq!(meta.link.unwrap().position, 4);
        assert!(meta.signature.is_none());
    }

    #[test]
    fn partial_link_is_corrupt() {
        let mut row = metadata_row();
        row.content_hash = None;
        assert!(matches!(row.into_metadata(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn unknown_state_is_corrupt() {
        let mut row = metadata_row();
        row.state = "sealed".into();
        assert!(row.into_metadata().is_err());
    }
}
