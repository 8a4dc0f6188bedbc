//! The [`ComplianceStore`] trait: the single authoritative repository of
//! policies, events, chain metadata, qualifying hits and violations.
//!
//! Implementations must provide:
//! - append-only event bodies (only [`EventMetadata`] ever changes),
//! - atomic create-if-absent on a violation's `dedup_key`,
//! - atomic policy lifecycle transitions that keep at most one active
//!   version per policy name,
//! - `(stream, position)` uniqueness for chain links.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use comply_core::{
    ActionLogEntry, ChainLink, Event, EventMetadata, NewViolation, QualifyingHit, ScorerArtifact,
    SignatureRecord, SignatureRotation, Violation,
};
use comply_rules::lifecycle::ApprovalRecord;
use comply_rules::schema::Policy;
use comply_rules::threshold::Window;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;

/// An event body together with its mutable side record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    pub event: Event,
    pub metadata: EventMetadata,
}

/// A stream whose chain failed verification. Signing stays halted until an
/// operator clears it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamHalt {
    pub stream: String,
    pub position: u64,
    pub reason: String,
    pub halted_at: DateTime<Utc>,
}

/// Result of [`ComplianceStore::create_violation_if_absent`].
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Violation),
    /// Another evaluator already committed this dedup key.
    Existing(Violation),
}

impl CreateOutcome {
    pub fn violation(&self) -> &Violation {
        match self {
            CreateOutcome::Created(v) | CreateOutcome::Existing(v) => v,
        }
    }

    pub fn into_violation(self) -> Violation {
        match self {
            CreateOutcome::Created(v) | CreateOutcome::Existing(v) => v,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

#[async_trait]
pub trait ComplianceStore: Send + Sync {
    // ── Policies ─────────────────────────────────────────────

    /// Insert a new `(name, version)`. Existing versions are never overwritten.
    async fn save_policy(&self, policy: &Policy) -> StoreResult<()>;

    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<Policy>>;

    async fn find_policy(&self, name: &str, version: &str) -> StoreResult<Option<Policy>>;

    /// All versions, ordered by name then creation time.
    async fn list_policies(&self) -> StoreResult<Vec<Policy>>;

    async fn active_policies(&self) -> StoreResult<Vec<Policy>>;

    /// Apply `record` atomically: the policy must still be in
    /// `record.from_state`, and moving to `active` requires that no other
    /// version of the same name is active. The approval record is appended
    /// in the same step.
    async fn transition_policy(&self, record: &ApprovalRecord) -> StoreResult<Policy>;

    async fn approvals(&self, policy_id: Uuid) -> StoreResult<Vec<ApprovalRecord>>;

    // ── Events & chain metadata ──────────────────────────────

    /// Persist an immutable event body and its fresh `ingested` metadata.
    async fn append_event(&self, event: &Event) -> StoreResult<EventMetadata>;

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<StoredEvent>>;

    /// Every event of a stream: linked events by position, then unlinked
    /// ones by ingestion time.
    async fn events_for_stream(&self, stream: &str) -> StoreResult<Vec<StoredEvent>>;

    /// A subject's events with `timestamp` inside `window`, oldest first.
    async fn events_for_subject(&self, subject: &str, window: Window) -> StoreResult<Vec<Event>>;

    async fn count_events(&self, subject: &str, window: Window) -> StoreResult<u64>;

    /// The highest-position link of a stream.
    async fn chain_head(&self, stream: &str) -> StoreResult<Option<ChainLink>>;

    /// Attach a chain link and move the event to `hashed`. Fails with
    /// `Conflict` unless `link` extends the current head of the stream.
    async fn record_link(&self, event_id: Uuid, link: &ChainLink) -> StoreResult<EventMetadata>;

    /// Attach a signature to a `hashed` event. Returns `false` without
    /// writing when the event is already signed.
    async fn record_signature(&self, event_id: Uuid, signature: &SignatureRecord) -> StoreResult<bool>;

    /// Replace the signature of a signed event, provided it still equals
    /// `rotation.previous`, and append `rotation` to the event's rotation
    /// history in the same step. Returns `false` when the stored signature
    /// no longer matches.
    async fn rotate_signature(&self, rotation: &SignatureRotation) -> StoreResult<bool>;

    /// Rotation history of one event, oldest first.
    async fn signature_rotations(&self, event_id: Uuid) -> StoreResult<Vec<SignatureRotation>>;

    /// Signed events whose signature carries `key_id`, ordered by stream and
    /// position. Halted streams are left out.
    async fn events_signed_by(&self, key_id: &str, limit: usize) -> StoreResult<Vec<StoredEvent>>;

    /// Events not yet signed, ordered by stream and chain order.
    async fn unsigned_events(&self, limit: usize) -> StoreResult<Vec<StoredEvent>>;

    async fn mark_processed(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// Events whose synthesis has not completed, oldest ingestion first.
    async fn unprocessed_events(&self, limit: usize) -> StoreResult<Vec<Event>>;

    async fn halt_stream(&self, halt: &StreamHalt) -> StoreResult<()>;

    async fn stream_halt(&self, stream: &str) -> StoreResult<Option<StreamHalt>>;

    async fn clear_halt(&self, stream: &str) -> StoreResult<bool>;

    // ── Qualifying hits ──────────────────────────────────────

    /// Idempotent on `(control_key, event_id)`.
    async fn record_hit(&self, hit: &QualifyingHit) -> StoreResult<bool>;

    async fn count_hits(&self, control_key: &str, subject: &str, window: Window) -> StoreResult<u64>;

    // ── Violations ───────────────────────────────────────────

    /// Atomic create-if-absent keyed on `new.dedup_key`. Losing a race is
    /// reported as `Existing`, never as an error.
    async fn create_violation_if_absent(&self, new: &NewViolation) -> StoreResult<CreateOutcome>;

    async fn get_violation(&self, id: Uuid) -> StoreResult<Option<Violation>>;

    async fn violation_by_dedup_key(&self, dedup_key: &str) -> StoreResult<Option<Violation>>;

    /// A subject's violations created at or after `since`, newest first.
    async fn violations_for_subject(
        &self,
        subject: &str,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Violation>>;

    /// Violations created inside `[from, to]`, oldest first.
    async fn violations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Violation>>;

    /// Append `entry` and update the denormalized resolution in one step.
    /// Fails with `Conflict` if the violation is no longer in
    /// `entry.from_state`.
    async fn apply_violation_action(&self, entry: &ActionLogEntry) -> StoreResult<Violation>;

    async fn action_log(&self, violation_id: Uuid) -> StoreResult<Vec<ActionLogEntry>>;

    // ── Scorer artifacts ─────────────────────────────────────

    /// Register an artifact. Re-registering an identical `(name, version,
    /// sha256)` is a no-op; a different hash for the same version conflicts.
    async fn register_artifact(&self, artifact: &ScorerArtifact) -> StoreResult<ScorerArtifact>;

    async fn get_artifact(&self, name: &str, version: &str) -> StoreResult<Option<ScorerArtifact>>;
}
