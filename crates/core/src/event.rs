use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form detail map attached to every event. Keys serialize sorted.
pub type DetailMap = serde_json::Map<String, serde_json::Value>;

/// An event as submitted by a telemetry source, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewEvent {
    pub event_type: String,
    pub source: String,
    /// Subject user. Also the logical stream the event is chained into.
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detail: DetailMap,
}

impl NewEvent {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        subject: impl Into<String>,
        timestamp: DateTime<Utc>,
        detail: DetailMap,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            subject: subject.into(),
            timestamp,
            detail,
        }
    }

    /// Assign identity. Timestamps are truncated to microseconds so the body
    /// hashes identically after a round-trip through the database.
    pub fn into_event(self, id: Uuid, ingested_at: DateTime<Utc>) -> Event {
        Event {
            id,
            event_type: self.event_type,
            source: self.source,
            subject: self.subject,
            timestamp: self.timestamp.trunc_subsecs(6),
            detail: self.detail,
            ingested_at: ingested_at.trunc_subsecs(6),
        }
    }
}

/// Immutable telemetry unit. Never updated once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub source: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub detail: DetailMap,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct CanonicalBody<'a> {
    id: String,
    event_type: &'a str,
    source: &'a str,
    subject: &'a str,
    timestamp: String,
    detail: &'a DetailMap,
}

impl Event {
    /// Logical stream for hash chaining.
    pub fn stream(&self) -> &str {
        &self.subject
    }

    /// Deterministic byte encoding of the event body used for chain hashing.
    pub fn canonical_body(&self) -> Vec<u8> {
        let body = CanonicalBody {
            id: self.id.to_string(),
            event_type: &self.event_type,
            source: &self.source,
            subject: &self.subject,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            detail: &self.detail,
        };
        // Serializing plain strings and a JSON map cannot fail.
        serde_json::to_vec(&body).unwrap_or_default()
    }
}

/// Chain position of an event within its stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Ingested,
    Hashed,
    Signed,
}

impl ChainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainState::Ingested => "ingested",
            ChainState::Hashed => "hashed",
            ChainState::Signed => "signed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingested" => Some(ChainState::Ingested),
            "hashed" => Some(ChainState::Hashed),
            "signed" => Some(ChainState::Signed),
            _ => None,
        }
    }
}

/// Externally visible processing stage: `ingested → hashed → signed → processed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStage {
    Ingested,
    Hashed,
    Signed,
    Processed,
}

/// Hash linkage of an event to its predecessor in the same stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainLink {
    /// 1-based position within the stream.
    pub position: u64,
    pub prev_hash: String,
    pub content_hash: String,
    pub hashed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignatureRecord {
    pub algorithm: String,
    pub key_id: String,
    /// Hex-encoded signature bytes.
    pub value: String,
    pub signed_at: DateTime<Utc>,
}

/// A signature replaced when the signing key was rotated. The superseded
/// record is kept so its key id stays auditable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignatureRotation {
    pub event_id: Uuid,
    pub previous: SignatureRecord,
    pub current: SignatureRecord,
    pub rotated_at: DateTime<Utc>,
}

/// Mutable side record keyed 1:1 to an [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub stream: String,
    pub state: ChainState,
    pub link: Option<ChainLink>,
    pub signature: Option<SignatureRecord>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl EventMetadata {
    pub fn new(event_id: Uuid, stream: impl Into<String>) -> Self {
        Self {
            event_id,
            stream: stream.into(),
            state: ChainState::Ingested,
            link: None,
            signature: None,
            processed: false,
            processed_at: None,
        }
    }

    pub fn stage(&self) -> EventStage {
        if self.processed && self.state == ChainState::Signed {
            return EventStage::Processed;
        }
        match self.state {
            ChainState::Ingested => EventStage::Ingested,
            ChainState::Hashed => EventStage::Hashed,
            ChainState::Signed => EventStage::Signed,
        }
    }
}

/// One event that satisfied a threshold-gated control's expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualifyingHit {
    pub control_key: String,
    pub subject: String,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
}
