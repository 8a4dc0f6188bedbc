//! Violation Synthesizer.
//!
//! Turns a matched control into a [`NewViolation`] with a deterministic
//! dedup key, then commits candidates through the store's atomic
//! create-if-absent. Losing a race to another evaluator counts as success.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use comply_core::{ComplyError, Event, EventSnapshot, EvidenceSnapshot, NewViolation};
use comply_rules::evaluator::{CompiledControl, ControlOutcome};
use comply_rules::schema::{ControlSpec, Policy};
use comply_rules::threshold::ThresholdDecision;
use comply_storage::{ComplianceStore, CreateOutcome};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Start of the fixed-width bucket containing `ts`, aligned to the Unix epoch.
pub fn bucket_start(ts: DateTime<Utc>, width_secs: u64) -> DateTime<Utc> {
    let width = i64::try_from(width_secs.max(1)).unwrap_or(i64::MAX);
    let secs = ts.timestamp();
    let start = secs - secs.rem_euclid(width);
    Utc.timestamp_opt(start, 0).single().unwrap_or(ts)
}

/// `sha256("{control_key}|{subject}|{bucket_start_epoch}")`, hex-encoded.
pub fn dedup_key(control_key: &str, subject: &str, bucket_start: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", control_key, subject, bucket_start.timestamp()).as_bytes());
    hex::encode(hasher.finalize())
}

pub struct ViolationSynthesizer {
    store: Arc<dyn ComplianceStore>,
    default_bucket_secs: u64,
}

impl ViolationSynthesizer {
    pub fn new(store: Arc<dyn ComplianceStore>, default_bucket_secs: u64) -> Self {
        Self {
            store,
            default_bucket_secs,
        }
    }

    /// Threshold-gated controls bucket by their window; the rest use the
    /// configured default.
    pub fn bucket_width(&self, control: &ControlSpec) -> u64 {
        control
            .threshold
            .as_ref()
            .map(|t| t.window_secs())
            .filter(|w| *w > 0)
            .unwrap_or(self.default_bucket_secs)
    }

    /// Build the candidate for a matched control, freezing its evidence.
    pub fn candidate(
        &self,
        policy: &Policy,
        control: &CompiledControl,
        event: &Event,
        outcome: &ControlOutcome,
        decision: Option<&ThresholdDecision>,
    ) -> Result<NewViolation, ComplyError> {
        let spec = control.spec();
        let bucket = bucket_start(event.timestamp, self.bucket_width(spec));
        let key = dedup_key(control.key(), &event.subject, bucket);

        let evidence = EvidenceSnapshot {
            event: EventSnapshot::from(event),
            explanation: to_json(&outcome.explanation)?,
            threshold: decision.map(to_json).transpose()?,
            control: to_json(spec)?,
            captured_at: Utc::now(),
        };

        Ok(NewViolation {
            dedup_key: key,
            policy_id: policy.id,
            policy_name: policy.name.clone(),
            policy_version: policy.version.clone(),
            control_id: spec.id.clone(),
            rule: outcome.deciding_rule.clone(),
            subject: event.subject.clone(),
            severity: control.severity(),
            bucket_start: bucket,
            triggering_event: event.id,
            evidence,
        })
    }

    /// Commit candidates in dedup-key order, one create-if-absent each.
    ///
    /// Duplicate keys within the batch collapse to the first candidate. A
    /// store failure aborts the remaining commits; those already made stay.
    pub async fn commit(&self, mut candidates: Vec<NewViolation>) -> Result<Vec<CreateOutcome>, ComplyError> {
        candidates.sort_by(|a, b| a.dedup_key.cmp(&b.dedup_key));
        candidates.dedup_by(|a, b| a.dedup_key == b.dedup_key);

        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let outcome = self.store.create_violation_if_absent(candidate).await?;
            match &outcome {
                CreateOutcome::Created(v) => info!(
                    violation_id = %v.id,
                    policy = %v.policy_name,
                    control = %v.control_id,
                    subject = %v.subject,
                    severity = %v.severity,
                    "violation created"
                ),
                CreateOutcome::Existing(v) => debug!(
                    violation_id = %v.id,
                    dedup_key = %v.dedup_key,
                    "violation already committed"
                ),
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ComplyError> {
    serde_json::to_value(value).map_err(|e| ComplyError::Other(format!("evidence serialization: {}", e)))
}
