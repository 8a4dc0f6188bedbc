//! In-process [`ComplianceStore`] used by tests, the CLI's dry runs and
//! single-node deployments without PostgreSQL.
//!
//! All state sits behind one `tokio::sync::RwLock`, so every trait method is
//! atomic with respect to every other. Events and qualifying hits are also
//! kept in ordered `(subject, timestamp)` sets, so window counts are range
//! scans. [`MemoryStore::set_available`] lets tests simulate an outage.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use comply_core::{
    ActionLogEntry, ChainLink, ChainState, Event, EventMetadata, NewViolation, QualifyingHit,
    ScorerArtifact, SignatureRecord, SignatureRotation, Violation,
};
use comply_rules::lifecycle::{ApprovalRecord, LifecycleError, LifecycleState};
use comply_rules::schema::Policy;
use comply_rules::threshold::Window;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{ComplianceStore, CreateOutcome, StoredEvent, StreamHalt};

#[derive(Default)]
struct Inner {
    policies: BTreeMap<Uuid, Policy>,
    approvals: Vec<ApprovalRecord>,
    events: HashMap<Uuid, Event>,
    metadata: HashMap<Uuid, EventMetadata>,
    /// Ingestion order, for stable tie-breaking.
    order: Vec<Uuid>,
    /// `(subject, timestamp, event id)`.
    events_by_subject: BTreeSet<(String, DateTime<Utc>, Uuid)>,
    halts: HashMap<String, StreamHalt>,
    rotations: Vec<SignatureRotation>,
    hits: HashMap<(String, Uuid), QualifyingHit>,
    /// `(control key, subject, timestamp, event id)`.
    hits_by_subject: BTreeSet<(String, String, DateTime<Utc>, Uuid)>,
    violations: HashMap<Uuid, Violation>,
    by_dedup_key: HashMap<String, Uuid>,
    actions: Vec<ActionLogEntry>,
    artifacts: HashMap<(String, String), ScorerArtifact>,
}

impl Inner {
    fn stored(&self, id: &Uuid) -> Option<StoredEvent> {
        Some(StoredEvent {
            event: self.events.get(id)?.clone(),
            metadata: self.metadata.get(id)?.clone(),
        })
    }

    /// `(position, ingestion index)` sort key; unlinked events sort last.
    fn chain_order(&self) -> HashMap<Uuid, (u64, usize)> {
        self.order
            .iter()
            .enumerate()
            .map(|(idx, id)| {
                let pos = self
                    .metadata
                    .get(id)
                    .and_then(|m| m.link.as_ref())
                    .map(|l| l.position)
                    .unwrap_or(u64::MAX);
                (*id, (pos, idx))
            })
            .collect()
    }

    /// Ids of `subject`'s events inside `window`, oldest first.
    fn subject_events(&self, subject: &str, window: Window) -> impl Iterator<Item = &Uuid> + '_ {
        let lo = (subject.to_string(), window.start, Uuid::nil());
        let hi = (subject.to_string(), window.end, Uuid::from_u128(u128::MAX));
        self.events_by_subject.range(lo..=hi).map(|(_, _, id)| id)
    }

    fn head(&self, stream: &str) -> Option<ChainLink> {
        self.metadata
            .values()
            .filter(|m| m.stream == stream)
            .filter_map(|m| m.link.as_ref())
            .max_by_key(|l| l.position)
            .cloned()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a simulated outage. While unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Replace a stored event body in place.
    ///
    /// Exists only to exercise tamper detection; no production path mutates
    /// event bodies.
    pub async fn overwrite_event_body(&self, event: Event) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let Some(old) = inner.events.get(&event.id).map(|e| (e.subject.clone(), e.timestamp)) else {
            return Err(StoreError::NotFound(format!("event {}", event.id)));
        };
        inner.events_by_subject.remove(&(old.0, old.1, event.id));
        inner.events.insert(event.id, event.clone());
        inner
            .events_by_subject
            .insert((event.subject, event.timestamp, event.id));
        Ok(())
    }

    pub async fn violation_count(&self) -> usize {
        self.inner.read().await.violations.len()
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ComplianceStore for MemoryStore {
    async fn save_policy(&self, policy: &Policy) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if inner.policies.contains_key(&policy.id)
            || inner
                .policies
                .values()
                .any(|p| p.name == policy.name && p.version == policy.version)
        {
            return Err(StoreError::Conflict(format!(
                "policy {}@{} already exists",
                policy.name, policy.version
            )));
        }
        inner.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<Policy>> {
        self.check()?;
        Ok(self.inner.read().await.policies.get(&id).cloned())
    }

    async fn find_policy(&self, name: &str, version: &str) -> StoreResult<Option<Policy>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .policies
            .values()
            .find(|p| p.name == name && p.version == version)
            .cloned())
    }

    async fn list_policies(&self) -> StoreResult<Vec<Policy>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut all: Vec<Policy> = inner.policies.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(all)
    }

    async fn active_policies(&self) -> StoreResult<Vec<Policy>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut active: Vec<Policy> = inner
            .policies
            .values()
            .filter(|p| p.lifecycle == LifecycleState::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(active)
    }

    async fn transition_policy(&self, record: &ApprovalRecord) -> StoreResult<Policy> {
        self.check()?;
        let mut inner = self.inner.write().await;

        let (name, current) = match inner.policies.get(&record.policy_id) {
            Some(p) => (p.name.clone(), p.lifecycle),
            None => return Err(StoreError::NotFound(format!("policy {}", record.policy_id))),
        };
        if current != record.from_state {
            return Err(LifecycleError::Conflict {
                expected: record.from_state,
                found: current,
            }
            .into());
        }
        if record.to_state == LifecycleState::Active {
            if let Some(other) = inner.policies.values().find(|p| {
                p.name == name && p.id != record.policy_id && p.lifecycle == LifecycleState::Active
            }) {
                return Err(LifecycleError::NameAlreadyActive {
                    name,
                    active: other.id,
                }
                .into());
            }
        }

        inner.approvals.push(record.clone());
        let policy = inner
            .policies
            .get_mut(&record.policy_id)
            .ok_or_else(|| StoreError::NotFound(format!("policy {}", record.policy_id)))?;
        policy.lifecycle = record.to_state;
        Ok(policy.clone())
    }

    async fn approvals(&self, policy_id: Uuid) -> StoreResult<Vec<ApprovalRecord>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .approvals
            .iter()
            .filter(|a| a.policy_id == policy_id)
            .cloned()
            .collect())
    }

    async fn append_event(&self, event: &Event) -> StoreResult<EventMetadata> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if inner.events.contains_key(&event.id) {
            return Err(StoreError::Conflict(format!("event {} already stored", event.id)));
        }
        let meta = EventMetadata::new(event.id, event.stream());
        inner.events.insert(event.id, event.clone());
        inner.metadata.insert(event.id, meta.clone());
        inner.order.push(event.id);
        inner
            .events_by_subject
            .insert((event.subject.clone(), event.timestamp, event.id));
        Ok(meta)
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<StoredEvent>> {
        self.check()?;
        Ok(self.inner.read().await.stored(&id))
    }

    async fn events_for_stream(&self, stream: &str) -> StoreResult<Vec<StoredEvent>> {
        self.check()?;
        let inner = self.inner.read().await;
        let order = inner.chain_order();
        let mut out: Vec<StoredEvent> = inner
            .order
            .iter()
            .filter(|id| inner.metadata.get(id).map_or(false, |m| m.stream == stream))
            .filter_map(|id| inner.stored(id))
            .collect();
        out.sort_by_key(|s| order.get(&s.event.id).copied().unwrap_or((u64::MAX, usize::MAX)));
        Ok(out)
    }

    async fn events_for_subject(&self, subject: &str, window: Window) -> StoreResult<Vec<Event>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .subject_events(subject, window)
            .filter_map(|id| inner.events.get(id).cloned())
            .collect())
    }

    async fn count_events(&self, subject: &str, window: Window) -> StoreResult<u64> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.subject_events(subject, window).count() as u64)
    }

    async fn chain_head(&self, stream: &str) -> StoreResult<Option<ChainLink>> {
        self.check()?;
        Ok(self.inner.read().await.head(stream))
    }

    async fn record_link(&self, event_id: Uuid, link: &ChainLink) -> StoreResult<EventMetadata> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let stream = match inner.metadata.get(&event_id) {
            Some(m) if m.link.is_some() => {
                return Err(StoreError::Conflict(format!("event {} is already linked", event_id)))
            }
            Some(m) => m.stream.clone(),
            None => return Err(StoreError::NotFound(format!("event {}", event_id))),
        };

        let (expected_pos, expected_prev) = match inner.head(&stream) {
            Some(head) => (head.position + 1, Some(head.content_hash)),
            None => (1, None),
        };
        let extends_head = link.position == expected_pos
            && expected_prev.as_deref().map_or(true, |h| h == link.prev_hash);
        if !extends_head {
            return Err(StoreError::Conflict(format!(
                "link at position {} does not extend head of stream '{}'",
                link.position, stream
            )));
        }

        let meta = inner
            .metadata
            .get_mut(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event_id)))?;
        meta.link = Some(link.clone());
        meta.state = ChainState::Hashed;
        Ok(meta.clone())
    }

    async fn record_signature(&self, event_id: Uuid, signature: &SignatureRecord) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let meta = inner
            .metadata
            .get_mut(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event_id)))?;
        match meta.state {
            ChainState::Signed => Ok(false),
            ChainState::Ingested => Err(StoreError::Conflict(format!(
                "event {} must be hashed before signing",
                event_id
            ))),
            ChainState::Hashed => {
                meta.signature = Some(signature.clone());
                meta.state = ChainState::Signed;
                Ok(true)
            }
        }
    }

    async fn rotate_signature(&self, rotation: &SignatureRotation) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let meta = inner
            .metadata
            .get_mut(&rotation.event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", rotation.event_id)))?;
        if meta.state != ChainState::Signed || meta.signature.as_ref() != Some(&rotation.previous) {
            return Ok(false);
        }
        meta.signature = Some(rotation.current.clone());
        inner.rotations.push(rotation.clone());
        Ok(true)
    }

    async fn signature_rotations(&self, event_id: Uuid) -> StoreResult<Vec<SignatureRotation>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .rotations
            .iter()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn events_signed_by(&self, key_id: &str, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut signed: Vec<StoredEvent> = inner
            .metadata
            .values()
            .filter(|m| m.signature.as_ref().map_or(false, |s| s.key_id == key_id))
            .filter(|m| !inner.halts.contains_key(&m.stream))
            .filter_map(|m| inner.stored(&m.event_id))
            .collect();
        signed.sort_by(|a, b| {
            let pos = |s: &StoredEvent| s.metadata.link.as_ref().map_or(u64::MAX, |l| l.position);
            a.metadata.stream.cmp(&b.metadata.stream).then(pos(a).cmp(&pos(b)))
        });
        signed.truncate(limit);
        Ok(signed)
    }

    async fn unsigned_events(&self, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        self.check()?;
        let inner = self.inner.read().await;
        let order = inner.chain_order();
        let mut pending: Vec<StoredEvent> = inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .metadata
                    .get(id)
                    .map_or(false, |m| m.state != ChainState::Signed)
            })
            .filter_map(|id| inner.stored(id))
            .collect();
        pending.sort_by(|a, b| {
            a.metadata.stream.cmp(&b.metadata.stream).then_with(|| {
                let ka = order.get(&a.event.id).copied().unwrap_or((u64::MAX, usize::MAX));
                let kb = order.get(&b.event.id).copied().unwrap_or((u64::MAX, usize::MAX));
                ka.cmp(&kb)
            })
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let meta = inner
            .metadata
            .get_mut(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event_id)))?;
        if !meta.processed {
            meta.processed = true;
            meta.processed_at = Some(at);
        }
        Ok(())
    }

    async fn unprocessed_events(&self, limit: usize) -> StoreResult<Vec<Event>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter(|id| inner.metadata.get(id).map_or(false, |m| !m.processed))
            .filter_map(|id| inner.events.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn halt_stream(&self, halt: &StreamHalt) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.write().await;
        inner
            .halts
            .entry(halt.stream.clone())
            .or_insert_with(|| halt.clone());
        Ok(())
    }

    async fn stream_halt(&self, stream: &str) -> StoreResult<Option<StreamHalt>> {
        self.check()?;
        Ok(self.inner.read().await.halts.get(stream).cloned())
    }

    async fn clear_halt(&self, stream: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.inner.write().await.halts.remove(stream).is_some())
    }

    async fn record_hit(&self, hit: &QualifyingHit) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let key = (hit.control_key.clone(), hit.event_id);
        if inner.hits.contains_key(&key) {
            return Ok(false);
        }
        inner.hits.insert(key, hit.clone());
        inner.hits_by_subject.insert((
            hit.control_key.clone(),
            hit.subject.clone(),
            hit.timestamp,
            hit.event_id,
        ));
        Ok(true)
    }

    async fn count_hits(&self, control_key: &str, subject: &str, window: Window) -> StoreResult<u64> {
        self.check()?;
        let inner = self.inner.read().await;
        let lo = (control_key.to_string(), subject.to_string(), window.start, Uuid::nil());
        let hi = (
            control_key.to_string(),
            subject.to_string(),
            window.end,
            Uuid::from_u128(u128::MAX),
        );
        Ok(inner.hits_by_subject.range(lo..=hi).count() as u64)
    }

    async fn create_violation_if_absent(&self, new: &NewViolation) -> StoreResult<CreateOutcome> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.by_dedup_key.get(&new.dedup_key) {
            if let Some(existing) = inner.violations.get(id) {
                debug!(dedup_key = %new.dedup_key, "violation already exists");
                return Ok(CreateOutcome::Existing(existing.clone()));
            }
        }
        let violation = Violation::from_new(new.clone(), Uuid::new_v4(), Utc::now());
        inner
            .by_dedup_key
            .insert(violation.dedup_key.clone(), violation.id);
        inner.violations.insert(violation.id, violation.clone());
        Ok(CreateOutcome::Created(violation))
    }

    async fn get_violation(&self, id: Uuid) -> StoreResult<Option<Violation>> {
        self.check()?;
        Ok(self.inner.read().await.violations.get(&id).cloned())
    }

    async fn violation_by_dedup_key(&self, dedup_key: &str) -> StoreResult<Option<Violation>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .by_dedup_key
            .get(dedup_key)
            .and_then(|id| inner.violations.get(id))
            .cloned())
    }

    async fn violations_for_subject(
        &self,
        subject: &str,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Violation>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut out: Vec<Violation> = inner
            .violations
            .values()
            .filter(|v| v.subject == subject)
            .filter(|v| since.map_or(true, |s| v.created_at >= s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn violations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Violation>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut out: Vec<Violation> = inner
            .violations
            .values()
            .filter(|v| v.created_at >= from && v.created_at <= to)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn apply_violation_action(&self, entry: &ActionLogEntry) -> StoreResult<Violation> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let violation = inner
            .violations
            .get_mut(&entry.violation_id)
            .ok_or_else(|| StoreError::NotFound(format!("violation {}", entry.violation_id)))?;
        if violation.resolution != entry.from_state {
            return Err(StoreError::Conflict(format!(
                "violation {} is {}, expected {}",
                violation.id,
                violation.resolution.as_str(),
                entry.from_state.as_str()
            )));
        }
        violation.resolution = entry.to_state;
        let updated = violation.clone();
        inner.actions.push(entry.clone());
        Ok(updated)
    }

    async fn action_log(&self, violation_id: Uuid) -> StoreResult<Vec<ActionLogEntry>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .actions
            .iter()
            .filter(|a| a.violation_id == violation_id)
            .cloned()
            .collect())
    }

    async fn register_artifact(&self, artifact: &ScorerArtifact) -> StoreResult<ScorerArtifact> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let key = (artifact.name.clone(), artifact.version.clone());
        if let Some(existing) = inner.artifacts.get(&key) {
            if existing.sha256 != artifact.sha256 {
                return Err(StoreError::Conflict(format!(
                    "artifact {}@{} already registered with a different hash",
                    artifact.name, artifact.version
                )));
            }
            return Ok(existing.clone());
        }
        inner.artifacts.insert(key, artifact.clone());
        Ok(artifact.clone())
    }

    async fn get_artifact(&self, name: &str, version: &str) -> StoreResult<Option<ScorerArtifact>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner
            .artifacts
            .get(&(name.to_string(), version.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use comply_core::{
        DetailMap, EventSnapshot, EvidenceSnapshot, NewEvent, ResolutionState, Severity,
        ViolationAction,
    };
    use comply_rules::lifecycle::Transition;
    use comply_rules::schema::PolicyMetadata;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn event(subject: &str, hour: u32) -> Event {
        NewEvent::new("login", "idp", subject, ts(hour), DetailMap::new())
            .into_event(Uuid::new_v4(), ts(hour))
    }

    fn policy(name: &str, version: &str, lifecycle: LifecycleState) -> Policy {
        Policy {
            id: Uuid::new_v4(),
            name: name.into(),
            version: version.into(),
            lifecycle,
            metadata: PolicyMetadata {
                name: name.into(),
                version: version.into(),
                description: None,
                owner: None,
                notification_channel: None,
                sla_hours: None,
                tags: None,
            },
            controls: vec![],
            created_at: Utc::now(),
        }
    }

    fn record(policy: &Policy, transition: Transition) -> ApprovalRecord {
        let (from_state, to_state) = transition.edge();
        ApprovalRecord {
            id: Uuid::new_v4(),
            policy_id: policy.id,
            transition,
            from_state,
            to_state,
            approver: "lead".into(),
            justification: "reviewed".into(),
            at: Utc::now(),
        }
    }

    fn new_violation(key: &str, ev: &Event) -> NewViolation {
        NewViolation {
            dedup_key: key.into(),
            policy_id: Uuid::new_v4(),
            policy_name: "p".into(),
            policy_version: "1".into(),
            control_id: "c".into(),
            rule: None,
            subject: ev.subject.clone(),
            severity: Severity::High,
            bucket_start: ev.timestamp,
            triggering_event: ev.id,
            evidence: EvidenceSnapshot {
                event: EventSnapshot::from(ev),
                explanation: serde_json::json!({}),
                threshold: None,
                control: serde_json::json!({}),
                captured_at: Utc::now(),
            },
        }
    }

    fn link(position: u64, prev: &str, hash: &str) -> ChainLink {
        ChainLink {
            position,
            prev_hash: prev.into(),
            content_hash: hash.into(),
            hashed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn policy_versions_are_immutable_rows() {
        let store = MemoryStore::new();
        let p = policy("opsec", "1", LifecycleState::Draft);
        store.save_policy(&p).await.unwrap();
        let dup = policy("opsec", "1", LifecycleState::Draft);
        assert!(matches!(store.save_policy(&dup).await, Err(StoreError::Conflict(_))));
        assert_eq!(store.find_policy("opsec", "1").await.unwrap().unwrap().id, p.id);
    }

    #[tokio::test]
    async fn only_one_active_version_per_name() {
        let store = MemoryStore::new();
        let v1 = policy("opsec", "1", LifecycleState::Active);
        let v2 = policy("opsec", "2", LifecycleState::Review);
        store.save_policy(&v1).await.unwrap();
        store.save_policy(&v2).await.unwrap();

        let err = store
            .transition_policy(&record(&v2, Transition::Approve))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Lifecycle(LifecycleError::NameAlreadyActive { active, .. }) if active == v1.id
        ));

        store.transition_policy(&record(&v1, Transition::Retire)).await.unwrap();
        let activated = store
            .transition_policy(&record(&v2, Transition::Approve))
            .await
            .unwrap();
        assert_eq!(activated.lifecycle, LifecycleState::Active);
        assert_eq!(store.active_policies().await.unwrap().len(), 1);
        assert_eq!(store.approvals(v2.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_transition_conflicts() {
        let store = MemoryStore::new();
        let p = policy("opsec", "1", LifecycleState::Draft);
        store.save_policy(&p).await.unwrap();
        store.transition_policy(&record(&p, Transition::Submit)).await.unwrap();
        let err = store
            .transition_policy(&record(&p, Transition::Submit))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Lifecycle(LifecycleError::Conflict { .. })));
        assert_eq!(store.approvals(p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn links_must_extend_the_head() {
        let store = MemoryStore::new();
        let a = event("u1", 1);
        let b = event("u1", 2);
        store.append_event(&a).await.unwrap();
        store.append_event(&b).await.unwrap();

        store.record_link(a.id, &link(1, "00", "h1")).await.unwrap();
        assert!(matches!(
            store.record_link(b.id, &link(1, "00", "h2")).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.record_link(b.id, &link(2, "wrong", "h2")).await,
            Err(StoreError::Conflict(_))
        ));
        store.record_link(b.id, &link(2, "h1", "h2")).await.unwrap();
        assert_eq!(store.chain_head("u1").await.unwrap().unwrap().content_hash, "h2");

        let stream = store.events_for_stream("u1").await.unwrap();
        assert_eq!(stream[0].event.id, a.id);
        assert_eq!(stream[1].metadata.state, ChainState::Hashed);
    }

    #[tokio::test]
    async fn signing_is_idempotent() {
        let store = MemoryStore::new();
        let a = event("u1", 1);
        store.append_event(&a).await.unwrap();
        let sig = SignatureRecord {
            algorithm: "hmac-sha256".into(),
            key_id: "k".into(),
            value: "ab".into(),
            signed_at: Utc::now(),
        };
        assert!(store.record_signature(a.id, &sig).await.is_err());
        store.record_link(a.id, &link(1, "00", "h1")).await.unwrap();
        assert!(store.record_signature(a.id, &sig).await.unwrap());
        assert!(!store.record_signature(a.id, &sig).await.unwrap());
        assert!(store.unsigned_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rotation_swaps_only_the_expected_signature() {
        let store = MemoryStore::new();
        let a = event("u1", 1);
        store.append_event(&a).await.unwrap();
        store.record_link(a.id, &link(1, "00", "h1")).await.unwrap();
        let old = SignatureRecord {
            algorithm: "hmac-sha256".into(),
            key_id: "k1".into(),
            value: "ab".into(),
            signed_at: Utc::now(),
        };
        store.record_signature(a.id, &old).await.unwrap();
        assert_eq!(store.events_signed_by("k1", 10).await.unwrap().len(), 1);

        let rotation = SignatureRotation {
            event_id: a.id,
            previous: old.clone(),
            current: SignatureRecord {
                key_id: "k2".into(),
                value: "cd".into(),
                ..old.clone()
            },
            rotated_at: Utc::now(),
        };
        assert!(store.rotate_signature(&rotation).await.unwrap());
        assert!(!store.rotate_signature(&rotation).await.unwrap());

        let stored = store.get_event(a.id).await.unwrap().unwrap();
        assert_eq!(stored.metadata.signature.unwrap().key_id, "k2");
        assert!(store.events_signed_by("k1", 10).await.unwrap().is_empty());
        assert_eq!(store.events_signed_by("k2", 10).await.unwrap().len(), 1);

        let history = store.signature_rotations(a.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous.key_id, "k1");

        store
            .halt_stream(&StreamHalt {
                stream: stored.metadata.stream.clone(),
                position: 1,
                reason: "test".into(),
                halted_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(store.events_signed_by("k2", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_counts() {
        let store = MemoryStore::new();
        for h in [1, 5, 9] {
            store.append_event(&event("u1", h)).await.unwrap();
        }
        store.append_event(&event("u2", 5)).await.unwrap();
        let window = Window {
            start: ts(4),
            end: ts(9),
        };
        assert_eq!(store.count_events("u1", window).await.unwrap(), 2);
        assert_eq!(store.events_for_subject("u1", window).await.unwrap()[0].timestamp, ts(5));

        let hit = QualifyingHit {
            control_key: "p/c".into(),
            subject: "u1".into(),
            event_id: Uuid::new_v4(),
            timestamp: ts(5),
        };
        assert!(store.record_hit(&hit).await.unwrap());
        assert!(!store.record_hit(&hit).await.unwrap());
        assert_eq!(store.count_hits("p/c", "u1", window).await.unwrap(), 1);
        assert_eq!(store.count_hits("p/c", "u2", window).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn window_bounds_are_inclusive_and_per_subject() {
        let store = MemoryStore::new();
        let mut at_four = Vec::new();
        for _ in 0..3 {
            let ev = event("u1", 4);
            at_four.push(ev.id);
            store.append_event(&ev).await.unwrap();
        }
        store.append_event(&event("u1", 3)).await.unwrap();
        store.append_event(&event("u1", 6)).await.unwrap();
        store.append_event(&event("u10", 4)).await.unwrap();
        store.append_event(&event("u", 5)).await.unwrap();

        let window = Window {
            start: ts(4),
            end: ts(6),
        };
        assert_eq!(store.count_events("u1", window).await.unwrap(), 4);
        let events = store.events_for_subject("u1", window).await.unwrap();
        let ids: Vec<Uuid> = events.iter().take(3).map(|e| e.id).collect();
        at_four.sort();
        assert_eq!(ids, at_four);
        assert_eq!(events[3].timestamp, ts(6));
        assert_eq!(store.count_events("u10", window).await.unwrap(), 1);
        assert_eq!(store.count_events("u", window).await.unwrap(), 1);

        for (key, subject, hour) in [("p/c", "u1", 4), ("p/c", "u1", 7), ("p/c2", "u1", 5), ("p/c", "u10", 5)] {
            let hit = QualifyingHit {
                control_key: key.into(),
                subject: subject.into(),
                event_id: Uuid::new_v4(),
                timestamp: ts(hour),
            };
            store.record_hit(&hit).await.unwrap();
        }
        assert_eq!(store.count_hits("p/c", "u1", window).await.unwrap(), 1);
        assert_eq!(store.count_hits("p/c2", "u1", window).await.unwrap(), 1);
        assert_eq!(store.count_hits("p/c", "u10", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn tampered_body_moves_in_the_subject_index() {
        let store = MemoryStore::new();
        let mut ev = event("u1", 5);
        store.append_event(&ev).await.unwrap();
        ev.subject = "u2".into();
        store.overwrite_event_body(ev.clone()).await.unwrap();

        let window = Window {
            start: ts(0),
            end: ts(23),
        };
        assert_eq!(store.count_events("u1", window).await.unwrap(), 0);
        assert_eq!(store.count_events("u2", window).await.unwrap(), 1);

        let missing = event("u3", 1);
        assert!(matches!(
            store.overwrite_event_body(missing).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn dedup_key_is_create_if_absent() {
        let store = MemoryStore::new();
        let ev = event("u1", 3);
        let first = store
            .create_violation_if_absent(&new_violation("k1", &ev))
            .await
            .unwrap();
        let second = store
            .create_violation_if_absent(&new_violation("k1", &ev))
            .await
            .unwrap();
        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.violation().id, second.violation().id);
        assert_eq!(store.violation_count().await, 1);
    }

    #[tokio::test]
    async fn action_log_drives_resolution() {
        let store = MemoryStore::new();
        let ev = event("u1", 3);
        let v = store
            .create_violation_if_absent(&new_violation("k1", &ev))
            .await
            .unwrap()
            .into_violation();

        let entry = ActionLogEntry {
            id: Uuid::new_v4(),
            violation_id: v.id,
            action: ViolationAction::Resolve,
            from_state: ResolutionState::Open,
            to_state: ResolutionState::Resolved,
            actor: "analyst".into(),
            note: None,
            at: Utc::now(),
        };
        let updated = store.apply_violation_action(&entry).await.unwrap();
        assert!(updated.is_resolved());
        assert!(matches!(
            store.apply_violation_action(&entry).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.action_log(v.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn outage_toggle() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.append_event(&event("u1", 1)).await.unwrap_err();
        assert!(err.is_retryable());
        store.set_available(true);
        assert!(store.append_event(&event("u1", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn artifacts_conflict_on_different_hash() {
        let store = MemoryStore::new();
        let a = ScorerArtifact {
            name: "weighted-risk".into(),
            version: "1".into(),
            sha256: "aa".into(),
            config: serde_json::json!({}),
            created_at: Utc::now(),
        };
        store.register_artifact(&a).await.unwrap();
        store.register_artifact(&a).await.unwrap();
        let mut b = a.clone();
        b.sha256 = "bb".into();
        assert!(store.register_artifact(&b).await.is_err());
    }
}
