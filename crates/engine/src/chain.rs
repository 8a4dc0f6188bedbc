//! Event chain and signer.
//!
//! Every event of a stream (its subject) is linked to its predecessor:
//! `content_hash = sha256(canonical_body || prev_hash)`, with a genesis
//! predecessor of 64 zeros. The link and the signature over `content_hash`
//! are written to the event's metadata row, never to the event body.
//!
//! Work on one stream is serialized by a per-stream async mutex; different
//! streams proceed in parallel. Signer outages leave events `hashed` for
//! [`EventChain::sign_pending`] to finish later.
//!
//! [`EventChain::rotate_signatures`] re-signs every event signed under a
//! previous key with the current one, after checking the old signature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use comply_core::{
    ChainLink, ChainState, ComplyError, Event, EventMetadata, NewEvent, SignatureRecord,
    SignatureRotation,
};
use comply_signing::SigningProvider;
use comply_storage::{ComplianceStore, StoreError, StoredEvent, StreamHalt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Predecessor hash of the first event in every stream.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Relink attempts when another writer moved the stream head.
const LINK_ATTEMPTS: usize = 3;

/// `sha256(body || prev_hash)`, hex-encoded.
pub fn content_hash(body: &[u8], prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct StreamLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StreamLocks {
    fn get(&self, stream: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("stream lock table poisoned");
        locks
            .entry(stream.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Outcome of a [`EventChain::sign_pending`] pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SignReport {
    pub linked: usize,
    pub signed: usize,
    /// Left unsigned because the provider is unavailable.
    pub deferred: usize,
    /// Left untouched because their stream is halted.
    pub skipped: usize,
    pub halted_streams: Vec<String>,
}

/// Outcome of a successful [`EventChain::verify_stream`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChainReport {
    pub stream: String,
    pub events: usize,
    pub linked: usize,
    pub signed: usize,
    pub signatures_verified: usize,
    /// Signatures by another key, or not checkable while the provider is down.
    pub signatures_unchecked: usize,
    pub head_hash: Option<String>,
}

/// Outcome of [`EventChain::rotate_signatures`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RotationReport {
    pub previous_key_id: String,
    pub key_id: String,
    pub rotated: usize,
    /// Left under the previous key because a provider is unavailable.
    pub deferred: usize,
    pub halted_streams: Vec<String>,
}

pub struct EventChain {
    store: Arc<dyn ComplianceStore>,
    signer: Arc<dyn SigningProvider>,
    locks: StreamLocks,
}

impl EventChain {
    pub fn new(store: Arc<dyn ComplianceStore>, signer: Arc<dyn SigningProvider>) -> Self {
        Self {
            store,
            signer,
            locks: StreamLocks::default(),
        }
    }

    pub fn signer(&self) -> &Arc<dyn SigningProvider> {
        &self.signer
    }

    /// Persist a new event, then hash and sign it.
    ///
    /// Only the append can fail the call. Once the body is durable, hashing
    /// and signing are best effort and finish later through
    /// [`sign_pending`](Self::sign_pending).
    pub async fn ingest(&self, new: NewEvent) -> Result<StoredEvent, ComplyError> {
        let event = new.into_event(Uuid::new_v4(), Utc::now());
        let lock = self.locks.get(event.stream());
        let _guard = lock.lock().await;

        let metadata = self.store.append_event(&event).await?;
        info!(
            event_id = %event.id,
            stream = %metadata.stream,
            event_type = %event.event_type,
            "event ingested"
        );

        let mut stored = StoredEvent { event, metadata };
        if let Err(e) = self.advance_locked(&mut stored).await {
            match &e {
                ComplyError::SigningUnavailable(reason) => warn!(
                    event_id = %stored.event.id,
                    reason = %reason,
                    "signing deferred"
                ),
                other => warn!(
                    event_id = %stored.event.id,
                    error = %other,
                    state = stored.metadata.state.as_str(),
                    "chain step deferred"
                ),
            }
        }
        Ok(stored)
    }

    /// Hash then sign `stored`. Caller holds the stream lock.
    async fn advance_locked(&self, stored: &mut StoredEvent) -> Result<(), ComplyError> {
        if let Some(halt) = self.store.stream_halt(&stored.metadata.stream).await? {
            warn!(
                stream = %halt.stream,
                position = halt.position,
                "stream halted, event left unsigned"
            );
            return Ok(());
        }
        if stored.metadata.link.is_none() {
            stored.metadata = self.link_locked(&stored.event).await?;
        }
        if stored.metadata.state == ChainState::Hashed {
            self.sign_locked(stored).await?;
        }
        Ok(())
    }

    async fn link_locked(&self, event: &Event) -> Result<EventMetadata, ComplyError> {
        let stream = event.stream();
        let body = event.canonical_body();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let head = self.store.chain_head(stream).await?;
            let (position, prev_hash) = match head {
                Some(h) => (h.position + 1, h.content_hash),
                None => (1, GENESIS_HASH.to_string()),
            };
            let link = ChainLink {
                position,
                content_hash: content_hash(&body, &prev_hash),
                prev_hash,
                hashed_at: Utc::now(),
            };

            match self.store.record_link(event.id, &link).await {
                Ok(meta) => {
                    debug!(event_id = %event.id, stream, position, "event hashed");
                    return Ok(meta);
                }
                Err(StoreError::Conflict(reason)) if attempt < LINK_ATTEMPTS => {
                    debug!(event_id = %event.id, stream, reason = %reason, "stream head moved, relinking");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Sign a hashed event. Returns whether a signature was written.
    async fn sign_locked(&self, stored: &mut StoredEvent) -> Result<bool, ComplyError> {
        let Some(link) = stored.metadata.link.clone() else {
            return Err(ComplyError::Other(format!(
                "event {} is not hashed",
                stored.event.id
            )));
        };

        let recomputed = content_hash(&stored.event.canonical_body(), &link.prev_hash);
        if recomputed != link.content_hash {
            return Err(self
                .halt(
                    &stored.metadata.stream,
                    link.position,
                    "event body no longer matches its content hash",
                )
                .await);
        }

        let signature = self.signer.sign(link.content_hash.as_bytes()).await?;
        let record = SignatureRecord {
            algorithm: self.signer.algorithm().to_string(),
            key_id: self.signer.key_id().to_string(),
            value: hex::encode(signature),
            signed_at: Utc::now(),
        };
        let written = self.store.record_signature(stored.event.id, &record).await?;
        if written {
            debug!(event_id = %stored.event.id, position = link.position, "event signed");
            stored.metadata.state = ChainState::Signed;
            stored.metadata.signature = Some(record);
        }
        Ok(written)
    }

    /// Halt signing for `stream` and build the error to surface.
    async fn halt(&self, stream: &str, position: u64, reason: &str) -> ComplyError {
        error!(stream, position, reason, "chain integrity violation, halting stream");
        let halt = StreamHalt {
            stream: stream.to_string(),
            position,
            reason: reason.to_string(),
            halted_at: Utc::now(),
        };
        if let Err(e) = self.store.halt_stream(&halt).await {
            error!(stream, error = %e, "failed to persist stream halt");
        }
        ComplyError::ChainIntegrityViolation {
            stream: stream.to_string(),
            position,
            reason: reason.to_string(),
        }
    }

    /// Link and sign up to `limit` unsigned events in chain order.
    ///
    /// Stops at the first signer outage so no later event of a stream is
    /// signed before an earlier one. Streams that fail verification are
    /// halted and skipped.
    pub async fn sign_pending(&self, limit: usize) -> Result<SignReport, ComplyError> {
        let pending = self.store.unsigned_events(limit).await?;
        let total = pending.len();
        let mut report = SignReport::default();
        let mut visited = 0usize;

        let mut groups: Vec<(String, Vec<StoredEvent>)> = Vec::new();
        for stored in pending {
            match groups.last_mut() {
                Some((stream, events)) if *stream == stored.metadata.stream => events.push(stored),
                _ => groups.push((stored.metadata.stream.clone(), vec![stored])),
            }
        }

        'streams: for (stream, events) in groups {
            if self.store.stream_halt(&stream).await?.is_some() {
                visited += events.len();
                report.skipped += events.len();
                report.halted_streams.push(stream);
                continue;
            }

            let lock = self.locks.get(&stream);
            let _guard = lock.lock().await;
            let count = events.len();
            for (idx, pending) in events.into_iter().enumerate() {
                visited += 1;
                let Some(mut current) = self.store.get_event(pending.event.id).await? else {
                    continue;
                };
                if current.metadata.state == ChainState::Signed {
                    continue;
                }
                if current.metadata.link.is_none() {
                    current.metadata = self.link_locked(&current.event).await?;
                    report.linked += 1;
                }
                match self.sign_locked(&mut current).await {
                    Ok(true) => report.signed += 1,
                    Ok(false) => {}
                    Err(ComplyError::SigningUnavailable(reason)) => {
                        report.deferred = total - visited + 1;
                        warn!(stream = %stream, reason = %reason, deferred = report.deferred, "signer unavailable, stopping");
                        break 'streams;
                    }
                    Err(ComplyError::ChainIntegrityViolation { .. }) => {
                        let rest = count - idx - 1;
                        visited += rest;
                        report.skipped += rest + 1;
                        report.halted_streams.push(stream.clone());
                        continue 'streams;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if report.signed > 0 || report.deferred > 0 {
            info!(
                linked = report.linked,
                signed = report.signed,
                deferred = report.deferred,
                skipped = report.skipped,
                "sign_pending pass complete"
            );
        }
        Ok(report)
    }

    /// Re-sign every event signed by `previous` with the current signer,
    /// `batch` events at a time.
    ///
    /// Each old signature is verified with `previous` before it is replaced;
    /// a signature that fails, or a body that no longer hashes to its link,
    /// halts the stream and leaves it under the previous key. The replaced
    /// record is kept in the store's rotation history.
    pub async fn rotate_signatures(
        &self,
        previous: &dyn SigningProvider,
        batch: usize,
    ) -> Result<RotationReport, ComplyError> {
        if previous.key_id() == self.signer.key_id() {
            return Err(ComplyError::Config(format!(
                "rotation needs a new key id, both keys are '{}'",
                previous.key_id()
            )));
        }
        let mut report = RotationReport {
            previous_key_id: previous.key_id().to_string(),
            key_id: self.signer.key_id().to_string(),
            ..Default::default()
        };

        loop {
            let pending = self.store.events_signed_by(previous.key_id(), batch.max(1)).await?;
            if pending.is_empty() {
                break;
            }
            let (rotated, halted) = (report.rotated, report.halted_streams.len());

            let mut by_stream: Vec<(String, Vec<StoredEvent>)> = Vec::new();
            for stored in pending {
                match by_stream.last_mut() {
                    Some((stream, events)) if *stream == stored.metadata.stream => events.push(stored),
                    _ => by_stream.push((stored.metadata.stream.clone(), vec![stored])),
                }
            }
            for (stream, events) in by_stream {
                let lock = self.locks.get(&stream);
                let _guard = lock.lock().await;
                for stored in &events {
                    match self.rotate_locked(previous, stored.event.id).await {
                        Ok(true) => report.rotated += 1,
                        Ok(false) => {}
                        Err(ComplyError::SigningUnavailable(reason)) => {
                            report.deferred = self
                                .store
                                .events_signed_by(previous.key_id(), usize::MAX)
                                .await?
                                .len();
                            warn!(stream = %stream, reason = %reason, deferred = report.deferred, "signer unavailable, rotation stopped");
                            return Ok(report);
                        }
                        Err(ComplyError::ChainIntegrityViolation { .. }) => {
                            report.halted_streams.push(stream.clone());
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            if report.rotated == rotated && report.halted_streams.len() == halted {
                break;
            }
        }

        info!(
            previous_key_id = %report.previous_key_id,
            key_id = %report.key_id,
            rotated = report.rotated,
            halted = report.halted_streams.len(),
            "signature rotation complete"
        );
        Ok(report)
    }

    /// Replace one event's signature by `previous` with one by the current
    /// signer. Returns whether a signature was replaced.
    async fn rotate_locked(&self, previous: &dyn SigningProvider, event_id: Uuid) -> Result<bool, ComplyError> {
        let Some(stored) = self.store.get_event(event_id).await? else {
            return Ok(false);
        };
        let (Some(link), Some(old)) = (&stored.metadata.link, &stored.metadata.signature) else {
            return Ok(false);
        };
        if old.key_id != previous.key_id() {
            return Ok(false);
        }
        let stream = &stored.metadata.stream;

        if content_hash(&stored.event.canonical_body(), &link.prev_hash) != link.content_hash {
            return Err(self
                .halt(stream, link.position, "event body does not match content hash")
                .await);
        }
        let Ok(old_bytes) = hex::decode(&old.value) else {
            return Err(self.halt(stream, link.position, "signature is not hex").await);
        };
        match previous.verify(link.content_hash.as_bytes(), &old_bytes).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(self
                    .halt(stream, link.position, "signature does not verify under the previous key")
                    .await)
            }
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(e) => {
                let reason = format!("signature check failed: {}", e);
                return Err(self.halt(stream, link.position, &reason).await);
            }
        }

        let signature = self.signer.sign(link.content_hash.as_bytes()).await?;
        let rotation = SignatureRotation {
            event_id,
            previous: old.clone(),
            current: SignatureRecord {
                algorithm: self.signer.algorithm().to_string(),
                key_id: self.signer.key_id().to_string(),
                value: hex::encode(signature),
                signed_at: Utc::now(),
            },
            rotated_at: Utc::now(),
        };
        let rotated = self.store.rotate_signature(&rotation).await?;
        if rotated {
            debug!(event_id = %event_id, position = link.position, "signature rotated");
        }
        Ok(rotated)
    }

    /// Walk `stream` end to end: positions are gapless, every `prev_hash`
    /// matches its predecessor, every body re-hashes to its `content_hash`,
    /// and every signature by the current key verifies.
    ///
    /// The first mismatch halts the stream and fails with
    /// [`ComplyError::ChainIntegrityViolation`].
    pub async fn verify_stream(&self, stream: &str) -> Result<ChainReport, ComplyError> {
        let events = self.store.events_for_stream(stream).await?;
        let mut report = ChainReport {
            stream: stream.to_string(),
            events: events.len(),
            linked: 0,
            signed: 0,
            signatures_verified: 0,
            signatures_unchecked: 0,
            head_hash: None,
        };

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut expected_pos = 1u64;
        for stored in &events {
            let Some(link) = &stored.metadata.link else {
                continue;
            };
            if link.position != expected_pos {
                let reason = format!("gap: expected position {}, found {}", expected_pos, link.position);
                return Err(self.halt(stream, expected_pos, &reason).await);
            }
            if link.prev_hash != expected_prev {
                return Err(self
                    .halt(stream, link.position, "prev_hash does not match predecessor")
                    .await);
            }
            if content_hash(&stored.event.canonical_body(), &link.prev_hash) != link.content_hash {
                return Err(self
                    .halt(stream, link.position, "event body does not match content hash")
                    .await);
            }

            if let Some(sig) = &stored.metadata.signature {
                report.signed += 1;
                let Ok(bytes) = hex::decode(&sig.value) else {
                    return Err(self.halt(stream, link.position, "signature is not hex").await);
                };
                if sig.key_id != self.signer.key_id() {
                    report.signatures_unchecked += 1;
                } else {
                    match self.signer.verify(link.content_hash.as_bytes(), &bytes).await {
                        Ok(true) => report.signatures_verified += 1,
                        Ok(false) => {
                            return Err(self
                                .halt(stream, link.position, "signature does not verify")
                                .await)
                        }
                        Err(e) if e.is_retryable() => report.signatures_unchecked += 1,
                        Err(e) => {
                            let reason = format!("signature check failed: {}", e);
                            return Err(self.halt(stream, link.position, &reason).await);
                        }
                    }
                }
            }

            expected_prev = link.content_hash.clone();
            expected_pos += 1;
            report.linked += 1;
        }

        if report.linked > 0 {
            report.head_hash = Some(expected_prev);
        }
        info!(
            stream,
            linked = report.linked,
            verified = report.signatures_verified,
            "chain verified"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use comply_core::DetailMap;
    use comply_signing::{HmacSigner, SwitchableSigner};
    use comply_storage::MemoryStore;

    fn new_event(subject: &str, n: i64) -> NewEvent {
        let mut detail = DetailMap::new();
        detail.insert("n".into(), serde_json::json!(n));
        NewEvent::new(
            "login",
            "idp",
            subject,
            Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap(),
            detail,
        )
    }

    fn setup() -> (MemoryStore, Arc<SwitchableSigner>, EventChain) {
        let store = MemoryStore::new();
        let signer = Arc::new(SwitchableSigner::new(Arc::new(
            HmacSigner::new(vec![3u8; 32], "k1").unwrap(),
        )));
        let chain = EventChain::new(Arc::new(store.clone()), signer.clone());
        (store, signer, chain)
    }

    #[test]
    fn hash_depends_on_predecessor() {
        let a = content_hash(b"body", GENESIS_HASH);
        let b = content_hash(b"body", &a);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn events_are_linked_and_signed() {
        let (_store, _signer, chain) = setup();
        let first = chain.ingest(new_event("u1", 1)).await.unwrap();
        let second = chain.ingest(new_event("u1", 2)).await.unwrap();
        let other = chain.ingest(new_event("u2", 3)).await.unwrap();

        let l1 = first.metadata.link.unwrap();
        let l2 = second.metadata.link.unwrap();
        assert_eq!(l1.prev_hash, GENESIS_HASH);
        assert_eq!(l2.prev_hash, l1.content_hash);
        assert_eq!(l2.position, 2);
        assert_eq!(other.metadata.link.unwrap().position, 1);
        assert_eq!(second.metadata.state, ChainState::Signed);

        let report = chain.verify_stream("u1").await.unwrap();
        assert_eq!(report.linked, 2);
        assert_eq!(report.signatures_verified, 2);
        assert_eq!(report.head_hash, Some(l2.content_hash));
    }

    #[tokio::test]
    async fn signer_outage_defers_then_recovers() {
        let (store, signer, chain) = setup();
        signer.set_available(false);
        let stored = chain.ingest(new_event("u1", 1)).await.unwrap();
        assert_eq!(stored.metadata.state, ChainState::Hashed);
        let hash = stored.metadata.link.clone().unwrap().content_hash;

        let report = chain.sign_pending(10).await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.signed, 0);

        signer.set_available(true);
        let report = chain.sign_pending(10).await.unwrap();
        assert_eq!(report.signed, 1);
        let after = store.get_event(stored.event.id).await.unwrap().unwrap();
        assert_eq!(after.metadata.state, ChainState::Signed);
        assert_eq!(after.metadata.link.unwrap().content_hash, hash);

        assert_eq!(chain.sign_pending(10).await.unwrap(), SignReport::default());
    }

    #[tokio::test]
    async fn tampered_body_halts_the_stream() {
        let (store, _signer, chain) = setup();
        chain.ingest(new_event("u1", 1)).await.unwrap();
        let victim = chain.ingest(new_event("u1", 2)).await.unwrap();
        chain.ingest(new_event("u1", 3)).await.unwrap();

        let mut altered = victim.event.clone();
        altered.detail.insert("n".into(), serde_json::json!(99));
        store.overwrite_event_body(altered).await.unwrap();

        let err = chain.verify_stream("u1").await.unwrap_err();
        assert!(matches!(
            err,
            ComplyError::ChainIntegrityViolation { position: 2, .. }
        ));
        assert!(store.stream_halt("u1").await.unwrap().is_some());

        // Halted streams keep ingesting but stop signing.
        let late = chain.ingest(new_event("u1", 4)).await.unwrap();
        assert_eq!(late.metadata.state, ChainState::Ingested);
        let report = chain.sign_pending(10).await.unwrap();
        assert_eq!(report.halted_streams, vec!["u1".to_string()]);
    }

    fn rotated_chain(store: &MemoryStore) -> EventChain {
        let next = HmacSigner::new(vec![9u8; 32], "k2").unwrap();
        EventChain::new(Arc::new(store.clone()), Arc::new(next))
    }

    #[tokio::test]
    async fn rotation_makes_old_signatures_verifiable_again() {
        let (store, signer, chain) = setup();
        for n in 0..3 {
            chain.ingest(new_event("u1", n)).await.unwrap();
        }
        let first_u2 = chain.ingest(new_event("u2", 10)).await.unwrap();
        chain.ingest(new_event("u2", 11)).await.unwrap();

        let next = rotated_chain(&store);
        let before = next.verify_stream("u1").await.unwrap();
        assert_eq!(before.signatures_verified, 0);
        assert_eq!(before.signatures_unchecked, 3);

        let report = next.rotate_signatures(signer.as_ref(), 2).await.unwrap();
        assert_eq!(report.rotated, 5);
        assert_eq!(report.previous_key_id, "k1");
        assert_eq!(report.key_id, "k2");
        assert!(report.halted_streams.is_empty());

        let u1 = next.verify_stream("u1").await.unwrap();
        assert_eq!(u1.signatures_verified, 3);
        assert_eq!(u1.signatures_unchecked, 0);
        assert_eq!(next.verify_stream("u2").await.unwrap().signatures_verified, 2);

        let history = store.signature_rotations(first_u2.event.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].previous.key_id, "k1");
        assert_eq!(history[0].current.key_id, "k2");

        assert_eq!(next.rotate_signatures(signer.as_ref(), 2).await.unwrap().rotated, 0);
        assert_eq!(chain.verify_stream("u1").await.unwrap().signatures_unchecked, 3);
    }

    #[tokio::test]
    async fn rotation_halts_on_a_signature_the_previous_key_rejects() {
        let (store, _signer, chain) = setup();
        chain.ingest(new_event("u1", 1)).await.unwrap();
        chain.ingest(new_event("u2", 2)).await.unwrap();

        let impostor = HmacSigner::new(vec![4u8; 32], "k1").unwrap();
        let next = rotated_chain(&store);
        let report = next.rotate_signatures(&impostor, 10).await.unwrap();
        assert_eq!(report.rotated, 0);
        assert_eq!(report.halted_streams, vec!["u1".to_string(), "u2".to_string()]);
        assert!(store.stream_halt("u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rotation_defers_while_the_previous_key_is_unavailable() {
        let (store, signer, chain) = setup();
        chain.ingest(new_event("u1", 1)).await.unwrap();
        chain.ingest(new_event("u1", 2)).await.unwrap();
        signer.set_available(false);

        let next = rotated_chain(&store);
        let report = next.rotate_signatures(signer.as_ref(), 10).await.unwrap();
        assert_eq!(report.rotated, 0);
        assert_eq!(report.deferred, 2);
        assert!(store.stream_halt("u1").await.unwrap().is_none());

        signer.set_available(true);
        assert_eq!(next.rotate_signatures(signer.as_ref(), 10).await.unwrap().rotated, 2);
    }

    #[tokio::test]
    async fn rotation_requires_a_new_key_id() {
        let (_store, signer, chain) = setup();
        let err = chain.rotate_signatures(signer.as_ref(), 10).await.unwrap_err();
        assert!(matches!(err, ComplyError::Config(_)));
    }

    #[tokio::test]
    async fn store_outage_fails_ingestion() {
        let (store, _signer, chain) = setup();
        store.set_available(false);
        let err = chain.ingest(new_event("u1", 1)).await.unwrap_err();
        assert!(matches!(err, ComplyError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn concurrent_ingest_on_one_stream_stays_gapless() {
        let (_store, _signer, chain) = setup();
        let chain = Arc::new(chain);
        let mut handles = Vec::new();
        for n in 0..20 {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move { chain.ingest(new_event("u1", n)).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let report = chain.verify_stream("u1").await.unwrap();
        assert_eq!(report.linked, 20);
    }
}
