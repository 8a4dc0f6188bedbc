//! PostgreSQL-backed [`ComplianceStore`].
//!
//! Stateless apart from the pool. Atomicity guarantees come from the schema
//! in `migrations/` (unique `dedup_key`, unique `(stream, position)`, partial
//! unique index on the active version of a policy name, append-only trigger
//! on `events`) plus transaction-scoped advisory locks on the contended keys.

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use comply_core::{
    ActionLogEntry, ChainLink, Event, EventMetadata, NewViolation, QualifyingHit, ScorerArtifact,
    SignatureRecord, SignatureRotation, Violation,
};
use comply_rules::lifecycle::{ApprovalRecord, LifecycleError, LifecycleState};
use comply_rules::schema::Policy;
use comply_rules::threshold::Window;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{ComplianceStore, CreateOutcome, StoredEvent, StreamHalt};

use self::rows::{
    to_i64, ActionRow, ApprovalRow, ArtifactRow, EventRow, HaltRow, MetadataRow, PolicyRow,
    RotationRow, StoredEventRow, ViolationRow, EVENT_COLUMNS, METADATA_COLUMNS, POLICY_COLUMNS,
    VIOLATION_COLUMNS,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    fn stored_event_query(filter: &str) -> String {
        format!(
            "SELECT {EVENT_COLUMNS}, {METADATA_COLUMNS}
             FROM events e
             JOIN event_metadata m ON m.event_id = e.id
             {filter}"
        )
    }
}

/// Serialize writers on `key` for the rest of the transaction.
async fn advisory_lock(tx: &mut Transaction<'_, Postgres>, key: &str) -> StoreResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn log_db_error(op: &str, e: sqlx::Error) -> StoreError {
    error!(op, error = %e, "compliance store database error");
    StoreError::Database(e)
}

#[async_trait]
impl ComplianceStore for PgStore {
    // ── Policies ─────────────────────────────────────────────

    async fn save_policy(&self, policy: &Policy) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO policies (id, name, version, lifecycle, metadata, controls, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(policy.id)
        .bind(&policy.name)
        .bind(&policy.version)
        .bind(policy.lifecycle.as_str())
        .bind(Json(&policy.metadata))
        .bind(Json(&policy.controls))
        .bind(policy.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if StoreError::is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "policy {}@{} already exists",
                policy.name, policy.version
            ))),
            Err(e) => Err(log_db_error("save_policy", e)),
        }
    }

    async fn get_policy(&self, id: Uuid) -> StoreResult<Option<Policy>> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = $1");
        sqlx::query_as::<_, PolicyRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(PolicyRow::into_policy)
            .transpose()
    }

    async fn find_policy(&self, name: &str, version: &str) -> StoreResult<Option<Policy>> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM policies WHERE name = $1 AND version = $2");
        sqlx::query_as::<_, PolicyRow>(&sql)
            .bind(name)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?
            .map(PolicyRow::into_policy)
            .transpose()
    }

    async fn list_policies(&self) -> StoreResult<Vec<Policy>> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM policies ORDER BY name, created_at");
        sqlx::query_as::<_, PolicyRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PolicyRow::into_policy)
            .collect()
    }

    async fn active_policies(&self) -> StoreResult<Vec<Policy>> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE lifecycle = 'active' ORDER BY name"
        );
        sqlx::query_as::<_, PolicyRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(PolicyRow::into_policy)
            .collect()
    }

    async fn transition_policy(&self, record: &ApprovalRecord) -> StoreResult<Policy> {
        let mut tx = self.begin().await?;

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT name, lifecycle FROM policies WHERE id = $1 FOR UPDATE")
                .bind(record.policy_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (name, lifecycle) =
            row.ok_or_else(|| StoreError::NotFound(format!("policy {}", record.policy_id)))?;
        let current = LifecycleState::parse(&lifecycle)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown lifecycle state '{}'", lifecycle)))?;
        if current != record.from_state {
            return Err(LifecycleError::Conflict {
                expected: record.from_state,
                found: current,
            }
            .into());
        }

        if record.to_state == LifecycleState::Active {
            advisory_lock(&mut tx, &format!("policy-active:{}", name)).await?;
            let other: Option<Uuid> = sqlx::query_scalar(
                "SELECT id FROM policies WHERE name = $1 AND lifecycle = 'active' AND id <> $2",
            )
            .bind(&name)
            .bind(record.policy_id)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(active) = other {
                return Err(LifecycleError::NameAlreadyActive { name, active }.into());
            }
        }

        let sql = format!(
            "UPDATE policies SET lifecycle = $2 WHERE id = $1 RETURNING {POLICY_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, PolicyRow>(&sql)
            .bind(record.policy_id)
            .bind(record.to_state.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::Conflict(format!("policy '{}' already has an active version", name))
                } else {
                    log_db_error("transition_policy", e)
                }
            })?;

        sqlx::query(
            "INSERT INTO approval_records
                (id, policy_id, transition, from_state, to_state, approver, justification, at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(record.policy_id)
        .bind(record.transition.as_str())
        .bind(record.from_state.as_str())
        .bind(record.to_state.as_str())
        .bind(&record.approver)
        .bind(&record.justification)
        .bind(record.at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        updated.into_policy()
    }

    async fn approvals(&self, policy_id: Uuid) -> StoreResult<Vec<ApprovalRecord>> {
        sqlx::query_as::<_, ApprovalRow>(
            "SELECT id, policy_id, transition, from_state, to_state, approver, justification, at
             FROM approval_records
             WHERE policy_id = $1
             ORDER BY at, id",
        )
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ApprovalRow::into_record)
        .collect()
    }

    // ── Events & chain metadata ──────────────────────────────

    async fn append_event(&self, event: &Event) -> StoreResult<EventMetadata> {
        let mut tx = self.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO events (id, event_type, source, subject, occurred_at, detail, ingested_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.id)
        .bind(&event.event_type)
        .bind(&event.source)
        .bind(&event.subject)
        .bind(event.timestamp)
        .bind(Json(&event.detail))
        .bind(event.ingested_at)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            if StoreError::is_unique_violation(&e) {
                return Err(StoreError::Conflict(format!("event {} already stored", event.id)));
            }
            return Err(log_db_error("append_event", e));
        }

        let meta = EventMetadata::new(event.id, event.stream());
        sqlx::query(
            "INSERT INTO event_metadata (event_id, stream, state, processed)
             VALUES ($1, $2, $3, false)",
        )
        .bind(meta.event_id)
        .bind(&meta.stream)
        .bind(meta.state.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(meta)
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<StoredEvent>> {
        let sql = Self::stored_event_query("WHERE e.id = $1");
        sqlx::query_as::<_, StoredEventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(StoredEventRow::into_stored)
            .transpose()
    }

    async fn events_for_stream(&self, stream: &str) -> StoreResult<Vec<StoredEvent>> {
        let sql = Self::stored_event_query(
            "WHERE m.stream = $1 ORDER BY m.position NULLS LAST, e.ingested_at, e.id",
        );
        sqlx::query_as::<_, StoredEventRow>(&sql)
            .bind(stream)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(StoredEventRow::into_stored)
            .collect()
    }

    async fn events_for_subject(&self, subject: &str, window: Window) -> StoreResult<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events e
             WHERE e.subject = $1 AND e.occurred_at BETWEEN $2 AND $3
             ORDER BY e.occurred_at, e.id"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(subject)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }

    async fn count_events(&self, subject: &str, window: Window) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM events WHERE subject = $1 AND occurred_at BETWEEN $2 AND $3",
        )
        .bind(subject)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    async fn chain_head(&self, stream: &str) -> StoreResult<Option<ChainLink>> {
        let sql = format!(
            "SELECT {METADATA_COLUMNS} FROM event_metadata m
             WHERE m.stream = $1 AND m.position IS NOT NULL
             ORDER BY m.position DESC
             LIMIT 1"
        );
        let row = sqlx::query_as::<_, MetadataRow>(&sql)
            .bind(stream)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(r.into_metadata()?.link),
            None => Ok(None),
        }
    }

    async fn record_link(&self, event_id: Uuid, link: &ChainLink) -> StoreResult<EventMetadata> {
        let mut tx = self.begin().await?;

        let current: Option<(String, Option<i64>)> = sqlx::query_as(
            "SELECT stream, position FROM event_metadata WHERE event_id = $1 FOR UPDATE",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (stream, position) =
            current.ok_or_else(|| StoreError::NotFound(format!("event {}", event_id)))?;
        if position.is_some() {
            return Err(StoreError::Conflict(format!("event {} is already linked", event_id)));
        }

        advisory_lock(&mut tx, &format!("chain:{}", stream)).await?;
        let head: Option<(i64, String)> = sqlx::query_as(
            "SELECT position, content_hash FROM event_metadata
             WHERE stream = $1 AND position IS NOT NULL
             ORDER BY position DESC
             LIMIT 1",
        )
        .bind(&stream)
        .fetch_optional(&mut *tx)
        .await?;
        let extends_head = match &head {
            Some((pos, hash)) => to_i64(link.position) == pos + 1 && *hash == link.prev_hash,
            None => link.position == 1,
        };
        if !extends_head {
            return Err(StoreError::Conflict(format!(
                "link at position {} does not extend head of stream '{}'",
                link.position, stream
            )));
        }

        let sql = format!(
            "UPDATE event_metadata m
             SET state = 'hashed', position = $2, prev_hash = $3, content_hash = $4, hashed_at = $5
             WHERE m.event_id = $1
             RETURNING {METADATA_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MetadataRow>(&sql)
            .bind(event_id)
            .bind(to_i64(link.position))
            .bind(&link.prev_hash)
            .bind(&link.content_hash)
            .bind(link.hashed_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if StoreError::is_unique_violation(&e) {
                    StoreError::Conflict(format!(
                        "position {} of stream '{}' is taken",
                        link.position, stream
                    ))
                } else {
                    log_db_error("record_link", e)
                }
            })?;

        tx.commit().await?;
        row.into_metadata()
    }

    async fn record_signature(&self, event_id: Uuid, signature: &SignatureRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE event_metadata
             SET state = 'signed', sig_algorithm = $2, sig_key_id = $3, signature = $4, signed_at = $5
             WHERE event_id = $1 AND state = 'hashed'",
        )
        .bind(event_id)
        .bind(&signature.algorithm)
        .bind(&signature.key_id)
        .bind(&signature.value)
        .bind(signature.signed_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }

        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM event_metadata WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;
        match state.as_deref() {
            None => Err(StoreError::NotFound(format!("event {}", event_id))),
            Some("signed") => Ok(false),
            Some(other) => Err(StoreError::Conflict(format!(
                "event {} is {}, must be hashed before signing",
                event_id, other
            ))),
        }
    }

    async fn rotate_signature(&self, rotation: &SignatureRotation) -> StoreResult<bool> {
        let mut tx = self.begin().await?;
        let (previous, current) = (&rotation.previous, &rotation.current);

        let result = sqlx::query(
            "UPDATE event_metadata
             SET sig_algorithm = $2, sig_key_id = $3, signature = $4, signed_at = $5
             WHERE event_id = $1 AND state = 'signed' AND sig_key_id = $6 AND signature = $7",
        )
        .bind(rotation.event_id)
        .bind(&current.algorithm)
        .bind(&current.key_id)
        .bind(&current.value)
        .bind(current.signed_at)
        .bind(&previous.key_id)
        .bind(&previous.value)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<Uuid> =
                sqlx::query_scalar("SELECT event_id FROM event_metadata WHERE event_id = $1")
                    .bind(rotation.event_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return match exists {
                Some(_) => Ok(false),
                None => Err(StoreError::NotFound(format!("event {}", rotation.event_id))),
            };
        }

        sqlx::query(
            "INSERT INTO signature_rotations
                (event_id, previous_algorithm, previous_key_id, previous_signature, previous_signed_at,
                 algorithm, key_id, signature, signed_at, rotated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(rotation.event_id)
        .bind(&previous.algorithm)
        .bind(&previous.key_id)
        .bind(&previous.value)
        .bind(previous.signed_at)
        .bind(&current.algorithm)
        .bind(&current.key_id)
        .bind(&current.value)
        .bind(current.signed_at)
        .bind(rotation.rotated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(event_id = %rotation.event_id, key_id = %current.key_id, "signature rotated");
        Ok(true)
    }

    async fn signature_rotations(&self, event_id: Uuid) -> StoreResult<Vec<SignatureRotation>> {
        let rows = sqlx::query_as::<_, RotationRow>(
            "SELECT event_id, previous_algorithm, previous_key_id, previous_signature, previous_signed_at,
                    algorithm, key_id, signature, signed_at, rotated_at
             FROM signature_rotations
             WHERE event_id = $1
             ORDER BY id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RotationRow::into_rotation).collect())
    }

    async fn events_signed_by(&self, key_id: &str, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        let sql = Self::stored_event_query(
            "WHERE m.state = 'signed' AND m.sig_key_id = $1
               AND NOT EXISTS (SELECT 1 FROM stream_halts h WHERE h.stream = m.stream)
             ORDER BY m.stream, m.position
             LIMIT $2",
        );
        sqlx::query_as::<_, StoredEventRow>(&sql)
            .bind(key_id)
            .bind(to_i64(limit as u64))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(StoredEventRow::into_stored)
            .collect()
    }

    async fn unsigned_events(&self, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        let sql = Self::stored_event_query(
            "WHERE m.state <> 'signed'
             ORDER BY m.stream, m.position NULLS LAST, e.ingested_at, e.id
             LIMIT $1",
        );
        sqlx::query_as::<_, StoredEventRow>(&sql)
            .bind(to_i64(limit as u64))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(StoredEventRow::into_stored)
            .collect()
    }

    async fn mark_processed(&self, event_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE event_metadata SET processed = true, processed_at = COALESCE(processed_at, $2)
             WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("event {}", event_id)));
        }
        Ok(())
    }

    async fn unprocessed_events(&self, limit: usize) -> StoreResult<Vec<Event>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events e
             JOIN event_metadata m ON m.event_id = e.id
             WHERE NOT m.processed
             ORDER BY e.ingested_at, e.id
             LIMIT $1"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(to_i64(limit as u64))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }

    async fn halt_stream(&self, halt: &StreamHalt) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO stream_halts (stream, position, reason, halted_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (stream) DO NOTHING",
        )
        .bind(&halt.stream)
        .bind(to_i64(halt.position))
        .bind(&halt.reason)
        .bind(halt.halted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stream_halt(&self, stream: &str) -> StoreResult<Option<StreamHalt>> {
        let row = sqlx::query_as::<_, HaltRow>(
            "SELECT stream, position, reason, halted_at FROM stream_halts WHERE stream = $1",
        )
        .bind(stream)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StreamHalt::from))
    }

    async fn clear_halt(&self, stream: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM stream_halts WHERE stream = $1")
            .bind(stream)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Qualifying hits ──────────────────────────────────────

    async fn record_hit(&self, hit: &QualifyingHit) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO qualifying_hits (control_key, event_id, subject, occurred_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (control_key, event_id) DO NOTHING",
        )
        .bind(&hit.control_key)
        .bind(hit.event_id)
        .bind(&hit.subject)
        .bind(hit.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn count_hits(&self, control_key: &str, subject: &str, window: Window) -> StoreResult<u64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM qualifying_hits
             WHERE control_key = $1 AND subject = $2 AND occurred_at BETWEEN $3 AND $4",
        )
        .bind(control_key)
        .bind(subject)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?;
        Ok(n.max(0) as u64)
    }

    // ── Violations ───────────────────────────────────────────

    async fn create_violation_if_absent(&self, new: &NewViolation) -> StoreResult<CreateOutcome> {
        let mut tx = self.begin().await?;
        advisory_lock(&mut tx, &new.dedup_key).await?;

        let insert = format!(
            "INSERT INTO violations
                (id, dedup_key, policy_id, policy_name, policy_version, control_id, rule, subject,
                 severity, bucket_start, triggering_event, evidence, resolution, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'open', now())
             ON CONFLICT (dedup_key) DO NOTHING
             RETURNING {VIOLATION_COLUMNS}"
        );
        let created = sqlx::query_as::<_, ViolationRow>(&insert)
            .bind(Uuid::new_v4())
            .bind(&new.dedup_key)
            .bind(new.policy_id)
            .bind(&new.policy_name)
            .bind(&new.policy_version)
            .bind(&new.control_id)
            .bind(&new.rule)
            .bind(&new.subject)
            .bind(new.severity.as_str())
            .bind(new.bucket_start)
            .bind(new.triggering_event)
            .bind(Json(&new.evidence))
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match created {
            Some(row) => CreateOutcome::Created(row.into_violation()?),
            None => {
                debug!(dedup_key = %new.dedup_key, "violation already exists");
                let select = format!("SELECT {VIOLATION_COLUMNS} FROM violations WHERE dedup_key = $1");
                let row = sqlx::query_as::<_, ViolationRow>(&select)
                    .bind(&new.dedup_key)
                    .fetch_one(&mut *tx)
                    .await?;
                CreateOutcome::Existing(row.into_violation()?)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_violation(&self, id: Uuid) -> StoreResult<Option<Violation>> {
        let sql = format!("SELECT {VIOLATION_COLUMNS} FROM violations WHERE id = $1");
        sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(ViolationRow::into_violation)
            .transpose()
    }

    async fn violation_by_dedup_key(&self, dedup_key: &str) -> StoreResult<Option<Violation>> {
        let sql = format!("SELECT {VIOLATION_COLUMNS} FROM violations WHERE dedup_key = $1");
        sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(dedup_key)
            .fetch_optional(&self.pool)
            .await?
            .map(ViolationRow::into_violation)
            .transpose()
    }

    async fn violations_for_subject(
        &self,
        subject: &str,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<Vec<Violation>> {
        let sql = format!(
            "SELECT {VIOLATION_COLUMNS} FROM violations
             WHERE subject = $1 AND ($2::timestamptz IS NULL OR created_at >= $2)
             ORDER BY created_at DESC, id"
        );
        sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(subject)
            .bind(since)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ViolationRow::into_violation)
            .collect()
    }

    async fn violations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Violation>> {
        let sql = format!(
            "SELECT {VIOLATION_COLUMNS} FROM violations
             WHERE created_at BETWEEN $1 AND $2
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ViolationRow::into_violation)
            .collect()
    }

    async fn apply_violation_action(&self, entry: &ActionLogEntry) -> StoreResult<Violation> {
        let mut tx = self.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT resolution FROM violations WHERE id = $1 FOR UPDATE")
                .bind(entry.violation_id)
                .fetch_optional(&mut *tx)
                .await?;
        let current =
            current.ok_or_else(|| StoreError::NotFound(format!("violation {}", entry.violation_id)))?;
        if current != entry.from_state.as_str() {
            return Err(StoreError::Conflict(format!(
                "violation {} is {}, expected {}",
                entry.violation_id,
                current,
                entry.from_state.as_str()
            )));
        }

        sqlx::query(
            "INSERT INTO violation_actions
                (id, violation_id, action, from_state, to_state, actor, note, at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.violation_id)
        .bind(entry.action.as_str())
        .bind(entry.from_state.as_str())
        .bind(entry.to_state.as_str())
        .bind(&entry.actor)
        .bind(&entry.note)
        .bind(entry.at)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "UPDATE violations SET resolution = $2 WHERE id = $1 RETURNING {VIOLATION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ViolationRow>(&sql)
            .bind(entry.violation_id)
            .bind(entry.to_state.as_str())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        row.into_violation()
    }

    async fn action_log(&self, violation_id: Uuid) -> StoreResult<Vec<ActionLogEntry>> {
        sqlx::query_as::<_, ActionRow>(
            "SELECT id, violation_id, action, from_state, to_state, actor, note, at
             FROM violation_actions
             WHERE violation_id = $1
             ORDER BY at, id",
        )
        .bind(violation_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ActionRow::into_entry)
        .collect()
    }

    // ── Scorer artifacts ─────────────────────────────────────

    async fn register_artifact(&self, artifact: &ScorerArtifact) -> StoreResult<ScorerArtifact> {
        let inserted = sqlx::query_as::<_, ArtifactRow>(
            "INSERT INTO scorer_artifacts (name, version, sha256, config, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (name, version) DO NOTHING
             RETURNING name, version, sha256, config, created_at",
        )
        .bind(&artifact.name)
        .bind(&artifact.version)
        .bind(&artifact.sha256)
        .bind(&artifact.config)
        .bind(artifact.created_at)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok(row.into());
        }

        let existing = self
            .get_artifact(&artifact.name, &artifact.version)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("artifact {}@{}", artifact.name, artifact.version))
            })?;
        if existing.sha256 != artifact.sha256 {
            return Err(StoreError::Conflict(format!(
                "artifact {}@{} already registered with a different hash",
                artifact.name, artifact.version
            )));
        }
        Ok(existing)
    }

    async fn get_artifact(&self, name: &str, version: &str) -> StoreResult<Option<ScorerArtifact>> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            "SELECT name, version, sha256, config, created_at
             FROM scorer_artifacts
             WHERE name = $1 AND version = $2",
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ScorerArtifact::from))
    }
}
