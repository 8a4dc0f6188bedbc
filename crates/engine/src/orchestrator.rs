//! Compliance Orchestrator: the per-event entry point.
//!
//! For each ingested event it runs the event chain, then every active
//! control: expression, qualifying hit and threshold when gated, and a
//! violation candidate when the control fires. Candidates are committed
//! together by the synthesizer.
//!
//! Faults local to one control (timeout, depth, a control that cannot be
//! compiled) are recorded and the remaining controls still run; the report
//! is then `Incomplete` so a degraded pass is never mistaken for a clean one.
//! Store outages abort the pass and surface to the caller for retry.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use comply_core::config::EvaluationConfig;
use comply_core::{ComplyError, Event, NewEvent, NewViolation, QualifyingHit, Violation};
use comply_rules::audit_log::{AuditLog, ExecutionPhase, LogLevel, TraceEntry};
use comply_rules::evaluator::{CompiledControl, EvalLimits};
use comply_rules::schema::Policy;
use comply_storage::{ComplianceStore, CreateOutcome};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::ActivePolicyCache;
use crate::chain::{ChainReport, EventChain, SignReport};
use crate::synthesizer::ViolationSynthesizer;
use crate::threshold::ThresholdEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Every active control was evaluated.
    Complete,
    /// At least one control was skipped or failed; absence of violations
    /// does not mean compliance.
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    InvalidControl,
    ExpressionTooDeep,
    Timeout,
    Other,
}

/// A control that could not be evaluated for this event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlFault {
    pub control_key: String,
    pub kind: FaultKind,
    pub message: String,
}

impl ControlFault {
    fn from_error(control_key: &str, error: &ComplyError) -> Self {
        let kind = match error {
            ComplyError::InvalidExpression { .. } => FaultKind::InvalidControl,
            ComplyError::ExpressionTooDeep { .. } => FaultKind::ExpressionTooDeep,
            ComplyError::EvaluationTimeout { .. } => FaultKind::Timeout,
            _ => FaultKind::Other,
        };
        Self {
            control_key: control_key.to_string(),
            kind,
            message: error.to_string(),
        }
    }

    fn skipped(control_key: &str) -> Self {
        Self {
            control_key: control_key.to_string(),
            kind: FaultKind::InvalidControl,
            message: "control failed validation and was skipped".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub event_id: Uuid,
    pub status: EvaluationStatus,
    pub controls_evaluated: usize,
    /// Violations first committed by this pass.
    pub created: Vec<Violation>,
    /// Ids of matching violations another pass already committed.
    pub existing: Vec<Uuid>,
    pub faults: Vec<ControlFault>,
}

impl EvaluationReport {
    pub fn is_complete(&self) -> bool {
        self.status == EvaluationStatus::Complete
    }
}

/// Outcome of [`Orchestrator::process_unprocessed`].
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RecoveryReport {
    pub processed: usize,
    pub violations_created: usize,
    pub incomplete: usize,
}

pub struct Orchestrator {
    store: Arc<dyn ComplianceStore>,
    chain: Arc<EventChain>,
    cache: Arc<ActivePolicyCache>,
    thresholds: ThresholdEvaluator,
    synthesizer: ViolationSynthesizer,
    limits: EvalLimits,
    audit: AuditLog,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ComplianceStore>,
        chain: Arc<EventChain>,
        cache: Arc<ActivePolicyCache>,
        config: &EvaluationConfig,
    ) -> Self {
        Self {
            thresholds: ThresholdEvaluator::from_config(store.clone(), config),
            synthesizer: ViolationSynthesizer::new(store.clone(), config.dedup_bucket_secs),
            limits: EvalLimits::from(config),
            audit: AuditLog::new(),
            store,
            chain,
            cache,
        }
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn chain(&self) -> &EventChain {
        &self.chain
    }

    pub fn cache(&self) -> &Arc<ActivePolicyCache> {
        &self.cache
    }

    /// Ingest `new` and evaluate it against every active policy.
    ///
    /// The event is durable before evaluation starts. If evaluation fails
    /// with a store outage the event stays unprocessed and
    /// [`process_unprocessed`](Self::process_unprocessed) picks it up.
    pub async fn submit_event(&self, new: NewEvent) -> Result<EvaluationReport, ComplyError> {
        let stored = self.chain.ingest(new).await?;
        self.evaluate_event(&stored.event).await
    }

    /// Evaluate an already stored event and mark it processed.
    pub async fn evaluate_event(&self, event: &Event) -> Result<EvaluationReport, ComplyError> {
        let policies = self.cache.active().await?;

        let mut candidates = Vec::new();
        let mut faults = Vec::new();
        let mut evaluated = 0usize;
        for compiled in &policies {
            faults.extend(compiled.skipped.iter().map(|key| ControlFault::skipped(key)));
            for control in &compiled.controls {
                evaluated += 1;
                match self.evaluate_control(&compiled.policy, control, event).await {
                    Ok(Some(candidate)) => candidates.push(candidate),
                    Ok(None) => {}
                    Err(e) if e.is_retryable() => return Err(e),
                    Err(e) => {
                        warn!(
                            event_id = %event.id,
                            control = control.key(),
                            error = %e,
                            "control evaluation failed, continuing with remaining controls"
                        );
                        self.audit.push(
                            TraceEntry::new(control.key(), LogLevel::Error, ExecutionPhase::Complete, e.to_string())
                                .for_event(event.id),
                        );
                        faults.push(ControlFault::from_error(control.key(), &e));
                    }
                }
            }
        }

        let outcomes = self.synthesizer.commit(candidates).await?;
        self.store.mark_processed(event.id, Utc::now()).await?;

        let mut created = Vec::new();
        let mut existing = Vec::new();
        for outcome in outcomes {
            match outcome {
                CreateOutcome::Created(v) => {
                    self.audit.push(
                        TraceEntry::new(
                            comply_rules::schema::control_key(&v.policy_name, &v.control_id),
                            LogLevel::Info,
                            ExecutionPhase::Synthesis,
                            format!("violation {} created", v.id),
                        )
                        .for_event(event.id),
                    );
                    created.push(v);
                }
                CreateOutcome::Existing(v) => existing.push(v.id),
            }
        }

        let status = if faults.is_empty() {
            EvaluationStatus::Complete
        } else {
            EvaluationStatus::Incomplete
        };
        info!(
            event_id = %event.id,
            controls = evaluated,
            created = created.len(),
            existing = existing.len(),
            faults = faults.len(),
            status = ?status,
            "event evaluated"
        );
        Ok(EvaluationReport {
            event_id: event.id,
            status,
            controls_evaluated: evaluated,
            created,
            existing,
            faults,
        })
    }

    async fn evaluate_control(
        &self,
        policy: &Policy,
        control: &CompiledControl,
        event: &Event,
    ) -> Result<Option<NewViolation>, ComplyError> {
        let key = control.key();
        let started = Instant::now();
        let outcome = control
            .evaluate(event, &self.limits)
            .map_err(|e| e.into_comply(key))?;
        let mut trace = TraceEntry::new(
            key,
            LogLevel::Debug,
            ExecutionPhase::Expression,
            format!("expression evaluated to {:?}", outcome.truth),
        )
        .for_event(event.id)
        .took(elapsed_ms(started));
        if let Ok(explanation) = serde_json::to_value(&outcome.explanation) {
            trace = trace.with_details(explanation);
        }
        self.audit.push(trace);
        if !outcome.matched() {
            return Ok(None);
        }

        let decision = match control.threshold() {
            None => None,
            Some(threshold) => {
                self.store
                    .record_hit(&QualifyingHit {
                        control_key: key.to_string(),
                        subject: event.subject.clone(),
                        event_id: event.id,
                        timestamp: event.timestamp,
                    })
                    .await?;
                let started = Instant::now();
                let decision = self
                    .thresholds
                    .evaluate(key, threshold, &event.subject, event.timestamp)
                    .await?;
                let mut trace = TraceEntry::new(
                    key,
                    LogLevel::Debug,
                    ExecutionPhase::Threshold,
                    format!(
                        "{} threshold {}: {} of {}",
                        decision.kind,
                        if decision.satisfied { "met" } else { "not met" },
                        decision.qualifying,
                        decision.total
                    ),
                )
                .for_event(event.id)
                .took(elapsed_ms(started));
                if let Ok(details) = serde_json::to_value(&decision) {
                    trace = trace.with_details(details);
                }
                self.audit.push(trace);
                if !decision.satisfied {
                    return Ok(None);
                }
                Some(decision)
            }
        };

        self.synthesizer
            .candidate(policy, control, event, &outcome, decision.as_ref())
            .map(Some)
    }

    /// Re-run evaluation for events whose synthesis never completed.
    ///
    /// Stops at the first store outage; events already handled stay handled.
    pub async fn process_unprocessed(&self, limit: usize) -> Result<RecoveryReport, ComplyError> {
        let pending = self.store.unprocessed_events(limit).await?;
        let mut report = RecoveryReport::default();
        for event in pending {
            let result = self.evaluate_event(&event).await?;
            report.processed += 1;
            report.violations_created += result.created.len();
            if !result.is_complete() {
                report.incomplete += 1;
            }
        }
        if report.processed > 0 {
            info!(
                processed = report.processed,
                created = report.violations_created,
                "recovered unprocessed events"
            );
        }
        Ok(report)
    }

    pub async fn sign_pending(&self, limit: usize) -> Result<SignReport, ComplyError> {
        self.chain.sign_pending(limit).await
    }

    pub async fn verify_stream(&self, stream: &str) -> Result<ChainReport, ComplyError> {
        self.chain.verify_stream(stream).await
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
