//! Fixed feature vector extracted from a subject's history.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use comply_core::{Severity, ViolationAction};
use comply_rules::threshold::Window;
use comply_storage::{ComplianceStore, StoreResult};
use serde::{Deserialize, Serialize};

/// Hours before which an event counts as off-hours (UTC).
const WORKDAY_START_HOUR: u32 = 6;
/// Hour at or after which an event counts as off-hours (UTC).
const WORKDAY_END_HOUR: u32 = 22;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub violations_24h: u64,
    pub violations_30d: u64,
    pub low_30d: u64,
    pub medium_30d: u64,
    pub high_30d: u64,
    pub critical_30d: u64,
    /// Open or acknowledged, regardless of age.
    pub unresolved: u64,
    pub distinct_policies_30d: u64,
    /// Mean hours from creation to resolution, over violations resolved in 30d.
    pub mean_resolution_hours: f64,
    pub events_24h: u64,
    pub distinct_sources_24h: u64,
    pub off_hours_events_24h: u64,
}

impl FeatureVector {
    pub const NAMES: [&'static str; 12] = [
        "violations_24h",
        "violations_30d",
        "low_30d",
        "medium_30d",
        "high_30d",
        "critical_30d",
        "unresolved",
        "distinct_policies_30d",
        "mean_resolution_hours",
        "events_24h",
        "distinct_sources_24h",
        "off_hours_events_24h",
    ];

    pub fn values(&self) -> [f64; 12] {
        [
            self.violations_24h as f64,
            self.violations_30d as f64,
            self.low_30d as f64,
            self.medium_30d as f64,
            self.high_30d as f64,
            self.critical_30d as f64,
            self.unresolved as f64,
            self.distinct_policies_30d as f64,
            self.mean_resolution_hours,
            self.events_24h as f64,
            self.distinct_sources_24h as f64,
            self.off_hours_events_24h as f64,
        ]
    }

    /// `(name, value)` pairs in declaration order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> {
        Self::NAMES.into_iter().zip(self.values())
    }
}

pub fn is_off_hours(ts: DateTime<Utc>) -> bool {
    let hour = ts.hour();
    hour < WORKDAY_START_HOUR || hour >= WORKDAY_END_HOUR
}

pub struct FeatureExtractor {
    store: Arc<dyn ComplianceStore>,
}

impl FeatureExtractor {
    pub fn new(store: Arc<dyn ComplianceStore>) -> Self {
        Self { store }
    }

    pub async fn extract(&self, subject: &str, as_of: DateTime<Utc>) -> StoreResult<FeatureVector> {
        let day_ago = as_of - Duration::hours(24);
        let month_ago = as_of - Duration::days(30);
        let mut fv = FeatureVector::default();

        let violations = self.store.violations_for_subject(subject, None).await?;
        let mut policies = HashSet::new();
        let mut latencies = Vec::new();
        for v in violations.iter().filter(|v| v.created_at <= as_of) {
            if !v.is_resolved() {
                fv.unresolved += 1;
            }
            if v.created_at < month_ago {
                continue;
            }
            fv.violations_30d += 1;
            if v.created_at >= day_ago {
                fv.violations_24h += 1;
            }
            match v.severity {
                Severity::Low => fv.low_30d += 1,
                Severity::Medium => fv.medium_30d += 1,
                Severity::High => fv.high_30d += 1,
                Severity::Critical => fv.critical_30d += 1,
            }
            policies.insert(v.policy_name.as_str());

            if v.is_resolved() {
                let log = self.store.action_log(v.id).await?;
                if let Some(resolved) = log.iter().rev().find(|e| e.action == ViolationAction::Resolve) {
                    let hours = (resolved.at - v.created_at).num_seconds().max(0) as f64 / 3600.0;
                    latencies.push(hours);
                }
            }
        }
        fv.distinct_policies_30d = policies.len() as u64;
        if !latencies.is_empty() {
            fv.mean_resolution_hours = latencies.iter().sum::<f64>() / latencies.len() as f64;
        }

        let events = self
            .store
            .events_for_subject(
                subject,
                Window {
                    start: day_ago,
                    end: as_of,
                },
            )
            .await?;
        let sources: HashSet<&str> = events.iter().map(|e| e.source.as_str()).collect();
        fv.events_24h = events.len() as u64;
        fv.distinct_sources_24h = sources.len() as u64;
        fv.off_hours_events_24h = events.iter().filter(|e| is_off_hours(e.timestamp)).count() as u64;

        Ok(fv)
    }
}
