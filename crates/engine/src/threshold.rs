//! Threshold Evaluator: fetches qualifying and total counts for a subject's
//! trailing window and hands them to the pure decision in `comply_rules`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use comply_core::config::EvaluationConfig;
use comply_core::ComplyError;
use comply_rules::schema::Threshold;
use comply_rules::threshold::{decide, ThresholdDecision, Window};
use comply_storage::ComplianceStore;
use tracing::debug;

pub struct ThresholdEvaluator {
    store: Arc<dyn ComplianceStore>,
    timeout: Duration,
}

impl ThresholdEvaluator {
    pub fn new(store: Arc<dyn ComplianceStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn from_config(store: Arc<dyn ComplianceStore>, config: &EvaluationConfig) -> Self {
        Self::new(store, Duration::from_millis(config.threshold_timeout_ms))
    }

    /// Decide `threshold` for `subject` over the window ending at `as_of`.
    ///
    /// Both counts are fetched concurrently under a single deadline. Running
    /// past it fails with [`ComplyError::EvaluationTimeout`] for this control
    /// only.
    pub async fn evaluate(
        &self,
        control_key: &str,
        threshold: &Threshold,
        subject: &str,
        as_of: DateTime<Utc>,
    ) -> Result<ThresholdDecision, ComplyError> {
        let window = Window::trailing(threshold, as_of);
        let counts = async {
            tokio::try_join!(
                self.store.count_hits(control_key, subject, window),
                self.store.count_events(subject, window),
            )
        };

        let (qualifying, total) = match tokio::time::timeout(self.timeout, counts).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ComplyError::EvaluationTimeout {
                    control: control_key.to_string(),
                    after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        };

        let decision = decide(threshold, window, qualifying, total);
        debug!(
            control = control_key,
            subject,
            kind = %decision.kind,
            qualifying,
            total,
            satisfied = decision.satisfied,
            "threshold evaluated"
        );
        Ok(decision)
    }
}
