//! Risk Scorer Adapter.
//!
//! Extracts a fixed [`FeatureVector`] for a subject from the store and hands
//! it to a swappable [`ScoringBackend`]. Every [`RiskEstimate`] carries the
//! backend's [`ScorerArtifact`]; the artifact is registered in the store
//! before the first estimate is produced.

mod backends;
pub mod features;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use comply_core::{ComplyError, ScorerArtifact};
use comply_storage::{ComplianceStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

pub use backends::{backend_from_config, HttpScorer, ScoringBackend, WeightedScorer};
pub use features::{FeatureExtractor, FeatureVector};

#[derive(Error, Debug)]
pub enum ScoringError {
    /// Backend unreachable or overloaded. Retry later.
    #[error("scoring backend unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scoring backend error: {0}")]
    Backend(String),

    #[error("malformed scoring response: {0}")]
    Malformed(String),

    #[error("scorer configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ScoringError> for ComplyError {
    fn from(e: ScoringError) -> Self {
        match e {
            ScoringError::Store(inner) => inner.into(),
            ScoringError::Config(msg) => ComplyError::Config(msg),
            other => ComplyError::Other(other.to_string()),
        }
    }
}

/// One feature's share of a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEstimate {
    pub subject: String,
    /// Probability in `[0, 1]`.
    pub risk: f64,
    pub factors: Vec<RiskFactor>,
    pub features: FeatureVector,
    pub artifact: ScorerArtifact,
    pub scored_at: DateTime<Utc>,
}

pub struct RiskScorer {
    store: Arc<dyn ComplianceStore>,
    extractor: FeatureExtractor,
    backend: Arc<dyn ScoringBackend>,
    registered: OnceCell<ScorerArtifact>,
}

impl RiskScorer {
    pub fn new(store: Arc<dyn ComplianceStore>, backend: Arc<dyn ScoringBackend>) -> Self {
        Self {
            extractor: FeatureExtractor::new(store.clone()),
            store,
            backend,
            registered: OnceCell::new(),
        }
    }

    /// Register the backend's artifact, once per scorer.
    pub async fn register(&self) -> Result<&ScorerArtifact, ScoringError> {
        self.registered
            .get_or_try_init(|| async {
                let artifact = self.store.register_artifact(self.backend.artifact()).await?;
                info!(artifact = %artifact.label(), "scorer artifact registered");
                Ok::<_, ScoringError>(artifact)
            })
            .await
    }

    pub async fn score(&self, subject: &str) -> Result<RiskEstimate, ScoringError> {
        self.score_at(subject, Utc::now()).await
    }

    pub async fn score_at(&self, subject: &str, as_of: DateTime<Utc>) -> Result<RiskEstimate, ScoringError> {
        let artifact = self.register().await?.clone();
        let features = self.extractor.extract(subject, as_of).await?;
        let raw = self.backend.predict(&features).await?;
        if raw.is_nan() {
            return Err(ScoringError::Malformed("backend returned NaN".into()));
        }
        let risk = raw.clamp(0.0, 1.0);
        let factors = self.backend.explain(&features);
        info!(subject, risk, artifact = %artifact.label(), "risk scored");
        Ok(RiskEstimate {
            subject: subject.to_string(),
            risk,
            factors,
            features,
            artifact,
            scored_at: as_of,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_event, policy, signer, GEOTAG_POLICY};
    use crate::{ActivePolicyCache, EventChain, Orchestrator};
    use async_trait::async_trait;
    use comply_core::config::EvaluationConfig;
    use comply_rules::lifecycle::LifecycleState;
    use comply_storage::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    struct Fixed(f64, ScorerArtifact);

    #[async_trait]
    impl ScoringBackend for Fixed {
        async fn predict(&self, _features: &FeatureVector) -> Result<f64, ScoringError> {
            Ok(self.0)
        }

        fn artifact(&self) -> &ScorerArtifact {
            &self.1
        }
    }

    fn fixed(p: f64) -> Arc<dyn ScoringBackend> {
        Arc::new(Fixed(
            p,
            ScorerArtifact {
                name: "fixed".into(),
                version: "1".into(),
                sha256: "ab".repeat(32),
                config: json!({}),
                created_at: Utc::now(),
            },
        ))
    }

    #[tokio::test]
    async fn output_is_clamped_and_tagged() {
        let store = MemoryStore::new();
        let scorer = RiskScorer::new(Arc::new(store.clone()), fixed(1.7));
        let est = scorer.score("u1").await.unwrap();
        assert_eq!(est.risk, 1.0);
        assert_eq!(est.artifact.name, "fixed");
        assert!(store.get_artifact("fixed", "1").await.unwrap().is_some());

        let low = RiskScorer::new(Arc::new(store), fixed(-0.2));
        assert_eq!(low.score("u1").await.unwrap().risk, 0.0);
    }

    #[tokio::test]
    async fn features_reflect_violation_history() {
        let store = MemoryStore::new();
        store
            .save_policy(&policy(GEOTAG_POLICY, LifecycleState::Active))
            .await
            .unwrap();
        let shared: Arc<dyn ComplianceStore> = Arc::new(store.clone());
        let chain = Arc::new(EventChain::new(shared.clone(), signer()));
        let cache = Arc::new(ActivePolicyCache::new(shared.clone(), Duration::from_secs(60), 8, 10));
        let orch = Orchestrator::new(shared.clone(), chain, cache, &EvaluationConfig::default());

        let now = Utc::now();
        orch.submit_event(new_event(
            "post",
            "u1",
            now,
            json!({"geotag_enabled": true, "location_precise": true}),
        ))
        .await
        .unwrap();

        let scorer = RiskScorer::new(shared, Arc::new(WeightedScorer::with_defaults("risk", "1")));
        let est = scorer.score_at("u1", now + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(est.features.violations_24h, 1);
        assert_eq!(est.features.high_30d, 1);
        assert_eq!(est.features.unresolved, 1);
        assert_eq!(est.features.events_24h, 1);
        assert!(est.factors.iter().any(|f| f.feature == "high_30d"));
        assert!(est.risk > 0.0 && est.risk < 1.0);
    }

    #[tokio::test]
    async fn conflicting_artifact_is_rejected() {
        let store = MemoryStore::new();
        let mut other = fixed(0.5).artifact().clone();
        other.sha256 = "cd".repeat(32);
        store.register_artifact(&other).await.unwrap();
        let scorer = RiskScorer::new(Arc::new(store), fixed(0.5));
        assert!(matches!(
            scorer.score("u1").await,
            Err(ScoringError::Store(StoreError::Conflict(_)))
        ));
    }
}
