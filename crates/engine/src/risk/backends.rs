//! Scoring backends behind the risk adapter.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use comply_core::config::ScorerConfig;
use comply_core::ScorerArtifact;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::features::FeatureVector;
use super::{RiskFactor, ScoringError};

/// A versioned model mapping a feature vector to a probability.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    async fn predict(&self, features: &FeatureVector) -> Result<f64, ScoringError>;

    /// Provenance of every estimate this backend produces.
    fn artifact(&self) -> &ScorerArtifact;

    /// Largest contributions to the last prediction, for explainable backends.
    fn explain(&self, _features: &FeatureVector) -> Vec<RiskFactor> {
        Vec::new()
    }
}

fn artifact_for(name: &str, version: &str, config: serde_json::Value) -> ScorerArtifact {
    let bytes = serde_json::to_vec(&config).unwrap_or_default();
    ScorerArtifact {
        name: name.to_string(),
        version: version.to_string(),
        sha256: hex::encode(Sha256::digest(&bytes)),
        config,
        created_at: Utc::now(),
    }
}

// ── Weighted (logistic) ──────────────────────────────────────

const TOP_FACTORS: usize = 5;

#[derive(Debug, Clone, Serialize)]
struct WeightedConfig<'a> {
    kind: &'static str,
    bias: f64,
    weights: &'a BTreeMap<String, f64>,
}

/// Logistic model over named feature weights.
pub struct WeightedScorer {
    bias: f64,
    weights: BTreeMap<String, f64>,
    artifact: ScorerArtifact,
}

impl WeightedScorer {
    pub fn new(name: &str, version: &str, bias: f64, weights: BTreeMap<String, f64>) -> Self {
        let config = serde_json::to_value(WeightedConfig {
            kind: "weighted",
            bias,
            weights: &weights,
        })
        .unwrap_or_default();
        Self {
            artifact: artifact_for(name, version, config),
            bias,
            weights,
        }
    }

    pub fn with_defaults(name: &str, version: &str) -> Self {
        let weights = [
            ("violations_24h", 0.6),
            ("violations_30d", 0.08),
            ("low_30d", 0.05),
            ("medium_30d", 0.15),
            ("high_30d", 0.35),
            ("critical_30d", 0.7),
            ("unresolved", 0.25),
            ("distinct_policies_30d", 0.2),
            ("mean_resolution_hours", 0.01),
            ("events_24h", 0.002),
            ("distinct_sources_24h", 0.1),
            ("off_hours_events_24h", 0.08),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self::new(name, version, -3.0, weights)
    }

    fn contributions(&self, features: &FeatureVector) -> Vec<RiskFactor> {
        features
            .named()
            .filter_map(|(name, value)| {
                let weight = self.weights.get(name).copied().unwrap_or(0.0);
                let contribution = weight * value;
                (contribution != 0.0).then(|| RiskFactor {
                    feature: name.to_string(),
                    value,
                    contribution,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ScoringBackend for WeightedScorer {
    async fn predict(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let z = self.bias + self.contributions(features).iter().map(|f| f.contribution).sum::<f64>();
        Ok(1.0 / (1.0 + (-z).exp()))
    }

    fn artifact(&self) -> &ScorerArtifact {
        &self.artifact
    }

    fn explain(&self, features: &FeatureVector) -> Vec<RiskFactor> {
        let mut factors = self.contributions(features);
        factors.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        factors.truncate(TOP_FACTORS);
        factors
    }
}

// ── HTTP ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PredictResponse {
    probability: f64,
}

/// Remote model: `POST {url}` with the feature vector as JSON, answering
/// `{"probability": f}`.
pub struct HttpScorer {
    client: reqwest::Client,
    url: String,
    artifact: ScorerArtifact,
}

impl HttpScorer {
    pub fn new(url: &str, name: &str, version: &str, timeout: Duration) -> Result<Self, ScoringError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let config = serde_json::json!({ "kind": "http", "url": url });
        Ok(Self {
            client,
            url: url.to_string(),
            artifact: artifact_for(name, version, config),
        })
    }
}

#[async_trait]
impl ScoringBackend for HttpScorer {
    async fn predict(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        let resp = self.client.post(&self.url).json(features).send().await?;
        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ScoringError::Unavailable(format!("scoring backend returned {}", status)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ScoringError::Backend(format!("{}: {}", status, body)));
        }
        let body: PredictResponse = resp
            .json()
            .await
            .map_err(|e| ScoringError::Malformed(e.to_string()))?;
        Ok(body.probability)
    }

    fn artifact(&self) -> &ScorerArtifact {
        &self.artifact
    }
}

/// Build the backend selected by `SCORER_BACKEND`.
pub fn backend_from_config(config: &ScorerConfig) -> Result<Arc<dyn ScoringBackend>, ScoringError> {
    match config.backend.as_str() {
        "weighted" => Ok(Arc::new(WeightedScorer::with_defaults(&config.name, &config.version))),
        "http" => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| ScoringError::Config("SCORER_URL is required for the http backend".into()))?;
            Ok(Arc::new(HttpScorer::new(
                url,
                &config.name,
                &config.version,
                Duration::from_millis(config.timeout_ms),
            )?))
        }
        other => Err(ScoringError::Config(format!(
            "unknown scorer backend '{}' (expected weighted or http)",
            other
        ))),
    }
}
