use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Versioned descriptor of the risk-scoring model in use.
///
/// Every risk estimate carries the artifact that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScorerArtifact {
    pub name: String,
    pub version: String,
    /// Hex SHA-256 of the scorer's configuration or model bytes.
    pub sha256: String,
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ScorerArtifact {
    /// `name@version#sha256-prefix`, for log lines.
    pub fn label(&self) -> String {
        let short = &self.sha256[..self.sha256.len().min(12)];
        format!("{}@{}#{}", self.name, self.version, short)
    }
}
