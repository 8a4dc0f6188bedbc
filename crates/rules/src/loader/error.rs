//! Error types and load result structures for the policy loader.

use std::path::PathBuf;

use crate::validation::ValidationResult;

/// Errors that can occur while loading policy documents.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Document header is unusable (bad apiVersion, kind or metadata).
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result alias for loader operations.
pub type Result<T> = std::result::Result<T, RuleError>;

/// Outcome of loading a single policy file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

/// Status of a single file load attempt.
#[derive(Debug)]
pub enum LoadStatus {
    /// Document loaded. Controls that failed validation are reported in
    /// `validation` and will be stored with `expression_valid = false`.
    Loaded {
        policy: String,
        validation: ValidationResult,
    },
    /// File was skipped (dotfile, non-YAML).
    Skipped { reason: String },
    /// Parse or header validation error.
    Failed { error: String },
}
