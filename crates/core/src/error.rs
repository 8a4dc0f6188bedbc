use thiserror::Error;

/// Error kinds surfaced by the compliance core to its callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComplyError {
    /// Policy-authoring error, fatal to the offending control only.
    #[error("invalid expression in control '{control}': {reason}")]
    InvalidExpression { control: String, reason: String },

    #[error("expression nesting depth {depth} exceeds limit {max}")]
    ExpressionTooDeep { depth: usize, max: usize },

    #[error("evaluation of control '{control}' timed out after {after_ms}ms")]
    EvaluationTimeout { control: String, after_ms: u64 },

    /// Retryable: the caller should back off and try again.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Expected race outcome. Never reported as a failure.
    #[error("violation already exists for dedup key {0}")]
    DuplicateViolation(String),

    /// Tamper or gap in an event hash chain. Signing halts for the stream.
    #[error("chain integrity violation in stream '{stream}' at position {position}: {reason}")]
    ChainIntegrityViolation {
        stream: String,
        position: u64,
        reason: String,
    },

    /// Signing deferred; the event stays hashed until a retry succeeds.
    #[error("signing unavailable: {0}")]
    SigningUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl ComplyError {
    /// Whether the orchestrator's caller should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ComplyError::StoreUnavailable(_) | ComplyError::SigningUnavailable(_)
        )
    }
}
