//! Signing provider trait and shared error type.

use comply_core::ComplyError;

/// Errors raised by signing providers.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The provider cannot be reached right now. Signing is deferred.
    #[error("signing provider unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SigningError {
    /// Whether the operation should be retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SigningError::Unavailable(_) => true,
            SigningError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }
}

impl From<SigningError> for ComplyError {
    fn from(e: SigningError) -> Self {
        match e {
            SigningError::Config(msg) | SigningError::KeyMaterial(msg) => ComplyError::Config(msg),
            other if other.is_retryable() => ComplyError::SigningUnavailable(other.to_string()),
            other => ComplyError::Other(other.to_string()),
        }
    }
}

/// A provider-agnostic signer: local symmetric key, local asymmetric key or
/// remote KMS are interchangeable behind this trait.
#[async_trait::async_trait]
pub trait SigningProvider: Send + Sync {
    /// Sign `payload`, returning raw signature bytes.
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError>;

    /// Check `signature` over `payload`. A well-formed but wrong signature
    /// is `Ok(false)`.
    async fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<bool, SigningError>;

    /// Algorithm label recorded next to each signature, e.g. `hmac-sha256`.
    fn algorithm(&self) -> &str;

    /// Key identifier recorded next to each signature.
    fn key_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_maps_to_signing_unavailable() {
        let err: ComplyError = SigningError::Unavailable("vault sealed".into()).into();
        assert!(matches!(err, ComplyError::SigningUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn key_errors_are_config_errors() {
        let err: ComplyError = SigningError::KeyMaterial("short key".into()).into();
        assert!(matches!(err, ComplyError::Config(_)));
        assert!(!SigningError::Malformed("x".into()).is_retryable());
    }
}
