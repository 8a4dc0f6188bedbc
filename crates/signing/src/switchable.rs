//! A signer wrapper whose availability can be toggled at runtime.
//!
//! Used to drill deferred signing: while switched off every call fails with
//! [`SigningError::Unavailable`], exactly as an unreachable remote KMS would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::traits::{SigningError, SigningProvider};

pub struct SwitchableSigner {
    inner: Arc<dyn SigningProvider>,
    available: AtomicBool,
}

impl SwitchableSigner {
    pub fn new(inner: Arc<dyn SigningProvider>) -> Self {
        Self {
            inner,
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), SigningError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SigningError::Unavailable(format!(
                "provider for key '{}' switched off",
                self.inner.key_id()
            )))
        }
    }
}

#[async_trait::async_trait]
impl SigningProvider for SwitchableSigner {
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        self.check()?;
        self.inner.sign(payload).await
    }

    async fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<bool, SigningError> {
        self.check()?;
        self.inner.verify(payload, signature).await
    }

    fn algorithm(&self) -> &str {
        self.inner.algorithm()
    }

    fn key_id(&self) -> &str {
        self.inner.key_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symmetric::HmacSigner;

    #[tokio::test]
    async fn outage_then_recovery() {
        let inner = Arc::new(HmacSigner::new(vec![1u8; 32], "k").unwrap());
        let s = SwitchableSigner::new(inner);
        s.set_available(false);
        assert!(matches!(s.sign(b"x").await, Err(SigningError::Unavailable(_))));
        s.set_available(true);
        let sig = s.sign(b"x").await.unwrap();
        assert!(s.verify(b"x", &sig).await.unwrap());
        assert_eq!(s.algorithm(), "hmac-sha256");
    }
}
