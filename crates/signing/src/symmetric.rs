//! Local HMAC-SHA256 signer.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::traits::{SigningError, SigningProvider};

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted key length in bytes.
pub const MIN_KEY_LEN: usize = 32;

/// Symmetric signer over a dedicated key. Verification needs the same key.
pub struct HmacSigner {
    key: Vec<u8>,
    key_id: String,
}

impl HmacSigner {
    pub fn new(key: impl Into<Vec<u8>>, key_id: impl Into<String>) -> Result<Self, SigningError> {
        let key = key.into();
        if key.len() < MIN_KEY_LEN {
            return Err(SigningError::KeyMaterial(format!(
                "HMAC key must be at least {} bytes, got {}",
                MIN_KEY_LEN,
                key.len()
            )));
        }
        Ok(Self {
            key,
            key_id: key_id.into(),
        })
    }

    fn mac(&self) -> Result<HmacSha256, SigningError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| SigningError::KeyMaterial(e.to_string()))
    }
}

#[async_trait::async_trait]
impl SigningProvider for HmacSigner {
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    async fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<bool, SigningError> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(mac.verify_slice(signature).is_ok())
    }

    fn algorithm(&self) -> &str {
        "hmac-sha256"
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}
