//! Local Ed25519 signer.
//!
//! The secret is configured as 32 hex-encoded bytes. Signatures can be
//! verified offline by anyone holding [`Ed25519Signer::public_key_hex`].

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};

use crate::traits::{SigningError, SigningProvider};

pub struct Ed25519Signer {
    signing_key: SigningKey,
    key_id: String,
}

impl Ed25519Signer {
    pub fn from_hex_secret(secret_hex: &str, key_id: impl Into<String>) -> Result<Self, SigningError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| SigningError::KeyMaterial(format!("invalid secret hex: {}", e)))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SigningError::KeyMaterial("Ed25519 secret must be 32 bytes".to_string()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
            key_id: key_id.into(),
        })
    }

    /// Fresh random key, for tests and key generation.
    pub fn generate(key_id: impl Into<String>) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::rngs::OsRng),
            key_id: key_id.into(),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

#[async_trait::async_trait]
impl SigningProvider for Ed25519Signer {
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        Ok(self.signing_key.sign(payload).to_bytes().to_vec())
    }

    async fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<bool, SigningError> {
        let sig_array: [u8; 64] = signature
            .try_into()
            .map_err(|_| SigningError::Malformed("Ed25519 signature must be 64 bytes".to_string()))?;
        let signature = Signature::from_bytes(&sig_array);
        Ok(self.verifying_key().verify(payload, &signature).is_ok())
    }

    fn algorithm(&self) -> &str {
        "ed25519"
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_through_hex_secret() {
        let generated = Ed25519Signer::generate("k1");
        let restored = Ed25519Signer::from_hex_secret(&generated.secret_hex(), "k1").unwrap();
        assert_eq!(generated.public_key_hex(), restored.public_key_hex());

        let sig = generated.sign(b"manifest").await.unwrap();
        assert!(restored.verify(b"manifest", &sig).await.unwrap());
        assert!(!restored.verify(b"manifest2", &sig).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_length_signature_is_malformed() {
        let s = Ed25519Signer::generate("k1");
        assert!(matches!(
            s.verify(b"x", &[0u8; 10]).await,
            Err(SigningError::Malformed(_))
        ));
    }

    #[test]
    fn bad_secret_rejected() {
        assert!(Ed25519Signer::from_hex_secret("zz", "k").is_err());
        assert!(Ed25519Signer::from_hex_secret("abcd", "k").is_err());
    }
}
