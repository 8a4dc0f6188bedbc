//! Fresh key material for the local providers, printed as the settings the
//! factory reads.

use rand::RngCore;
use serde::Serialize;

use crate::ed25519::Ed25519Signer;
use crate::symmetric::MIN_KEY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Hmac,
    Ed25519,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedKey {
    pub provider: &'static str,
    pub key_id: String,
    /// Hex-encoded secret. Never logged.
    pub secret: String,
    /// Hex-encoded verifying key, for asymmetric algorithms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl GeneratedKey {
    pub fn generate(algorithm: KeyAlgorithm, key_id: impl Into<String>) -> Self {
        let key_id = key_id.into();
        match algorithm {
            KeyAlgorithm::Hmac => {
                let mut bytes = [0u8; MIN_KEY_LEN];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                Self {
                    provider: "hmac",
                    key_id,
                    secret: hex::encode(bytes),
                    public_key: None,
                }
            }
            KeyAlgorithm::Ed25519 => {
                let signer = Ed25519Signer::generate(key_id.clone());
                Self {
                    provider: "ed25519",
                    key_id,
                    secret: signer.secret_hex(),
                    public_key: Some(signer.public_key_hex()),
                }
            }
        }
    }

    /// `.env` lines selecting this key. With `prefix = "PREVIOUS_"` the
    /// lines configure the key being rotated out instead.
    pub fn env_lines(&self, prefix: &str) -> String {
        let secret_var = match self.provider {
            "ed25519" => "SIGNING_ED25519_SECRET",
            _ => "SIGNING_HMAC_KEY",
        };
        let mut out = format!(
            "{prefix}SIGNING_PROVIDER={}\n{prefix}SIGNING_KEY_ID={}\n{prefix}{secret_var}={}\n",
            self.provider, self.key_id, self.secret
        );
        if let Some(public) = &self.public_key {
            out.push_str(&format!("# public key: {public}\n"));
        }
        out
    }
}
