use std::sync::Arc;
use std::time::Duration;

use comply_core::config::SigningConfig;
use tracing::info;

use crate::ed25519::Ed25519Signer;
use crate::symmetric::HmacSigner;
use crate::traits::{SigningError, SigningProvider};
use crate::vault::VaultTransitSigner;

/// Build the configured provider.
///
/// Each provider reads only its own dedicated key setting; a missing key is
/// a configuration error, never a fallback to another secret.
pub fn from_config(config: &SigningConfig) -> Result<Arc<dyn SigningProvider>, SigningError> {
    let missing = |name: &str| SigningError::Config(format!("{} is not set", name));

    let provider: Arc<dyn SigningProvider> = match config.provider.as_str() {
        "hmac" => {
            let key = config.hmac_key.as_ref().ok_or_else(|| missing("SIGNING_HMAC_KEY"))?;
            Arc::new(HmacSigner::new(key.as_bytes().to_vec(), &config.key_id)?)
        }
        "ed25519" => {
            let secret = config
                .ed25519_secret
                .as_ref()
                .ok_or_else(|| missing("SIGNING_ED25519_SECRET"))?;
            Arc::new(Ed25519Signer::from_hex_secret(secret, &config.key_id)?)
        }
        "vault" => {
            let addr = config.vault_addr.as_ref().ok_or_else(|| missing("VAULT_ADDR"))?;
            let token = config.vault_token.as_ref().ok_or_else(|| missing("VAULT_TOKEN"))?;
            let key = config
                .vault_transit_key
                .as_ref()
                .ok_or_else(|| missing("VAULT_TRANSIT_KEY"))?;
            Arc::new(VaultTransitSigner::new(
                addr,
                token,
                key,
                &config.key_id,
                Duration::from_millis(config.timeout_ms),
            )?)
        }
        other => {
            return Err(SigningError::Config(format!(
                "unknown signing provider '{}': expected hmac, ed25519 or vault",
                other
            )))
        }
    };

    info!(
        provider = %config.provider,
        algorithm = provider.algorithm(),
        key_id = provider.key_id(),
        "signing provider ready"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> SigningConfig {
        SigningConfig {
            provider: provider.to_string(),
            key_id: "k1".to_string(),
            hmac_key: None,
            ed25519_secret: None,
            vault_addr: None,
            vault_token: None,
            vault_transit_key: None,
            timeout_ms: 100,
        }
    }

    #[test]
    fn missing_dedicated_key_is_an_error() {
        let err = from_config(&config("hmac")).err().unwrap();
        assert!(err.to_string().contains("SIGNING_HMAC_KEY"));
    }

    #[test]
    fn builds_each_provider() {
        let mut c = config("hmac");
        c.hmac_key = Some("0123456789abcdef0123456789abcdef".to_string());
        assert_eq!(from_config(&c).unwrap().algorithm(), "hmac-sha256");

        let mut c = config("ed25519");
        c.ed25519_secret = Some(Ed25519Signer::generate("k1").secret_hex());
        assert_eq!(from_config(&c).unwrap().algorithm(), "ed25519");

        let mut c = config("vault");
        c.vault_addr = Some("https://vault.local".to_string());
        c.vault_token = Some("t".to_string());
        c.vault_transit_key = Some("compliance".to_string());
        assert_eq!(from_config(&c).unwrap().key_id(), "k1");
    }

    #[test]
    fn unknown_provider_rejected() {
        assert!(from_config(&config("kms")).is_err());
    }
}
