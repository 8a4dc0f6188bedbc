//! HashiCorp Vault transit-engine signer.
//!
//! Keys never leave Vault: `sign` posts the payload to
//! `/v1/transit/sign/{key}/sha2-256` and keeps the returned
//! `vault:vN:<base64>` string as the signature bytes, so `verify` can hand it
//! back unchanged.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::traits::{SigningError, SigningProvider};

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    input: &'a str,
    signature: &'a str,
}

#[derive(Debug, Deserialize)]
struct VaultResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct SignData {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    valid: bool,
}

pub struct VaultTransitSigner {
    addr: String,
    token: String,
    transit_key: String,
    key_id: String,
    client: reqwest::Client,
}

impl VaultTransitSigner {
    pub fn new(
        addr: impl Into<String>,
        token: impl Into<String>,
        transit_key: impl Into<String>,
        key_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SigningError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SigningError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            addr: addr.into().trim_end_matches('/').to_string(),
            token: token.into(),
            transit_key: transit_key.into(),
            key_id: key_id.into(),
            client,
        })
    }

    fn url(&self, op: &str) -> String {
        format!("{}/v1/transit/{}/{}/sha2-256", self.addr, op, self.transit_key)
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        op: &str,
        body: &B,
    ) -> Result<T, SigningError> {
        let response = self
            .client
            .post(self.url(op))
            .header("X-Vault-Token", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(op, error = %e, "vault request failed");
                SigningError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(SigningError::Unavailable(format!("vault returned {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SigningError::Config(format!("vault returned {}: {}", status, text)));
        }

        let parsed: VaultResponse<T> = response.json().await?;
        Ok(parsed.data)
    }
}

#[async_trait::async_trait]
impl SigningProvider for VaultTransitSigner {
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SigningError> {
        let input = BASE64.encode(payload);
        let data: SignData = self.post("sign", &SignRequest { input: &input }).await?;
        if !data.signature.starts_with("vault:") {
            return Err(SigningError::Malformed(format!(
                "unexpected vault signature format: {}",
                data.signature
            )));
        }
        Ok(data.signature.into_bytes())
    }

    async fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<bool, SigningError> {
        let signature = std::str::from_utf8(signature)
            .map_err(|_| SigningError::Malformed("vault signature is not UTF-8".to_string()))?;
        let input = BASE64.encode(payload);
        let data: VerifyData = self
            .post(
                "verify",
                &VerifyRequest {
                    input: &input,
                    signature,
                },
            )
            .await?;
        Ok(data.valid)
    }

    fn algorithm(&self) -> &str {
        "vault-transit"
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_strip_trailing_slash() {
        let s = VaultTransitSigner::new(
            "https://vault.local:8200/",
            "t",
            "compliance",
            "vault-1",
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(
            s.url("sign"),
            "https://vault.local:8200/v1/transit/sign/compliance/sha2-256"
        );
    }

    #[tokio::test]
    async fn unreachable_vault_is_unavailable() {
        let s = VaultTransitSigner::new(
            "http://127.0.0.1:1",
            "t",
            "compliance",
            "vault-1",
            Duration::from_millis(200),
        )
        .unwrap();
        let err = s.sign(b"x").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
