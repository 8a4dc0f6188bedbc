use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ComplyError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Deployment environment label, e.g. `development` or `production`.
    pub environment: String,
    pub postgres: PostgresConfig,
    pub signing: SigningConfig,
    /// Key being rotated out, present when `PREVIOUS_SIGNING_KEY_ID` is set.
    pub previous_signing: Option<SigningConfig>,
    pub evaluation: EvaluationConfig,
    pub cache: CacheConfig,
    pub scorer: ScorerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `COMPLY_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("COMPLY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            environment: profiled_env_or(p, "COMPLY_ENV", "development").to_lowercase(),
            postgres: PostgresConfig::from_env_profiled(p),
            signing: SigningConfig::from_env_profiled(p),
            previous_signing: SigningConfig::previous_from_env_profiled(p),
            evaluation: EvaluationConfig::from_env_profiled(p),
            cache: CacheConfig::from_env_profiled(p),
            scorer: ScorerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "prod")
    }

    /// Startup checks. A production environment must carry a dedicated
    /// signing key for the selected provider; nothing falls back to a
    /// general application secret.
    pub fn validate(&self) -> Result<(), ComplyError> {
        if let Err(missing) = self.signing.check_key_material() {
            if self.is_production() {
                return Err(ComplyError::Config(format!(
                    "signing provider '{}' requires {} in production",
                    self.signing.provider, missing
                )));
            }
            tracing::warn!(
                provider = %self.signing.provider,
                missing = %missing,
                "signing key material missing; commands that open the store will fail until it is configured"
            );
        }
        if self.evaluation.max_expression_depth == 0 {
            return Err(ComplyError::Config(
                "EVAL_MAX_EXPRESSION_DEPTH must be at least 1".to_string(),
            ));
        }
        if self.evaluation.dedup_bucket_secs == 0 {
            return Err(ComplyError::Config(
                "EVAL_DEDUP_BUCKET_SECS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}, env: {}):", self.profile_label(), self.environment);
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!("  signing:     provider={}, key_id={}", self.signing.provider, self.signing.key_id);
        tracing::info!(
            "  evaluation:  max_depth={}, threshold_timeout={}ms, bucket={}s",
            self.evaluation.max_expression_depth,
            self.evaluation.threshold_timeout_ms,
            self.evaluation.dedup_bucket_secs
        );
        tracing::info!("  cache:       ttl={}s, capacity={}", self.cache.active_policy_ttl_secs, self.cache.capacity);
        tracing::info!("  scorer:      backend={}, name={} v{}", self.scorer.backend, self.scorer.name, self.scorer.version);
    }

    /// Return a redacted view safe for display (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "environment": self.environment,
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "signing": {
                "provider": self.signing.provider,
                "key_id": self.signing.key_id,
                "configured": self.signing.check_key_material().is_ok(),
            },
            "evaluation": self.evaluation,
            "cache": self.cache,
            "scorer": {
                "backend": self.scorer.backend,
                "name": self.scorer.name,
                "version": self.scorer.version,
            },
        })
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "compliance"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Signing ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// "hmac", "ed25519", "vault"
    pub provider: String,
    /// Identifier recorded next to every signature.
    pub key_id: String,
    #[serde(skip_serializing)]
    pub hmac_key: Option<String>,
    /// Hex-encoded 32-byte Ed25519 secret.
    #[serde(skip_serializing)]
    pub ed25519_secret: Option<String>,
    pub vault_addr: Option<String>,
    #[serde(skip_serializing)]
    pub vault_token: Option<String>,
    pub vault_transit_key: Option<String>,
    pub timeout_ms: u64,
}

impl SigningConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            provider: profiled_env_or(p, "SIGNING_PROVIDER", "hmac").to_lowercase(),
            key_id: profiled_env_or(p, "SIGNING_KEY_ID", "default"),
            hmac_key: profiled_env_opt(p, "SIGNING_HMAC_KEY"),
            ed25519_secret: profiled_env_opt(p, "SIGNING_ED25519_SECRET"),
            vault_addr: profiled_env_opt(p, "VAULT_ADDR"),
            vault_token: profiled_env_opt(p, "VAULT_TOKEN"),
            vault_transit_key: profiled_env_opt(p, "VAULT_TRANSIT_KEY"),
            timeout_ms: profiled_env_u64(p, "SIGNING_TIMEOUT_MS", 2000),
        }
    }

    /// The key being rotated out. Reads the `PREVIOUS_`-prefixed signing
    /// settings; the provider defaults to the current one and Vault address
    /// and token are shared.
    fn previous_from_env_profiled(p: &str) -> Option<Self> {
        let key_id = profiled_env_opt(p, "PREVIOUS_SIGNING_KEY_ID")?;
        let current = Self::from_env_profiled(p);
        Some(Self {
            provider: profiled_env_or(p, "PREVIOUS_SIGNING_PROVIDER", &current.provider).to_lowercase(),
            key_id,
            hmac_key: profiled_env_opt(p, "PREVIOUS_SIGNING_HMAC_KEY"),
            ed25519_secret: profiled_env_opt(p, "PREVIOUS_SIGNING_ED25519_SECRET"),
            vault_transit_key: profiled_env_opt(p, "PREVIOUS_VAULT_TRANSIT_KEY"),
            ..current
        })
    }

    /// Check that the selected provider has its dedicated key material.
    /// Returns the name of the first missing setting.
    pub fn check_key_material(&self) -> Result<(), &'static str> {
        match self.provider.as_str() {
            "hmac" => self.hmac_key.as_ref().map(|_| ()).ok_or("SIGNING_HMAC_KEY"),
            "ed25519" => self
                .ed25519_secret
                .as_ref()
                .map(|_| ())
                .ok_or("SIGNING_ED25519_SECRET"),
            "vault" => {
                if self.vault_addr.is_none() {
                    Err("VAULT_ADDR")
                } else if self.vault_token.is_none() {
                    Err("VAULT_TOKEN")
                } else if self.vault_transit_key.is_none() {
                    Err("VAULT_TRANSIT_KEY")
                } else {
                    Ok(())
                }
            }
            _ => Err("a supported SIGNING_PROVIDER (hmac, ed25519, vault)"),
        }
    }
}

// ── Evaluation ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub max_expression_depth: usize,
    pub expression_timeout_ms: u64,
    pub threshold_timeout_ms: u64,
    /// Dedup bucket width for controls without a threshold window.
    pub dedup_bucket_secs: u64,
}

impl EvaluationConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_expression_depth: profiled_env_u32(p, "EVAL_MAX_EXPRESSION_DEPTH", 10) as usize,
            expression_timeout_ms: profiled_env_u64(p, "EVAL_EXPRESSION_TIMEOUT_MS", 250),
            threshold_timeout_ms: profiled_env_u64(p, "EVAL_THRESHOLD_TIMEOUT_MS", 1000),
            dedup_bucket_secs: profiled_env_u64(p, "EVAL_DEDUP_BUCKET_SECS", 3600),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_expression_depth: 10,
            expression_timeout_ms: 250,
            threshold_timeout_ms: 1000,
            dedup_bucket_secs: 3600,
        }
    }
}

// ── Active-policy cache ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub active_policy_ttl_secs: u64,
    pub capacity: usize,
}

impl CacheConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            active_policy_ttl_secs: profiled_env_u64(p, "POLICY_CACHE_TTL_SECS", 300),
            capacity: profiled_env_u32(p, "POLICY_CACHE_CAPACITY", 256) as usize,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            active_policy_ttl_secs: 300,
            capacity: 256,
        }
    }
}

// ── Risk scorer ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// "weighted", "http"
    pub backend: String,
    pub url: Option<String>,
    pub name: String,
    pub version: String,
    pub timeout_ms: u64,
}

impl ScorerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backend: profiled_env_or(p, "SCORER_BACKEND", "weighted").to_lowercase(),
            url: profiled_env_opt(p, "SCORER_URL"),
            name: profiled_env_or(p, "SCORER_NAME", "weighted-risk"),
            version: profiled_env_or(p, "SCORER_VERSION", "1"),
            timeout_ms: profiled_env_u64(p, "SCORER_TIMEOUT_MS", 2000),
        }
    }
}
