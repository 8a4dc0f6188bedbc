//! Signed audit bundles.
//!
//! A bundle is a directory holding:
//! - `violations.json`: every violation created in the period,
//! - `report.txt`: totals by policy, severity and resolution,
//! - `manifest.json`: period, count and the SHA-256 of each data file,
//! - `bundle.sig`: hash of the manifest bytes and a detached signature over it.
//!
//! Verification needs only the bundle and a signing provider holding the same
//! key. Every kind of mismatch is its own [`ExportError`] variant.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use comply_core::{Severity, Violation};
use comply_signing::{SigningError, SigningProvider};
use comply_storage::{ComplianceStore, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

pub const VIOLATIONS_FILE: &str = "violations.json";
pub const REPORT_FILE: &str = "report.txt";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "bundle.sig";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("export period is empty: {from} is after {to}")]
    InvalidPeriod { from: DateTime<Utc>, to: DateTime<Utc> },

    #[error("bundle file missing: {0}")]
    MissingFile(String),

    #[error("hash mismatch for {file}: manifest {expected}, actual {actual}")]
    FileHashMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("manifest hash mismatch: signed {expected}, actual {actual}")]
    ManifestHashMismatch { expected: String, actual: String },

    #[error("bundle signed with key '{found}', verifier holds '{expected}'")]
    KeyMismatch { expected: String, found: String },

    #[error("bundle signature does not verify")]
    SignatureInvalid,

    #[error("violation count mismatch: manifest {expected}, data {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDigest {
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub period: Period,
    pub violation_count: usize,
    pub files: BTreeMap<String, FileDigest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSignature {
    pub manifest_hash: String,
    /// Hex-encoded signature over the `manifest_hash` string.
    pub signature: String,
    pub algorithm: String,
    pub key_id: String,
    pub signed_at: DateTime<Utc>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Human-readable totals for `report.txt`.
pub fn render_report(period: &Period, generated_at: DateTime<Utc>, violations: &[Violation]) -> String {
    let mut by_policy: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    let mut by_resolution: BTreeMap<&str, usize> = BTreeMap::new();
    for v in violations {
        *by_policy.entry(v.policy_name.as_str()).or_default() += 1;
        *by_severity.entry(v.severity).or_default() += 1;
        *by_resolution.entry(v.resolution.as_str()).or_default() += 1;
    }

    let ts = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut out = String::new();
    let _ = writeln!(out, "Compliance violation report");
    let _ = writeln!(out, "Period:    {} .. {}", ts(period.from), ts(period.to));
    let _ = writeln!(out, "Generated: {}", ts(generated_at));
    let _ = writeln!(out, "Total violations: {}", violations.len());
    let _ = writeln!(out, "\nBy policy:");
    for (policy, n) in &by_policy {
        let _ = writeln!(out, "  {:<32} {:>6}", policy, n);
    }
    let _ = writeln!(out, "\nBy severity:");
    for severity in Severity::ALL.iter().rev() {
        let _ = writeln!(
            out,
            "  {:<32} {:>6}",
            severity.as_str(),
            by_severity.get(severity).copied().unwrap_or(0)
        );
    }
    let _ = writeln!(out, "\nBy resolution:");
    for (state, n) in &by_resolution {
        let _ = writeln!(out, "  {:<32} {:>6}", state, n);
    }
    out
}

/// Write a signed bundle of the violations created in `[from, to]` to `out`.
pub async fn export_bundle(
    store: &dyn ComplianceStore,
    signer: &dyn SigningProvider,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    out: &Path,
) -> Result<Manifest, ExportError> {
    if from > to {
        return Err(ExportError::InvalidPeriod { from, to });
    }
    let violations = store.violations_between(from, to).await?;
    let generated_at = Utc::now();
    let period = Period { from, to };

    let data = serde_json::to_vec_pretty(&violations)?;
    let report = render_report(&period, generated_at, &violations);

    tokio::fs::create_dir_all(out).await?;
    tokio::fs::write(out.join(VIOLATIONS_FILE), &data).await?;
    tokio::fs::write(out.join(REPORT_FILE), report.as_bytes()).await?;

    let mut files = BTreeMap::new();
    files.insert(VIOLATIONS_FILE.to_string(), FileDigest { sha256: sha256_hex(&data) });
    files.insert(
        REPORT_FILE.to_string(),
        FileDigest {
            sha256: sha256_hex(report.as_bytes()),
        },
    );
    let manifest = Manifest {
        generated_at,
        period,
        violation_count: violations.len(),
        files,
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    tokio::fs::write(out.join(MANIFEST_FILE), &manifest_bytes).await?;

    let manifest_hash = sha256_hex(&manifest_bytes);
    let signature = signer.sign(manifest_hash.as_bytes()).await?;
    let sig = BundleSignature {
        manifest_hash,
        signature: hex::encode(signature),
        algorithm: signer.algorithm().to_string(),
        key_id: signer.key_id().to_string(),
        signed_at: Utc::now(),
    };
    tokio::fs::write(out.join(SIGNATURE_FILE), serde_json::to_vec_pretty(&sig)?).await?;

    info!(
        path = %out.display(),
        violations = manifest.violation_count,
        manifest_hash = %sig.manifest_hash,
        "export bundle written"
    );
    Ok(manifest)
}

async fn read_bundle_file(dir: &Path, name: &str) -> Result<Vec<u8>, ExportError> {
    match tokio::fs::read(dir.join(name)).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExportError::MissingFile(name.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Check a bundle offline: signature, manifest hash, then every file hash.
pub async fn verify_bundle(signer: &dyn SigningProvider, dir: &Path) -> Result<Manifest, ExportError> {
    let manifest_bytes = read_bundle_file(dir, MANIFEST_FILE).await?;
    let sig: BundleSignature = serde_json::from_slice(&read_bundle_file(dir, SIGNATURE_FILE).await?)?;

    if sig.key_id != signer.key_id() {
        return Err(ExportError::KeyMismatch {
            expected: signer.key_id().to_string(),
            found: sig.key_id,
        });
    }
    let signature = hex::decode(&sig.signature).map_err(|_| ExportError::SignatureInvalid)?;
    if !signer.verify(sig.manifest_hash.as_bytes(), &signature).await? {
        warn!(path = %dir.display(), "bundle signature rejected");
        return Err(ExportError::SignatureInvalid);
    }

    let actual = sha256_hex(&manifest_bytes);
    if actual != sig.manifest_hash {
        return Err(ExportError::ManifestHashMismatch {
            expected: sig.manifest_hash,
            actual,
        });
    }

    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;
    for (name, digest) in &manifest.files {
        let bytes = read_bundle_file(dir, name).await?;
        let actual = sha256_hex(&bytes);
        if actual != digest.sha256 {
            return Err(ExportError::FileHashMismatch {
                file: name.clone(),
                expected: digest.sha256.clone(),
                actual,
            });
        }
        if name == VIOLATIONS_FILE {
            let violations: Vec<Violation> = serde_json::from_slice(&bytes)?;
            if violations.len() != manifest.violation_count {
                return Err(ExportError::CountMismatch {
                    expected: manifest.violation_count,
                    actual: violations.len(),
                });
            }
        }
    }

    info!(path = %dir.display(), violations = manifest.violation_count, "export bundle verified");
    Ok(manifest)
}
