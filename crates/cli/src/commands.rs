use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use comply_core::config::Config;
use comply_core::NewEvent;
use comply_engine::{export_bundle, verify_bundle};
use comply_rules::lifecycle::{Actor, Transition};
use comply_rules::loader::{LoadStatus, PolicyLoader};
use comply_signing::{GeneratedKey, KeyAlgorithm};
use comply_storage::db;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::App;

/// Print `value` as pretty JSON, or fall back to `text` for humans.
fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}

pub fn validate(dir: &Path, max_depth: usize, json: bool) -> Result<()> {
    let loader = PolicyLoader::new(dir.to_path_buf(), max_depth);
    let results = loader
        .load_all()
        .with_context(|| format!("failed to scan {}", dir.display()))?;

    let mut failed = 0;
    let mut invalid = 0;
    let mut rows = Vec::new();
    for result in &results {
        let path = result.path.display().to_string();
        match &result.status {
            LoadStatus::Loaded { policy, validation } => {
                if !validation.valid {
                    invalid += 1;
                }
                rows.push(serde_json::json!({
                    "path": path,
                    "policy": policy,
                    "valid": validation.valid,
                    "errors": validation.errors,
                    "warnings": validation.warnings,
                }));
            }
            LoadStatus::Skipped { reason } => {
                rows.push(serde_json::json!({"path": path, "skipped": reason}));
            }
            LoadStatus::Failed { error } => {
                failed += 1;
                rows.push(serde_json::json!({"path": path, "failed": error}));
            }
        }
    }

    emit(json, &rows, || {
        let mut out = String::new();
        for result in &results {
            match &result.status {
                LoadStatus::Loaded { policy, validation } => {
                    let mark = if validation.valid { "ok" } else { "INVALID" };
                    out.push_str(&format!("{:<8} {} ({})\n", mark, result.path.display(), policy));
                    for e in &validation.errors {
                        out.push_str(&format!("         error: {}\n", e));
                    }
                    for w in &validation.warnings {
                        out.push_str(&format!("         warning: {}: {}\n", w.path, w.message));
                    }
                }
                LoadStatus::Skipped { reason } => {
                    out.push_str(&format!("{:<8} {} ({})\n", "skip", result.path.display(), reason));
                }
                LoadStatus::Failed { error } => {
                    out.push_str(&format!("{:<8} {}: {}\n", "FAILED", result.path.display(), error));
                }
            }
        }
        out.push_str(&format!(
            "{} file(s), {} failed, {} with invalid controls",
            results.len(),
            failed,
            invalid
        ));
        out
    })?;

    if failed > 0 || invalid > 0 {
        bail!("{} policy file(s) failed, {} with invalid controls", failed, invalid);
    }
    Ok(())
}

pub async fn import(app: &App, dir: &Path, json: bool) -> Result<()> {
    let loader = PolicyLoader::new(dir.to_path_buf(), app.config.evaluation.max_expression_depth);
    let report = app.policies().import_dir(&loader).await?;
    emit(json, &report, || {
        let mut out = String::new();
        for (key, id) in &report.imported {
            out.push_str(&format!("imported  {} -> {}\n", key, id));
        }
        for key in &report.unchanged {
            out.push_str(&format!("unchanged {}\n", key));
        }
        for key in &report.invalid_controls {
            out.push_str(&format!("invalid   {} (stored, never evaluated)\n", key));
        }
        for (path, error) in &report.failed {
            out.push_str(&format!("failed    {}: {}\n", path, error));
        }
        out.trim_end().to_string()
    })
}

pub async fn transition(
    app: &App,
    policy_id: Uuid,
    transition: &str,
    actor: Actor,
    justification: &str,
    json: bool,
) -> Result<()> {
    let Some(transition) = Transition::parse(transition) else {
        bail!("unknown transition '{}': expected submit, approve, reject or retire", transition);
    };
    let policy = app
        .policies()
        .transition(policy_id, transition, &actor, justification)
        .await?;
    emit(json, &policy, || {
        format!("{}@{} is now {}", policy.name, policy.version, policy.lifecycle)
    })
}

/// Events from a JSON document holding one event or an array of them.
pub fn parse_events(bytes: &[u8]) -> Result<Vec<NewEvent>> {
    let value: serde_json::Value = serde_json::from_slice(bytes).context("event file is not JSON")?;
    let events = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(events)
}

pub async fn submit(app: &App, file: &Path, json: bool) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let events = parse_events(&bytes)?;
    let orchestrator = app.orchestrator();

    let mut reports = Vec::with_capacity(events.len());
    for event in events {
        let report = orchestrator.submit_event(event).await?;
        if !report.is_complete() {
            warn!(event_id = %report.event_id, faults = report.faults.len(), "evaluation incomplete");
        }
        reports.push(report);
    }

    emit(json, &reports, || {
        reports
            .iter()
            .map(|r| {
                format!(
                    "{} {:?}: {} control(s), {} new violation(s), {} existing, {} fault(s)",
                    r.event_id,
                    r.status,
                    r.controls_evaluated,
                    r.created.len(),
                    r.existing.len(),
                    r.faults.len()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

pub async fn sign_pending(app: &App, limit: usize, json: bool) -> Result<()> {
    let report = app.orchestrator().sign_pending(limit).await?;
    emit(json, &report, || {
        format!(
            "linked {}, signed {}, deferred {}, skipped {}, halted streams: {}",
            report.linked,
            report.signed,
            report.deferred,
            report.skipped,
            if report.halted_streams.is_empty() {
                "none".to_string()
            } else {
                report.halted_streams.join(", ")
            }
        )
    })
}

pub async fn process_pending(app: &App, limit: usize, json: bool) -> Result<()> {
    let report = app.orchestrator().process_unprocessed(limit).await?;
    emit(json, &report, || {
        format!(
            "processed {}, violations created {}, incomplete {}",
            report.processed, report.violations_created, report.incomplete
        )
    })
}

pub async fn verify_chain(app: &App, stream: &str, json: bool) -> Result<()> {
    let report = app.orchestrator().verify_stream(stream).await?;
    emit(json, &report, || {
        format!(
            "stream {}: {} event(s), {} linked, {} signature(s) verified, {} unchecked, head {}",
            report.stream,
            report.events,
            report.linked,
            report.signatures_verified,
            report.signatures_unchecked,
            report.head_hash.as_deref().unwrap_or("-")
        )
    })
}

pub async fn export(app: &App, from: DateTime<Utc>, to: DateTime<Utc>, out: &Path, json: bool) -> Result<()> {
    let manifest = export_bundle(app.store.as_ref(), app.signer.as_ref(), from, to, out).await?;
    emit(json, &manifest, || {
        format!(
            "wrote {} violation(s) for {} .. {} to {}",
            manifest.violation_count,
            manifest.period.from,
            manifest.period.to,
            out.display()
        )
    })
}

pub async fn verify_exported(app: &App, dir: &Path, json: bool) -> Result<()> {
    let manifest = verify_bundle(app.signer.as_ref(), dir).await?;
    emit(json, &manifest, || {
        format!(
            "bundle ok: {} violation(s), {} file(s) verified",
            manifest.violation_count,
            manifest.files.len()
        )
    })
}

pub async fn score(app: &App, user: &str, json: bool) -> Result<()> {
    let estimate = app.scorer()?.score(user).await?;
    emit(json, &estimate, || {
        let mut out = format!(
            "{}: risk {:.3} ({})\n",
            estimate.subject,
            estimate.risk,
            estimate.artifact.label()
        );
        for f in &estimate.factors {
            out.push_str(&format!("  {:<32} value {:>8.2}  contribution {:+.3}\n", f.feature, f.value, f.contribution));
        }
        out.trim_end().to_string()
    })
}

/// Generate a key and print, or write to `out`, the settings that select it.
pub fn keygen(algorithm: KeyAlgorithm, key_id: &str, out: Option<&Path>, json: bool) -> Result<()> {
    let key = GeneratedKey::generate(algorithm, key_id);
    match out {
        Some(path) => {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .with_context(|| format!("refusing to write {}", path.display()))?;
            file.write_all(key.env_lines("").as_bytes())?;
            info!(key_id, provider = key.provider, path = %path.display(), "signing key written");
            emit(json, &serde_json::json!({
                "provider": key.provider,
                "key_id": key.key_id,
                "public_key": key.public_key,
                "path": path.display().to_string(),
            }), || format!("wrote {} key '{}' to {}", key.provider, key.key_id, path.display()))
        }
        None => emit(json, &key, || key.env_lines("").trim_end().to_string()),
    }
}

/// Re-sign the chain under the configured key, verifying each signature
/// made by the previous key first.
pub async fn rotate_keys(app: &App, batch_size: usize, dry_run: bool, json: bool) -> Result<()> {
    let Some(previous) = &app.config.previous_signing else {
        bail!("set PREVIOUS_SIGNING_KEY_ID and the previous key's material to rotate");
    };
    let previous = comply_signing::from_config(previous).context("failed to initialise previous signing provider")?;

    if dry_run {
        let affected = app.store.events_signed_by(previous.key_id(), usize::MAX).await?.len();
        return emit(
            json,
            &serde_json::json!({
                "previous_key_id": previous.key_id(),
                "key_id": app.signer.key_id(),
                "affected": affected,
                "dry_run": true,
            }),
            || {
                format!(
                    "{} event(s) signed by '{}' would be re-signed with '{}'",
                    affected,
                    previous.key_id(),
                    app.signer.key_id()
                )
            },
        );
    }

    let report = app
        .orchestrator()
        .chain()
        .rotate_signatures(previous.as_ref(), batch_size)
        .await?;
    emit(json, &report, || {
        format!(
            "re-signed {} event(s) from '{}' to '{}', deferred {}, halted streams: {}",
            report.rotated,
            report.previous_key_id,
            report.key_id,
            report.deferred,
            if report.halted_streams.is_empty() {
                "none".to_string()
            } else {
                report.halted_streams.join(", ")
            }
        )
    })?;
    if !report.halted_streams.is_empty() {
        bail!("{} stream(s) failed verification and were halted", report.halted_streams.len());
    }
    Ok(())
}

pub async fn migrate(config: &Config) -> Result<()> {
    let pool = db::connect(&config.postgres).await?;
    db::run_migrations(&pool).await?;
    info!("migrations complete");
    Ok(())
}
