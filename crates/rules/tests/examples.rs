//! Integration tests that verify every example policy in
//! `data/policies/examples/` parses, validates and evaluates as documented.

use chrono::Utc;
use comply_core::{DetailMap, Event, NewEvent, Severity};
use comply_rules::evaluator::{CompiledControl, EvalLimits};
use comply_rules::loader::{LoadStatus, PolicyLoader};
use comply_rules::schema::{Expression, Operator, Policy, PolicyDocument, Threshold};
use serde_json::json;
use uuid::Uuid;

/// Integration tests run from the crate directory, so go up two levels.
fn examples_dir() -> std::path::PathBuf {
    let manifest = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest.join("../../data/policies/examples")
}

fn load_policy(filename: &str) -> PolicyDocument {
    let loader = PolicyLoader::new(examples_dir(), 10);
    let path = examples_dir().join(filename);
    let (doc, validation) = loader
        .load_file(&path)
        .unwrap_or_else(|e| panic!("Failed to load {}: {}", path.display(), e));
    assert!(
        validation.valid,
        "{} has validation errors: {:?}",
        path.display(),
        validation.errors
    );
    doc
}

fn compile(doc: &PolicyDocument, control_id: &str) -> CompiledControl {
    let spec = doc
        .controls
        .iter()
        .find(|c| c.id == control_id)
        .unwrap_or_else(|| panic!("no control {control_id}"));
    let key = format!("{}/{}", doc.metadata.name, control_id);
    CompiledControl::compile(&key, spec, 10).unwrap()
}

fn event(event_type: &str, detail: serde_json::Value) -> Event {
    let detail: DetailMap = serde_json::from_value(detail).unwrap();
    NewEvent::new(event_type, "test", "u1", Utc::now(), detail).into_event(Uuid::new_v4(), Utc::now())
}

#[test]
fn every_example_loads_cleanly() {
    let loader = PolicyLoader::new(examples_dir(), 10);
    let results = loader.load_all().unwrap();
    assert!(results.len() >= 3);
    for r in &results {
        match &r.status {
            LoadStatus::Loaded { validation, .. } => {
                assert!(validation.valid, "{}: {:?}", r.path.display(), validation.errors)
            }
            other => panic!("{}: {:?}", r.path.display(), other),
        }
    }
}

// ── opsec-social.yml ────────────────────────────────────────

#[test]
fn parse_opsec_social() {
    let doc = load_policy("opsec-social.yml");
    assert_eq!(doc.metadata.name, "opsec-social");
    assert_eq!(doc.metadata.sla_hours, Some(24));
    assert_eq!(doc.controls.len(), 2);
    assert_eq!(doc.controls[0].severity, Severity::High);
    assert_eq!(doc.controls[1].rules[1].operator, Operator::Matches);
}

#[test]
fn geotag_control_matches_precise_post() {
    let doc = load_policy("opsec-social.yml");
    let c = compile(&doc, "geotag-precise");
    let limits = EvalLimits::default();

    let hit = event("post", json!({"geotag_enabled": true, "location_precise": true}));
    assert!(c.evaluate(&hit, &limits).unwrap().matched());

    let miss = event("post", json!({"geotag_enabled": true, "location_precise": false}));
    assert!(!c.evaluate(&miss, &limits).unwrap().matched());
}

#[test]
fn mission_keywords_pattern() {
    let doc = load_policy("opsec-social.yml");
    let c = compile(&doc, "mission-keywords");
    let limits = EvalLimits::default();

    let hit = event("post", json!({"content": "Heading out on Operation Sunrise"}));
    assert!(c.evaluate(&hit, &limits).unwrap().matched());

    let miss = event("post", json!({"content": "Cooperation is key"}));
    let out = c.evaluate(&miss, &limits).unwrap();
    // No unit_mention field: OR is false || indeterminate.
    assert!(!out.matched());

    let not_a_post = event("comment", json!({"content": "mission"}));
    assert!(!c.evaluate(&not_a_post, &limits).unwrap().matched());
}

// ── account-security.yml ────────────────────────────────────

#[test]
fn parse_account_security() {
    let doc = load_policy("account-security.yml");
    assert_eq!(
        doc.controls[0].threshold,
        Some(Threshold::Count {
            value: 3,
            window_secs: 86400
        })
    );
    assert_eq!(doc.controls[0].expression, Expression::rule("failed_login"));
    assert!(!doc.controls[2].active);
    assert!(matches!(
        doc.controls[2].threshold,
        Some(Threshold::Percent { .. })
    ));
}

#[test]
fn weak_second_factor() {
    let doc = load_policy("account-security.yml");
    let c = compile(&doc, "weak-second-factor");
    let limits = EvalLimits::default();

    let sms = event("login", json!({"auth": {"second_factor": "SMS"}}));
    assert!(c.evaluate(&sms, &limits).unwrap().matched());

    let totp = event("login", json!({"auth": {"second_factor": "TOTP"}}));
    assert!(!c.evaluate(&totp, &limits).unwrap().matched());
}

// ── transmission-security.yml ───────────────────────────────

#[test]
fn unencrypted_transfer() {
    let doc = load_policy("transmission-security.yml");
    let c = compile(&doc, "unencrypted-transfer");
    let limits = EvalLimits::default();

    let weak = event(
        "transfer",
        json!({"file": {"size": 5000}, "transmission": {"encrypted": true}, "encryption": {"algorithm": "DES"}}),
    );
    assert!(c.evaluate(&weak, &limits).unwrap().matched());

    let good = event(
        "transfer",
        json!({"file": {"size": "5000"}, "transmission": {"encrypted": true}, "encryption": {"algorithm": "AES-256"}}),
    );
    assert!(!c.evaluate(&good, &limits).unwrap().matched());

    let small = event("transfer", json!({"file": {"size": 10}, "transmission": {"encrypted": false}}));
    assert!(!c.evaluate(&small, &limits).unwrap().matched());
}

#[test]
fn stored_policy_versions_are_drafts_with_valid_controls() {
    let doc = load_policy("transmission-security.yml");
    let policy = Policy::from_document(doc, Uuid::new_v4(), Utc::now(), 10);
    assert_eq!(policy.version, "2024.1");
    assert!(policy.controls.iter().all(|c| c.expression_valid));
    assert_eq!(policy.evaluable_controls().count(), 2);
}
