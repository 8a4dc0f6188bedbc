//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use comply_core::{DetailMap, Event, NewEvent};
use comply_rules::lifecycle::LifecycleState;
use comply_rules::loader::PolicyLoader;
use comply_rules::schema::Policy;
use comply_signing::{HmacSigner, SigningProvider};
use uuid::Uuid;

/// Fixed epoch plus `secs`.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
}

pub fn event_at(event_type: &str, subject: &str, at: DateTime<Utc>, n: i64) -> Event {
    let mut detail = DetailMap::new();
    detail.insert("n".into(), serde_json::json!(n));
    NewEvent::new(event_type, "test", subject, at, detail).into_event(Uuid::new_v4(), at)
}

pub fn new_event(event_type: &str, subject: &str, at: DateTime<Utc>, detail: serde_json::Value) -> NewEvent {
    let detail = match detail {
        serde_json::Value::Object(map) => map,
        _ => DetailMap::new(),
    };
    NewEvent::new(event_type, "test", subject, at, detail)
}

pub fn policy(yaml: &str, lifecycle: LifecycleState) -> Policy {
    let loader = PolicyLoader::new(std::path::PathBuf::new(), 10);
    let (doc, _) = loader.parse_str(yaml).unwrap();
    let mut policy = Policy::from_document(doc, Uuid::new_v4(), Utc::now(), 10);
    policy.lifecycle = lifecycle;
    policy
}

pub fn signer() -> Arc<dyn SigningProvider> {
    Arc::new(HmacSigner::new(vec![9u8; 32], "test-key").unwrap())
}

pub const GEOTAG_POLICY: &str = r#"
apiVersion: v1
kind: Policy
metadata:
  name: opsec-social
  version: "1"
controls:
  - id: geotag
    severity: high
    rules:
      - { name: geotag_enabled, field: geotag_enabled, operator: equals, value: true }
      - { name: location_precise, field: location_precise, operator: equals, value: true }
    expression:
      AND:
        - RULE: geotag_enabled
        - RULE: location_precise
"#;

pub const BRUTE_FORCE_POLICY: &str = r#"
apiVersion: v1
kind: Policy
metadata:
  name: auth
  version: "1"
controls:
  - id: brute-force
    severity: critical
    rules:
      - { name: failed_login, field: event.type, operator: equals, value: login_failed }
    expression: { RULE: failed_login }
    threshold: { type: count, value: 3, window_secs: 86400 }
"#;
