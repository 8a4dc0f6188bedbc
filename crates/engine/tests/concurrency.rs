//! Concurrent evaluators racing on the same dedup key and the same streams.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use comply_core::config::EvaluationConfig;
use comply_core::{DetailMap, NewEvent};
use comply_engine::{ActivePolicyCache, EventChain, Orchestrator, PolicyService};
use comply_rules::lifecycle::{Actor, Capability, Transition};
use comply_signing::HmacSigner;
use comply_storage::{ComplianceStore, MemoryStore};
use serde_json::json;

const GEOTAG: &str = r#"
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
    expression: { RULE: geotag_enabled }
"#;

async fn orchestrator(store: &MemoryStore) -> Arc<Orchestrator> {
    let shared: Arc<dyn ComplianceStore> = Arc::new(store.clone());
    let cache = Arc::new(ActivePolicyCache::new(shared.clone(), Duration::from_secs(300), 16, 10));
    let service = PolicyService::new(shared.clone(), cache.clone(), 10);
    let admin = Actor::new("admin", [Capability::SubmitPolicy, Capability::ApprovePolicy]);
    let draft = service.import_str(GEOTAG).await.unwrap();
    service.transition(draft.id, Transition::Submit, &admin, "").await.unwrap();
    service
        .transition(draft.id, Transition::Approve, &admin, "ok")
        .await
        .unwrap();

    let signer = Arc::new(HmacSigner::new(vec![5u8; 32], "race").unwrap());
    let chain = Arc::new(EventChain::new(shared.clone(), signer));
    Arc::new(Orchestrator::new(shared, chain, cache, &EvaluationConfig::default()))
}

fn geotag_event(subject: &str) -> NewEvent {
    let mut detail = DetailMap::new();
    detail.insert("geotag_enabled".into(), json!(true));
    let at = Utc.with_ymd_and_hms(2024, 6, 3, 9, 15, 0).unwrap();
    NewEvent::new("post", "feed", subject, at, detail)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn duplicate_submissions_commit_one_violation() {
    let store = MemoryStore::new();
    let orch = orchestrator(&store).await;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move {
            orch.submit_event(geotag_event("U1")).await
        }));
    }

    let mut created = 0;
    let mut existing = 0;
    for h in handles {
        let report = h.await.unwrap().expect("no caller sees a duplicate-key error");
        created += report.created.len();
        existing += report.existing.len();
    }
    assert_eq!(created, 1);
    assert_eq!(existing, 31);
    assert_eq!(store.violation_count().await, 1);

    let chain = orch.verify_stream("U1").await.unwrap();
    assert_eq!(chain.linked, 32);
    assert_eq!(chain.signatures_verified, 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn independent_streams_chain_in_parallel() {
    let store = MemoryStore::new();
    let orch = orchestrator(&store).await;

    let mut handles = Vec::new();
    for user in 0..8 {
        for _ in 0..5 {
            let orch = orch.clone();
            let subject = format!("user-{}", user);
            handles.push(tokio::spawn(async move {
                orch.submit_event(geotag_event(&subject)).await
            }));
        }
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(store.violation_count().await, 8);
    for user in 0..8 {
        let report = orch.verify_stream(&format!("user-{}", user)).await.unwrap();
        assert_eq!(report.linked, 5);
    }
}
