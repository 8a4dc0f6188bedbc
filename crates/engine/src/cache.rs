//! Read-through cache of active policies, compiled once per version.
//!
//! The active set is re-read from the store after `ttl` or on explicit
//! invalidation (every lifecycle transition). Compiled forms are kept in an
//! LRU keyed by policy id; policy versions are immutable, so a compiled
//! entry never goes stale.
//!
//! Every invalidation bumps a generation counter. A reload only installs its
//! snapshot when no invalidation happened while it was reading the store.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use comply_core::config::{CacheConfig, EvaluationConfig};
use comply_core::ComplyError;
use comply_rules::evaluator::CompiledControl;
use comply_rules::schema::Policy;
use comply_storage::ComplianceStore;
use lru::LruCache;
use tracing::{debug, warn};
use uuid::Uuid;

/// A policy version with its evaluable controls compiled.
#[derive(Debug)]
pub struct CompiledPolicy {
    pub policy: Policy,
    pub controls: Vec<CompiledControl>,
    /// Keys of active controls that cannot be evaluated.
    pub skipped: Vec<String>,
}

impl CompiledPolicy {
    pub fn compile(policy: Policy, max_depth: usize) -> Self {
        let mut controls = Vec::new();
        let mut skipped = Vec::new();
        for control in policy.controls.iter().filter(|c| c.spec.active) {
            let key = policy.control_key(&control.spec.id);
            if !control.expression_valid {
                warn!(control = %key, errors = ?control.validation_errors, "skipping invalid control");
                skipped.push(key);
                continue;
            }
            match CompiledControl::compile(&key, &control.spec, max_depth) {
                Ok(compiled) => controls.push(compiled),
                Err(invalid) => {
                    warn!(control = %key, error = %invalid, "skipping control that no longer compiles");
                    skipped.push(key);
                }
            }
        }
        Self {
            policy,
            controls,
            skipped,
        }
    }
}

struct Snapshot {
    loaded_at: Instant,
    policies: Vec<Arc<CompiledPolicy>>,
}

pub struct ActivePolicyCache {
    store: Arc<dyn ComplianceStore>,
    ttl: Duration,
    max_depth: usize,
    compiled: Mutex<LruCache<Uuid, Arc<CompiledPolicy>>>,
    snapshot: RwLock<Option<Snapshot>>,
    generation: AtomicU64,
}

impl ActivePolicyCache {
    pub fn new(store: Arc<dyn ComplianceStore>, ttl: Duration, capacity: usize, max_depth: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            ttl,
            max_depth,
            compiled: Mutex::new(LruCache::new(capacity)),
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(store: Arc<dyn ComplianceStore>, cache: &CacheConfig, eval: &EvaluationConfig) -> Self {
        Self::new(
            store,
            Duration::from_secs(cache.active_policy_ttl_secs),
            cache.capacity,
            eval.max_expression_depth,
        )
    }

    /// Active policies, compiled. Reads through to the store when the
    /// snapshot is missing or older than the TTL.
    pub async fn active(&self) -> Result<Vec<Arc<CompiledPolicy>>, ComplyError> {
        if let Some(policies) = self.fresh() {
            return Ok(policies);
        }

        let observed = self.generation.load(Ordering::Acquire);
        let active = self.store.active_policies().await?;
        let policies: Vec<Arc<CompiledPolicy>> = active.into_iter().map(|p| self.compiled_for(p)).collect();
        if self.install(observed, &policies) {
            debug!(count = policies.len(), "active policy set reloaded");
        } else {
            debug!(count = policies.len(), "active policy set invalidated during reload, not cached");
        }
        Ok(policies)
    }

    /// Store `policies` as the snapshot unless the cache was invalidated
    /// after generation `observed` was read.
    fn install(&self, observed: u64, policies: &[Arc<CompiledPolicy>]) -> bool {
        let mut guard = self.snapshot.write().expect("policy snapshot lock poisoned");
        if self.generation.load(Ordering::Acquire) != observed {
            return false;
        }
        *guard = Some(Snapshot {
            loaded_at: Instant::now(),
            policies: policies.to_vec(),
        });
        true
    }

    fn fresh(&self) -> Option<Vec<Arc<CompiledPolicy>>> {
        let guard = self.snapshot.read().expect("policy snapshot lock poisoned");
        guard
            .as_ref()
            .filter(|s| s.loaded_at.elapsed() < self.ttl)
            .map(|s| s.policies.clone())
    }

    fn compiled_for(&self, policy: Policy) -> Arc<CompiledPolicy> {
        let mut lru = self.compiled.lock().expect("compiled policy lock poisoned");
        if let Some(hit) = lru.get(&policy.id) {
            return hit.clone();
        }
        let id = policy.id;
        let compiled = Arc::new(CompiledPolicy::compile(policy, self.max_depth));
        lru.put(id, compiled.clone());
        compiled
    }

    /// Drop the active-set snapshot so the next read goes to the store.
    pub fn invalidate(&self) {
        let mut guard = self.snapshot.write().expect("policy snapshot lock poisoned");
        self.generation.fetch_add(1, Ordering::AcqRel);
        if guard.take().is_some() {
            debug!("active policy cache invalidated");
        }
    }

    pub fn invalidate_policy(&self, id: Uuid) {
        self.compiled.lock().expect("compiled policy lock poisoned").pop(&id);
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{policy, GEOTAG_POLICY};
    use comply_rules::lifecycle::{ApprovalRecord, LifecycleState, Transition};
    use comply_storage::MemoryStore;

    const MIXED_POLICY: &str = r#"
apiVersion: v1
kind: Policy
metadata:
  name: mixed
  version: "1"
controls:
  - id: good
    rules:
      - { name: r, field: x, operator: equals, value: 1 }
    expression: { RULE: r }
  - id: broken
    rules:
      - { name: r, field: x, operator: equals, value: 1 }
    expression: { RULE: missing }
  - id: disabled
    active: false
    rules:
      - { name: r, field: x, operator: equals, value: 1 }
    expression: { RULE: r }
"#;

    #[test]
    fn compile_skips_invalid_and_ignores_inactive() {
        let compiled = CompiledPolicy::compile(policy(MIXED_POLICY, LifecycleState::Active), 10);
        assert_eq!(compiled.controls.len(), 1);
        assert_eq!(compiled.controls[0].key(), "mixed/good");
        assert_eq!(compiled.skipped, vec!["mixed/broken".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_is_served_until_invalidated() {
        let store = MemoryStore::new();
        let cache = ActivePolicyCache::new(Arc::new(store.clone()), Duration::from_secs(300), 8, 10);
        assert!(cache.active().await.unwrap().is_empty());

        store
            .save_policy(&policy(GEOTAG_POLICY, LifecycleState::Active))
            .await
            .unwrap();
        assert!(cache.active().await.unwrap().is_empty());

        cache.invalidate();
        assert_eq!(cache.active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reload_racing_an_invalidation_is_not_cached() {
        let store = MemoryStore::new();
        let active = policy(GEOTAG_POLICY, LifecycleState::Active);
        store.save_policy(&active).await.unwrap();
        let cache = ActivePolicyCache::new(Arc::new(store.clone()), Duration::from_secs(300), 8, 10);

        // A reader fetched the set containing the policy, then a retire
        // invalidated the cache before the reader installed it.
        let observed = cache.generation.load(Ordering::Acquire);
        let stale: Vec<_> = store
            .active_policies()
            .await
            .unwrap()
            .into_iter()
            .map(|p| cache.compiled_for(p))
            .collect();
        assert_eq!(stale.len(), 1);
        let (from_state, to_state) = Transition::Retire.edge();
        store
            .transition_policy(&ApprovalRecord {
                id: Uuid::new_v4(),
                policy_id: active.id,
                transition: Transition::Retire,
                from_state,
                to_state,
                approver: "lead".into(),
                justification: "superseded".into(),
                at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        cache.invalidate_policy(active.id);

        assert!(!cache.install(observed, &stale));
        assert!(cache.fresh().is_none());
        assert!(cache.active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reload_without_invalidation_is_cached() {
        let store = MemoryStore::new();
        let cache = ActivePolicyCache::new(Arc::new(store.clone()), Duration::from_secs(300), 8, 10);
        let observed = cache.generation.load(Ordering::Acquire);
        assert!(cache.install(observed, &[]));
        assert_eq!(cache.fresh().map(|p| p.len()), Some(0));
    }

    #[tokio::test]
    async fn zero_ttl_always_reads_through() {
        let store = MemoryStore::new();
        let cache = ActivePolicyCache::new(Arc::new(store.clone()), Duration::ZERO, 8, 10);
        assert!(cache.active().await.unwrap().is_empty());
        store
            .save_policy(&policy(GEOTAG_POLICY, LifecycleState::Active))
            .await
            .unwrap();
        assert_eq!(cache.active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_outage_surfaces_when_cold() {
        let store = MemoryStore::new();
        store.set_available(false);
        let cache = ActivePolicyCache::new(Arc::new(store), Duration::from_secs(60), 8, 10);
        assert!(matches!(
            cache.active().await,
            Err(ComplyError::StoreUnavailable(_))
        ));
    }
}
