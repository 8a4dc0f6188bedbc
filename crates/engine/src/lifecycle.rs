//! Policy authoring and lifecycle service.
//!
//! Saves immutable policy versions from YAML documents and walks them through
//! `draft → review → active → retired`. Every transition is authorized in
//! `comply_rules::lifecycle`, applied atomically by the store, and invalidates
//! the active-policy cache.

use std::sync::Arc;

use chrono::Utc;
use comply_rules::lifecycle::{authorize, Actor, ApprovalRecord, LifecycleError, LifecycleState, Transition};
use comply_rules::loader::{LoadStatus, PolicyLoader, RuleError};
use comply_rules::schema::{Policy, PolicyDocument};
use comply_storage::{ComplianceStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::ActivePolicyCache;

#[derive(Error, Debug)]
pub enum PolicyServiceError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Load(#[from] RuleError),

    #[error("policy {0} not found")]
    NotFound(Uuid),

    #[error("policy {name}@{version} already exists")]
    AlreadyExists { name: String, version: String },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PolicyServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Lifecycle(inner) => PolicyServiceError::Lifecycle(inner),
            other => PolicyServiceError::Store(other),
        }
    }
}

impl PolicyServiceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PolicyServiceError::Store(e) if e.is_retryable())
    }
}

/// Outcome of importing a directory of policy documents.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    /// `name@version` of newly saved drafts with their ids.
    pub imported: Vec<(String, Uuid)>,
    /// `name@version` already stored; versions are never overwritten.
    pub unchanged: Vec<String>,
    /// Controls saved with `expression_valid = false`.
    pub invalid_controls: Vec<String>,
    /// Files that could not be parsed, with the reason.
    pub failed: Vec<(String, String)>,
}

pub struct PolicyService {
    store: Arc<dyn ComplianceStore>,
    cache: Arc<ActivePolicyCache>,
    max_depth: usize,
}

impl PolicyService {
    pub fn new(store: Arc<dyn ComplianceStore>, cache: Arc<ActivePolicyCache>, max_depth: usize) -> Self {
        Self {
            store,
            cache,
            max_depth,
        }
    }

    /// Save a document as a new `draft` version.
    pub async fn save_document(&self, doc: PolicyDocument) -> Result<Policy, PolicyServiceError> {
        let policy = Policy::from_document(doc, Uuid::new_v4(), Utc::now(), self.max_depth);
        match self.store.save_policy(&policy).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(PolicyServiceError::AlreadyExists {
                    name: policy.name,
                    version: policy.version,
                })
            }
            Err(e) => return Err(e.into()),
        }
        let invalid = policy.controls.iter().filter(|c| !c.expression_valid).count();
        info!(
            policy_id = %policy.id,
            name = %policy.name,
            version = %policy.version,
            controls = policy.controls.len(),
            invalid,
            "policy version saved"
        );
        Ok(policy)
    }

    /// Parse YAML text and save it as a draft.
    pub async fn import_str(&self, yaml: &str) -> Result<Policy, PolicyServiceError> {
        let loader = PolicyLoader::new(std::path::PathBuf::new(), self.max_depth);
        let (doc, _) = loader.parse_str(yaml)?;
        self.save_document(doc).await
    }

    /// Load every document under the loader's directory and save new versions.
    pub async fn import_dir(&self, loader: &PolicyLoader) -> Result<ImportReport, PolicyServiceError> {
        let mut report = ImportReport::default();
        for result in loader.load_all()? {
            if let LoadStatus::Failed { error } = result.status {
                warn!(path = %result.path.display(), error = %error, "policy file rejected");
                report.failed.push((result.path.display().to_string(), error));
            }
        }

        for doc in loader.documents() {
            let key = format!("{}@{}", doc.metadata.name, doc.metadata.version);
            match self.save_document(doc).await {
                Ok(policy) => {
                    report.invalid_controls.extend(
                        policy
                            .controls
                            .iter()
                            .filter(|c| !c.expression_valid)
                            .map(|c| policy.control_key(&c.spec.id)),
                    );
                    report.imported.push((key, policy.id));
                }
                Err(PolicyServiceError::AlreadyExists { .. }) => report.unchanged.push(key),
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Apply `transition` to a policy on behalf of `actor`.
    pub async fn transition(
        &self,
        policy_id: Uuid,
        transition: Transition,
        actor: &Actor,
        justification: &str,
    ) -> Result<Policy, PolicyServiceError> {
        let policy = self
            .store
            .get_policy(policy_id)
            .await?
            .ok_or(PolicyServiceError::NotFound(policy_id))?;

        let to_state = authorize(&policy, transition, actor, justification)?;
        let (from_state, _) = transition.edge();
        let record = ApprovalRecord {
            id: Uuid::new_v4(),
            policy_id,
            transition,
            from_state,
            to_state,
            approver: actor.name.clone(),
            justification: justification.to_string(),
            at: Utc::now(),
        };

        let updated = self.store.transition_policy(&record).await?;
        self.cache.invalidate_policy(policy_id);
        info!(
            policy_id = %policy_id,
            name = %updated.name,
            version = %updated.version,
            transition = %transition,
            approver = %actor.name,
            state = %updated.lifecycle,
            "policy transitioned"
        );
        Ok(updated)
    }

    pub async fn get(&self, policy_id: Uuid) -> Result<Policy, PolicyServiceError> {
        self.store
            .get_policy(policy_id)
            .await?
            .ok_or(PolicyServiceError::NotFound(policy_id))
    }

    /// Every stored version, including retired ones.
    pub async fn history(&self) -> Result<Vec<Policy>, PolicyServiceError> {
        Ok(self.store.list_policies().await?)
    }

    pub async fn approvals(&self, policy_id: Uuid) -> Result<Vec<ApprovalRecord>, PolicyServiceError> {
        Ok(self.store.approvals(policy_id).await?)
    }

    pub async fn active_version(&self, name: &str) -> Result<Option<Policy>, PolicyServiceError> {
        let active = self.store.active_policies().await?;
        Ok(active
            .into_iter()
            .find(|p| p.name == name && p.lifecycle == LifecycleState::Active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::GEOTAG_POLICY;
    use comply_rules::lifecycle::Capability;
    use comply_storage::MemoryStore;
    use std::time::Duration;

    fn service(store: &MemoryStore) -> (PolicyService, Arc<ActivePolicyCache>) {
        let store: Arc<dyn ComplianceStore> = Arc::new(store.clone());
        let cache = Arc::new(ActivePolicyCache::new(store.clone(), Duration::from_secs(300), 8, 10));
        (PolicyService::new(store, cache.clone(), 10), cache)
    }

    fn admin() -> Actor {
        Actor::new(
            "alice",
            [
                Capability::SubmitPolicy,
                Capability::ApprovePolicy,
                Capability::RejectPolicy,
                Capability::RetirePolicy,
            ],
        )
    }

    async fn activate(svc: &PolicyService, id: Uuid) -> Result<Policy, PolicyServiceError> {
        svc.transition(id, Transition::Submit, &admin(), "").await?;
        svc.transition(id, Transition::Approve, &admin(), "reviewed").await
    }

    #[tokio::test]
    async fn full_lifecycle_with_approval_records() {
        let store = MemoryStore::new();
        let (svc, cache) = service(&store);
        let draft = svc.import_str(GEOTAG_POLICY).await.unwrap();
        assert_eq!(draft.lifecycle, LifecycleState::Draft);
        assert!(cache.active().await.unwrap().is_empty());

        let active = activate(&svc, draft.id).await.unwrap();
        assert_eq!(active.lifecycle, LifecycleState::Active);
        assert_eq!(cache.active().await.unwrap().len(), 1);

        svc.transition(draft.id, Transition::Retire, &admin(), "superseded")
            .await
            .unwrap();
        assert!(cache.active().await.unwrap().is_empty());

        let records = svc.approvals(draft.id).await.unwrap();
        let edges: Vec<_> = records.iter().map(|r| r.transition).collect();
        assert_eq!(
            edges,
            vec![Transition::Submit, Transition::Approve, Transition::Retire]
        );
        assert_eq!(records[1].approver, "alice");
    }

    #[tokio::test]
    async fn duplicate_version_is_rejected() {
        let store = MemoryStore::new();
        let (svc, _) = service(&store);
        svc.import_str(GEOTAG_POLICY).await.unwrap();
        let err = svc.import_str(GEOTAG_POLICY).await.unwrap_err();
        assert!(matches!(err, PolicyServiceError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn second_active_version_is_blocked() {
        let store = MemoryStore::new();
        let (svc, _) = service(&store);
        let v1 = svc.import_str(GEOTAG_POLICY).await.unwrap();
        let v2 = svc
            .import_str(&GEOTAG_POLICY.replace("version: \"1\"", "version: \"2\""))
            .await
            .unwrap();

        activate(&svc, v1.id).await.unwrap();
        let err = activate(&svc, v2.id).await.unwrap_err();
        assert!(matches!(
            err,
            PolicyServiceError::Lifecycle(LifecycleError::NameAlreadyActive { .. })
        ));
        assert_eq!(svc.active_version("opsec-social").await.unwrap().unwrap().id, v1.id);
    }

    #[tokio::test]
    async fn missing_capability_is_rejected() {
        let store = MemoryStore::new();
        let (svc, _) = service(&store);
        let draft = svc.import_str(GEOTAG_POLICY).await.unwrap();
        let author = Actor::new("bob", [Capability::SubmitPolicy]);
        svc.transition(draft.id, Transition::Submit, &author, "").await.unwrap();
        let err = svc
            .transition(draft.id, Transition::Approve, &author, "lgtm")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyServiceError::Lifecycle(LifecycleError::MissingCapability { .. })
        ));
    }

    #[tokio::test]
    async fn import_dir_reports_each_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("geo.yml"), GEOTAG_POLICY).unwrap();
        std::fs::write(dir.path().join("junk.yaml"), "apiVersion: v1\nkind: Nope\n").unwrap();
        std::fs::write(dir.path().join(".hidden.yml"), GEOTAG_POLICY).unwrap();

        let store = MemoryStore::new();
        let (svc, _) = service(&store);
        let loader = PolicyLoader::new(dir.path().to_path_buf(), 10);
        let report = svc.import_dir(&loader).await.unwrap();
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.failed.len(), 1);

        let again = svc.import_dir(&loader).await.unwrap();
        assert!(again.imported.is_empty());
        assert_eq!(again.unchanged, vec!["opsec-social@1".to_string()]);
    }
}
