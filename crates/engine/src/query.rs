//! Read-only queries for presentation layers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use comply_core::{ActionLogEntry, ComplyError, EventStage, Violation};
use comply_rules::schema::Policy;
use comply_storage::{ComplianceStore, StreamHalt};
use uuid::Uuid;

use crate::risk::{RiskEstimate, RiskScorer};

pub struct QueryService {
    store: Arc<dyn ComplianceStore>,
    scorer: Arc<RiskScorer>,
}

impl QueryService {
    pub fn new(store: Arc<dyn ComplianceStore>, scorer: Arc<RiskScorer>) -> Self {
        Self { store, scorer }
    }

    pub async fn active_policies(&self) -> Result<Vec<Policy>, ComplyError> {
        Ok(self.store.active_policies().await?)
    }

    /// A user's violations, newest first.
    pub async fn violations_for_user(
        &self,
        subject: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Violation>, ComplyError> {
        Ok(self.store.violations_for_subject(subject, since).await?)
    }

    pub async fn violation(&self, id: Uuid) -> Result<Violation, ComplyError> {
        self.store
            .get_violation(id)
            .await?
            .ok_or_else(|| ComplyError::NotFound(format!("violation {}", id)))
    }

    pub async fn action_log(&self, violation_id: Uuid) -> Result<Vec<ActionLogEntry>, ComplyError> {
        Ok(self.store.action_log(violation_id).await?)
    }

    pub async fn risk(&self, subject: &str) -> Result<RiskEstimate, ComplyError> {
        Ok(self.scorer.score(subject).await?)
    }

    pub async fn event_stage(&self, event_id: Uuid) -> Result<EventStage, ComplyError> {
        self.store
            .get_event(event_id)
            .await?
            .map(|stored| stored.metadata.stage())
            .ok_or_else(|| ComplyError::NotFound(format!("event {}", event_id)))
    }

    pub async fn stream_halt(&self, stream: &str) -> Result<Option<StreamHalt>, ComplyError> {
        Ok(self.store.stream_halt(stream).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::EventChain;
    use crate::risk::WeightedScorer;
    use crate::test_support::{new_event, signer, ts};
    use comply_storage::MemoryStore;

    fn service(store: &MemoryStore) -> QueryService {
        let shared: Arc<dyn ComplianceStore> = Arc::new(store.clone());
        let scorer = Arc::new(RiskScorer::new(
            shared.clone(),
            Arc::new(WeightedScorer::with_defaults("risk", "1")),
        ));
        QueryService::new(shared, scorer)
    }

    #[tokio::test]
    async fn event_stage_follows_the_chain() {
        let store = MemoryStore::new();
        let chain = EventChain::new(Arc::new(store.clone()), signer());
        let stored = chain
            .ingest(new_event("post", "u1", ts(0), serde_json::json!({})))
            .await
            .unwrap();
        let q = service(&store);
        assert_eq!(q.event_stage(stored.event.id).await.unwrap(), EventStage::Signed);

        store.mark_processed(stored.event.id, Utc::now()).await.unwrap();
        assert_eq!(q.event_stage(stored.event.id).await.unwrap(), EventStage::Processed);
        assert!(matches!(
            q.event_stage(Uuid::new_v4()).await,
            Err(ComplyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_user_has_no_violations_and_low_risk() {
        let store = MemoryStore::new();
        let q = service(&store);
        assert!(q.violations_for_user("nobody", None).await.unwrap().is_empty());
        assert!(q.risk("nobody").await.unwrap().risk < 0.1);
        assert!(q.active_policies().await.unwrap().is_empty());
    }
}
