//! Violation resolution through the append-only action log.

use std::sync::Arc;

use chrono::Utc;
use comply_core::{ActionLogEntry, ResolutionState, Violation, ViolationAction};
use comply_storage::{ComplianceStore, StoreError};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("violation {0} not found")]
    NotFound(Uuid),

    #[error("cannot {action} a violation that is {from}")]
    IllegalAction {
        action: &'static str,
        from: &'static str,
    },

    /// Another actor changed the violation first.
    #[error("violation {0} changed concurrently")]
    Concurrent(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ResolutionService {
    store: Arc<dyn ComplianceStore>,
}

impl ResolutionService {
    pub fn new(store: Arc<dyn ComplianceStore>) -> Self {
        Self { store }
    }

    /// Apply `action` and return the violation with its new resolution state.
    pub async fn act(
        &self,
        violation_id: Uuid,
        action: ViolationAction,
        actor: &str,
        note: Option<String>,
    ) -> Result<Violation, ResolutionError> {
        let current = self
            .store
            .get_violation(violation_id)
            .await?
            .ok_or(ResolutionError::NotFound(violation_id))?;
        let to_state = action
            .apply(current.resolution)
            .ok_or(ResolutionError::IllegalAction {
                action: action.as_str(),
                from: current.resolution.as_str(),
            })?;

        let entry = ActionLogEntry {
            id: Uuid::new_v4(),
            violation_id,
            action,
            from_state: current.resolution,
            to_state,
            actor: actor.to_string(),
            note,
            at: Utc::now(),
        };
        let updated = match self.store.apply_violation_action(&entry).await {
            Ok(v) => v,
            Err(StoreError::Conflict(_)) => return Err(ResolutionError::Concurrent(violation_id)),
            Err(e) => return Err(e.into()),
        };
        info!(
            violation_id = %violation_id,
            action = action.as_str(),
            actor,
            state = updated.resolution.as_str(),
            "violation action recorded"
        );
        Ok(updated)
    }

    pub async fn history(&self, violation_id: Uuid) -> Result<Vec<ActionLogEntry>, ResolutionError> {
        Ok(self.store.action_log(violation_id).await?)
    }

    /// Resolution state replayed from the action log alone.
    pub async fn replayed_state(&self, violation_id: Uuid) -> Result<ResolutionState, ResolutionError> {
        let log = self.history(violation_id).await?;
        Ok(log.last().map(|e| e.to_state).unwrap_or(ResolutionState::Open))
    }
}
