//! Policy lifecycle state machine.
//!
//! `draft → review → active → retired`, plus `review → draft` on rejection.
//! Every edge requires its own [`Capability`] and produces an
//! [`ApprovalRecord`]. The uniqueness of the active version per policy name is
//! enforced by the store as part of the same atomic transition.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Draft,
    Review,
    Active,
    Retired,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Draft => "draft",
            LifecycleState::Review => "review",
            LifecycleState::Active => "active",
            LifecycleState::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(LifecycleState::Draft),
            "review" => Some(LifecycleState::Review),
            "active" => Some(LifecycleState::Active),
            "retired" => Some(LifecycleState::Retired),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Submit,
    Approve,
    Reject,
    Retire,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Submit => "submit",
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Retire => "retire",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submit" => Some(Transition::Submit),
            "approve" => Some(Transition::Approve),
            "reject" => Some(Transition::Reject),
            "retire" => Some(Transition::Retire),
            _ => None,
        }
    }

    /// The single edge this transition walks.
    pub fn edge(&self) -> (LifecycleState, LifecycleState) {
        use LifecycleState::*;
        match self {
            Transition::Submit => (Draft, Review),
            Transition::Approve => (Review, Active),
            Transition::Reject => (Review, Draft),
            Transition::Retire => (Active, Retired),
        }
    }

    pub fn required_capability(&self) -> Capability {
        match self {
            Transition::Submit => Capability::SubmitPolicy,
            Transition::Approve => Capability::ApprovePolicy,
            Transition::Reject => Capability::RejectPolicy,
            Transition::Retire => Capability::RetirePolicy,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SubmitPolicy,
    ApprovePolicy,
    RejectPolicy,
    RetirePolicy,
}

/// Someone attempting a lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub name: String,
    pub capabilities: BTreeSet<Capability>,
}

impl Actor {
    pub fn new(name: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Append-only record of a lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub transition: Transition,
    pub from_state: LifecycleState,
    pub to_state: LifecycleState,
    pub approver: String,
    pub justification: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot {transition} a policy in state '{from}'")]
    IllegalTransition {
        from: LifecycleState,
        transition: Transition,
    },

    #[error("actor '{actor}' lacks capability {capability:?}")]
    MissingCapability {
        actor: String,
        capability: Capability,
    },

    #[error("policy '{policy}' has no valid control")]
    NoValidControl { policy: String },

    #[error("policy '{name}' already has an active version ({active})")]
    NameAlreadyActive { name: String, active: Uuid },

    #[error("a justification is required to {0}")]
    MissingJustification(Transition),

    #[error("policy changed concurrently: expected '{expected}', found '{found}'")]
    Conflict {
        expected: LifecycleState,
        found: LifecycleState,
    },
}

/// Check everything about a transition that does not need the store.
///
/// Returns the target state. The caller must still apply it atomically,
/// re-checking that `policy` is in the expected state and, for `approve`,
/// that no other version of the same name is active.
pub fn authorize(
    policy: &Policy,
    transition: Transition,
    actor: &Actor,
    justification: &str,
) -> Result<LifecycleState, LifecycleError> {
    let capability = transition.required_capability();
    if !actor.can(capability) {
        return Err(LifecycleError::MissingCapability {
            actor: actor.name.clone(),
            capability,
        });
    }

    let (from, to) = transition.edge();
    if policy.lifecycle != from {
        return Err(LifecycleError::IllegalTransition {
            from: policy.lifecycle,
            transition,
        });
    }

    if matches!(transition, Transition::Approve | Transition::Reject)
        && justification.trim().is_empty()
    {
        return Err(LifecycleError::MissingJustification(transition));
    }

    if transition == Transition::Approve && !policy.has_valid_control() {
        return Err(LifecycleError::NoValidControl {
            policy: policy.name.clone(),
        });
    }

    Ok(to)
}
