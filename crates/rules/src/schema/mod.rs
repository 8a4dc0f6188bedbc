//! YAML policy schema types with serde deserialization.
//!
//! Defines the type hierarchy for policy documents:
//! - `DocumentEnvelope`: lightweight first-pass header (apiVersion, kind, metadata)
//! - `PolicyDocument`: authored policy with its controls
//! - `ControlSpec` / `RuleSpec` / `Threshold` / `Expression`: the control model
//! - `Policy` / `Control`: stored policy versions with validity flags

mod envelope;
mod expression;
mod kind;
mod metadata;
mod operator;
mod policy;
mod rule;
mod threshold;

pub use envelope::*;
pub use expression::*;
pub use kind::*;
pub use metadata::*;
pub use operator::*;
pub use policy::*;
pub use rule::*;
pub use threshold::*;
