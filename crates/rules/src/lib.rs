//! Policy DSL and pure evaluation logic.
//!
//! This crate provides:
//! - YAML policy schema (policies, controls, rules, thresholds, expressions)
//! - Save-time validation with "did you mean" suggestions and pattern checks
//! - Rule Matcher and three-valued Expression Evaluator with explanations
//! - Pure threshold decisions over pre-fetched counts
//! - Policy lifecycle state machine and approval records
//! - Filesystem policy loader and a per-control evaluation audit log

pub mod audit_log;
pub mod evaluator;
pub mod lifecycle;
pub mod loader;
pub mod schema;
pub mod threshold;
pub mod validation;
