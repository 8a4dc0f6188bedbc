//! Compliance engine: event chain, threshold evaluation, violation synthesis,
//! risk scoring and the orchestrator that sequences them per event.

pub mod cache;
pub mod chain;
pub mod export;
pub mod lifecycle;
pub mod orchestrator;
pub mod query;
pub mod resolution;
pub mod risk;
pub mod synthesizer;
pub mod threshold;

#[cfg(test)]
mod test_support;

pub use cache::{ActivePolicyCache, CompiledPolicy};
pub use chain::{ChainReport, EventChain, RotationReport, SignReport};
pub use export::{export_bundle, verify_bundle, ExportError, Manifest};
pub use lifecycle::{ImportReport, PolicyService, PolicyServiceError};
pub use orchestrator::{
    ControlFault, EvaluationReport, EvaluationStatus, FaultKind, Orchestrator, RecoveryReport,
};
pub use query::QueryService;
pub use resolution::{ResolutionError, ResolutionService};
pub use risk::{RiskEstimate, RiskFactor, RiskScorer, ScoringBackend, ScoringError};
pub use synthesizer::ViolationSynthesizer;
pub use threshold::ThresholdEvaluator;
