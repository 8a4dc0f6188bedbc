//! Policy documents as authored, and policy versions as stored.

use chrono::{DateTime, Utc};
use comply_core::Severity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evaluator::CompiledControl;
use crate::lifecycle::LifecycleState;

use super::{Expression, PolicyMetadata, RuleSpec, Threshold};

/// Full policy document as read from YAML.
///
/// ```yaml
/// apiVersion: v1
/// kind: Policy
/// metadata:
///   name: opsec-social
///   version: "1.0.0"
/// controls:
///   - id: geotag
///     severity: high
///     rules:
///       - { name: geotag_enabled, field: geotag_enabled, operator: equals, value: true }
///     expression: { RULE: geotag_enabled }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: PolicyMetadata,
    #[serde(default)]
    pub controls: Vec<ControlSpec>,
}

/// A single compliance check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ControlSpec {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub expression: Expression,
    #[serde(default)]
    pub threshold: Option<Threshold>,
}

fn default_true() -> bool {
    true
}

impl ControlSpec {
    pub fn rule(&self, name: &str) -> Option<&RuleSpec> {
        self.rules.iter().find(|r| r.name == name)
    }
}

/// A control as stored with its policy version, carrying the save-time
/// validity verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Control {
    pub spec: ControlSpec,
    pub expression_valid: bool,
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

/// An immutable `(name, version)` policy row plus its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub lifecycle: LifecycleState,
    pub metadata: PolicyMetadata,
    pub controls: Vec<Control>,
    pub created_at: DateTime<Utc>,
}

/// Stable key of a control across policy versions: `{policy}/{control}`.
pub fn control_key(policy_name: &str, control_id: &str) -> String {
    format!("{}/{}", policy_name, control_id)
}

impl Policy {
    /// Build a `draft` policy version from a document, compiling every control
    /// to record its `expression_valid` flag.
    pub fn from_document(
        doc: PolicyDocument,
        id: Uuid,
        created_at: DateTime<Utc>,
        max_depth: usize,
    ) -> Self {
        let name = doc.metadata.name.clone();
        let controls = doc
            .controls
            .into_iter()
            .map(|spec| {
                let key = control_key(&name, &spec.id);
                match CompiledControl::compile(&key, &spec, max_depth) {
                    Ok(_) => Control {
                        spec,
                        expression_valid: true,
                        validation_errors: Vec::new(),
                    },
                    Err(invalid) => Control {
                        spec,
                        expression_valid: false,
                        validation_errors: invalid.messages(),
                    },
                }
            })
            .collect();

        Self {
            id,
            name,
            version: doc.metadata.version.clone(),
            lifecycle: LifecycleState::Draft,
            metadata: doc.metadata,
            controls,
            created_at,
        }
    }

    pub fn control_key(&self, control_id: &str) -> String {
        control_key(&self.name, control_id)
    }

    /// Controls that are both active and passed save-time validation.
    pub fn evaluable_controls(&self) -> impl Iterator<Item = &Control> {
        self.controls
            .iter()
            .filter(|c| c.spec.active && c.expression_valid)
    }

    pub fn has_valid_control(&self) -> bool {
        self.controls.iter().any(|c| c.expression_valid)
    }
}
