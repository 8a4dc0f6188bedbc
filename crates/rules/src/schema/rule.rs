//! Single field-level comparisons referenced by name from expressions.

use serde::{Deserialize, Serialize};

use super::Operator;

/// One comparison of an event field against an operand.
///
/// ```yaml
/// - name: failed_login
///   field: event.type
///   operator: equals
///   value: login_failed
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Dotted path into the event (`event.type`, `detail.geo.lat`, `geo.lat`).
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Operand,
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Operand {
    /// Reference to another field of the same event.
    Field(FieldRef),
    Literal(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FieldRef {
    pub field: String,
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Literal(serde_json::Value::Null)
    }
}

impl Operand {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Operand::Literal(value.into())
    }

    pub fn field(path: impl Into<String>) -> Self {
        Operand::Field(FieldRef { field: path.into() })
    }

    pub fn as_literal(&self) -> Option<&serde_json::Value> {
        match self {
            Operand::Literal(v) => Some(v),
            Operand::Field(_) => None,
        }
    }
}
