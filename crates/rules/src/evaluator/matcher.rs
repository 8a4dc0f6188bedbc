//! Rule Matcher: one operator applied to two JSON values.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Operator;

/// Three-valued outcome of a rule or expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truth {
    True,
    False,
    Indeterminate,
}

impl Truth {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Indeterminate => Truth::Indeterminate,
        }
    }

    pub fn is_true(self) -> bool {
        self == Truth::True
    }
}

/// Result of one comparison with a short machine-readable reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comparison {
    pub truth: Truth,
    pub reason: &'static str,
}

impl Comparison {
    fn decided(b: bool, reason: &'static str) -> Self {
        Self {
            truth: Truth::from_bool(b),
            reason,
        }
    }

    fn indeterminate(reason: &'static str) -> Self {
        Self {
            truth: Truth::Indeterminate,
            reason,
        }
    }

    fn negate(self) -> Self {
        Self {
            truth: self.truth.negate(),
            reason: self.reason,
        }
    }
}

/// Numeric view of a value: JSON numbers and numeric strings.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Numbers compare numerically, everything else structurally.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        _ => left == right,
    }
}

/// Text form used by `matches`. Arrays, objects and null have none.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Apply `op` to `left` and `right`.
///
/// `pattern` must be the compiled form of `right` when `op` is `matches`.
pub fn compare(op: Operator, left: &Value, right: &Value, pattern: Option<&Regex>) -> Comparison {
    match op {
        Operator::Equals => Comparison::decided(values_equal(left, right), "equality"),
        Operator::NotEquals => Comparison::decided(!values_equal(left, right), "equality"),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let (Some(l), Some(r)) = (as_number(left), as_number(right)) else {
                return Comparison::indeterminate("non_numeric_operand");
            };
            let result = match op {
                Operator::Gt => l > r,
                Operator::Gte => l >= r,
                Operator::Lt => l < r,
                _ => l <= r,
            };
            Comparison::decided(result, "numeric_comparison")
        }
        Operator::In => membership(left, right),
        Operator::NotIn => membership(left, right).negate(),
        Operator::Matches => {
            let Some(regex) = pattern else {
                return Comparison::indeterminate("pattern_unavailable");
            };
            match as_text(left) {
                Some(text) => Comparison::decided(regex.is_match(&text), "pattern_match"),
                None => Comparison::indeterminate("unmatchable_operand"),
            }
        }
    }
}

fn membership(left: &Value, right: &Value) -> Comparison {
    match (left, right) {
        (_, Value::Array(items)) => {
            Comparison::decided(items.iter().any(|i| values_equal(left, i)), "membership")
        }
        (Value::String(needle), Value::String(haystack)) => {
            Comparison::decided(haystack.contains(needle.as_str()), "substring")
        }
        _ => Comparison::indeterminate("not_a_collection"),
    }
}
