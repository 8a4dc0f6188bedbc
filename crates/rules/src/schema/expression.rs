//! Boolean expression tree over named rules.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A node of a control's expression.
///
/// Serialized externally tagged with upper-case keys:
/// `{AND: [..]}`, `{OR: [..]}`, `{NOT: node}`, `{RULE: name}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Expression {
    #[serde(rename = "AND")]
    And(Vec<Expression>),
    #[serde(rename = "OR")]
    Or(Vec<Expression>),
    #[serde(rename = "NOT")]
    Not(Box<Expression>),
    #[serde(rename = "RULE")]
    Rule(String),
}

impl Expression {
    pub fn rule(name: impl Into<String>) -> Self {
        Expression::Rule(name.into())
    }

    pub fn and(children: Vec<Expression>) -> Self {
        Expression::And(children)
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Expression::Or(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Expression) -> Self {
        Expression::Not(Box::new(child))
    }

    /// Nesting depth, where a lone `RULE` has depth 1.
    ///
    /// Stops descending once `limit` is exceeded and returns `limit + 1`, so
    /// hostile trees are measured without walking them fully.
    pub fn depth_bounded(&self, limit: usize) -> usize {
        fn walk(node: &Expression, current: usize, limit: usize) -> usize {
            if current > limit {
                return current;
            }
            match node {
                Expression::Rule(_) => current,
                Expression::Not(child) => walk(child, current + 1, limit),
                Expression::And(children) | Expression::Or(children) => children
                    .iter()
                    .map(|c| walk(c, current + 1, limit))
                    .max()
                    .unwrap_or(current),
            }
        }
        walk(self, 1, limit)
    }

    /// Every rule name referenced anywhere in the tree.
    pub fn rule_refs(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Expression::Rule(name) => {
                    out.insert(name.as_str());
                }
                Expression::Not(child) => stack.push(child),
                Expression::And(children) | Expression::Or(children) => {
                    stack.extend(children.iter());
                }
            }
        }
        out
    }

    /// Operator label used in paths and explanations.
    pub fn label(&self) -> &'static str {
        match self {
            Expression::And(_) => "AND",
            Expression::Or(_) => "OR",
            Expression::Not(_) => "NOT",
            Expression::Rule(_) => "RULE",
        }
    }
}
