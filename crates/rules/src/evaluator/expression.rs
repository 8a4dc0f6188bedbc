//! Short-circuiting three-valued evaluation of expression trees.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use comply_core::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{Expression, Operator};

use super::matcher::Truth;
use super::{CompiledRule, EvalError};

/// Per-node record of how an expression reached its result.
///
/// Children skipped by short-circuiting are not listed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Explanation {
    Rule {
        name: String,
        field: String,
        operator: Operator,
        #[serde(skip_serializing_if = "Option::is_none")]
        left: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        right: Option<Value>,
        result: Truth,
        reason: String,
    },
    And {
        result: Truth,
        children: Vec<Explanation>,
    },
    Or {
        result: Truth,
        children: Vec<Explanation>,
    },
    Not {
        result: Truth,
        child: Box<Explanation>,
    },
}

impl Explanation {
    pub fn result(&self) -> Truth {
        match self {
            Explanation::Rule { result, .. }
            | Explanation::And { result, .. }
            | Explanation::Or { result, .. }
            | Explanation::Not { result, .. } => *result,
        }
    }
}

/// One evaluation pass over a single event. Rules are matched at most once.
pub(crate) struct Evaluation<'a> {
    rules: &'a HashMap<String, CompiledRule>,
    event: &'a Event,
    max_depth: usize,
    started: Instant,
    timeout: Duration,
    memo: HashMap<&'a str, Explanation>,
}

impl<'a> Evaluation<'a> {
    pub(crate) fn new(
        rules: &'a HashMap<String, CompiledRule>,
        event: &'a Event,
        max_depth: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            rules,
            event,
            max_depth,
            started: Instant::now(),
            timeout,
            memo: HashMap::new(),
        }
    }

    pub(crate) fn run(&mut self, root: &'a Expression) -> Result<Explanation, EvalError> {
        let depth = root.depth_bounded(self.max_depth);
        if depth > self.max_depth {
            return Err(EvalError::TooDeep {
                depth,
                max: self.max_depth,
            });
        }
        self.eval(root, 1)
    }

    fn check_deadline(&self) -> Result<(), EvalError> {
        if self.started.elapsed() > self.timeout {
            return Err(EvalError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn eval(&mut self, node: &'a Expression, depth: usize) -> Result<Explanation, EvalError> {
        if depth > self.max_depth {
            return Err(EvalError::TooDeep {
                depth,
                max: self.max_depth,
            });
        }
        self.check_deadline()?;

        match node {
            Expression::Rule(name) => Ok(self.rule(name)),
            Expression::Not(child) => {
                let child = self.eval(child, depth + 1)?;
                Ok(Explanation::Not {
                    result: child.result().negate(),
                    child: Box::new(child),
                })
            }
            Expression::And(children) => {
                let mut explained = Vec::with_capacity(children.len());
                let mut result = Truth::True;
                for child in children {
                    let e = self.eval(child, depth + 1)?;
                    let r = e.result();
                    explained.push(e);
                    match r {
                        Truth::False => {
                            result = Truth::False;
                            break;
                        }
                        Truth::Indeterminate => result = Truth::Indeterminate,
                        Truth::True => {}
                    }
                }
                Ok(Explanation::And {
                    result,
                    children: explained,
                })
            }
            Expression::Or(children) => {
                let mut explained = Vec::with_capacity(children.len());
                let mut result = Truth::False;
                for child in children {
                    let e = self.eval(child, depth + 1)?;
                    let r = e.result();
                    explained.push(e);
                    match r {
                        Truth::True => {
                            result = Truth::True;
                            break;
                        }
                        Truth::Indeterminate => result = Truth::Indeterminate,
                        Truth::False => {}
                    }
                }
                Ok(Explanation::Or {
                    result,
                    children: explained,
                })
            }
        }
    }

    fn rule(&mut self, name: &'a str) -> Explanation {
        if let Some(done) = self.memo.get(name) {
            return done.clone();
        }
        let explanation = match self.rules.get(name) {
            Some(rule) => rule.evaluate(self.event),
            // Unreachable for compiled controls; references are checked at save time.
            None => Explanation::Rule {
                name: name.to_string(),
                field: String::new(),
                operator: Operator::Equals,
                left: None,
                right: None,
                result: Truth::Indeterminate,
                reason: "unknown_rule".to_string(),
            },
        };
        self.memo.insert(name, explanation.clone());
        explanation
    }
}
