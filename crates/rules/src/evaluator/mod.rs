//! Control evaluation: Rule Matcher plus Expression Evaluator.
//!
//! A [`CompiledControl`] is built once at save/load time. Building it runs the
//! full validation pass, resolves every field path and compiles every
//! `matches` pattern, so evaluation never parses anything. Evaluation is pure:
//! it reads one event and holds no locks.

pub mod context;
mod expression;
pub mod matcher;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use comply_core::config::EvaluationConfig;
use comply_core::{ComplyError, Event, Severity};
use regex::Regex;
use serde_json::Value;

use crate::schema::{ControlSpec, Expression, Operand, Operator, RuleSpec, Threshold};
use crate::validation::{pattern_checks, validate_control, ValidationError};

use context::FieldPath;
use expression::Evaluation;

pub use expression::Explanation;
pub use matcher::Truth;

// ── Errors ──────────────────────────────────────────────────────────

/// Failure of a well-formed control while evaluating one event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("expression depth {depth} exceeds maximum {max}")]
    TooDeep { depth: usize, max: usize },

    #[error("expression evaluation exceeded {after_ms}ms")]
    Timeout { after_ms: u64 },
}

impl EvalError {
    pub fn into_comply(self, control: &str) -> ComplyError {
        match self {
            EvalError::TooDeep { depth, max } => ComplyError::ExpressionTooDeep { depth, max },
            EvalError::Timeout { after_ms } => ComplyError::EvaluationTimeout {
                control: control.to_string(),
                after_ms,
            },
        }
    }
}

/// A control rejected at save time.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidExpression {
    pub control: String,
    pub errors: Vec<ValidationError>,
}

impl InvalidExpression {
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

impl fmt::Display for InvalidExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid control '{}': {}",
            self.control,
            self.messages().join("; ")
        )
    }
}

impl std::error::Error for InvalidExpression {}

impl From<InvalidExpression> for ComplyError {
    fn from(e: InvalidExpression) -> Self {
        ComplyError::InvalidExpression {
            control: e.control.clone(),
            reason: e.messages().join("; "),
        }
    }
}

// ── Limits ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalLimits {
    pub max_depth: usize,
    pub timeout: Duration,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_depth: 10,
            timeout: Duration::from_millis(250),
        }
    }
}

impl From<&EvaluationConfig> for EvalLimits {
    fn from(cfg: &EvaluationConfig) -> Self {
        Self {
            max_depth: cfg.max_expression_depth,
            timeout: Duration::from_millis(cfg.expression_timeout_ms),
        }
    }
}

// ── Compiled forms ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum CompiledOperand {
    Literal(Value),
    Field(FieldPath),
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    spec: RuleSpec,
    left: FieldPath,
    right: CompiledOperand,
    pattern: Option<Regex>,
}

impl CompiledRule {
    fn compile(spec: &RuleSpec) -> Result<Self, String> {
        let left = FieldPath::parse(&spec.field)?;
        let right = match &spec.value {
            Operand::Literal(v) => CompiledOperand::Literal(v.clone()),
            Operand::Field(r) => CompiledOperand::Field(FieldPath::parse(&r.field)?),
        };
        let pattern = match (&spec.operator, &spec.value) {
            (Operator::Matches, Operand::Literal(Value::String(p))) => {
                Some(pattern_checks::compile_pattern(p)?)
            }
            (Operator::Matches, _) => {
                return Err("'matches' requires a literal string pattern".to_string())
            }
            _ => None,
        };
        Ok(Self {
            spec: spec.clone(),
            left,
            right,
            pattern,
        })
    }

    pub(crate) fn evaluate(&self, event: &Event) -> Explanation {
        let left = self.left.resolve(event);
        let right = match &self.right {
            CompiledOperand::Literal(v) => Some(std::borrow::Cow::Borrowed(v)),
            CompiledOperand::Field(path) => path.resolve(event),
        };

        let (result, reason) = match (&left, &right) {
            (None, _) => (Truth::Indeterminate, "left_operand_not_found"),
            (_, None) => (Truth::Indeterminate, "right_operand_not_found"),
            (Some(l), Some(r)) => {
                let c = matcher::compare(self.spec.operator, l, r, self.pattern.as_ref());
                (c.truth, c.reason)
            }
        };

        Explanation::Rule {
            name: self.spec.name.clone(),
            field: self.spec.field.clone(),
            operator: self.spec.operator,
            left: left.map(|v| v.into_owned()),
            right: right.map(|v| v.into_owned()),
            result,
            reason: reason.to_string(),
        }
    }
}

/// Outcome of evaluating one control against one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutcome {
    pub truth: Truth,
    pub explanation: Explanation,
    /// Set when the expression is a single rule reference.
    pub deciding_rule: Option<String>,
}

impl ControlOutcome {
    /// Indeterminate collapses to "no match".
    pub fn matched(&self) -> bool {
        self.truth.is_true()
    }
}

/// A validated control ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledControl {
    key: String,
    spec: ControlSpec,
    rules: HashMap<String, CompiledRule>,
}

impl CompiledControl {
    /// Validate and compile. Any validation error rejects the control.
    pub fn compile(key: &str, spec: &ControlSpec, max_depth: usize) -> Result<Self, InvalidExpression> {
        let result = validate_control(spec, "", max_depth);
        if !result.valid {
            return Err(InvalidExpression {
                control: key.to_string(),
                errors: result.errors,
            });
        }

        let mut rules = HashMap::with_capacity(spec.rules.len());
        for (i, rule) in spec.rules.iter().enumerate() {
            let compiled = CompiledRule::compile(rule).map_err(|message| InvalidExpression {
                control: key.to_string(),
                errors: vec![ValidationError {
                    path: format!("rules[{i}]"),
                    message,
                    suggestion: None,
                }],
            })?;
            rules.insert(rule.name.clone(), compiled);
        }

        Ok(Self {
            key: key.to_string(),
            spec: spec.clone(),
            rules,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn spec(&self) -> &ControlSpec {
        &self.spec
    }

    pub fn severity(&self) -> Severity {
        self.spec.severity
    }

    pub fn threshold(&self) -> Option<&Threshold> {
        self.spec.threshold.as_ref()
    }

    /// Evaluate the expression against `event`.
    pub fn evaluate(&self, event: &Event, limits: &EvalLimits) -> Result<ControlOutcome, EvalError> {
        let mut evaluation = Evaluation::new(&self.rules, event, limits.max_depth, limits.timeout);
        let explanation = evaluation.run(&self.spec.expression)?;
        let deciding_rule = match &self.spec.expression {
            Expression::Rule(name) => Some(name.clone()),
            _ => None,
        };
        Ok(ControlOutcome {
            truth: explanation.result(),
            explanation,
            deciding_rule,
        })
    }
}
