//! Control validation: rules, operands, expression references and thresholds.

use std::collections::HashSet;

use serde_json::Value;

use crate::evaluator::context::{FieldPath, EVENT_ATTRS};
use crate::evaluator::matcher::as_number;
use crate::schema::*;

use super::fuzzy::fuzzy_match;
use super::pattern_checks::compile_pattern;
use super::ValidationResult;

const MAX_WINDOW_SECS: u64 = 366 * 24 * 3600;

fn at(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

pub(super) fn validate_control(
    control: &ControlSpec,
    path: &str,
    max_depth: usize,
    result: &mut ValidationResult,
) {
    let id_ok = !control.id.is_empty()
        && control
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !id_ok {
        result.error(
            at(path, "id"),
            format!(
                "control id must be non-empty alphanumeric, '-' or '_', got '{}'",
                control.id
            ),
        );
    }

    let mut names = HashSet::new();
    for (i, rule) in control.rules.iter().enumerate() {
        let rule_path = at(path, &format!("rules[{i}]"));
        if rule.name.trim().is_empty() {
            result.error(at(&rule_path, "name"), "rule name must not be empty");
        } else if !names.insert(rule.name.as_str()) {
            result.error(
                at(&rule_path, "name"),
                format!("duplicate rule name '{}'", rule.name),
            );
        }
        validate_rule(rule, &rule_path, result);
    }

    validate_expression(control, path, max_depth, result);

    if let Some(threshold) = &control.threshold {
        validate_threshold(threshold, &at(path, "threshold"), result);
    }
}

// ── Rules ───────────────────────────────────────────────────────────

fn validate_field_path(raw: &str, path: &str, result: &mut ValidationResult) {
    if let Err(message) = FieldPath::parse(raw) {
        let suggestion = raw
            .strip_prefix("event.")
            .and_then(|attr| fuzzy_match(attr, EVENT_ATTRS));
        result.error_with_suggestion(path, message, suggestion);
    }
}

fn validate_rule(rule: &RuleSpec, path: &str, result: &mut ValidationResult) {
    validate_field_path(&rule.field, &at(path, "field"), result);

    let value_path = at(path, "value");
    let literal = match &rule.value {
        Operand::Field(reference) => {
            validate_field_path(&reference.field, &at(&value_path, "field"), result);
            if rule.operator == Operator::Matches {
                result.error(
                    value_path,
                    "'matches' requires a literal pattern, not a field reference",
                );
            }
            return;
        }
        Operand::Literal(v) => v,
    };

    match rule.operator {
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            if as_number(literal).is_none() {
                result.error(
                    value_path,
                    format!("'{}' requires a numeric value, got {}", rule.operator, literal),
                );
            }
        }
        Operator::In | Operator::NotIn => match literal {
            Value::Array(items) => {
                if items.is_empty() {
                    result.warn(value_path, format!("'{}' against an empty list", rule.operator));
                }
            }
            Value::String(_) => {}
            other => result.error(
                value_path,
                format!("'{}' requires a list or string value, got {}", rule.operator, other),
            ),
        },
        Operator::Matches => match literal {
            Value::String(pattern) => {
                if let Err(e) = compile_pattern(pattern) {
                    result.error(value_path, e);
                }
            }
            other => result.error(
                value_path,
                format!("'matches' requires a string pattern, got {}", other),
            ),
        },
        Operator::Equals | Operator::NotEquals => {
            if literal.is_null() {
                result.warn(value_path, "comparison against null");
            }
        }
    }
}

// ── Expression ──────────────────────────────────────────────────────

fn validate_expression(
    control: &ControlSpec,
    path: &str,
    max_depth: usize,
    result: &mut ValidationResult,
) {
    let expr_path = at(path, "expression");
    let depth = control.expression.depth_bounded(max_depth);
    if depth > max_depth {
        result.error(
            expr_path,
            format!("expression nesting exceeds the maximum depth of {max_depth}"),
        );
        return;
    }

    let names: Vec<&str> = control.rules.iter().map(|r| r.name.as_str()).collect();
    check_nodes(&control.expression, &expr_path, &names, result);

    let referenced = control.expression.rule_refs();
    for name in &names {
        if !referenced.contains(name) {
            result.warn(
                at(path, "rules"),
                format!("rule '{}' is not referenced by the expression", name),
            );
        }
    }
}

/// Depth is already known to be bounded when this runs.
fn check_nodes(node: &Expression, path: &str, names: &[&str], result: &mut ValidationResult) {
    match node {
        Expression::Rule(name) => {
            if !names.contains(&name.as_str()) {
                result.error_with_suggestion(
                    path,
                    format!("unknown rule '{}'", name),
                    fuzzy_match(name, names),
                );
            }
        }
        Expression::Not(child) => check_nodes(child, &format!("{path}.NOT"), names, result),
        Expression::And(children) | Expression::Or(children) => {
            let label = node.label();
            if children.is_empty() {
                result.error(path, format!("{label} needs at least one operand"));
            }
            for (i, child) in children.iter().enumerate() {
                check_nodes(child, &format!("{path}.{label}[{i}]"), names, result);
            }
        }
    }
}

// ── Threshold ───────────────────────────────────────────────────────

fn validate_threshold(threshold: &Threshold, path: &str, result: &mut ValidationResult) {
    match threshold {
        Threshold::Count { value, .. } => {
            if *value == 0 {
                result.error(at(path, "value"), "count threshold must be at least 1");
            }
        }
        Threshold::Percent { value, .. } => {
            if !value.is_finite() || *value <= 0.0 || *value > 100.0 {
                result.error(
                    at(path, "value"),
                    format!("percent threshold must be in (0, 100], got {value}"),
                );
            }
        }
        Threshold::TimeWindow { .. } => {}
    }

    let window = threshold.window_secs();
    if window == 0 {
        result.error(at(path, "window_secs"), "window must be positive");
    } else if window > MAX_WINDOW_SECS {
        result.error(
            at(path, "window_secs"),
            format!("window of {window}s exceeds the {MAX_WINDOW_SECS}s limit"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::validate_control;
    use crate::schema::*;
    use serde_json::json;

    fn rule(name: &str, field: &str, op: Operator, value: serde_json::Value) -> RuleSpec {
        RuleSpec {
            name: name.into(),
            description: None,
            field: field.into(),
            operator: op,
            value: Operand::literal(value),
        }
    }

    fn control(rules: Vec<RuleSpec>, expression: Expression) -> ControlSpec {
        ControlSpec {
            id: "c1".into(),
            description: None,
            severity: Default::default(),
            active: true,
            rules,
            expression,
            threshold: None,
        }
    }

    #[test]
    fn unknown_rule_gets_suggestion() {
        let c = control(
            vec![rule("geotag_enabled", "geotag_enabled", Operator::Equals, json!(true))],
            Expression::and(vec![Expression::rule("geotag_enable")]),
        );
        let result = validate_control(&c, "controls[0]", 10);
        assert!(!result.valid);
        let err = &result.errors[0];
        assert_eq!(err.path, "controls[0].expression.AND[0]");
        assert_eq!(err.suggestion.as_deref(), Some("geotag_enabled"));
    }

    #[test]
    fn depth_over_limit_rejected() {
        let mut expr = Expression::rule("r");
        for _ in 0..10 {
            expr = Expression::not(expr);
        }
        let c = control(vec![rule("r", "x", Operator::Equals, json!(1))], expr);
        assert_eq!(c.expression.depth_bounded(10), 11);
        let result = validate_control(&c, "", 10);
        assert!(result.errors[0].message.contains("maximum depth"));
    }

    #[test]
    fn operand_shapes_checked() {
        let c = control(
            vec![
                rule("a", "size", Operator::Gt, json!("big")),
                rule("b", "tag", Operator::In, json!(5)),
                rule("c", "bio", Operator::Matches, json!("(a+)+")),
                rule("d", "event.typ", Operator::Equals, json!("x")),
            ],
            Expression::or(vec![
                Expression::rule("a"),
                Expression::rule("b"),
                Expression::rule("c"),
                Expression::rule("d"),
            ]),
        );
        let result = validate_control(&c, "", 10);
        let paths: Vec<&str> = result.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["rules[0].value", "rules[1].value", "rules[2].value", "rules[3].field"]
        );
        assert_eq!(result.errors[3].suggestion.as_deref(), Some("type"));
    }

    #[test]
    fn matches_rejects_field_reference() {
        let mut r = rule("m", "bio", Operator::Matches, json!(null));
        r.value = Operand::field("event.source");
        let c = control(vec![r], Expression::rule("m"));
        assert!(!validate_control(&c, "", 10).valid);
    }

    #[test]
    fn thresholds_checked() {
        let mut c = control(
            vec![rule("r", "x", Operator::Equals, json!(1))],
            Expression::rule("r"),
        );
        c.threshold = Some(Threshold::Percent {
            value: 0.0,
            window_secs: 60,
        });
        assert!(!validate_control(&c, "", 10).valid);
        c.threshold = Some(Threshold::Count {
            value: 3,
            window_secs: 0,
        });
        assert!(!validate_control(&c, "", 10).valid);
        c.threshold = Some(Threshold::TimeWindow { window_secs: 600 });
        assert!(validate_control(&c, "", 10).valid);
    }

    #[test]
    fn window_longer_than_a_year_is_an_error() {
        let mut c = control(
            vec![rule("r", "x", Operator::Equals, json!(1))],
            Expression::rule("r"),
        );
        c.threshold = Some(Threshold::Count {
            value: 3,
            window_secs: 366 * 24 * 3600,
        });
        assert!(validate_control(&c, "", 10).valid);

        c.threshold = Some(Threshold::Count {
            value: 3,
            window_secs: 10_000_000_000_000_000,
        });
        let result = validate_control(&c, "controls[0]", 10);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.path.ends_with("window_secs")));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn unused_rule_is_a_warning() {
        let c = control(
            vec![
                rule("used", "x", Operator::Equals, json!(1)),
                rule("spare", "y", Operator::Equals, json!(2)),
            ],
            Expression::rule("used"),
        );
        let result = validate_control(&c, "", 10);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }
}
