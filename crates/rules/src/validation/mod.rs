//! Save-time policy validation with structured errors and suggestions.
//!
//! Validates the document header, every control's rules, expression and
//! threshold. Returns a [`ValidationResult`] with errors (block the control
//! from evaluation) and warnings (advisory).

mod control_checks;
pub(crate) mod pattern_checks;

pub mod fuzzy;

use crate::schema::*;
use serde::{Deserialize, Serialize};

use fuzzy::{fuzzy_match, is_kebab_case};

// ── Result types ────────────────────────────────────────────────────

/// Overall validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

/// A blocking validation error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationError {
    /// Location, e.g. `"controls[0].expression.AND[1]"`.
    pub path: String,
    pub message: String,
    /// Optional "Did you mean …?" suggestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)?;
        } else {
            write!(f, "{}: {}", self.path, self.message)?;
        }
        if let Some(s) = &self.suggestion {
            write!(f, " (did you mean '{}'?)", s)?;
        }
        Ok(())
    }
}

/// A non-blocking advisory warning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationResult {
    pub(crate) fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        });
    }

    pub(crate) fn error_with_suggestion(
        &mut self,
        path: impl Into<String>,
        message: impl Into<String>,
        suggestion: Option<&str>,
    ) {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
            suggestion: suggestion.map(str::to_string),
        });
    }

    pub(crate) fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
        });
    }
}

// ── Public API ──────────────────────────────────────────────────────

/// Validate a single control. `path` prefixes every reported location.
pub fn validate_control(control: &ControlSpec, path: &str, max_depth: usize) -> ValidationResult {
    let mut result = ValidationResult::new();
    control_checks::validate_control(control, path, max_depth, &mut result);
    result
}

/// Validate a full policy document: header, metadata and every control.
pub fn validate_policy(doc: &PolicyDocument, max_depth: usize) -> ValidationResult {
    let mut result = ValidationResult::new();

    if doc.api_version != "v1" {
        result.error(
            "apiVersion",
            format!("apiVersion must be 'v1', got '{}'", doc.api_version),
        );
    }
    if doc.kind.parse::<DocumentKind>().is_err() {
        result.error_with_suggestion(
            "kind",
            format!("kind must be 'Policy', got '{}'", doc.kind),
            fuzzy_match(&doc.kind, DocumentKind::NAMES),
        );
    }
    if !is_kebab_case(&doc.metadata.name) {
        result.error(
            "metadata.name",
            format!(
                "name must be kebab-case (lowercase alphanumeric + hyphens), got '{}'",
                doc.metadata.name
            ),
        );
    }
    if doc.metadata.version.trim().is_empty() {
        result.error("metadata.version", "version must not be empty");
    }
    if doc.controls.is_empty() {
        result.warn("controls", "policy has no controls and cannot be approved");
    }

    let mut seen = std::collections::HashSet::new();
    for (i, control) in doc.controls.iter().enumerate() {
        let path = format!("controls[{i}]");
        if !seen.insert(control.id.as_str()) {
            result.error(
                format!("{path}.id"),
                format!("duplicate control id '{}'", control.id),
            );
        }
        control_checks::validate_control(control, &path, max_depth, &mut result);
    }

    result
}

/// Parse raw YAML and validate. Parse errors are reported as a single error.
pub fn validate_yaml(yaml: &str, max_depth: usize) -> ValidationResult {
    match serde_yaml::from_str::<PolicyDocument>(yaml) {
        Ok(doc) => validate_policy(&doc, max_depth),
        Err(e) => {
            let mut result = ValidationResult::new();
            result.error("", format!("YAML parse error: {e}"));
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
apiVersion: v1
kind: Policy
metadata:
  name: auth-hygiene
  version: "1"
controls:
  - id: weak-password
    severity: high
    rules:
      - { name: short, field: password.length, operator: lt, value: 12 }
      - { name: simple, field: password.complex, operator: equals, value: false }
    expression:
      OR:
        - RULE: short
        - RULE: simple
"#;

    #[test]
    fn valid_policy_passes() {
        let result = validate_yaml(VALID, 10);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn header_errors_reported() {
        let yaml = VALID
            .replace("apiVersion: v1", "apiVersion: v2")
            .replace("name: auth-hygiene", "name: Auth_Hygiene");
        let result = validate_yaml(&yaml, 10);
        assert!(!result.valid);
        let paths: Vec<&str> = result.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["apiVersion", "metadata.name"]);
    }

    #[test]
    fn kind_suggestion() {
        let yaml = VALID.replace("kind: Policy", "kind: Polcy");
        let result = validate_yaml(&yaml, 10);
        assert_eq!(result.errors[0].suggestion.as_deref(), Some("Policy"));
    }

    #[test]
    fn duplicate_control_ids() {
        let mut doc: PolicyDocument = serde_yaml::from_str(VALID).unwrap();
        doc.controls.push(doc.controls[0].clone());
        let result = validate_policy(&doc, 10);
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "controls[1].id" && e.message.contains("duplicate")));
    }

    #[test]
    fn parse_error_is_single_error() {
        let result = validate_yaml("apiVersion: [", 10);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.starts_with("YAML parse error"));
    }

    #[test]
    fn error_display_includes_suggestion() {
        let e = ValidationError {
            path: "controls[0].expression".into(),
            message: "unknown rule 'shrot'".into(),
            suggestion: Some("short".into()),
        };
        assert_eq!(
            e.to_string(),
            "controls[0].expression: unknown rule 'shrot' (did you mean 'short'?)"
        );
    }
}
