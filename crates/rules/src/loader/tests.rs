//! Tests for the policy loader module.

use std::fs;

use tempfile::TempDir;

use super::*;

const VALID_POLICY_YAML: &str = r#"
apiVersion: v1
kind: Policy
metadata:
  name: transmission
  version: "1.2"
controls:
  - id: unencrypted
    severity: critical
    rules:
      - name: encrypted
        field: transmission.encrypted
        operator: equals
        value: false
    expression:
      RULE: encrypted
"#;

fn temp_loader() -> (TempDir, PolicyLoader) {
    let dir = TempDir::new().expect("create tempdir");
    let loader = PolicyLoader::new(dir.path().to_path_buf(), 10);
    (dir, loader)
}

#[test]
fn load_policy_from_file() {
    let (dir, loader) = temp_loader();
    let path = dir.path().join("transmission.yml");
    fs::write(&path, VALID_POLICY_YAML).unwrap();

    let (doc, validation) = loader.load_file(&path).unwrap();
    assert_eq!(doc.metadata.name, "transmission");
    assert_eq!(doc.metadata.version, "1.2");
    assert!(validation.valid);
}

#[test]
fn load_all_skips_dotfiles_and_non_yaml() {
    let (dir, loader) = temp_loader();
    fs::write(dir.path().join("p1.yml"), VALID_POLICY_YAML).unwrap();
    fs::write(dir.path().join(".hidden.yml"), VALID_POLICY_YAML).unwrap();
    fs::write(dir.path().join("readme.txt"), "not a policy").unwrap();

    let results = loader.load_all().unwrap();
    let loaded = results
        .iter()
        .filter(|r| matches!(r.status, LoadStatus::Loaded { .. }))
        .count();
    let skipped = results
        .iter()
        .filter(|r| matches!(r.status, LoadStatus::Skipped { .. }))
        .count();
    assert_eq!(loaded, 1);
    assert_eq!(skipped, 2);
    assert!(loader.get("transmission@1.2").is_some());
}

#[test]
fn load_all_recurses_into_subdirectories() {
    let (dir, loader) = temp_loader();
    let nested = dir.path().join("team").join("net");
    fs::create_dir_all(&nested).unwrap();
    fs::write(nested.join("p.yaml"), VALID_POLICY_YAML).unwrap();
    let v2 = VALID_POLICY_YAML.replace("\"1.2\"", "\"2.0\"");
    fs::write(dir.path().join("p2.yml"), v2).unwrap();

    loader.load_all().unwrap();
    let keys: Vec<String> = loader
        .documents()
        .iter()
        .map(|d| format!("{}@{}", d.metadata.name, d.metadata.version))
        .collect();
    assert_eq!(keys, vec!["transmission@1.2", "transmission@2.0"]);
}

#[test]
fn parse_error_reported_per_file() {
    let (dir, loader) = temp_loader();
    fs::write(dir.path().join("good.yml"), VALID_POLICY_YAML).unwrap();
    fs::write(dir.path().join("bad.yml"), "apiVersion: v1\nkind: [").unwrap();

    let results = loader.load_all().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results
        .iter()
        .any(|r| matches!(r.status, LoadStatus::Failed { .. })));
    assert_eq!(loader.documents().len(), 1);
}

#[test]
fn header_errors_fail_the_file() {
    let (_dir, loader) = temp_loader();
    let yaml = VALID_POLICY_YAML.replace("apiVersion: v1", "apiVersion: v9");
    let err = loader.parse_str(&yaml).unwrap_err();
    assert!(matches!(err, RuleError::Validation(_)));

    let yaml = VALID_POLICY_YAML.replace("kind: Policy", "kind: Rule");
    assert!(loader.parse_str(&yaml).is_err());
}

#[test]
fn invalid_control_still_loads() {
    let (_dir, loader) = temp_loader();
    let yaml = VALID_POLICY_YAML.replace("RULE: encrypted", "RULE: encryptd");
    let (doc, validation) = loader.parse_str(&yaml).unwrap();
    assert_eq!(doc.controls.len(), 1);
    assert!(!validation.valid);
    assert_eq!(validation.errors[0].suggestion.as_deref(), Some("encrypted"));
}

#[test]
fn missing_directory_is_an_error() {
    let loader = PolicyLoader::new("/definitely/not/here".into(), 10);
    assert!(matches!(loader.load_all(), Err(RuleError::Io(_))));
}

#[test]
fn bundled_example_policies_parse() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/policies/examples");
    let loader = PolicyLoader::new(dir.clone(), 10);
    let mut seen = 0;
    for entry in fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) != Some("yml") {
            continue;
        }
        let (doc, validation) = loader
            .load_file(&path)
            .unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
        assert!(!doc.controls.is_empty(), "{}", path.display());
        assert!(validation.valid, "{}: {:?}", path.display(), validation.errors);
        seen += 1;
    }
    assert_eq!(seen, 3);
}

#[test]
fn nested_expressions_survive_the_two_pass_parse() {
    let (_dir, loader) = temp_loader();
    let yaml = VALID_POLICY_YAML.replace(
        "    expression:\n      RULE: encrypted\n",
        "    expression:\n      OR:\n        - NOT:\n            NOT:\n              RULE: encrypted\n        - AND: [{ RULE: encrypted }]\n",
    );
    let (doc, validation) = loader.parse_str(&yaml).unwrap();
    assert!(validation.valid);
    assert_eq!(
        doc.controls[0].expression,
        crate::schema::Expression::or(vec![
            crate::schema::Expression::not(crate::schema::Expression::not(crate::schema::Expression::rule("encrypted"))),
            crate::schema::Expression::and(vec![crate::schema::Expression::rule("encrypted")]),
        ])
    );

    let json = serde_json::to_value(&doc.controls[0]).unwrap();
    assert_eq!(json["expression"]["OR"][0]["NOT"]["NOT"]["RULE"], "encrypted");
    let back: crate::schema::ControlSpec = serde_json::from_value(json).unwrap();
    assert_eq!(back, doc.controls[0]);
}
