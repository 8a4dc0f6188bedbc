//! Core [`PolicyLoader`] struct: filesystem-backed policy loading.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::schema::{DocumentEnvelope, PolicyDocument};
use crate::validation::{validate_policy, ValidationResult};

use super::error::{LoadResult, LoadStatus, Result, RuleError};

/// Error paths that make a whole document unusable, as opposed to a single
/// control being flagged invalid.
const HEADER_PATHS: &[&str] = &["apiVersion", "kind", "metadata"];

/// Filesystem-backed policy loader.
///
/// Keeps the last successfully parsed document per `name@version`.
pub struct PolicyLoader {
    policies_dir: PathBuf,
    max_depth: usize,
    documents: Arc<RwLock<BTreeMap<String, PolicyDocument>>>,
}

impl PolicyLoader {
    pub fn new(policies_dir: PathBuf, max_depth: usize) -> Self {
        Self {
            policies_dir,
            max_depth,
            documents: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn policies_dir(&self) -> &Path {
        &self.policies_dir
    }

    /// Recursively scan the policy directory and load all YAML files.
    ///
    /// Dotfiles and non-YAML files are skipped. Parse errors are reported
    /// per-file and do not abort the scan.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        if !self.policies_dir.is_dir() {
            return Err(RuleError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("policy directory not found: {}", self.policies_dir.display()),
            )));
        }
        let mut results = Vec::new();
        self.scan_dir_recursive(&self.policies_dir, &mut results)?;
        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }

    fn scan_dir_recursive(&self, dir: &Path, results: &mut Vec<LoadResult>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    if path.is_file() {
                        results.push(LoadResult {
                            path,
                            status: LoadStatus::Skipped {
                                reason: "dotfile".to_string(),
                            },
                        });
                    }
                    continue;
                }
            }

            if path.is_dir() {
                self.scan_dir_recursive(&path, results)?;
                continue;
            }

            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);

            if !is_yaml {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            match self.load_file(&path) {
                Ok((doc, validation)) => {
                    let key = document_key(&doc);
                    if !validation.valid {
                        warn!(
                            policy = %key,
                            errors = validation.errors.len(),
                            "policy has invalid controls"
                        );
                    }
                    info!(policy = %key, path = %path.display(), "loaded policy");
                    self.documents
                        .write()
                        .expect("documents lock poisoned")
                        .insert(key.clone(), doc);
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded {
                            policy: key,
                            validation,
                        },
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load policy file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        Ok(())
    }

    /// Parse one file and validate it.
    ///
    /// Fails when the file cannot be parsed or its header is unusable. Invalid
    /// controls are returned in the [`ValidationResult`] instead.
    pub fn load_file(&self, path: &Path) -> Result<(PolicyDocument, ValidationResult)> {
        let contents = fs::read_to_string(path)?;
        self.parse_str(&contents)
    }

    /// Two-pass parse of YAML text followed by validation.
    pub fn parse_str(&self, contents: &str) -> Result<(PolicyDocument, ValidationResult)> {
        let envelope: DocumentEnvelope = serde_yaml::from_str(contents)?;
        if envelope.metadata.name.trim().is_empty() {
            return Err(RuleError::Validation(
                "policy metadata.name must not be empty".to_string(),
            ));
        }

        let doc = envelope.parse_full(contents).map_err(|e| {
            RuleError::Validation(format!(
                "failed to parse policy '{}': {}",
                envelope.metadata.name, e
            ))
        })?;

        let validation = validate_policy(&doc, self.max_depth);
        let header_errors: Vec<String> = validation
            .errors
            .iter()
            .filter(|e| HEADER_PATHS.iter().any(|h| e.path.starts_with(h)))
            .map(|e| e.to_string())
            .collect();
        if !header_errors.is_empty() {
            return Err(RuleError::Validation(header_errors.join("; ")));
        }

        Ok((doc, validation))
    }

    /// Loaded documents ordered by `name@version`.
    pub fn documents(&self) -> Vec<PolicyDocument> {
        self.documents
            .read()
            .expect("documents lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<PolicyDocument> {
        self.documents
            .read()
            .expect("documents lock poisoned")
            .get(key)
            .cloned()
    }
}

/// `name@version` key of a document.
pub fn document_key(doc: &PolicyDocument) -> String {
    format!("{}@{}", doc.metadata.name, doc.metadata.version)
}
