//! Document envelope for lightweight first-pass deserialization.

use serde::{Deserialize, Serialize};

use super::{DocumentKind, PolicyDocument};

/// First-pass header: reads `apiVersion`, `kind` and the metadata name/version
/// without committing to a concrete document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEnvelope {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: EnvelopeMetadata,
    /// Remaining fields captured as raw YAML for second-pass deserialization.
    #[serde(flatten)]
    pub rest: serde_yaml::Value,
}

/// Loosely typed metadata. The strict form is checked in the second pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub rest: serde_yaml::Value,
}

impl DocumentEnvelope {
    pub fn document_kind(&self) -> std::result::Result<DocumentKind, String> {
        self.kind.parse()
    }

    /// Deserialize the source text this envelope was read from into the
    /// concrete type named by `kind`.
    ///
    /// The original text is parsed again rather than the captured
    /// [`serde_yaml::Value`], so enum-valued fields see the same YAML events
    /// they would on a direct parse.
    pub fn parse_full(&self, contents: &str) -> std::result::Result<PolicyDocument, String> {
        match self.document_kind()? {
            DocumentKind::Policy => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
        }
    }
}
