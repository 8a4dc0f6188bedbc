//! Policy metadata block.

use serde::{Deserialize, Serialize};

/// Identity and ownership of a policy version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyMetadata {
    /// Kebab-case policy name. At most one version per name is active.
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Channel that receives violation notices for this policy.
    #[serde(default)]
    pub notification_channel: Option<String>,
    /// Target time to resolve a violation, in hours.
    #[serde(default)]
    pub sla_hours: Option<u32>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}
