//! Filesystem policy loader.
//!
//! Scans a directory recursively for YAML policy documents and parses them via
//! two-pass deserialization (`DocumentEnvelope` -> `PolicyDocument`).

mod core;
mod error;

#[cfg(test)]
mod tests;

pub use self::core::{document_key, PolicyLoader};
pub use self::error::{LoadResult, LoadStatus, Result, RuleError};
