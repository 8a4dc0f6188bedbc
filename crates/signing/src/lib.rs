//! Signing providers for the event chain and export bundles.
//!
//! This crate provides:
//! - `SigningProvider` trait: `sign(bytes)`, `verify(bytes, signature)`
//! - Local HMAC-SHA256 and Ed25519 providers
//! - A HashiCorp Vault transit provider
//! - `from_config` factory selecting a provider from `SigningConfig`
//! - `GeneratedKey`, fresh key material for the local providers
//! - `SwitchableSigner`, a wrapper that can simulate provider outages

pub mod ed25519;
pub mod factory;
pub mod keygen;
pub mod switchable;
pub mod symmetric;
pub mod traits;
pub mod vault;

pub use ed25519::Ed25519Signer;
pub use factory::from_config;
pub use keygen::{GeneratedKey, KeyAlgorithm};
pub use switchable::SwitchableSigner;
pub use symmetric::HmacSigner;
pub use traits::{SigningError, SigningProvider};
pub use vault::VaultTransitSigner;
