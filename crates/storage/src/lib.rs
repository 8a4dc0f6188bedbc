//! Durable storage for the compliance engine.
//!
//! [`ComplianceStore`] is the seam: [`MemoryStore`] backs tests and
//! single-node runs, [`PgStore`] is the production implementation.

pub mod db;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{ComplianceStore, CreateOutcome, StoredEvent, StreamHalt};
