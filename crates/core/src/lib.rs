pub mod artifact;
pub mod config;
pub mod error;
pub mod event;
pub mod violation;

pub use artifact::*;
pub use config::Config;
pub use error::*;
pub use event::*;
pub use violation::*;
