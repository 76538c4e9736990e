//! imgpkg Core - Foundational Types
//!
//! Error taxonomy, configuration, and the shared log sink used by the
//! packaging, pull, and relocation engines.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::{CopyConfig, RegistryConfig, DEFAULT_CONCURRENCY};
pub use error::{PkgError, Result};
pub use log::{PrefixWriter, PrefixedLogger};

/// imgpkg version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
