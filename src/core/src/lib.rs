//! SOCI Wrapper Core - Foundational Types
//!
//! Error taxonomy, configuration and the logging context shared by the
//! runtime and the CLI.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::WrapperConfig;
pub use error::{FailureClass, Result, SociError};
pub use log::{LogContext, LogFormat};

/// SOCI wrapper version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
