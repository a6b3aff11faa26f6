//! # Faultline Utilities
//!
//! Shared utilities for faultline tools: `tracing` setup that also keeps the
//! fault-path logger of `faultline-core` at a matching level.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    default_log_file, init_file_logging, init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError,
    LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
