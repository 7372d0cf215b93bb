//! Error types for fxhost.

use crate::plugin::PluginError;
use thiserror::Error;

/// Result type alias using fxhost's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fxhost operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The request would push the pool's checked-out bytes past its budget.
    ///
    /// This is a policy limit, not physical memory exhaustion.
    #[error("memory pool can't allocate {requested} bytes: {available} bytes available")]
    CapacityExceeded {
        /// Bytes requested.
        requested: usize,
        /// Bytes still available under the budget.
        available: usize,
    },

    /// Memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Plugin loading or consistency error.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The persisted catalogue could not be written or parsed.
    #[error("plugin cache document: {0}")]
    CacheDocument(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
