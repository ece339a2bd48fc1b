//! Cache index store error types.

use thiserror::Error;

/// Result type for cache index operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures of the persistent cache index.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing database reported an error.
    #[error("database error: {0}")]
    Database(String),
    /// The store could not be (re)initialised.
    #[error("failed to initialise cache index: {0}")]
    Init(String),
}

