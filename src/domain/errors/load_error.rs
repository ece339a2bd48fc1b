//! Errors produced while loading a single image request.

use thiserror::Error;

/// Result type for request loading.
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Terminal error captured on a request and reported through its callback.
///
/// Payloads are plain strings so a single error can be shared by a leader
/// request and every follower that coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("decoder rejected image data: {message}")]
    DecodeFormat { message: String },

    #[error("server responded with status {status}")]
    FetchStatus { status: u16 },

    #[error("server promised {expected} bytes and sent {received}")]
    FetchSizeMismatch { expected: u64, received: u64 },

    #[error("request was cancelled")]
    Cancelled,

    #[error("cache index failure: {message}")]
    StoreIo { message: String },

    #[error("unable to create cache directory {path}: {message}")]
    DirectoryCreate { path: String, message: String },

    #[error("resource not found: {name}")]
    ResourceNotFound { name: String },

    #[error("image is not cached: {key}")]
    NotCached { key: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("io error: {message}")]
    Io { message: String },

    #[error("request names no source to open")]
    NoInput,
}

impl LoadError {
    /// Creates decode format error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeFormat {
            message: message.into(),
        }
    }

    /// Creates store error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreIo {
            message: message.into(),
        }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates io error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates resource not found error.
    #[must_use]
    pub fn resource_not_found(name: impl Into<String>) -> Self {
        Self::ResourceNotFound { name: name.into() }
    }

    /// Creates not cached error.
    #[must_use]
    pub fn not_cached(key: impl Into<String>) -> Self {
        Self::NotCached { key: key.into() }
    }

    /// Returns whether error is the cooperative cancellation outcome.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns whether error is network related.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::FetchStatus { .. } | Self::FetchSizeMismatch { .. }
        )
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<super::StoreError> for LoadError {
    fn from(e: super::StoreError) -> Self {
        Self::store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_message() {
        let err = LoadError::FetchSizeMismatch {
            expected: 100,
            received: 40,
        };
        assert_eq!(err.to_string(), "server promised 100 bytes and sent 40");
    }

    #[test]
    fn test_predicates() {
        assert!(LoadError::Cancelled.is_cancelled());
        assert!(!LoadError::NoInput.is_cancelled());
        assert!(LoadError::FetchStatus { status: 404 }.is_network_error());
        assert!(LoadError::network("timed out").is_network_error());
        assert!(!LoadError::decode("bad header").is_network_error());
    }
}
