//! Error types for the query engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// A visualization lacks a capability required by the request, or was
    /// registered with an inconsistent capability set
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No visualization is registered under the requested name
    #[error("Visualization not found: {0}")]
    UnknownVisualization(String),

    /// Backend compute failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Cache store failure (only surfaced by direct store use, never by queries)
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A spawned window task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a [`WindowCompute`](crate::engine::WindowCompute) backend
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// The backend query failed
    #[error("Compute failed: {0}")]
    Failed(String),

    /// The backend returned a value of the wrong shape for the request
    ///
    /// Raised when a grouped request gets a plain value back, or the reverse.
    #[error("Unexpected result shape: expected {expected}, got {actual}")]
    UnexpectedShape {
        /// Shape the request required
        expected: &'static str,
        /// Shape the backend produced
        actual: &'static str,
    },
}

/// Cache store errors
///
/// The orchestrator downgrades every one of these to a cache miss.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection to the cache backend failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// A cache command failed
    #[error("Command error: {0}")]
    Command(String),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_converts() {
        let err: Error = BackendError::Failed("timeout".to_string()).into();
        assert!(matches!(err, Error::Backend(BackendError::Failed(_))));
        assert_eq!(err.to_string(), "Backend error: Compute failed: timeout");
    }

    #[test]
    fn test_shape_error_message() {
        let err = BackendError::UnexpectedShape {
            expected: "grouped",
            actual: "plain",
        };
        assert_eq!(
            err.to_string(),
            "Unexpected result shape: expected grouped, got plain"
        );
    }
}
