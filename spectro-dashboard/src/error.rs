//! Error types for spectro-dashboard
//!
//! Layered like the request paths that produce them:
//! - `SourceError`: one provider failed; the list path swallows it, the
//!   furnace path propagates it
//! - `PersistenceError`: reporting writer failed; logged by the forwarder only
//! - `DashError`: setup, serialization and shutdown failures

use thiserror::Error;

/// Failure fetching from one result source
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    /// Network, file or database open failure
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Source reachable but its data could not be decoded
    #[error("Source data malformed: {0}")]
    Malformed(String),
}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. } => {
                SourceError::Malformed(err.to_string())
            }
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

/// Failure writing to the reporting database
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Reporting database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid reporting identifier: {0}")]
    InvalidIdentifier(String),

    /// Background writer task panicked or was aborted
    #[error("Reporting writer task failed: {0}")]
    Worker(String),
}

/// Service-level error type
#[derive(Debug, Error)]
pub enum DashError {
    /// Configuration or startup resource failure (fatal)
    #[error("Setup error: {0}")]
    Setup(String),

    /// Merge result could not be serialized
    #[error("Response serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One or more subsystems failed to stop cleanly
    #[error("Shutdown failed: {}", .0.join("; "))]
    Shutdown(Vec<String>),

    /// Shared library error
    #[error(transparent)]
    Common(#[from] spectro_common::Error),
}

/// Convenience Result type using DashError
pub type Result<T> = std::result::Result<T, DashError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_error_lists_every_failure() {
        let err = DashError::Shutdown(vec![
            "http server: bind lost".to_string(),
            "reporting forwarder: close failed".to_string(),
        ]);
        let message = err.to_string();
        assert!(message.contains("http server: bind lost"));
        assert!(message.contains("reporting forwarder: close failed"));
    }
}
