//! Error types for tern-repository

use std::sync::Arc;
use thiserror::Error;

/// Errors raised while reading resources or scanning repositories.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The resource does not exist (placeholder handle)
    #[error("Resource not found: {path}")]
    NotFound { path: String },

    /// Reading from the underlying storage failed
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The archive backing a repository could not be opened or read
    #[error("Archive error in '{path}': {message}")]
    Archive { path: String, message: String },
}

impl RepositoryError {
    /// Create a not-found error
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Wrap an IO error, mapping `ErrorKind::NotFound` to [`RepositoryError::NotFound`].
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io {
                path,
                source: Arc::new(source),
            }
        }
    }

    /// Create an archive error
    pub fn archive(path: impl Into<String>, message: impl ToString) -> Self {
        Self::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Check whether this error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type using RepositoryError
pub type RepositoryResult<T> = Result<T, RepositoryError>;
