//! Crate-level error types
//!
//! Repository operations report [`RepositoryError`] directly. This module
//! wraps it together with the failures that happen around the repository
//! layer: configuration loading, I/O and internal invariants.

use thiserror::Error;

use crate::repository::{RepositoryError, RepositoryErrorKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Structured repository error with operation context
    #[error("{0}")]
    Repository(#[from] RepositoryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Repository error kind, when this is a repository failure
    pub fn repository_kind(&self) -> Option<RepositoryErrorKind> {
        match self {
            Self::Repository(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Repository(e) if e.is_retriable())
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryOperation;

    #[test]
    fn test_repository_error_conversion() {
        let err: Error = RepositoryError::not_found("orders", "42").into();
        assert_eq!(err.repository_kind(), Some(RepositoryErrorKind::NotFound));
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_retriable_follows_repository_kind() {
        let err: Error = RepositoryError::timeout(RepositoryOperation::List, "store slow").into();
        assert!(err.is_retriable());
        assert!(!Error::Internal("boom".to_string()).is_retriable());
    }

    #[test]
    fn test_config_error_display() {
        let err: Error = figment::Error::from("missing field `name`".to_string()).into();
        assert!(err.to_string().starts_with("Configuration error"));
        assert_eq!(err.repository_kind(), None);
    }
}
