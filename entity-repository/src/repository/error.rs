//! Repository error types
//!
//! This module provides structured error types for repository operations,
//! allowing fine-grained error handling and meaningful error messages.
//!
//! Single-item lookups (`first`, `last`, `get`) surface a miss as
//! [`RepositoryErrorKind::NotFound`] instead of an empty value. Callers must
//! treat that kind as a significant condition, not as "no rows".
//!
//! # Example
//!
//! ```rust
//! use entity_repository::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::not_found("Order", "42");
//! assert!(matches!(error.kind, RepositoryErrorKind::NotFound));
//! assert!(error.entity_id.is_some());
//! ```

use std::fmt;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// First entity matching a predicate
    First,
    /// Last entity matching a predicate under an ordering
    Last,
    /// Single lookup by predicate or identity key
    Get,
    /// Paginated listing
    List,
    /// Existence check
    Exists,
    /// Counting entities matching filters
    Count,
    /// Staging a new entity
    Add,
    /// Staging a modified entity
    Update,
    /// Deleting an entity (hard delete)
    Delete,
    /// Soft deleting an entity and its cascade-eligible descendants
    SoftDelete,
    /// Lazily loading a navigation during a cascade or an include
    LoadRelated,
    /// Flushing pending changes to the store
    Commit,
    /// Building the model registry
    Configure,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Last => write!(f, "last"),
            Self::Get => write!(f, "get"),
            Self::List => write!(f, "list"),
            Self::Exists => write!(f, "exists"),
            Self::Count => write!(f, "count"),
            Self::Add => write!(f, "add"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::SoftDelete => write!(f, "soft_delete"),
            Self::LoadRelated => write!(f, "load_related"),
            Self::Commit => write!(f, "commit"),
            Self::Configure => write!(f, "configure"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Single-item lookup found nothing
    NotFound,
    /// Validation failed before any store access (e.g. empty sort field)
    ValidationFailed,
    /// Soft delete refused because of a one-to-one relationship
    InvalidRelationship,
    /// Store constraint or optimistic-concurrency violation at commit
    PersistenceConflict,
    /// Failed to connect to the store
    ConnectionFailed,
    /// Operation timed out
    Timeout,
    /// Underlying store error
    DatabaseError,
    /// Serialization or deserialization error
    SerializationError,
    /// The unit of work was cancelled at a suspension point
    Cancelled,
    /// Other unclassified error
    Other,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::ValidationFailed => write!(f, "validation_failed"),
            Self::InvalidRelationship => write!(f, "invalid_relationship"),
            Self::PersistenceConflict => write!(f, "persistence_conflict"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::DatabaseError => write!(f, "database_error"),
            Self::SerializationError => write!(f, "serialization_error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured repository error with operation context
///
/// Provides detailed information about what operation failed, why it failed,
/// and which entity was involved.
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::RepositoryError;
///
/// let error = RepositoryError::not_found("Order", "42");
/// println!("{}", error); // "Repository not_found error during get: Order not found [Order: 42]"
///
/// assert!(!error.is_retriable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The type of entity involved (e.g., "Order", "User")
    pub entity_type: Option<String>,
    /// The key of the entity involved
    pub entity_id: Option<String>,
}

impl RepositoryError {
    /// Create a new repository error
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::{RepositoryError, RepositoryOperation, RepositoryErrorKind};
    ///
    /// let error = RepositoryError::new(
    ///     RepositoryOperation::Commit,
    ///     RepositoryErrorKind::DatabaseError,
    ///     "disk full",
    /// );
    /// ```
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a "not found" error with entity context
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::RepositoryError;
    ///
    /// let error = RepositoryError::not_found("Order", "42");
    /// assert_eq!(error.entity_type, Some("Order".to_string()));
    /// ```
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        Self {
            operation: RepositoryOperation::Get,
            kind: RepositoryErrorKind::NotFound,
            message: format!("{entity_type} not found"),
            entity_type: Some(entity_type),
            entity_id: Some(entity_id.into()),
        }
    }

    /// Create a "not found" error for a predicate lookup that has no key to report
    pub fn no_match(operation: RepositoryOperation, entity_type: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        Self {
            operation,
            kind: RepositoryErrorKind::NotFound,
            message: format!("{entity_type} not found"),
            entity_type: Some(entity_type),
            entity_id: None,
        }
    }

    /// Create a validation failed error
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::RepositoryError;
    ///
    /// let error = RepositoryError::validation_failed("Invalid sort field");
    /// ```
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self {
            operation: RepositoryOperation::List,
            kind: RepositoryErrorKind::ValidationFailed,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create an invalid relationship error raised by the one-to-one hazard guard
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::{RepositoryError, RepositoryErrorKind};
    ///
    /// let error = RepositoryError::invalid_relationship("User", "7", "profile");
    /// assert_eq!(error.kind, RepositoryErrorKind::InvalidRelationship);
    /// ```
    pub fn invalid_relationship(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        relationship: &str,
    ) -> Self {
        Self {
            operation: RepositoryOperation::SoftDelete,
            kind: RepositoryErrorKind::InvalidRelationship,
            message: format!(
                "Entity has one-to-one relationship '{relationship}'. Soft delete would block \
                 re-creating a dependent with the same foreign key"
            ),
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.into()),
        }
    }

    /// Create a persistence conflict error (constraint or concurrency violation)
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::{RepositoryError, RepositoryOperation};
    ///
    /// let error = RepositoryError::persistence_conflict(
    ///     RepositoryOperation::Commit,
    ///     "Concurrency stamp mismatch",
    /// );
    /// ```
    pub fn persistence_conflict(
        operation: RepositoryOperation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind: RepositoryErrorKind::PersistenceConflict,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self {
            operation: RepositoryOperation::Get,
            kind: RepositoryErrorKind::ConnectionFailed,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind: RepositoryErrorKind::Timeout,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a store error
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::{RepositoryError, RepositoryOperation};
    ///
    /// let error = RepositoryError::database_error(RepositoryOperation::Add, "Syntax error in query");
    /// ```
    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind: RepositoryErrorKind::DatabaseError,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a serialization error
    pub fn serialization_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind: RepositoryErrorKind::SerializationError,
            message: message.into(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            kind: RepositoryErrorKind::Cancelled,
            message: "Operation cancelled before completion".to_string(),
            entity_type: None,
            entity_id: None,
        }
    }

    /// Add entity context to an existing error
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::{RepositoryError, RepositoryOperation, RepositoryErrorKind};
    ///
    /// let error = RepositoryError::new(
    ///     RepositoryOperation::Update,
    ///     RepositoryErrorKind::PersistenceConflict,
    ///     "Row changed since it was read",
    /// ).with_entity("Order", "ord_456");
    /// ```
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Check if this error is retriable (transient errors that may succeed on retry)
    ///
    /// The repository never retries on its own; this only informs callers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use entity_repository::repository::RepositoryError;
    ///
    /// assert!(RepositoryError::connection_failed("Connection reset").is_retriable());
    /// assert!(!RepositoryError::not_found("Order", "1").is_retriable());
    /// ```
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
        )
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        if let (Some(ref entity_type), Some(ref entity_id)) = (&self.entity_type, &self.entity_id) {
            write!(f, " [{}: {}]", entity_type, entity_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(RepositoryOperation::Get, err.to_string())
    }
}
