//! The store collaborator contract
//!
//! The repository layer never talks to a database directly. It issues
//! [`StoreQuery`] values against a [`Store`] and flushes tracked changes as a
//! single [`ChangeSet`]. Rows are JSON objects; the store applies its own
//! soft-delete filter (`is_deleted == true` rows are hidden) unless a query
//! asks for deleted rows, and checks the `concurrency_stamp` of updated and
//! deleted rows against the stamp the entity was read with.
//!
//! [`MemoryStore`] is an in-process implementation used by tests and by
//! services that do not need durability.

mod memory;

use std::fmt;
use std::future::Future;

use serde_json::Value;

use crate::repository::{FilterCondition, RepositoryResult, SortSpec};

pub use memory::MemoryStore;

/// A query against one collection
///
/// Filters are applied before ordering, and ordering before `offset`/`limit`.
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::{FilterCondition, SortDirection, SortSpec};
/// use entity_repository::store::StoreQuery;
///
/// let query = StoreQuery::new("orders")
///     .filter(FilterCondition::eq("customer", "ada"))
///     .sorted_by(SortSpec::by("total", SortDirection::Descending))
///     .offset(10)
///     .limit(10);
/// assert!(!query.include_deleted);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    /// Collection name
    pub collection: String,
    /// Conditions that must all match
    pub filters: Vec<FilterCondition>,
    /// Ordering; empty means store-native order
    pub sorts: SortSpec,
    /// Bypass the soft-delete filter
    pub include_deleted: bool,
    /// Rows to skip after ordering
    pub offset: u64,
    /// Maximum rows to return
    pub limit: Option<u64>,
}

impl StoreQuery {
    /// Query every visible row of `collection`
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            sorts: SortSpec::new(),
            include_deleted: false,
            offset: 0,
            limit: None,
        }
    }

    /// Add one condition
    #[must_use]
    pub fn filter(mut self, condition: FilterCondition) -> Self {
        self.filters.push(condition);
        self
    }

    /// Add several conditions
    #[must_use]
    pub fn filters(mut self, conditions: &[FilterCondition]) -> Self {
        self.filters.extend_from_slice(conditions);
        self
    }

    /// Set the ordering
    #[must_use]
    pub fn sorted_by(mut self, sorts: SortSpec) -> Self {
        self.sorts = sorts;
        self
    }

    /// Include soft-deleted rows
    #[must_use]
    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    /// Skip rows
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Cap the number of rows
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl fmt::Display for StoreQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FROM {}", self.collection)?;
        if !self.filters.is_empty() {
            let rendered: Vec<String> = self.filters.iter().map(ToString::to_string).collect();
            write!(f, " WHERE {}", rendered.join(" AND "))?;
        }
        if !self.sorts.is_empty() {
            write!(f, " ORDER BY {}", self.sorts)?;
        }
        if self.offset > 0 {
            write!(f, " OFFSET {}", self.offset)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One row change
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Collection name
    pub collection: String,
    /// Row field holding the key
    pub key_field: String,
    /// Key value as stored in the row
    pub key: Value,
    pub kind: ChangeKind,
    /// New row contents (`Value::Null` for deletes)
    pub row: Value,
    /// Concurrency stamp the entity was read with, checked against the stored row
    pub original_stamp: Option<String>,
}

/// Changes flushed together; the store applies all of them or none
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    /// Number of changes of the given kind
    #[must_use]
    pub fn count_of(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Queryable collections plus transactional commit
///
/// Uses RPITIT, so implementations write plain `async fn`s.
///
/// # Errors
///
/// `commit` fails with `PersistenceConflict` on constraint violations and
/// stale concurrency stamps, and must leave stored state untouched when it
/// fails.
pub trait Store: Send + Sync + 'static {
    /// Rows matching `query`
    fn fetch(&self, query: &StoreQuery) -> impl Future<Output = RepositoryResult<Vec<Value>>> + Send;

    /// Number of rows matching `query`, ignoring `offset` and `limit`
    fn count(&self, query: &StoreQuery) -> impl Future<Output = RepositoryResult<u64>> + Send;

    /// Apply `changes` atomically, returning the number of rows affected
    fn commit(&self, changes: ChangeSet) -> impl Future<Output = RepositoryResult<u64>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{SortDirection, SortSpec};

    #[test]
    fn test_query_display() {
        let query = StoreQuery::new("orders")
            .filter(FilterCondition::eq("customer", "ada"))
            .filter(FilterCondition::gt("total", 5_i64))
            .sorted_by(SortSpec::by("total", SortDirection::Descending))
            .offset(10)
            .limit(10);
        assert_eq!(
            query.to_string(),
            "FROM orders WHERE customer = ada AND total > 5 ORDER BY total desc OFFSET 10 LIMIT 10"
        );
    }

    #[test]
    fn test_change_set_counts() {
        let mut changes = ChangeSet::new();
        assert!(changes.is_empty());
        for kind in [ChangeKind::Insert, ChangeKind::Insert, ChangeKind::Delete] {
            changes.push(Change {
                collection: "orders".to_string(),
                key_field: "id".to_string(),
                key: Value::from(1),
                kind,
                row: Value::Null,
                original_stamp: None,
            });
        }
        assert_eq!(changes.len(), 3);
        assert_eq!(changes.count_of(ChangeKind::Insert), 2);
        assert_eq!(changes.count_of(ChangeKind::Update), 0);
    }
}
