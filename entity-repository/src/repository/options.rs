//! Per-call options for reads and writes

use serde::{Deserialize, Serialize};

use super::sort::SortSpec;

/// Options shared by every read operation
///
/// Defaults: no eager loading, store-native order, soft-deleted rows hidden,
/// tracking enabled.
///
/// # Example
///
/// ```rust
/// use entity_repository::repository::{QueryOptions, SortDirection, SortSpec};
///
/// let options = QueryOptions::new()
///     .include("lines")
///     .order_by(SortSpec::by("placed_at", SortDirection::Descending))
///     .with_deleted()
///     .no_tracking();
/// assert!(!options.tracking);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Navigations to load with each result
    pub include: Vec<String>,
    /// Result ordering
    pub order_by: Option<SortSpec>,
    /// Return soft-deleted entities too
    pub with_deleted: bool,
    /// Keep returned entities in the unit of work's change tracker
    pub tracking: bool,
}

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Eager-load the named navigation
    #[must_use]
    pub fn include(mut self, navigation: impl Into<String>) -> Self {
        self.include.push(navigation.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, sort: SortSpec) -> Self {
        self.order_by = Some(sort);
        self
    }

    #[must_use]
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    /// Return detached entities
    #[must_use]
    pub fn no_tracking(mut self) -> Self {
        self.tracking = false;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            order_by: None,
            with_deleted: false,
            tracking: true,
        }
    }
}

/// When a write reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persist {
    /// Commit the unit of work before returning
    Now,
    /// Stage only; a later commit flushes it
    #[default]
    Deferred,
}

/// How an entity is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Flag the entity and its cascade-eligible dependents as deleted
    #[default]
    Soft,
    /// Remove the row; the store applies its own referential actions
    Permanent,
}
