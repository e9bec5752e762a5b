//! Repository trait definitions
//!
//! This module provides the read and write contracts every entity repository
//! implements, using RPITIT (Return Position Impl Trait In Traits), available
//! since Rust 1.75.
//!
//! # Overview
//!
//! - [`ReadRepository`]: filtered single-item lookups, paginated lists, counts
//! - [`WriteRepository`]: add, update and delete (soft or permanent), single
//!   and batched, with an explicit persist-now-or-later flag
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_repository::repository::{
//!     DeleteMode, FilterCondition, Pagination, Persist, QueryOptions, ReadRepository, WriteRepository,
//! };
//!
//! let open = orders
//!     .list(&[FilterCondition::eq("status", "open")], &QueryOptions::new(), Some(Pagination::new(1, 10)))
//!     .await?;
//!
//! let order = orders.get_by_id(&42, &QueryOptions::new().include("lines")).await?;
//! orders.delete(order, DeleteMode::Soft, Persist::Now).await?;
//! ```

use std::future::Future;

use super::error::RepositoryError;
use super::options::{DeleteMode, Persist, QueryOptions};
use super::pagination::{FilterCondition, Paginated, Pagination};
use crate::entity::Entity;

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Read-only querying surface for one entity type
///
/// Filters are AND-ed. Unless `options.with_deleted` is set, soft-deleted
/// entities are invisible. Single-item lookups fail with `NotFound` on a miss
/// rather than returning an empty value; callers must treat that as a
/// meaningful condition.
pub trait ReadRepository<E: Entity>: Send + Sync {
    /// First matching entity, in `options.order_by` order or store-native order
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing matches; `ValidationFailed` for an invalid sort
    /// or unknown include, raised before the store is queried.
    fn first(
        &self,
        filters: &[FilterCondition],
        options: &QueryOptions,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Last matching entity under `options.order_by`
    ///
    /// Without an ordering this is the last row in store-native order, which
    /// carries no guarantee.
    fn last(
        &self,
        filters: &[FilterCondition],
        options: &QueryOptions,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Single lookup by predicate; `options.order_by` is ignored
    fn get(
        &self,
        filters: &[FilterCondition],
        options: &QueryOptions,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Single lookup by identity key
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// match orders.get_by_id(&42, &QueryOptions::new()).await {
    ///     Ok(order) => println!("{}", order.customer),
    ///     Err(e) if e.kind == RepositoryErrorKind::NotFound => println!("no such order"),
    ///     Err(e) => return Err(e.into()),
    /// }
    /// ```
    fn get_by_id(
        &self,
        id: &E::Key,
        options: &QueryOptions,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// One page of matching entities plus the unpaginated match count
    ///
    /// Filters apply before ordering, ordering before pagination. An empty
    /// result is a page with zero items, never an error. `None` pagination
    /// means the first page at the configured default size.
    fn list(
        &self,
        filters: &[FilterCondition],
        options: &QueryOptions,
        pagination: Option<Pagination>,
    ) -> impl Future<Output = RepositoryResult<Paginated<E>>> + Send;

    /// Whether any entity matches
    fn exists(
        &self,
        filters: &[FilterCondition],
        options: &QueryOptions,
    ) -> impl Future<Output = RepositoryResult<bool>> + Send;

    /// Number of matching entities
    fn count(
        &self,
        filters: &[FilterCondition],
        options: &QueryOptions,
    ) -> impl Future<Output = RepositoryResult<u64>> + Send;
}

/// Write surface for one entity type
///
/// Writes are staged in the shared unit of work. [`Persist::Now`] commits
/// the whole unit before returning and yields the entity as committed
/// (audit stamps and a fresh concurrency token applied).
pub trait WriteRepository<E: Entity>: Send + Sync {
    /// Stage an insert
    fn add(&self, entity: E, persist: Persist) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Stage several inserts; either all are staged or none
    fn add_many(
        &self,
        entities: Vec<E>,
        persist: Persist,
    ) -> impl Future<Output = RepositoryResult<Vec<E>>> + Send;

    /// Stage an update
    fn update(&self, entity: E, persist: Persist) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Stage several updates; either all are staged or none
    fn update_many(
        &self,
        entities: Vec<E>,
        persist: Persist,
    ) -> impl Future<Output = RepositoryResult<Vec<E>>> + Send;

    /// Delete an entity
    ///
    /// A soft delete first runs the one-to-one hazard guard, then marks the
    /// entity and every cascade-eligible descendant. Deleting an entity that
    /// is already soft-deleted is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidRelationship` when the entity is the principal of a one-to-one
    /// relationship; nothing is staged in that case.
    fn delete(
        &self,
        entity: E,
        mode: DeleteMode,
        persist: Persist,
    ) -> impl Future<Output = RepositoryResult<E>> + Send;

    /// Delete several entities
    ///
    /// Every entity passes the hazard guard before any is touched, and all
    /// cascades are staged together.
    fn delete_many(
        &self,
        entities: Vec<E>,
        mode: DeleteMode,
        persist: Persist,
    ) -> impl Future<Output = RepositoryResult<Vec<E>>> + Send;

    /// Flush the shared unit of work
    fn commit(&self) -> impl Future<Output = RepositoryResult<u64>> + Send;
}
