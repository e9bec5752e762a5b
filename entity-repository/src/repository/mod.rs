//! Generic repository layer
//!
//! This module provides the read and write repository contracts, their
//! store-backed implementation, and the machinery behind them.
//!
//! # Features
//!
//! - **Querying**: [`ReadRepository`] for filtered lookups, counts and
//!   paginated lists, with eager loading and change-tracking toggles
//! - **Writing**: [`WriteRepository`] for adds, updates and deletes that are
//!   staged in a shared [`UnitOfWork`] and committed atomically
//! - **Soft delete**: deletes cascade through the relationship graph, marking
//!   every cascade-eligible descendant as deleted
//! - **Filtering**: [`FilterCondition`] for building predicates
//! - **Ordering and pagination**: [`SortSpec`] and [`Pagination`]
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_repository::repository::{
//!     DeleteMode, FilterCondition, Pagination, Persist, QueryOptions, ReadRepository,
//!     SortDirection, SortSpec, StoreRepository, UnitOfWork, WriteRepository,
//! };
//!
//! let uow = Arc::new(UnitOfWork::new(store, registry));
//! let orders = StoreRepository::<Order, _>::new(uow.clone());
//!
//! let options = QueryOptions::new()
//!     .include("lines")
//!     .order_by(SortSpec::by("placed_at", SortDirection::Descending));
//! let page = orders
//!     .list(&[FilterCondition::eq("customer", "ada")], &options, Some(Pagination::new(0, 20)))
//!     .await?;
//!
//! if let Some(order) = page.items.into_iter().next() {
//!     orders.delete(order, DeleteMode::Soft, Persist::Now).await?;
//! }
//! ```

mod cascade;
mod error;
mod guard;
mod options;
pub(crate) mod pagination;
mod sort;
mod store_repository;
mod traits;
mod unit_of_work;

// Re-export all public types
pub use error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use options::{DeleteMode, Persist, QueryOptions};
pub use pagination::{
    matches_all, FilterCondition, FilterOperator, FilterValue, Paginated, Pagination, DEFAULT_PAGE_SIZE,
};
pub use sort::{Sort, SortDirection, SortSpec};
pub use store_repository::StoreRepository;
pub use traits::{ReadRepository, RepositoryResult, WriteRepository};
pub use unit_of_work::{EntryState, PendingChange, UnitOfWork};
