//! # entity-repository
//!
//! Generic data-access layer over a store that exposes queryable collections,
//! change tracking and relationship metadata.
//!
//! ## Features
//!
//! - **Query contract**: filtered single-item lookups, paginated lists, counts,
//!   eager loading, soft-delete visibility and tracking toggles
//! - **Write contract**: adds, updates and deletes staged in a shared unit of
//!   work and committed as one atomic change set
//! - **Soft-delete cascade**: deleting an entity marks every cascade-eligible
//!   descendant, loading unloaded navigations on demand and pruning branches
//!   that are already deleted
//! - **One-to-one hazard guard**: refuses soft deletes that would leave a
//!   unique foreign key slot occupied by a deleted row
//! - **Audit stamping**: creation, modification and deletion stamps plus
//!   optimistic-concurrency tokens applied on commit
//! - **Reference store**: [`store::MemoryStore`], an in-process store with
//!   transactional commit
//!
//! ## Example
//!
//! ```rust,ignore
//! use entity_repository::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let registry = ModelRegistry::builder()
//!         .entity::<Order>()
//!         .entity::<OrderLine>()
//!         .has_many::<Order, OrderLine>("lines", "order_id", |o| &mut o.lines)
//!         .build()?;
//!
//!     let store = MemoryStore::with_registry(registry.clone());
//!     let uow = Arc::new(UnitOfWork::from_config(
//!         store,
//!         registry,
//!         &config.repository,
//!         Arc::new(FixedActor::new("importer")),
//!     ));
//!     let orders = StoreRepository::<Order, _>::new(uow.clone());
//!
//!     let order = orders.get_by_id(&42, &QueryOptions::new()).await?;
//!     orders.delete(order, DeleteMode::Soft, Persist::Now).await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod entity;
pub mod error;
pub mod model;
pub mod observability;
pub mod repository;
pub mod store;

#[cfg(test)]
mod testing;

pub mod prelude {
    //! Convenient re-exports for common types and traits

    pub use std::sync::Arc;

    pub use crate::audit::{Anonymous, AuditStamper, CommitHook, CurrentActor, FixedActor};
    pub use crate::config::{Config, RepositoryConfig};
    pub use crate::entity::{
        Audited, ConcurrencySafe, CreationAudited, DeletionAudited, Entity, EntityKey, EntityRef, SoftDelete,
    };
    pub use crate::error::{Error, Result};
    pub use crate::model::{Cardinality, DeleteBehavior, ModelRegistry};
    pub use crate::observability::init_tracing;
    pub use crate::repository::{
        DeleteMode, EntryState, FilterCondition, FilterOperator, FilterValue, Paginated, Pagination, Persist,
        QueryOptions, ReadRepository, RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryResult,
        SortDirection, SortSpec, StoreRepository, UnitOfWork, WriteRepository,
    };
    pub use crate::store::{MemoryStore, Store, StoreQuery};

    pub use serde::{Deserialize, Serialize};

    // Re-export tracing macros
    pub use tracing::{debug, error, info, instrument, trace, warn};

    // Re-export async-trait for commit hooks
    pub use async_trait::async_trait;

    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;
}
