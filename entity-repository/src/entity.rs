//! Entity model: identity, capability facets and type erasure
//!
//! Every persisted type implements [`Entity`]. Optional behaviour (soft
//! delete, audit stamps, optimistic concurrency) is exposed through capability
//! accessors that default to `None`, so each type opts in at compile time:
//!
//! ```rust
//! use entity_repository::entity::{Entity, SoftDelete};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Invoice {
//!     id: i64,
//!     is_deleted: bool,
//! }
//!
//! impl SoftDelete for Invoice {
//!     fn is_deleted(&self) -> bool {
//!         self.is_deleted
//!     }
//!
//!     fn mark_deleted(&mut self) {
//!         self.is_deleted = true;
//!     }
//! }
//!
//! impl Entity for Invoice {
//!     type Key = i64;
//!     const NAME: &'static str = "invoices";
//!
//!     fn id(&self) -> i64 {
//!         self.id
//!     }
//!
//!     fn soft_delete(&self) -> Option<&dyn SoftDelete> {
//!         Some(self)
//!     }
//!
//!     fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
//!         Some(self)
//!     }
//! }
//! ```
//!
//! Navigation properties are `Option` fields marked `#[serde(skip)]`; they are
//! not part of the stored row and `None` means "not loaded".

use std::any::Any;
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::repository::{FilterValue, RepositoryError, RepositoryOperation, RepositoryResult};

/// Row field holding the soft-delete flag
pub const SOFT_DELETE_FIELD: &str = "is_deleted";

/// Row field holding the optimistic concurrency token
pub const CONCURRENCY_STAMP_FIELD: &str = "concurrency_stamp";

/// Maximum length of a concurrency stamp or an actor id
pub const MAX_STAMP_LENGTH: usize = 256;

/// Identity key of an entity
pub trait EntityKey:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The key as a filter operand
    fn filter_value(&self) -> FilterValue;
}

impl EntityKey for i32 {
    fn filter_value(&self) -> FilterValue {
        FilterValue::Integer(i64::from(*self))
    }
}

impl EntityKey for i64 {
    fn filter_value(&self) -> FilterValue {
        FilterValue::Integer(*self)
    }
}

impl EntityKey for String {
    fn filter_value(&self) -> FilterValue {
        FilterValue::String(self.clone())
    }
}

impl EntityKey for Uuid {
    fn filter_value(&self) -> FilterValue {
        FilterValue::String(self.to_string())
    }
}

/// Entity that is logically deleted by flipping a flag
///
/// Once set, the flag is never reset by the cascade engine. The flag must be
/// serialized as `is_deleted` so the store can filter on it.
pub trait SoftDelete {
    /// Whether the entity has been soft-deleted
    fn is_deleted(&self) -> bool;

    /// Set the deleted flag
    fn mark_deleted(&mut self);
}

/// Entity that records when and by whom it was created
pub trait CreationAudited {
    /// Creator actor id, if known
    fn creator_id(&self) -> Option<&str>;

    /// Record the creation time and actor
    fn stamp_creation(&mut self, at: DateTime<Utc>, actor: Option<String>);
}

/// Entity that records its last modification
pub trait Audited {
    /// Last modifier actor id, if known
    fn last_modifier_id(&self) -> Option<&str>;

    /// Record the modification time and actor
    fn stamp_modification(&mut self, at: DateTime<Utc>, actor: Option<String>);
}

/// Entity that records its soft deletion
pub trait DeletionAudited {
    /// When the entity was deleted, if it has been
    fn deletion_time(&self) -> Option<DateTime<Utc>>;

    /// Deleter actor id, if known
    fn deleter_id(&self) -> Option<&str>;

    /// Record the deletion time and actor
    fn stamp_deletion(&mut self, at: DateTime<Utc>, actor: Option<String>);
}

/// Entity guarded by an optimistic concurrency token
///
/// The token must be serialized as `concurrency_stamp`.
pub trait ConcurrencySafe {
    /// Current token
    fn concurrency_stamp(&self) -> &str;

    /// Replace the token
    fn set_concurrency_stamp(&mut self, stamp: String);
}

/// A persisted record with a stable identity key
///
/// Capability accessors return `None` unless the type opts in.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Identity key type
    type Key: EntityKey;

    /// Store collection name
    const NAME: &'static str;

    /// Row field holding the key
    const KEY_FIELD: &'static str = "id";

    /// Skip audit stamping for this type
    const AUDIT_EXEMPT: bool = false;

    /// Identity key of this instance
    fn id(&self) -> Self::Key;

    fn soft_delete(&self) -> Option<&dyn SoftDelete> {
        None
    }

    fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
        None
    }

    fn creation_audited_mut(&mut self) -> Option<&mut dyn CreationAudited> {
        None
    }

    fn audited_mut(&mut self) -> Option<&mut dyn Audited> {
        None
    }

    fn deletion_audited_mut(&mut self) -> Option<&mut dyn DeletionAudited> {
        None
    }

    fn concurrency_safe(&self) -> Option<&dyn ConcurrencySafe> {
        None
    }

    fn concurrency_safe_mut(&mut self) -> Option<&mut dyn ConcurrencySafe> {
        None
    }
}

/// Address of an entity instance: collection plus rendered key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    /// Collection (entity type) name
    pub entity_type: &'static str,
    /// Rendered identity key
    pub key: String,
}

impl EntityRef {
    /// Address of an entity of type `E` with the given key
    pub fn of<E: Entity>(key: &E::Key) -> Self {
        Self {
            entity_type: E::NAME,
            key: key.to_string(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.key)
    }
}

/// Object-safe view of an [`Entity`]
///
/// The change tracker, the cascade engine and commit hooks work with entities
/// of many types at once through this trait. It is implemented for every
/// `Entity` and cannot be implemented by hand.
pub trait AnyEntity: Any + Send + Sync + sealed::Sealed {
    /// Collection name
    fn entity_type(&self) -> &'static str;

    /// Row field holding the key
    fn key_field(&self) -> &'static str;

    /// Tracker address of this instance
    fn entity_ref(&self) -> EntityRef;

    /// Key as a JSON value, as stored in the row
    fn key_value(&self) -> RepositoryResult<Value>;

    /// Serialize into a store row
    fn to_row(&self) -> RepositoryResult<Value>;

    /// Whether audit stamping skips this type
    fn audit_exempt(&self) -> bool;

    fn clone_boxed(&self) -> Box<dyn AnyEntity>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    fn soft_delete(&self) -> Option<&dyn SoftDelete>;

    fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete>;

    fn creation_audited_mut(&mut self) -> Option<&mut dyn CreationAudited>;

    fn audited_mut(&mut self) -> Option<&mut dyn Audited>;

    fn deletion_audited_mut(&mut self) -> Option<&mut dyn DeletionAudited>;

    fn concurrency_safe(&self) -> Option<&dyn ConcurrencySafe>;

    fn concurrency_safe_mut(&mut self) -> Option<&mut dyn ConcurrencySafe>;
}

mod sealed {
    pub trait Sealed {}

    impl<E: super::Entity> Sealed for E {}
}

impl<E: Entity> AnyEntity for E {
    fn entity_type(&self) -> &'static str {
        E::NAME
    }

    fn key_field(&self) -> &'static str {
        E::KEY_FIELD
    }

    fn entity_ref(&self) -> EntityRef {
        EntityRef::of::<E>(&self.id())
    }

    fn key_value(&self) -> RepositoryResult<Value> {
        serde_json::to_value(self.id()).map_err(RepositoryError::from)
    }

    fn to_row(&self) -> RepositoryResult<Value> {
        serde_json::to_value(self).map_err(|e| {
            RepositoryError::serialization_error(RepositoryOperation::Commit, e.to_string())
                .with_entity(E::NAME, self.id().to_string())
        })
    }

    fn audit_exempt(&self) -> bool {
        E::AUDIT_EXEMPT
    }

    fn clone_boxed(&self) -> Box<dyn AnyEntity> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn soft_delete(&self) -> Option<&dyn SoftDelete> {
        Entity::soft_delete(self)
    }

    fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
        Entity::soft_delete_mut(self)
    }

    fn creation_audited_mut(&mut self) -> Option<&mut dyn CreationAudited> {
        Entity::creation_audited_mut(self)
    }

    fn audited_mut(&mut self) -> Option<&mut dyn Audited> {
        Entity::audited_mut(self)
    }

    fn deletion_audited_mut(&mut self) -> Option<&mut dyn DeletionAudited> {
        Entity::deletion_audited_mut(self)
    }

    fn concurrency_safe(&self) -> Option<&dyn ConcurrencySafe> {
        Entity::concurrency_safe(self)
    }

    fn concurrency_safe_mut(&mut self) -> Option<&mut dyn ConcurrencySafe> {
        Entity::concurrency_safe_mut(self)
    }
}

/// Decode a store row into an entity
pub(crate) fn from_row<E: Entity>(row: Value, operation: RepositoryOperation) -> RepositoryResult<E> {
    serde_json::from_value(row).map_err(|e| {
        RepositoryError::serialization_error(operation, e.to_string()).with_entity(E::NAME, "?")
    })
}

/// Recover a concrete entity from its erased box
pub(crate) fn downcast<E: Entity>(entity: Box<dyn AnyEntity>) -> RepositoryResult<E> {
    let found = entity.entity_type();
    entity.into_any().downcast::<E>().map(|e| *e).map_err(|_| {
        RepositoryError::new(
            RepositoryOperation::Get,
            crate::repository::RepositoryErrorKind::Other,
            format!("Tracked entity of type '{found}' is not a {}", E::NAME),
        )
    })
}
