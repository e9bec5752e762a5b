//! Relationship metadata registry
//!
//! The cascade engine, the one-to-one hazard guard and eager loading all
//! consult an immutable [`ModelRegistry`] built once when the unit of work is
//! constructed. Each relationship is declared with typed accessors, so walking
//! a navigation never needs runtime introspection.
//!
//! # Example
//!
//! ```rust,ignore
//! use entity_repository::model::{DeleteBehavior, ModelRegistry};
//!
//! let registry = ModelRegistry::builder()
//!     .entity::<Order>()
//!     .entity::<OrderLine>()
//!     .owns_one::<Order>("shipping_address")
//!     .has_many::<Order, OrderLine>("lines", "order_id", |o| &mut o.lines)
//!     .on_delete(DeleteBehavior::Cascade)
//!     .inverse::<OrderLine, Order>("order", |l| &mut l.order)
//!     .build()?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::{from_row, AnyEntity, Entity};
use crate::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation, RepositoryResult};

/// What happens to dependents when their principal is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteBehavior {
    /// Deleting the principal is refused while dependents exist
    Restrict,
    /// The dependents' foreign key is cleared
    SetNull,
    /// Nothing is done; the store enforces its own constraint
    NoAction,
    /// Dependents are deleted with the principal
    #[default]
    Cascade,
    /// Dependents are deleted with the principal by the client
    ClientCascade,
}

impl DeleteBehavior {
    /// Whether deletes flow from the principal to its dependents
    #[must_use]
    pub const fn cascades(self) -> bool {
        matches!(self, Self::Cascade | Self::ClientCascade)
    }
}

impl fmt::Display for DeleteBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Restrict => write!(f, "restrict"),
            Self::SetNull => write!(f, "set_null"),
            Self::NoAction => write!(f, "no_action"),
            Self::Cascade => write!(f, "cascade"),
            Self::ClientCascade => write!(f, "client_cascade"),
        }
    }
}

/// Whether a navigation holds one related entity or many
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// A navigation declared on an entity type
#[derive(Clone)]
pub struct Navigation {
    /// Navigation name, unique per owning type
    pub name: String,
    /// Owning entity type
    pub owner: &'static str,
    /// Related entity type (`None` for owned sub-objects)
    pub target: Option<&'static str>,
    /// Key field of the related type
    pub target_key_field: &'static str,
    /// One or many related values
    pub cardinality: Cardinality,
    /// Delete behaviour of the underlying foreign key
    pub delete_behavior: DeleteBehavior,
    /// Owned sub-object stored inside the owner's row
    pub owned: bool,
    /// The owner holds the foreign key
    pub is_on_dependent: bool,
    /// Foreign key field on the dependent type
    pub foreign_key: String,
    pub(crate) access: Option<Arc<dyn NavigationAccess>>,
}

impl Navigation {
    /// Whether the cascade engine walks this navigation
    #[must_use]
    pub fn is_cascade_eligible(&self) -> bool {
        !self.owned && !self.is_on_dependent && self.delete_behavior.cascades()
    }

    /// Whether this navigation is the principal end of a one-to-one foreign key
    #[must_use]
    pub fn is_one_to_one_principal(&self) -> bool {
        !self.owned && !self.is_on_dependent && self.cardinality == Cardinality::One
    }
}

impl fmt::Debug for Navigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Navigation")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("target", &self.target)
            .field("cardinality", &self.cardinality)
            .field("delete_behavior", &self.delete_behavior)
            .field("owned", &self.owned)
            .field("is_on_dependent", &self.is_on_dependent)
            .field("foreign_key", &self.foreign_key)
            .finish()
    }
}

/// Typed access to a navigation's in-memory value, erased for the walker
pub(crate) trait NavigationAccess: Send + Sync {
    /// Related entities already materialized on `owner`, `None` when not loaded
    fn loaded<'a>(&self, owner: &'a mut dyn AnyEntity) -> Option<Vec<&'a mut dyn AnyEntity>>;

    /// Decode store rows of the related type
    fn decode(&self, rows: Vec<Value>) -> RepositoryResult<Vec<Box<dyn AnyEntity>>>;

    /// Store related entities on `owner`, replacing whatever was loaded
    fn attach(&self, owner: &mut dyn AnyEntity, related: Vec<Box<dyn AnyEntity>>) -> RepositoryResult<()>;
}

fn decode_rows<D: Entity>(rows: Vec<Value>) -> RepositoryResult<Vec<Box<dyn AnyEntity>>> {
    rows.into_iter()
        .map(|row| from_row::<D>(row, RepositoryOperation::LoadRelated).map(|d| Box::new(d) as Box<dyn AnyEntity>))
        .collect()
}

fn downcast_owner<P: Entity>(owner: &mut dyn AnyEntity) -> RepositoryResult<&mut P> {
    let found = owner.entity_type();
    owner.as_any_mut().downcast_mut::<P>().ok_or_else(|| {
        RepositoryError::new(
            RepositoryOperation::LoadRelated,
            RepositoryErrorKind::Other,
            format!("Navigation owner '{found}' is not a {}", P::NAME),
        )
    })
}

fn downcast_related<D: Entity>(related: Vec<Box<dyn AnyEntity>>) -> RepositoryResult<Vec<D>> {
    related
        .into_iter()
        .map(|entity| crate::entity::downcast::<D>(entity).map_err(|e| e.with_operation(RepositoryOperation::LoadRelated)))
        .collect()
}

struct CollectionAccess<P, D> {
    accessor: fn(&mut P) -> &mut Option<Vec<D>>,
}

impl<P: Entity, D: Entity> NavigationAccess for CollectionAccess<P, D> {
    fn loaded<'a>(&self, owner: &'a mut dyn AnyEntity) -> Option<Vec<&'a mut dyn AnyEntity>> {
        let owner = owner.as_any_mut().downcast_mut::<P>()?;
        (self.accessor)(owner)
            .as_mut()
            .map(|items| items.iter_mut().map(|d| d as &mut dyn AnyEntity).collect())
    }

    fn decode(&self, rows: Vec<Value>) -> RepositoryResult<Vec<Box<dyn AnyEntity>>> {
        decode_rows::<D>(rows)
    }

    fn attach(&self, owner: &mut dyn AnyEntity, related: Vec<Box<dyn AnyEntity>>) -> RepositoryResult<()> {
        let owner = downcast_owner::<P>(owner)?;
        *(self.accessor)(owner) = Some(downcast_related::<D>(related)?);
        Ok(())
    }
}

struct SingleAccess<P, D> {
    accessor: fn(&mut P) -> &mut Option<Box<D>>,
}

impl<P: Entity, D: Entity> NavigationAccess for SingleAccess<P, D> {
    fn loaded<'a>(&self, owner: &'a mut dyn AnyEntity) -> Option<Vec<&'a mut dyn AnyEntity>> {
        let owner = owner.as_any_mut().downcast_mut::<P>()?;
        (self.accessor)(owner)
            .as_mut()
            .map(|d| vec![&mut **d as &mut dyn AnyEntity])
    }

    fn decode(&self, rows: Vec<Value>) -> RepositoryResult<Vec<Box<dyn AnyEntity>>> {
        decode_rows::<D>(rows)
    }

    fn attach(&self, owner: &mut dyn AnyEntity, related: Vec<Box<dyn AnyEntity>>) -> RepositoryResult<()> {
        let owner = downcast_owner::<P>(owner)?;
        *(self.accessor)(owner) = downcast_related::<D>(related)?.into_iter().next().map(Box::new);
        Ok(())
    }
}

/// Registered entity type
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    /// Collection name
    pub name: &'static str,
    /// Key field
    pub key_field: &'static str,
}

/// Immutable relationship metadata for every registered entity type
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entities: HashMap<&'static str, EntityDescriptor>,
    navigations: HashMap<&'static str, Vec<Navigation>>,
}

impl ModelRegistry {
    /// Start declaring a model
    #[must_use]
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// A registry with no entities, for stores used without relationship metadata
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Whether `entity_type` has been registered
    #[must_use]
    pub fn contains(&self, entity_type: &str) -> bool {
        self.entities.contains_key(entity_type)
    }

    /// Descriptor of a registered type
    #[must_use]
    pub fn entity(&self, entity_type: &str) -> Option<&EntityDescriptor> {
        self.entities.get(entity_type)
    }

    /// All navigations declared on `entity_type`, in declaration order
    #[must_use]
    pub fn navigations(&self, entity_type: &str) -> &[Navigation] {
        self.navigations
            .get(entity_type)
            .map_or(&[], Vec::as_slice)
    }

    /// A single navigation by name
    #[must_use]
    pub fn navigation(&self, entity_type: &str, name: &str) -> Option<&Navigation> {
        self.navigations(entity_type).iter().find(|n| n.name == name)
    }

    /// Principal-side, non-owned navigations: the dependents of `entity_type`
    pub fn dependents<'a>(&'a self, entity_type: &str) -> impl Iterator<Item = &'a Navigation> + 'a {
        self.navigations(entity_type)
            .iter()
            .filter(|n| !n.owned && !n.is_on_dependent)
    }
}

struct PendingRelationship {
    principal: &'static str,
    dependent: &'static str,
    principal_nav: usize,
    has_inverse: bool,
}

/// Builder for [`ModelRegistry`]
///
/// Relationship modifiers (`on_delete`, `inverse`) apply to the most recently
/// declared `has_many`/`has_one`.
#[derive(Default)]
pub struct ModelRegistryBuilder {
    entities: Vec<EntityDescriptor>,
    navigations: Vec<Navigation>,
    current: Option<PendingRelationship>,
    errors: Vec<String>,
}

impl ModelRegistryBuilder {
    /// Register an entity type
    #[must_use]
    pub fn entity<E: Entity>(mut self) -> Self {
        if self.entities.iter().any(|e| e.name == E::NAME) {
            self.errors.push(format!("entity '{}' registered twice", E::NAME));
        } else {
            self.entities.push(EntityDescriptor {
                name: E::NAME,
                key_field: E::KEY_FIELD,
            });
        }
        self
    }

    /// Declare a one-to-many relationship from principal `P` to dependents `D`
    ///
    /// `foreign_key` is the field on `D` referencing `P`'s key. Defaults to
    /// [`DeleteBehavior::Cascade`].
    #[must_use]
    pub fn has_many<P: Entity, D: Entity>(
        self,
        name: &str,
        foreign_key: &str,
        accessor: fn(&mut P) -> &mut Option<Vec<D>>,
    ) -> Self {
        self.relationship::<P, D>(
            name,
            foreign_key,
            Cardinality::Many,
            Arc::new(CollectionAccess { accessor }),
        )
    }

    /// Declare a one-to-one relationship from principal `P` to dependent `D`
    ///
    /// Single-valued navigations are boxed so both ends of a one-to-one can
    /// hold each other.
    #[must_use]
    pub fn has_one<P: Entity, D: Entity>(
        self,
        name: &str,
        foreign_key: &str,
        accessor: fn(&mut P) -> &mut Option<Box<D>>,
    ) -> Self {
        self.relationship::<P, D>(
            name,
            foreign_key,
            Cardinality::One,
            Arc::new(SingleAccess { accessor }),
        )
    }

    fn relationship<P: Entity, D: Entity>(
        mut self,
        name: &str,
        foreign_key: &str,
        cardinality: Cardinality,
        access: Arc<dyn NavigationAccess>,
    ) -> Self {
        self.navigations.push(Navigation {
            name: name.to_string(),
            owner: P::NAME,
            target: Some(D::NAME),
            target_key_field: D::KEY_FIELD,
            cardinality,
            delete_behavior: DeleteBehavior::default(),
            owned: false,
            is_on_dependent: false,
            foreign_key: foreign_key.to_string(),
            access: Some(access),
        });
        self.current = Some(PendingRelationship {
            principal: P::NAME,
            dependent: D::NAME,
            principal_nav: self.navigations.len() - 1,
            has_inverse: false,
        });
        self
    }

    /// Set the delete behaviour of the last declared relationship
    #[must_use]
    pub fn on_delete(mut self, behavior: DeleteBehavior) -> Self {
        let Some(current) = &self.current else {
            self.errors
                .push(format!("on_delete({behavior}) called before any relationship"));
            return self;
        };
        let principal_nav = current.principal_nav;
        let (principal, dependent) = (current.principal, current.dependent);
        self.navigations[principal_nav].delete_behavior = behavior;
        for nav in &mut self.navigations {
            if nav.is_on_dependent && nav.owner == dependent && nav.target == Some(principal) {
                nav.delete_behavior = behavior;
            }
        }
        self
    }

    /// Declare the dependent-side navigation (`D` back to its principal `P`)
    /// of the last declared relationship
    #[must_use]
    pub fn inverse<D: Entity, P: Entity>(mut self, name: &str, accessor: fn(&mut D) -> &mut Option<Box<P>>) -> Self {
        let Some(current) = self.current.as_mut() else {
            self.errors
                .push(format!("inverse '{name}' declared before any relationship"));
            return self;
        };
        if current.principal != P::NAME || current.dependent != D::NAME {
            self.errors.push(format!(
                "inverse '{name}' ({} -> {}) does not match relationship {} -> {}",
                D::NAME,
                P::NAME,
                current.principal,
                current.dependent
            ));
            return self;
        }
        if current.has_inverse {
            self.errors
                .push(format!("relationship {} -> {} already has an inverse", P::NAME, D::NAME));
            return self;
        }
        current.has_inverse = true;
        let principal = &self.navigations[current.principal_nav];
        let navigation = Navigation {
            name: name.to_string(),
            owner: D::NAME,
            target: Some(P::NAME),
            target_key_field: P::KEY_FIELD,
            cardinality: Cardinality::One,
            delete_behavior: principal.delete_behavior,
            owned: false,
            is_on_dependent: true,
            foreign_key: principal.foreign_key.clone(),
            access: Some(Arc::new(SingleAccess { accessor })),
        };
        self.navigations.push(navigation);
        self
    }

    /// Declare a single owned sub-object stored inside `P`'s row
    #[must_use]
    pub fn owns_one<P: Entity>(self, name: &str) -> Self {
        self.owned::<P>(name, Cardinality::One)
    }

    /// Declare an owned collection stored inside `P`'s row
    #[must_use]
    pub fn owns_many<P: Entity>(self, name: &str) -> Self {
        self.owned::<P>(name, Cardinality::Many)
    }

    fn owned<P: Entity>(mut self, name: &str, cardinality: Cardinality) -> Self {
        self.navigations.push(Navigation {
            name: name.to_string(),
            owner: P::NAME,
            target: None,
            target_key_field: P::KEY_FIELD,
            cardinality,
            delete_behavior: DeleteBehavior::Cascade,
            owned: true,
            is_on_dependent: false,
            foreign_key: P::KEY_FIELD.to_string(),
            access: None,
        });
        self.current = None;
        self
    }

    /// Validate the declarations and freeze them
    ///
    /// # Errors
    ///
    /// Returns a `ValidationFailed` error listing every problem: relationships
    /// whose endpoints were not registered, duplicate navigation names, and
    /// misplaced modifiers.
    pub fn build(self) -> RepositoryResult<Arc<ModelRegistry>> {
        let mut errors = self.errors;
        let entities: HashMap<&'static str, EntityDescriptor> =
            self.entities.into_iter().map(|e| (e.name, e)).collect();

        let mut navigations: HashMap<&'static str, Vec<Navigation>> = HashMap::new();
        for nav in self.navigations {
            if !entities.contains_key(nav.owner) {
                errors.push(format!("navigation '{}' declared on unregistered entity '{}'", nav.name, nav.owner));
            }
            if let Some(target) = nav.target {
                if !entities.contains_key(target) {
                    errors.push(format!("navigation '{}' targets unregistered entity '{target}'", nav.name));
                }
            }
            let declared = navigations.entry(nav.owner).or_default();
            if declared.iter().any(|n| n.name == nav.name) {
                errors.push(format!("navigation '{}' declared twice on '{}'", nav.name, nav.owner));
            }
            declared.push(nav);
        }

        if !errors.is_empty() {
            return Err(RepositoryError::new(
                RepositoryOperation::Configure,
                RepositoryErrorKind::ValidationFailed,
                format!("Invalid model: {}", errors.join("; ")),
            ));
        }

        tracing::debug!(
            entities = entities.len(),
            navigations = navigations.values().map(Vec::len).sum::<usize>(),
            "Model registry built"
        );

        Ok(Arc::new(ModelRegistry {
            entities,
            navigations,
        }))
    }
}
