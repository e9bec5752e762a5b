//! One-to-one hazard guard
//!
//! Soft-deleting the principal of a one-to-one foreign key leaves the unique
//! slot occupied by a logically deleted row, so a new dependent with the same
//! key could never be created again. The guard refuses such deletes before
//! anything is mutated.

use tracing::warn;

use super::error::RepositoryError;
use super::traits::RepositoryResult;
use crate::entity::AnyEntity;
use crate::model::ModelRegistry;

/// Fail with `InvalidRelationship` if `entity` is the principal of any
/// non-owned relationship that is single-valued on both ends
///
/// Relationships where the entity holds the foreign key, or where either end
/// is a collection, pass.
pub(crate) fn check_one_to_one(registry: &ModelRegistry, entity: &dyn AnyEntity) -> RepositoryResult<()> {
    let entity_type = entity.entity_type();
    let hazard = registry
        .navigations(entity_type)
        .iter()
        .find(|nav| nav.is_one_to_one_principal());

    match hazard {
        Some(nav) => {
            let address = entity.entity_ref();
            warn!(
                entity = %address,
                relationship = %nav.name,
                "Soft delete refused: entity is the principal of a one-to-one relationship"
            );
            Err(RepositoryError::invalid_relationship(
                entity_type,
                address.key,
                &nav.name,
            ))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{RepositoryErrorKind, RepositoryOperation};
    use crate::testing::{registry, Order, OrderLine, Profile, User};

    #[test]
    fn test_principal_of_one_to_one_is_refused() {
        let registry = registry();
        let user = User::new("ada");
        let err = check_one_to_one(&registry, &user).unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidRelationship);
        assert_eq!(err.operation, RepositoryOperation::SoftDelete);
        assert_eq!(err.entity_id, Some(user.id.to_string()));
        assert!(err.message.contains("profile"));
    }

    #[test]
    fn test_dependent_side_passes() {
        let registry = registry();
        let profile = Profile::new(1, uuid::Uuid::new_v4(), "bio");
        assert!(check_one_to_one(&registry, &profile).is_ok());
    }

    #[test]
    fn test_collections_and_owned_navigations_pass() {
        let registry = registry();
        assert!(check_one_to_one(&registry, &Order::new(1, "ada")).is_ok());
        assert!(check_one_to_one(&registry, &OrderLine::new(1, 1, "a")).is_ok());
    }
}
