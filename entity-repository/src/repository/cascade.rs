//! Relationship graph walker and soft-delete cascade engine
//!
//! Each entity passes through `Checked -> Cascading -> Marked`:
//!
//! * **Checked**: an entity that is already soft-deleted (or already visited
//!   by this cascade) stops the walk on its branch.
//! * **Cascading**: every cascade-eligible navigation is walked. Owned,
//!   dependent-side and non-cascading navigations are skipped. Related
//!   entities already in memory are used as they are; otherwise they are
//!   loaded from the store, excluding soft-deleted rows, so branches deleted
//!   earlier are never revisited.
//! * **Marked**: the deleted flag is set and the entity is collected for
//!   staging.
//!
//! Related entities that are not soft-deletable are left to the store's own
//! referential actions. Nothing is staged in the unit of work until the whole
//! walk has succeeded.

use std::collections::HashSet;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use super::error::RepositoryOperation;
use super::pagination::{FilterCondition, FilterValue};
use super::traits::RepositoryResult;
use super::unit_of_work::{EntryState, UnitOfWork};
use crate::entity::{AnyEntity, EntityRef};
use crate::model::{Cardinality, Navigation};
use crate::store::{Store, StoreQuery};

/// One soft-delete traversal, possibly spanning several roots
pub(crate) struct SoftDeleteCascade<'u, S: Store> {
    uow: &'u UnitOfWork<S>,
    visited: HashSet<EntityRef>,
    marked: Vec<Box<dyn AnyEntity>>,
}

impl<'u, S: Store> SoftDeleteCascade<'u, S> {
    pub(crate) fn new(uow: &'u UnitOfWork<S>) -> Self {
        Self {
            uow,
            visited: HashSet::new(),
            marked: Vec::new(),
        }
    }

    /// Mark `root` and its cascade-eligible descendants
    ///
    /// `root` is mutated in place: its flag is set and loaded navigations are
    /// attached to it.
    pub(crate) async fn run(&mut self, root: &mut dyn AnyEntity) -> RepositoryResult<()> {
        let before = self.marked.len();
        self.visit(root).await?;
        debug!(
            root = %root.entity_ref(),
            marked = self.marked.len() - before,
            "Soft-delete cascade finished"
        );
        Ok(())
    }

    /// Stage every marked entity as modified, all at once
    pub(crate) fn stage(self) -> RepositoryResult<usize> {
        let count = self.marked.len();
        self.uow
            .stage_all(self.marked.into_iter().map(|e| (EntryState::Modified, e)).collect())?;
        Ok(count)
    }

    fn is_settled(&self, entity: &dyn AnyEntity, address: &EntityRef) -> bool {
        if entity.soft_delete().is_some_and(|s| s.is_deleted()) || self.visited.contains(address) {
            return true;
        }
        // staged-but-uncommitted state of the same row wins over a stale copy
        match self.uow.state_of(address) {
            Some(EntryState::Deleted) => true,
            Some(_) => self
                .uow
                .tracked(address)
                .is_some_and(|t| t.soft_delete().is_some_and(|s| s.is_deleted())),
            None => false,
        }
    }

    fn visit<'a>(&'a mut self, entity: &'a mut dyn AnyEntity) -> BoxFuture<'a, RepositoryResult<()>> {
        async move {
            let address = entity.entity_ref();
            if entity.soft_delete().is_none() {
                return Ok(());
            }
            if self.is_settled(entity, &address) {
                debug!(entity = %address, "Already deleted, branch pruned");
                return Ok(());
            }
            self.visited.insert(address.clone());

            let registry = self.uow.registry().clone();
            for nav in registry.navigations(address.entity_type) {
                if nav.owned {
                    debug!(entity = %address, navigation = %nav.name, "Owned navigation left to the store");
                    continue;
                }
                if nav.is_on_dependent || !nav.delete_behavior.cascades() {
                    continue;
                }
                let Some(access) = nav.access.as_ref() else {
                    continue;
                };

                if access.loaded(entity).is_none() {
                    let related = self.load(nav, entity).await?;
                    access.attach(entity, related)?;
                }
                if let Some(children) = access.loaded(entity) {
                    for child in children {
                        if child.soft_delete().is_none() {
                            continue;
                        }
                        self.visit(child).await?;
                    }
                }
            }

            if let Some(flag) = entity.soft_delete_mut() {
                flag.mark_deleted();
            }
            debug!(entity = %address, "Marked deleted");
            self.marked.push(entity.clone_boxed());
            Ok(())
        }
        .boxed()
    }

    /// Lazily load a navigation of `owner`, excluding soft-deleted rows
    async fn load(&self, nav: &Navigation, owner: &dyn AnyEntity) -> RepositoryResult<Vec<Box<dyn AnyEntity>>> {
        let (Some(target), Some(access)) = (nav.target, nav.access.as_ref()) else {
            return Ok(Vec::new());
        };
        let key = FilterValue::from_json(&owner.key_value()?).unwrap_or(FilterValue::Null);
        let mut query = StoreQuery::new(target)
            .filter(FilterCondition::eq(nav.foreign_key.clone(), key))
            .include_deleted(false);
        if nav.cardinality == Cardinality::One {
            query = query.limit(1);
        }

        let rows = self.uow.fetch(RepositoryOperation::SoftDelete, &query).await?;
        debug!(
            owner = %owner.entity_ref(),
            navigation = %nav.name,
            rows = rows.len(),
            "Navigation loaded for cascade"
        );

        let decoded = access.decode(rows)?;
        Ok(decoded
            .into_iter()
            .map(|related| {
                self.uow
                    .tracked(&related.entity_ref())
                    .unwrap_or(related)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeleteBehavior, ModelRegistry};
    use crate::repository::RepositoryErrorKind;
    use crate::store::MemoryStore;
    use crate::testing::{self, LineNote, Order, OrderLine, Tag};
    use serde_json::json;

    fn seeded_store() -> MemoryStore {
        let store = testing::store();
        store.seed([Order::new(1, "ada"), Order::new(2, "bob")]).unwrap();
        store
            .seed([
                OrderLine::new(10, 1, "a"),
                OrderLine::new(11, 1, "b"),
                OrderLine::new(20, 2, "c"),
            ])
            .unwrap();
        store
            .seed([LineNote::new(100, 10, "fragile"), LineNote::new(101, 11, "gift")])
            .unwrap();
        store.seed([Tag::new(7, "priority").on_order(1)]).unwrap();
        store
    }

    fn deleted(store: &MemoryStore, collection: &str, id: i64) -> bool {
        store.row(collection, "id", &json!(id)).unwrap()["is_deleted"] == json!(true)
    }

    #[tokio::test]
    async fn test_cascade_marks_transitive_descendants() {
        let store = seeded_store();
        let uow = UnitOfWork::new(store.clone(), testing::registry());

        let mut order = Order::new(1, "ada");
        let mut cascade = SoftDeleteCascade::new(&uow);
        cascade.run(&mut order).await.unwrap();
        assert_eq!(cascade.stage().unwrap(), 5);

        assert!(order.is_deleted);
        let lines = order.lines.as_ref().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.is_deleted));
        assert!(lines.iter().all(|l| l.notes.as_ref().unwrap()[0].is_deleted));

        uow.commit().await.unwrap();
        assert!(deleted(&store, "orders", 1));
        assert!(deleted(&store, "order_lines", 10));
        assert!(deleted(&store, "order_lines", 11));
        assert!(deleted(&store, "line_notes", 100));
        assert!(deleted(&store, "line_notes", 101));
        assert!(!deleted(&store, "order_lines", 20));
        assert!(!deleted(&store, "orders", 2));
        // tags are not soft-deletable and stay for the store to handle
        assert_eq!(store.rows("tags").len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_is_staged_until_stage() {
        let store = seeded_store();
        let uow = UnitOfWork::new(store, testing::registry());
        let mut order = Order::new(1, "ada");
        let mut cascade = SoftDeleteCascade::new(&uow);
        cascade.run(&mut order).await.unwrap();
        assert!(!uow.has_changes());
        drop(cascade);
        assert!(!uow.has_changes());
    }

    #[tokio::test]
    async fn test_already_deleted_branch_is_not_requeried() {
        let store = testing::store();
        store.seed([Order::new(1, "ada")]).unwrap();
        let mut gone = OrderLine::new(11, 1, "b");
        gone.is_deleted = true;
        store.seed([OrderLine::new(10, 1, "a"), gone]).unwrap();
        store
            .seed([LineNote::new(100, 10, "x"), LineNote::new(101, 11, "y")])
            .unwrap();
        let uow = UnitOfWork::new(store.clone(), testing::registry());

        let mut order = Order::new(1, "ada");
        let mut cascade = SoftDeleteCascade::new(&uow);
        cascade.run(&mut order).await.unwrap();
        cascade.stage().unwrap();
        uow.commit().await.unwrap();

        let note_queries: Vec<_> = store
            .query_log()
            .into_iter()
            .filter(|q| q.collection == "line_notes")
            .collect();
        assert_eq!(note_queries.len(), 1);
        assert_eq!(note_queries[0].filters, vec![FilterCondition::eq("line_id", 10_i64)]);
        assert!(deleted(&store, "line_notes", 100));
        assert!(!deleted(&store, "line_notes", 101));
    }

    #[tokio::test]
    async fn test_already_deleted_root_is_a_no_op() {
        let store = seeded_store();
        let uow = UnitOfWork::new(store.clone(), testing::registry());
        let mut order = Order::new(1, "ada");
        order.is_deleted = true;

        let mut cascade = SoftDeleteCascade::new(&uow);
        cascade.run(&mut order).await.unwrap();
        assert_eq!(cascade.stage().unwrap(), 0);
        assert!(store.query_log().is_empty());
    }

    #[tokio::test]
    async fn test_materialized_children_are_used_without_loading() {
        let store = seeded_store();
        let uow = UnitOfWork::new(store.clone(), testing::registry());
        let mut order = Order::new(1, "ada");
        let mut line = OrderLine::new(10, 1, "a");
        line.notes = Some(Vec::new());
        order.lines = Some(vec![line]);
        order.tags = Some(Vec::new());

        let mut cascade = SoftDeleteCascade::new(&uow);
        cascade.run(&mut order).await.unwrap();

        assert!(store.query_log().is_empty());
        assert_eq!(cascade.stage().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_non_cascading_edges_are_skipped() {
        let registry = ModelRegistry::builder()
            .entity::<Order>()
            .entity::<OrderLine>()
            .has_many::<Order, OrderLine>("lines", "order_id", |o| &mut o.lines)
            .on_delete(DeleteBehavior::NoAction)
            .build()
            .unwrap();
        let store = MemoryStore::with_registry(registry.clone());
        store.seed([OrderLine::new(10, 1, "a")]).unwrap();
        let uow = UnitOfWork::new(store.clone(), registry);

        let mut order = Order::new(1, "ada");
        let mut cascade = SoftDeleteCascade::new(&uow);
        cascade.run(&mut order).await.unwrap();

        assert!(order.lines.is_none());
        assert!(store.query_log().is_empty());
        assert_eq!(cascade.stage().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cyclic_data_terminates() {
        // lines point back at their order through a cascading edge, closing a loop
        let registry = ModelRegistry::builder()
            .entity::<Order>()
            .entity::<OrderLine>()
            .has_many::<Order, OrderLine>("lines", "order_id", |o| &mut o.lines)
            .has_one::<OrderLine, Order>("origin", "id", |l| &mut l.order)
            .build()
            .unwrap();
        let store = MemoryStore::with_registry(registry.clone());
        store.seed([Order::new(1, "ada")]).unwrap();
        store.seed([OrderLine::new(1, 1, "a")]).unwrap();
        let uow = UnitOfWork::new(store.clone(), registry);

        let mut order = Order::new(1, "ada");
        let mut cascade = SoftDeleteCascade::new(&uow);
        cascade.run(&mut order).await.unwrap();
        assert_eq!(cascade.stage().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_staged_state_wins_over_store_rows() {
        let store = seeded_store();
        let uow = UnitOfWork::new(store.clone(), testing::registry());
        let mut staged = OrderLine::new(10, 1, "a");
        staged.is_deleted = true;
        uow.stage(EntryState::Modified, Box::new(staged)).unwrap();

        let mut order = Order::new(1, "ada");
        let mut cascade = SoftDeleteCascade::new(&uow);
        cascade.run(&mut order).await.unwrap();
        // order, line 11 and its note; line 10 was already handled
        assert_eq!(cascade.stage().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_mid_walk_stages_nothing() {
        let store = seeded_store();
        let token = tokio_util::sync::CancellationToken::new();
        let uow = UnitOfWork::new(store, testing::registry()).with_cancellation(token.clone());
        token.cancel();

        let mut order = Order::new(1, "ada");
        let mut cascade = SoftDeleteCascade::new(&uow);
        let err = cascade.run(&mut order).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Cancelled);
        assert!(!uow.has_changes());
    }
}
