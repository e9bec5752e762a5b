//! Repository implementation over a [`UnitOfWork`]
//!
//! [`StoreRepository`] is the generic read/write repository for one entity
//! type. Several repositories share one unit of work so that writes made
//! through any of them commit together.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use super::cascade::SoftDeleteCascade;
use super::error::{RepositoryError, RepositoryOperation};
use super::guard::check_one_to_one;
use super::options::{DeleteMode, Persist, QueryOptions};
use super::pagination::{field_value, FilterCondition, FilterValue, Paginated, Pagination};
use super::traits::{ReadRepository, RepositoryResult, WriteRepository};
use super::unit_of_work::{EntryState, UnitOfWork};
use crate::entity::{downcast, from_row, AnyEntity, Entity, EntityKey, EntityRef};
use crate::model::Cardinality;
use crate::store::{Store, StoreQuery};

/// Generic repository for entities of type `E` stored in `S`
///
/// # Example
///
/// ```rust,ignore
/// let uow = Arc::new(UnitOfWork::new(store, registry));
/// let orders = StoreRepository::<Order, _>::new(uow.clone());
///
/// let page = orders
///     .list(&[FilterCondition::eq("customer", "ada")], &QueryOptions::new(), None)
///     .await?;
/// for order in page.items {
///     orders.delete(order, DeleteMode::Soft, Persist::Deferred).await?;
/// }
/// uow.commit().await?;
/// ```
pub struct StoreRepository<E: Entity, S: Store> {
    uow: Arc<UnitOfWork<S>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, S: Store> StoreRepository<E, S> {
    pub fn new(uow: Arc<UnitOfWork<S>>) -> Self {
        Self {
            uow,
            _entity: PhantomData,
        }
    }

    /// The shared unit of work
    pub fn unit_of_work(&self) -> &Arc<UnitOfWork<S>> {
        &self.uow
    }

    /// Validate the options and build the base query; nothing touches the store
    fn base_query(
        &self,
        operation: RepositoryOperation,
        filters: &[FilterCondition],
        options: &QueryOptions,
    ) -> RepositoryResult<StoreQuery> {
        let mut query = StoreQuery::new(E::NAME)
            .filters(filters)
            .include_deleted(options.with_deleted);

        if let Some(order_by) = &options.order_by {
            order_by.validate().map_err(|e| e.with_operation(operation))?;
            query = query.sorted_by(order_by.clone());
        }

        let registry = self.uow.registry();
        if let Some(unknown) = options
            .include
            .iter()
            .find(|name| registry.navigation(E::NAME, name).is_none())
        {
            return Err(RepositoryError::validation_failed(format!(
                "Invalid include: '{unknown}' is not a navigation of {}",
                E::NAME
            ))
            .with_operation(operation));
        }

        Ok(query)
    }

    /// Decode rows, resolve identity against the tracker and load includes
    async fn materialize(
        &self,
        operation: RepositoryOperation,
        rows: Vec<Value>,
        options: &QueryOptions,
    ) -> RepositoryResult<Vec<E>> {
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let mut entity = from_row::<E>(row, operation)?;
            if options.tracking {
                entity = downcast::<E>(self.uow.attach(Box::new(entity)))?;
            }
            for name in &options.include {
                self.load_navigation(&mut entity, name, options).await?;
            }
            items.push(entity);
        }
        Ok(items)
    }

    async fn load_navigation(&self, owner: &mut E, name: &str, options: &QueryOptions) -> RepositoryResult<()> {
        let registry = self.uow.registry();
        let Some(nav) = registry.navigation(E::NAME, name) else {
            return Ok(());
        };
        let (Some(target), Some(access)) = (nav.target, nav.access.as_ref()) else {
            // owned values travel inside the owner's row
            return Ok(());
        };

        let query = if nav.is_on_dependent {
            let row = owner.to_row()?;
            let principal_key = field_value(&row, &nav.foreign_key)
                .and_then(FilterValue::from_json)
                .filter(|value| !matches!(value, FilterValue::Null));
            let Some(principal_key) = principal_key else {
                access.attach(owner, Vec::new())?;
                return Ok(());
            };
            StoreQuery::new(target)
                .filter(FilterCondition::eq(nav.target_key_field, principal_key))
                .limit(1)
        } else {
            let key = FilterValue::from_json(&owner.key_value()?).unwrap_or(FilterValue::Null);
            let query = StoreQuery::new(target).filter(FilterCondition::eq(nav.foreign_key.clone(), key));
            match nav.cardinality {
                Cardinality::One => query.limit(1),
                Cardinality::Many => query,
            }
        }
        .include_deleted(options.with_deleted);

        let rows = self.uow.fetch(RepositoryOperation::LoadRelated, &query).await?;
        let mut related = access.decode(rows)?;
        if options.tracking {
            related = related.into_iter().map(|r| self.uow.attach(r)).collect();
        }
        debug!(
            entity = %owner.entity_ref(),
            navigation = name,
            related = related.len(),
            "Navigation included"
        );
        access.attach(owner, related)
    }

    async fn fetch_one(
        &self,
        operation: RepositoryOperation,
        query: StoreQuery,
        options: &QueryOptions,
    ) -> RepositoryResult<Option<E>> {
        let rows = self.uow.fetch(operation, &query.limit(1)).await?;
        Ok(self.materialize(operation, rows, options).await?.into_iter().next())
    }

    /// The tracked, committed copy of `entity`, or `entity` itself once it
    /// is no longer tracked
    fn committed(&self, entity: E) -> RepositoryResult<E> {
        match self.uow.tracked(&EntityRef::of::<E>(&entity.id())) {
            Some(tracked) => downcast::<E>(tracked),
            None => Ok(entity),
        }
    }

    async fn settle(&self, persist: Persist, entity: E) -> RepositoryResult<E> {
        match persist {
            Persist::Deferred => Ok(entity),
            Persist::Now => {
                self.uow.commit().await?;
                self.committed(entity)
            }
        }
    }

    async fn settle_many(&self, persist: Persist, entities: Vec<E>) -> RepositoryResult<Vec<E>> {
        match persist {
            Persist::Deferred => Ok(entities),
            Persist::Now => {
                self.uow.commit().await?;
                entities.into_iter().map(|e| self.committed(e)).collect()
            }
        }
    }

    fn staged(entities: &[E], state: EntryState) -> Vec<(EntryState, Box<dyn AnyEntity>)> {
        entities
            .iter()
            .map(|e| (state, Box::new(e.clone()) as Box<dyn AnyEntity>))
            .collect()
    }
}

impl<E: Entity, S: Store> Clone for StoreRepository<E, S> {
    fn clone(&self) -> Self {
        Self::new(self.uow.clone())
    }
}

impl<E: Entity, S: Store> fmt::Debug for StoreRepository<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRepository")
            .field("entity", &E::NAME)
            .field("unit_of_work", &self.uow)
            .finish()
    }
}

impl<E: Entity, S: Store> ReadRepository<E> for StoreRepository<E, S> {
    #[instrument(skip_all, fields(entity = E::NAME))]
    async fn first(&self, filters: &[FilterCondition], options: &QueryOptions) -> RepositoryResult<E> {
        let query = self.base_query(RepositoryOperation::First, filters, options)?;
        self.fetch_one(RepositoryOperation::First, query, options)
            .await?
            .ok_or_else(|| RepositoryError::no_match(RepositoryOperation::First, E::NAME))
    }

    #[instrument(skip_all, fields(entity = E::NAME))]
    async fn last(&self, filters: &[FilterCondition], options: &QueryOptions) -> RepositoryResult<E> {
        let operation = RepositoryOperation::Last;
        let mut query = self.base_query(operation, filters, options)?;

        let found = if query.sorts.is_empty() {
            // no ordering to flip: take the tail of the native order
            let mut rows = self.uow.fetch(operation, &query).await?;
            let tail: Vec<Value> = rows.pop().into_iter().collect();
            self.materialize(operation, tail, options).await?.into_iter().next()
        } else {
            query.sorts = query.sorts.reversed();
            self.fetch_one(operation, query, options).await?
        };
        found.ok_or_else(|| RepositoryError::no_match(operation, E::NAME))
    }

    #[instrument(skip_all, fields(entity = E::NAME))]
    async fn get(&self, filters: &[FilterCondition], options: &QueryOptions) -> RepositoryResult<E> {
        let unordered = QueryOptions {
            order_by: None,
            ..options.clone()
        };
        let query = self.base_query(RepositoryOperation::Get, filters, &unordered)?;
        self.fetch_one(RepositoryOperation::Get, query, &unordered)
            .await?
            .ok_or_else(|| RepositoryError::no_match(RepositoryOperation::Get, E::NAME))
    }

    #[instrument(skip_all, fields(entity = E::NAME, id = %id))]
    async fn get_by_id(&self, id: &E::Key, options: &QueryOptions) -> RepositoryResult<E> {
        let unordered = QueryOptions {
            order_by: None,
            ..options.clone()
        };
        let by_key = [FilterCondition::eq(E::KEY_FIELD, id.filter_value())];
        let query = self.base_query(RepositoryOperation::Get, &by_key, &unordered)?;
        self.fetch_one(RepositoryOperation::Get, query, &unordered)
            .await?
            .ok_or_else(|| RepositoryError::not_found(E::NAME, id.to_string()))
    }

    #[instrument(skip_all, fields(entity = E::NAME))]
    async fn list(
        &self,
        filters: &[FilterCondition],
        options: &QueryOptions,
        pagination: Option<Pagination>,
    ) -> RepositoryResult<Paginated<E>> {
        let operation = RepositoryOperation::List;
        let query = self.base_query(operation, filters, options)?;
        let settings = self.uow.settings();
        let page = pagination
            .unwrap_or_else(|| Pagination::first_page(settings.default_page_size))
            .clamped(settings.max_page_size);

        let count = self.uow.count(operation, &query).await?;
        if count == 0 {
            debug!(index = page.index, size = page.size, "No matching entities");
            return Ok(Paginated::empty(page));
        }

        let rows = self
            .uow
            .fetch(operation, &query.offset(page.offset()).limit(page.limit()))
            .await?;
        let items = self.materialize(operation, rows, options).await?;
        debug!(
            index = page.index,
            size = page.size,
            count,
            returned = items.len(),
            "Page listed"
        );
        Ok(Paginated::new(items, page.index, page.size, count))
    }

    #[instrument(skip_all, fields(entity = E::NAME))]
    async fn exists(&self, filters: &[FilterCondition], options: &QueryOptions) -> RepositoryResult<bool> {
        let query = self.base_query(RepositoryOperation::Exists, filters, options)?;
        let rows = self.uow.fetch(RepositoryOperation::Exists, &query.limit(1)).await?;
        Ok(!rows.is_empty())
    }

    #[instrument(skip_all, fields(entity = E::NAME))]
    async fn count(&self, filters: &[FilterCondition], options: &QueryOptions) -> RepositoryResult<u64> {
        let query = self.base_query(RepositoryOperation::Count, filters, options)?;
        self.uow.count(RepositoryOperation::Count, &query).await
    }
}

impl<E: Entity, S: Store> WriteRepository<E> for StoreRepository<E, S> {
    #[instrument(skip_all, fields(entity = E::NAME, id = %entity.id(), ?persist))]
    async fn add(&self, entity: E, persist: Persist) -> RepositoryResult<E> {
        self.uow.stage(EntryState::Added, Box::new(entity.clone()))?;
        self.settle(persist, entity).await
    }

    #[instrument(skip_all, fields(entity = E::NAME, count = entities.len(), ?persist))]
    async fn add_many(&self, entities: Vec<E>, persist: Persist) -> RepositoryResult<Vec<E>> {
        self.uow.stage_all(Self::staged(&entities, EntryState::Added))?;
        self.settle_many(persist, entities).await
    }

    #[instrument(skip_all, fields(entity = E::NAME, id = %entity.id(), ?persist))]
    async fn update(&self, entity: E, persist: Persist) -> RepositoryResult<E> {
        self.uow.stage(EntryState::Modified, Box::new(entity.clone()))?;
        self.settle(persist, entity).await
    }

    #[instrument(skip_all, fields(entity = E::NAME, count = entities.len(), ?persist))]
    async fn update_many(&self, entities: Vec<E>, persist: Persist) -> RepositoryResult<Vec<E>> {
        self.uow.stage_all(Self::staged(&entities, EntryState::Modified))?;
        self.settle_many(persist, entities).await
    }

    #[instrument(skip_all, fields(entity = E::NAME, id = %entity.id(), ?mode, ?persist))]
    async fn delete(&self, mut entity: E, mode: DeleteMode, persist: Persist) -> RepositoryResult<E> {
        if mode == DeleteMode::Soft {
            check_one_to_one(self.uow.registry(), &entity)?;
        }
        if mode == DeleteMode::Permanent || Entity::soft_delete(&entity).is_none() {
            self.uow.stage(EntryState::Deleted, Box::new(entity.clone()))?;
            return self.settle(persist, entity).await;
        }

        let mut cascade = SoftDeleteCascade::new(&self.uow);
        cascade.run(&mut entity).await?;
        let marked = cascade.stage()?;
        debug!(marked, "Soft delete staged");
        self.settle(persist, entity).await
    }

    #[instrument(skip_all, fields(entity = E::NAME, count = entities.len(), ?mode, ?persist))]
    async fn delete_many(&self, mut entities: Vec<E>, mode: DeleteMode, persist: Persist) -> RepositoryResult<Vec<E>> {
        if mode == DeleteMode::Soft {
            for entity in &entities {
                check_one_to_one(self.uow.registry(), entity)?;
            }
        }

        let mut removed = Vec::new();
        let mut cascade = SoftDeleteCascade::new(&self.uow);
        for entity in &mut entities {
            if mode == DeleteMode::Permanent || Entity::soft_delete(&*entity).is_none() {
                removed.push((EntryState::Deleted, entity.clone_boxed()));
            } else {
                cascade.run(entity).await?;
            }
        }
        let marked = cascade.stage()?;
        self.uow.stage_all(removed)?;
        debug!(marked, "Batch delete staged");
        self.settle_many(persist, entities).await
    }

    async fn commit(&self) -> RepositoryResult<u64> {
        self.uow.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::FixedActor;
    use crate::config::RepositoryConfig;
    use crate::repository::{RepositoryErrorKind, SortDirection, SortSpec};
    use crate::store::MemoryStore;
    use crate::testing::{self, LineNote, Order, OrderLine, Profile, Tag, User};
    use serde_json::json;

    fn orders(store: &MemoryStore) -> StoreRepository<Order, MemoryStore> {
        StoreRepository::new(testing::unit_of_work(store.clone()))
    }

    fn seeded_store() -> MemoryStore {
        let store = testing::store();
        store
            .seed([Order::new(1, "ada").with_total(30), Order::new(2, "bob").with_total(10)])
            .unwrap();
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

    fn is_deleted(store: &MemoryStore, collection: &str, id: i64) -> bool {
        store.row(collection, "id", &json!(id)).unwrap()["is_deleted"] == json!(true)
    }

    #[tokio::test]
    async fn test_soft_delete_cascades_and_keeps_owned_data() {
        let store = seeded_store();
        let repo = orders(&store);

        let order = repo.get_by_id(&1, &QueryOptions::new()).await.unwrap();
        let deleted = repo.delete(order, DeleteMode::Soft, Persist::Now).await.unwrap();

        assert!(deleted.is_deleted);
        assert!(is_deleted(&store, "orders", 1));
        assert!(is_deleted(&store, "order_lines", 10));
        assert!(is_deleted(&store, "order_lines", 11));
        assert!(is_deleted(&store, "line_notes", 100));
        assert!(is_deleted(&store, "line_notes", 101));

        let row = store.row("orders", "id", &json!(1)).unwrap();
        assert_eq!(row["shipping_address"]["city"], json!("Oslo"));
        assert_eq!(store.rows("tags").len(), 1);

        assert!(!is_deleted(&store, "orders", 2));
        assert!(!is_deleted(&store, "order_lines", 20));
    }

    #[tokio::test]
    async fn test_soft_delete_twice_is_a_noop() {
        let store = seeded_store();
        let repo = orders(&store);

        let order = repo.get_by_id(&1, &QueryOptions::new()).await.unwrap();
        let deleted = repo.delete(order, DeleteMode::Soft, Persist::Now).await.unwrap();
        store.clear_query_log();

        let again = repo.delete(deleted, DeleteMode::Soft, Persist::Now).await.unwrap();
        assert!(again.is_deleted);
        assert!(is_deleted(&store, "orders", 1));
        assert!(store.query_log().is_empty());
    }

    #[tokio::test]
    async fn test_one_to_one_principal_is_refused_without_mutation() {
        let store = testing::store();
        let user = User::new("ada");
        store.seed([user.clone()]).unwrap();
        store.seed([Profile::new(1, user.id, "hello")]).unwrap();

        let uow = testing::unit_of_work(store.clone());
        let users = StoreRepository::<User, _>::new(uow.clone());
        let err = users.delete(user.clone(), DeleteMode::Soft, Persist::Now).await.unwrap_err();

        assert_eq!(err.kind, RepositoryErrorKind::InvalidRelationship);
        assert_eq!(err.entity_id, Some(user.id.to_string()));
        assert!(!uow.has_changes());
        assert_eq!(store.rows("users")[0]["is_deleted"], json!(false));
        assert_eq!(store.rows("profiles")[0]["is_deleted"], json!(false));
    }

    #[tokio::test]
    async fn test_permanent_delete_is_left_to_the_store() {
        let store = testing::store();
        let user = User::new("ada");
        store.seed([user.clone()]).unwrap();
        store.seed([Profile::new(1, user.id, "hello")]).unwrap();

        let users = StoreRepository::<User, _>::new(testing::unit_of_work(store.clone()));
        users.delete(user, DeleteMode::Permanent, Persist::Now).await.unwrap();

        assert!(store.rows("users").is_empty());
        assert!(store.rows("profiles").is_empty());
    }

    #[tokio::test]
    async fn test_permanent_delete_of_parent_and_child_commits_together() {
        let store = seeded_store();
        let uow = testing::unit_of_work(store.clone());
        let orders = StoreRepository::<Order, _>::new(uow.clone());
        let lines = StoreRepository::<OrderLine, _>::new(uow.clone());

        orders
            .delete(Order::new(1, "ada"), DeleteMode::Permanent, Persist::Deferred)
            .await
            .unwrap();
        lines
            .delete(OrderLine::new(10, 1, "a"), DeleteMode::Permanent, Persist::Deferred)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert!(store.row("orders", "id", &json!(1)).is_none());
        let remaining: Vec<Value> = store.rows("order_lines").iter().map(|r| r["id"].clone()).collect();
        assert_eq!(remaining, vec![json!(20)]);
        assert!(store.rows("line_notes").is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_of_plain_entity_removes_it() {
        let store = seeded_store();
        let tags = StoreRepository::<Tag, _>::new(testing::unit_of_work(store.clone()));
        tags.delete(Tag::new(7, "priority").on_order(1), DeleteMode::Soft, Persist::Now)
            .await
            .unwrap();
        assert!(store.rows("tags").is_empty());
    }

    #[tokio::test]
    async fn test_delete_many_guards_every_entity_first() {
        let store = testing::store();
        let uow = testing::unit_of_work(store.clone());
        let users = StoreRepository::<User, _>::new(uow.clone());
        let (first, second) = (User::new("ada"), User::new("bob"));
        store.seed([first.clone(), second.clone()]).unwrap();

        let err = users
            .delete_many(vec![first, second], DeleteMode::Soft, Persist::Deferred)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidRelationship);
        assert!(!uow.has_changes());
    }

    #[tokio::test]
    async fn test_delete_many_stages_one_change_set() {
        let store = seeded_store();
        let repo = orders(&store);
        let all = repo.list(&[], &QueryOptions::new(), None).await.unwrap().items;

        let deleted = repo.delete_many(all, DeleteMode::Soft, Persist::Deferred).await.unwrap();
        assert!(deleted.iter().all(|o| o.is_deleted));
        assert!(!is_deleted(&store, "orders", 1));
        // two orders, three lines, two notes
        assert_eq!(repo.unit_of_work().pending_count(), 7);

        assert_eq!(repo.commit().await.unwrap(), 7);
        assert!(is_deleted(&store, "order_lines", 20));
    }

    #[tokio::test]
    async fn test_list_returns_requested_page_and_total() {
        let store = testing::store();
        store.seed((1..=25).map(|id| Order::new(id, "ada"))).unwrap();
        let repo = orders(&store);

        let page = repo
            .list(&[], &QueryOptions::new(), Some(Pagination::new(1, 10)))
            .await
            .unwrap();
        let ids: Vec<i64> = page.items.iter().map(|o| o.id).collect();
        assert_eq!(ids, (11..=20).collect::<Vec<_>>());
        assert_eq!(page.count, 25);
        assert_eq!(page.pages, 3);
        assert!(page.has_previous);
        assert!(page.has_next);
    }

    #[tokio::test]
    async fn test_list_of_empty_store_is_an_empty_page() {
        let store = testing::store();
        let page = orders(&store).list(&[], &QueryOptions::new(), None).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(page.count, 0);
        assert_eq!(page.size, 10);
    }

    #[tokio::test]
    async fn test_list_clamps_page_size() {
        let store = testing::store();
        store.seed((1..=5).map(|id| Order::new(id, "ada"))).unwrap();
        let uow = UnitOfWork::new(store.clone(), testing::registry()).with_settings(RepositoryConfig {
            max_page_size: 2,
            ..RepositoryConfig::default()
        });
        let repo = StoreRepository::<Order, _>::new(Arc::new(uow));

        let page = repo
            .list(&[], &QueryOptions::new(), Some(Pagination::new(0, 50)))
            .await
            .unwrap();
        assert_eq!(page.size, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page.pages, 3);
    }

    #[tokio::test]
    async fn test_invalid_sort_fails_before_the_store_is_queried() {
        let store = seeded_store();
        let repo = orders(&store);
        let options = QueryOptions::new().order_by(SortSpec::by(" ", SortDirection::Ascending));

        let err = repo.list(&[], &options, None).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert_eq!(err.operation, RepositoryOperation::List);
        assert!(err.message.starts_with("Invalid field"));
        assert!(store.query_log().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_include_is_rejected() {
        let store = seeded_store();
        let err = orders(&store)
            .first(&[], &QueryOptions::new().include("invoices"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::ValidationFailed);
        assert_eq!(err.operation, RepositoryOperation::First);
        assert!(store.query_log().is_empty());
    }

    #[tokio::test]
    async fn test_first_and_last_follow_ordering() {
        let store = seeded_store();
        store.seed([Order::new(3, "cy").with_total(20)]).unwrap();
        let repo = orders(&store);
        let by_total = QueryOptions::new().order_by(SortSpec::by("total", SortDirection::Descending));

        assert_eq!(repo.first(&[], &by_total).await.unwrap().id, 1);
        assert_eq!(repo.last(&[], &by_total).await.unwrap().id, 2);
        // native order without a sort
        assert_eq!(repo.last(&[], &QueryOptions::new()).await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_single_lookups_report_not_found() {
        let store = seeded_store();
        let repo = orders(&store);

        let err = repo.get_by_id(&99, &QueryOptions::new()).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
        assert_eq!(err.entity_id.as_deref(), Some("99"));

        let nobody = [FilterCondition::eq("customer", "zed")];
        let err = repo.first(&nobody, &QueryOptions::new()).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
        assert_eq!(err.operation, RepositoryOperation::First);
        assert!(!repo.exists(&nobody, &QueryOptions::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_ignores_ordering() {
        let store = seeded_store();
        let options = QueryOptions::new().order_by(SortSpec::by("", SortDirection::Ascending));
        let order = orders(&store)
            .get(&[FilterCondition::eq("customer", "bob")], &options)
            .await
            .unwrap();
        assert_eq!(order.id, 2);
    }

    #[tokio::test]
    async fn test_soft_deleted_rows_need_with_deleted() {
        let store = seeded_store();
        let mut gone = Order::new(3, "cy");
        gone.is_deleted = true;
        store.seed([gone]).unwrap();
        let repo = orders(&store);

        assert_eq!(repo.count(&[], &QueryOptions::new()).await.unwrap(), 2);
        assert_eq!(repo.count(&[], &QueryOptions::new().with_deleted()).await.unwrap(), 3);
        let err = repo.get_by_id(&3, &QueryOptions::new()).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::NotFound);
        assert!(repo.get_by_id(&3, &QueryOptions::new().with_deleted()).await.unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_include_loads_both_ends_of_a_relationship() {
        let store = seeded_store();
        let mut retired = OrderLine::new(12, 1, "z");
        retired.is_deleted = true;
        store.seed([retired]).unwrap();
        let uow = testing::unit_of_work(store.clone());

        let order = StoreRepository::<Order, _>::new(uow.clone())
            .get_by_id(&1, &QueryOptions::new().include("lines").include("shipping_address"))
            .await
            .unwrap();
        let lines = order.lines.unwrap();
        assert_eq!(lines.iter().map(|l| l.id).collect::<Vec<_>>(), vec![10, 11]);
        assert!(order.shipping_address.is_some());

        let line = StoreRepository::<OrderLine, _>::new(uow)
            .get_by_id(&12, &QueryOptions::new().with_deleted().include("order"))
            .await
            .unwrap();
        assert_eq!(line.order.map(|o| o.id), Some(1));
    }

    #[tokio::test]
    async fn test_tracking_returns_staged_state() {
        let store = seeded_store();
        let repo = orders(&store);

        let mut order = repo.get_by_id(&1, &QueryOptions::new()).await.unwrap();
        order.customer = "staged".to_string();
        repo.update(order, Persist::Deferred).await.unwrap();

        let tracked = repo.get_by_id(&1, &QueryOptions::new()).await.unwrap();
        assert_eq!(tracked.customer, "staged");
        let detached = repo.get_by_id(&1, &QueryOptions::new().no_tracking()).await.unwrap();
        assert_eq!(detached.customer, "ada");
    }

    #[tokio::test]
    async fn test_persist_now_returns_audited_entity() {
        let store = testing::store();
        let uow = Arc::new(UnitOfWork::from_config(
            store.clone(),
            testing::registry(),
            &RepositoryConfig::default(),
            Arc::new(FixedActor::new("ops")),
        ));
        let repo = StoreRepository::<Order, _>::new(uow);

        let added = repo.add(Order::new(1, "ada"), Persist::Now).await.unwrap();
        assert_eq!(added.creator_id.as_deref(), Some("ops"));
        assert!(added.created_at.is_some());

        let mut changed = added.clone();
        changed.total = 5;
        let updated = repo.update(changed, Persist::Now).await.unwrap();
        assert_eq!(updated.modifier_id.as_deref(), Some("ops"));
        assert_ne!(updated.concurrency_stamp, added.concurrency_stamp);
        assert_eq!(store.rows("orders")[0]["total"], json!(5));
    }

    #[tokio::test]
    async fn test_stale_concurrency_stamp_conflicts() {
        let store = seeded_store();
        let writer = orders(&store);
        let reader = orders(&store);

        let mut stale = reader.get_by_id(&2, &QueryOptions::new()).await.unwrap();
        let mut fresh = writer.get_by_id(&2, &QueryOptions::new()).await.unwrap();
        fresh.total = 11;
        fresh.concurrency_stamp = "rotated".to_string();
        writer.update(fresh, Persist::Now).await.unwrap();

        stale.total = 12;
        let err = reader.update(stale, Persist::Now).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::PersistenceConflict);
        assert_eq!(store.row("orders", "id", &json!(2)).unwrap()["total"], json!(11));
    }

    #[tokio::test]
    async fn test_deferred_writes_commit_together() {
        let store = testing::store();
        let uow = testing::unit_of_work(store.clone());
        let orders = StoreRepository::<Order, _>::new(uow.clone());
        let lines = StoreRepository::<OrderLine, _>::new(uow.clone());

        orders.add(Order::new(1, "ada"), Persist::Deferred).await.unwrap();
        lines
            .add_many(vec![OrderLine::new(10, 1, "a"), OrderLine::new(11, 1, "b")], Persist::Deferred)
            .await
            .unwrap();
        assert!(store.rows("orders").is_empty());

        assert_eq!(lines.commit().await.unwrap(), 3);
        assert_eq!(store.rows("order_lines").len(), 2);
        assert_eq!(orders.count(&[], &QueryOptions::new()).await.unwrap(), 1);
    }
}
