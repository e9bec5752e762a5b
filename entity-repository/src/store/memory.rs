//! In-process store over JSON rows

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use super::{Change, ChangeKind, ChangeSet, Store, StoreQuery};
use crate::entity::{Entity, CONCURRENCY_STAMP_FIELD, SOFT_DELETE_FIELD};
use crate::model::{DeleteBehavior, ModelRegistry};
use crate::repository::pagination::{field_value, matches_all};
use crate::repository::{
    FilterCondition, FilterValue, RepositoryError, RepositoryOperation, RepositoryResult, SortDirection,
};

type Tables = HashMap<String, Vec<Value>>;

/// Rows removed by a native cascade during one commit, as `(collection, key)`
type Cascaded = HashSet<(String, String)>;

/// Thread-safe in-memory store
///
/// Cloning yields another handle to the same tables. When built with a
/// [`ModelRegistry`], hard deletes follow each relationship's
/// [`DeleteBehavior`] the way a relational store enforces foreign keys.
///
/// # Example
///
/// ```rust
/// use entity_repository::store::{MemoryStore, Store, StoreQuery};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.insert_row("orders", json!({ "id": 1, "is_deleted": false }));
/// store.insert_row("orders", json!({ "id": 2, "is_deleted": true }));
///
/// let visible = store.fetch(&StoreQuery::new("orders")).await.unwrap();
/// assert_eq!(visible.len(), 1);
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    tables: RwLock<Tables>,
    registry: Arc<ModelRegistry>,
    queries: Mutex<Vec<StoreQuery>>,
}

impl MemoryStore {
    /// An empty store with no relationship metadata
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(ModelRegistry::empty())
    }

    /// An empty store enforcing the relationships in `registry` on hard delete
    #[must_use]
    pub fn with_registry(registry: Arc<ModelRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(HashMap::new()),
                registry,
                queries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Insert a raw row, bypassing change tracking
    pub fn insert_row(&self, collection: &str, row: Value) {
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .push(row);
    }

    /// Insert entities directly, bypassing change tracking and commit hooks
    ///
    /// # Errors
    ///
    /// Fails if an entity cannot be serialized.
    pub fn seed<E: Entity>(&self, entities: impl IntoIterator<Item = E>) -> RepositoryResult<()> {
        let rows = entities
            .into_iter()
            .map(|e| serde_json::to_value(&e))
            .collect::<Result<Vec<_>, _>>()?;
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(E::NAME.to_string())
            .or_default()
            .extend(rows);
        Ok(())
    }

    /// Every stored row of `collection`, soft-deleted ones included
    #[must_use]
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.inner
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// A stored row by key, soft-deleted or not
    #[must_use]
    pub fn row(&self, collection: &str, key_field: &str, key: &Value) -> Option<Value> {
        self.rows(collection)
            .into_iter()
            .find(|row| row.get(key_field) == Some(key))
    }

    /// Queries issued so far, oldest first
    #[must_use]
    pub fn query_log(&self) -> Vec<StoreQuery> {
        self.inner
            .queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget the recorded queries
    pub fn clear_query_log(&self) {
        self.inner
            .queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, query: &StoreQuery) {
        self.inner
            .queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.clone());
    }

    fn matching(&self, query: &StoreQuery) -> Vec<Value> {
        let tables = self.inner.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(&query.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.include_deleted || !is_soft_deleted(row))
                    .filter(|row| matches_all(&query.filters, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn apply(&self, tables: &mut Tables, cascaded: &mut Cascaded, change: Change) -> RepositoryResult<u64> {
        let conflict = |operation: RepositoryOperation, message: String| {
            RepositoryError::persistence_conflict(operation, message)
                .with_entity(change.collection.clone(), render_key(&change.key))
        };

        let rows = tables.entry(change.collection.clone()).or_default();
        let position = rows
            .iter()
            .position(|row| row.get(&change.key_field) == Some(&change.key));

        match change.kind {
            ChangeKind::Insert => {
                if position.is_some() {
                    return Err(conflict(RepositoryOperation::Add, "Duplicate key".to_string()));
                }
                rows.push(change.row);
                Ok(1)
            }
            ChangeKind::Update => {
                let Some(index) = position else {
                    return Err(conflict(RepositoryOperation::Update, "Row no longer exists".to_string()));
                };
                check_stamp(&rows[index], change.original_stamp.as_deref())
                    .map_err(|m| conflict(RepositoryOperation::Update, m))?;
                rows[index] = change.row;
                Ok(1)
            }
            ChangeKind::Delete => {
                let Some(index) = position else {
                    if cascaded.contains(&(change.collection.clone(), render_key(&change.key))) {
                        debug!(
                            collection = %change.collection,
                            key = %render_key(&change.key),
                            "Delete already applied by cascade"
                        );
                        return Ok(0);
                    }
                    return Err(conflict(RepositoryOperation::Delete, "Row no longer exists".to_string()));
                };
                check_stamp(&rows[index], change.original_stamp.as_deref())
                    .map_err(|m| conflict(RepositoryOperation::Delete, m))?;
                rows.remove(index);
                let dependents = self.delete_dependents(tables, cascaded, &change.collection, &change.key)?;
                Ok(1 + dependents)
            }
        }
    }

    /// Enforce foreign keys pointing at a removed principal row
    fn delete_dependents(
        &self,
        tables: &mut Tables,
        cascaded: &mut Cascaded,
        collection: &str,
        key: &Value,
    ) -> RepositoryResult<u64> {
        let mut affected = 0;
        for nav in self.inner.registry.dependents(collection) {
            let Some(target) = nav.target else { continue };
            let fk = FilterCondition::eq(
                nav.foreign_key.clone(),
                FilterValue::from_json(key).unwrap_or(FilterValue::Null),
            );
            let Some(rows) = tables.get_mut(target) else { continue };
            let referencing: Vec<Value> = rows
                .iter()
                .filter(|row| fk.matches(row))
                .map(|row| row.get(nav.target_key_field).cloned().unwrap_or(Value::Null))
                .collect();
            if referencing.is_empty() {
                continue;
            }

            match nav.delete_behavior {
                DeleteBehavior::Cascade | DeleteBehavior::ClientCascade => {
                    rows.retain(|row| !fk.matches(row));
                    affected += referencing.len() as u64;
                    debug!(
                        principal = collection,
                        dependent = target,
                        rows = referencing.len(),
                        "Cascaded hard delete"
                    );
                    for dependent_key in &referencing {
                        cascaded.insert((target.to_string(), render_key(dependent_key)));
                        affected += self.delete_dependents(tables, cascaded, target, dependent_key)?;
                    }
                }
                DeleteBehavior::SetNull => {
                    for row in rows.iter_mut().filter(|row| fk.matches(row)) {
                        if let Some(obj) = row.as_object_mut() {
                            obj.insert(nav.foreign_key.clone(), Value::Null);
                        }
                    }
                    affected += referencing.len() as u64;
                }
                DeleteBehavior::Restrict | DeleteBehavior::NoAction => {
                    return Err(RepositoryError::persistence_conflict(
                        RepositoryOperation::Delete,
                        format!(
                            "{} row(s) in '{target}' still reference this row through '{}'",
                            referencing.len(),
                            nav.foreign_key
                        ),
                    )
                    .with_entity(collection, render_key(key)));
                }
            }
        }
        Ok(affected)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    async fn fetch(&self, query: &StoreQuery) -> RepositoryResult<Vec<Value>> {
        self.record(query);
        let mut rows = self.matching(query);
        if !query.sorts.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .sorts
                    .terms()
                    .iter()
                    .map(|sort| {
                        let ordering = compare_json(field_value(a, &sort.field), field_value(b, &sort.field));
                        match sort.direction {
                            SortDirection::Ascending => ordering,
                            SortDirection::Descending => ordering.reverse(),
                        }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, query: &StoreQuery) -> RepositoryResult<u64> {
        self.record(query);
        Ok(self.matching(query).len() as u64)
    }

    async fn commit(&self, changes: ChangeSet) -> RepositoryResult<u64> {
        let mut tables = self.inner.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut working = tables.clone();
        let mut cascaded = Cascaded::new();
        let total = changes.len();
        let mut affected = 0;
        for change in changes {
            affected += self.apply(&mut working, &mut cascaded, change)?;
        }
        *tables = working;
        debug!(changes = total, affected, "Memory store commit applied");
        Ok(affected)
    }
}

fn is_soft_deleted(row: &Value) -> bool {
    row.get(SOFT_DELETE_FIELD).and_then(Value::as_bool).unwrap_or(false)
}

fn check_stamp(row: &Value, expected: Option<&str>) -> Result<(), String> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let stored = row.get(CONCURRENCY_STAMP_FIELD).and_then(Value::as_str);
    if stored == Some(expected) {
        Ok(())
    } else {
        Err("Concurrency stamp mismatch: the row was changed since it was read".to_string())
    }
}

fn render_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Total order over JSON values: missing/null, bools, numbers, strings, then containers
fn compare_json(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
