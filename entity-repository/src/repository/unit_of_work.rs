//! Change tracking and transactional commit
//!
//! A [`UnitOfWork`] is the session every repository of one logical operation
//! shares. It keeps one tracked instance per `(collection, key)`, collects
//! staged inserts, updates and deletes, and flushes them to the [`Store`] as a
//! single atomic [`ChangeSet`] on [`commit`](UnitOfWork::commit).
//!
//! Every store round-trip races the unit's cancellation token, so a cancelled
//! operation stops at its next suspension point. Nothing reaches the store
//! before `commit`, so abandoning an operation never leaves partial writes.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
use super::traits::RepositoryResult;
use crate::audit::{AuditStamper, CommitHook, CurrentActor};
use crate::config::RepositoryConfig;
use crate::entity::{AnyEntity, EntityRef, MAX_STAMP_LENGTH};
use crate::model::ModelRegistry;
use crate::store::{Change, ChangeKind, ChangeSet, Store, StoreQuery};

/// Tracking state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Matches the store
    Unchanged,
    /// Staged for insert
    Added,
    /// Staged for update
    Modified,
    /// Staged for removal
    Deleted,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A pending entity as seen by commit hooks
pub struct PendingChange {
    pub state: EntryState,
    pub entity: Box<dyn AnyEntity>,
}

impl PendingChange {
    pub fn new(state: EntryState, entity: Box<dyn AnyEntity>) -> Self {
        Self { state, entity }
    }
}

impl fmt::Debug for PendingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingChange")
            .field("state", &self.state)
            .field("entity", &self.entity.entity_ref())
            .finish()
    }
}

struct Entry {
    state: EntryState,
    entity: Box<dyn AnyEntity>,
    /// Stamp the entity was read with; compared by the store on commit
    original_stamp: Option<String>,
    version: u64,
}

#[derive(Default)]
struct Tracker {
    entries: HashMap<EntityRef, Entry>,
    next_version: u64,
}

impl Tracker {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn validate_stage(&self, state: EntryState, entity: &dyn AnyEntity) -> RepositoryResult<()> {
        let address = entity.entity_ref();
        let existing = self.entries.get(&address).map(|e| e.state);
        let conflict = |operation: RepositoryOperation, message: &str| {
            Err(RepositoryError::persistence_conflict(operation, message)
                .with_entity(address.entity_type, address.key.clone()))
        };
        match (state, existing) {
            (EntryState::Added, Some(EntryState::Deleted) | None) => Ok(()),
            (EntryState::Added, Some(_)) => {
                conflict(RepositoryOperation::Add, "An entity with the same key is already tracked")
            }
            (EntryState::Modified, Some(EntryState::Deleted)) => {
                conflict(RepositoryOperation::Update, "Entity is staged for removal")
            }
            _ => Ok(()),
        }
    }

    /// Record a staged change; callers validate first
    fn stage(&mut self, state: EntryState, entity: Box<dyn AnyEntity>) {
        let address = entity.entity_ref();
        let version = self.bump();
        let current_stamp = entity.concurrency_safe().map(|c| c.concurrency_stamp().to_string());

        match (state, self.entries.remove(&address)) {
            (EntryState::Added, Some(previous)) if previous.state == EntryState::Deleted => {
                // re-adding a row removed in this unit replaces it in place
                self.entries.insert(
                    address,
                    Entry {
                        state: EntryState::Modified,
                        entity,
                        original_stamp: previous.original_stamp,
                        version,
                    },
                );
            }
            (EntryState::Added, _) => {
                self.entries.insert(
                    address,
                    Entry {
                        state: EntryState::Added,
                        entity,
                        original_stamp: None,
                        version,
                    },
                );
            }
            (EntryState::Modified, Some(previous)) => {
                let state = if previous.state == EntryState::Added {
                    EntryState::Added
                } else {
                    EntryState::Modified
                };
                self.entries.insert(
                    address,
                    Entry {
                        state,
                        entity,
                        original_stamp: previous.original_stamp,
                        version,
                    },
                );
            }
            (EntryState::Deleted, Some(previous)) if previous.state == EntryState::Added => {
                // never reached the store
            }
            (EntryState::Deleted, Some(previous)) => {
                self.entries.insert(
                    address,
                    Entry {
                        state: EntryState::Deleted,
                        entity,
                        original_stamp: previous.original_stamp,
                        version,
                    },
                );
            }
            (state, _) => {
                self.entries.insert(
                    address,
                    Entry {
                        state,
                        entity,
                        original_stamp: current_stamp,
                        version,
                    },
                );
            }
        }
    }
}

/// Session shared by the repositories of one logical operation
///
/// # Example
///
/// ```rust,ignore
/// let uow = Arc::new(UnitOfWork::new(MemoryStore::with_registry(registry.clone()), registry));
/// let orders = StoreRepository::<Order, _>::new(uow.clone());
/// let lines = StoreRepository::<OrderLine, _>::new(uow.clone());
///
/// orders.add(order, Persist::Deferred).await?;
/// lines.add_many(order_lines, Persist::Deferred).await?;
/// uow.commit().await?; // one atomic change set
/// ```
pub struct UnitOfWork<S: Store> {
    store: S,
    registry: Arc<ModelRegistry>,
    hooks: Vec<Arc<dyn CommitHook>>,
    settings: RepositoryConfig,
    cancellation: CancellationToken,
    tracker: Mutex<Tracker>,
}

impl<S: Store> UnitOfWork<S> {
    /// A unit of work with default settings and no commit hooks
    pub fn new(store: S, registry: Arc<ModelRegistry>) -> Self {
        Self {
            store,
            registry,
            hooks: Vec::new(),
            settings: RepositoryConfig::default(),
            cancellation: CancellationToken::new(),
            tracker: Mutex::new(Tracker::default()),
        }
    }

    /// A unit of work configured from `settings`
    ///
    /// Installs an [`AuditStamper`] for `actor` when auditing is enabled.
    pub fn from_config(
        store: S,
        registry: Arc<ModelRegistry>,
        settings: &RepositoryConfig,
        actor: Arc<dyn CurrentActor>,
    ) -> Self {
        let mut uow = Self::new(store, registry).with_settings(settings.clone());
        if settings.audit_enabled {
            uow = uow.with_hook(Arc::new(AuditStamper::new(actor)));
        }
        uow
    }

    /// Replace the repository settings
    #[must_use]
    pub fn with_settings(mut self, settings: RepositoryConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Add a commit hook; hooks run in registration order
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Relationship metadata
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &RepositoryConfig {
        &self.settings
    }

    /// Token that cancels every pending and future store call of this unit
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a store call unless the unit is cancelled first
    pub(crate) async fn guarded<T>(
        &self,
        operation: RepositoryOperation,
        call: impl Future<Output = RepositoryResult<T>>,
    ) -> RepositoryResult<T> {
        tokio::select! {
            biased;

            () = self.cancellation.cancelled() => {
                debug!(operation = %operation, "Store call cancelled");
                Err(RepositoryError::cancelled(operation))
            }
            result = call => result,
        }
    }

    pub(crate) async fn fetch(
        &self,
        operation: RepositoryOperation,
        query: &StoreQuery,
    ) -> RepositoryResult<Vec<Value>> {
        self.guarded(operation, self.store.fetch(query))
            .await
            .map_err(|e| e.with_operation(operation))
    }

    pub(crate) async fn count(&self, operation: RepositoryOperation, query: &StoreQuery) -> RepositoryResult<u64> {
        self.guarded(operation, self.store.count(query))
            .await
            .map_err(|e| e.with_operation(operation))
    }

    /// Track an entity read from the store, resolving identity
    ///
    /// Returns the already-tracked instance when the key is tracked.
    pub(crate) fn attach(&self, entity: Box<dyn AnyEntity>) -> Box<dyn AnyEntity> {
        let mut tracker = self.tracker();
        let address = entity.entity_ref();
        if let Some(existing) = tracker.entries.get(&address) {
            return existing.entity.clone_boxed();
        }
        let version = tracker.bump();
        let original_stamp = entity.concurrency_safe().map(|c| c.concurrency_stamp().to_string());
        let copy = entity.clone_boxed();
        tracker.entries.insert(
            address,
            Entry {
                state: EntryState::Unchanged,
                entity,
                original_stamp,
                version,
            },
        );
        copy
    }

    /// A copy of the tracked instance at `address`
    pub(crate) fn tracked(&self, address: &EntityRef) -> Option<Box<dyn AnyEntity>> {
        self.tracker()
            .entries
            .get(address)
            .map(|e| e.entity.clone_boxed())
    }

    /// Tracking state of the entity at `address`
    pub fn state_of(&self, address: &EntityRef) -> Option<EntryState> {
        self.tracker().entries.get(address).map(|e| e.state)
    }

    /// Stage one change
    ///
    /// # Errors
    ///
    /// Fails with `PersistenceConflict` when adding a key that is already
    /// tracked, or updating an entity staged for removal.
    pub(crate) fn stage(&self, state: EntryState, entity: Box<dyn AnyEntity>) -> RepositoryResult<()> {
        self.stage_all(vec![(state, entity)])
    }

    /// Stage several changes; either all are staged or none
    pub(crate) fn stage_all(&self, changes: Vec<(EntryState, Box<dyn AnyEntity>)>) -> RepositoryResult<()> {
        let mut tracker = self.tracker();
        for (state, entity) in &changes {
            tracker.validate_stage(*state, entity.as_ref())?;
        }
        for (state, entity) in changes {
            tracker.stage(state, entity);
        }
        Ok(())
    }

    /// Whether anything is waiting to be committed
    pub fn has_changes(&self) -> bool {
        self.tracker()
            .entries
            .values()
            .any(|e| e.state != EntryState::Unchanged)
    }

    /// Number of staged changes
    pub fn pending_count(&self) -> usize {
        self.tracker()
            .entries
            .values()
            .filter(|e| e.state != EntryState::Unchanged)
            .count()
    }

    /// Stop tracking everything, dropping staged changes
    pub fn clear(&self) {
        let mut tracker = self.tracker();
        let dropped = tracker.entries.len();
        tracker.entries.clear();
        debug!(dropped, "Change tracker cleared");
    }

    /// Flush every staged change as one atomic change set
    ///
    /// Commit hooks run on copies of the pending entities; the tracker is only
    /// updated after the store accepts the change set.
    ///
    /// # Errors
    ///
    /// * `ValidationFailed` when an entity breaks a model rule (missing or
    ///   oversized concurrency stamp, oversized actor id)
    /// * `PersistenceConflict` when the store rejects the change set
    /// * `Cancelled` when the unit's token fires first
    ///
    /// Returns the number of rows the store reports as affected.
    pub async fn commit(&self) -> RepositoryResult<u64> {
        if self.cancellation.is_cancelled() {
            return Err(RepositoryError::cancelled(RepositoryOperation::Commit));
        }

        let (mut pending, snapshot) = {
            let tracker = self.tracker();
            let mut entries: Vec<(&EntityRef, &Entry)> = tracker
                .entries
                .iter()
                .filter(|(_, e)| e.state != EntryState::Unchanged)
                .collect();
            entries.sort_by_key(|(_, e)| e.version);
            let snapshot: Vec<(EntityRef, u64, Option<String>)> = entries
                .iter()
                .map(|(address, e)| ((*address).clone(), e.version, e.original_stamp.clone()))
                .collect();
            let pending: Vec<PendingChange> = entries
                .iter()
                .map(|(_, e)| PendingChange::new(e.state, e.entity.clone_boxed()))
                .collect();
            (pending, snapshot)
        };

        if pending.is_empty() {
            debug!("Nothing to commit");
            return Ok(0);
        }

        for hook in &self.hooks {
            self.guarded(RepositoryOperation::Commit, hook.before_commit(&mut pending))
                .await?;
        }

        let mut changes = ChangeSet::new();
        for (change, (_, _, original_stamp)) in pending.iter_mut().zip(&snapshot) {
            validate_model_rules(change)?;
            changes.push(to_change(change, original_stamp.clone())?);
        }

        let (inserted, updated, deleted) = (
            changes.count_of(ChangeKind::Insert),
            changes.count_of(ChangeKind::Update),
            changes.count_of(ChangeKind::Delete),
        );

        let affected = match self
            .guarded(RepositoryOperation::Commit, self.store.commit(changes))
            .await
        {
            Ok(affected) => affected,
            Err(e) => {
                if e.kind == RepositoryErrorKind::PersistenceConflict {
                    warn!(error = %e, "Commit rejected by store");
                }
                return Err(e.with_operation(RepositoryOperation::Commit));
            }
        };

        self.accept(pending, snapshot);
        info!(inserted, updated, deleted, affected, "Changes committed");
        Ok(affected)
    }

    /// Fold committed entities back into the tracker
    fn accept(&self, committed: Vec<PendingChange>, snapshot: Vec<(EntityRef, u64, Option<String>)>) {
        let mut tracker = self.tracker();
        for (change, (address, version, _)) in committed.into_iter().zip(snapshot) {
            let new_stamp = change
                .entity
                .concurrency_safe()
                .map(|c| c.concurrency_stamp().to_string());
            let Some(entry) = tracker.entries.get_mut(&address) else {
                continue;
            };
            if entry.version != version {
                // restaged while the commit was in flight; keep the newer change
                entry.original_stamp = new_stamp;
                if entry.state == EntryState::Added {
                    entry.state = EntryState::Modified;
                }
                continue;
            }
            if change.state == EntryState::Deleted {
                tracker.entries.remove(&address);
            } else {
                entry.state = EntryState::Unchanged;
                entry.entity = change.entity;
                entry.original_stamp = new_stamp;
            }
        }
    }
}

impl<S: Store> fmt::Debug for UnitOfWork<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("hooks", &self.hooks.len())
            .field("pending", &self.pending_count())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn validate_model_rules(change: &mut PendingChange) -> RepositoryResult<()> {
    if change.state == EntryState::Deleted {
        return Ok(());
    }
    let address = change.entity.entity_ref();
    let invalid = |message: String| {
        Err(RepositoryError::new(
            RepositoryOperation::Commit,
            RepositoryErrorKind::ValidationFailed,
            message,
        )
        .with_entity(address.entity_type, address.key.clone()))
    };

    if let Some(token) = change.entity.concurrency_safe() {
        let stamp = token.concurrency_stamp();
        if stamp.is_empty() {
            return invalid("Concurrency stamp is required".to_string());
        }
        if stamp.len() > MAX_STAMP_LENGTH {
            return invalid(format!("Concurrency stamp exceeds {MAX_STAMP_LENGTH} characters"));
        }
    }

    let entity = change.entity.as_mut();
    let actors = [
        ("creator id", entity.creation_audited_mut().and_then(|a| a.creator_id().map(str::len))),
        ("modifier id", entity.audited_mut().and_then(|a| a.last_modifier_id().map(str::len))),
        ("deleter id", entity.deletion_audited_mut().and_then(|a| a.deleter_id().map(str::len))),
    ];
    for (field, length) in actors {
        if length.is_some_and(|len| len > MAX_STAMP_LENGTH) {
            return invalid(format!("The {field} exceeds {MAX_STAMP_LENGTH} characters"));
        }
    }
    Ok(())
}

fn to_change(change: &PendingChange, original_stamp: Option<String>) -> RepositoryResult<Change> {
    let entity = change.entity.as_ref();
    let (kind, row, original_stamp) = match change.state {
        EntryState::Added => (ChangeKind::Insert, entity.to_row()?, None),
        EntryState::Modified => (ChangeKind::Update, entity.to_row()?, original_stamp),
        EntryState::Deleted => (ChangeKind::Delete, Value::Null, original_stamp),
        EntryState::Unchanged => {
            return Err(RepositoryError::new(
                RepositoryOperation::Commit,
                RepositoryErrorKind::Other,
                "Unchanged entity in change set",
            ))
        }
    };
    Ok(Change {
        collection: entity.entity_type().to_string(),
        key_field: entity.key_field().to_string(),
        key: entity.key_value()?,
        kind,
        row,
        original_stamp,
    })
}
