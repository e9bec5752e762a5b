//! Commit hooks and audit-field stamping
//!
//! Hooks run inside [`UnitOfWork::commit`](crate::repository::UnitOfWork::commit)
//! on copies of every pending entity, after the caller has finished staging
//! and before the change set reaches the store. If a hook fails, nothing is
//! flushed and the tracker is left as it was.
//!
//! [`AuditStamper`] is the built-in hook: it fills creation, modification and
//! deletion stamps from a [`CurrentActor`] and regenerates concurrency tokens.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use entity_repository::audit::{AuditStamper, FixedActor};
//!
//! let stamper = AuditStamper::new(Arc::new(FixedActor::new("svc-billing")));
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::repository::{EntryState, PendingChange, RepositoryResult};

/// Resolves who is performing the current operation
///
/// Returning `None` leaves actor fields empty; timestamps are still written.
pub trait CurrentActor: Send + Sync + 'static {
    /// Opaque identity of the current actor
    fn actor_id(&self) -> Option<String>;
}

/// No identity available
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CurrentActor for Anonymous {
    fn actor_id(&self) -> Option<String> {
        None
    }
}

/// A constant identity, for background jobs and service accounts
#[derive(Debug, Clone)]
pub struct FixedActor {
    id: String,
}

impl FixedActor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl CurrentActor for FixedActor {
    fn actor_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

/// Runs against pending changes right before they are committed
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use entity_repository::audit::CommitHook;
/// use entity_repository::repository::{PendingChange, RepositoryResult};
///
/// struct CountChanges;
///
/// #[async_trait]
/// impl CommitHook for CountChanges {
///     async fn before_commit(&self, changes: &mut [PendingChange]) -> RepositoryResult<()> {
///         tracing::info!(pending = changes.len(), "About to commit");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait CommitHook: Send + Sync + 'static {
    /// Inspect or adjust the pending entities
    ///
    /// # Errors
    ///
    /// An error aborts the commit.
    async fn before_commit(&self, changes: &mut [PendingChange]) -> RepositoryResult<()>;
}

/// Stamps audit fields and concurrency tokens on commit
///
/// * added + creation-audited: creation time and creator
/// * modified + audited: modification time and modifier
/// * modified + concurrency-safe: a fresh token
/// * modified + soft-deleted + deletion-audited: deletion time and deleter,
///   unless already stamped
///
/// Types with `AUDIT_EXEMPT` are skipped; hard deletes are never stamped.
pub struct AuditStamper {
    actor: Arc<dyn CurrentActor>,
}

impl AuditStamper {
    pub fn new(actor: Arc<dyn CurrentActor>) -> Self {
        Self { actor }
    }

    fn stamp(change: &mut PendingChange, now: DateTime<Utc>, actor: Option<&String>) {
        let entity = change.entity.as_mut();
        match change.state {
            EntryState::Added => {
                if let Some(audited) = entity.creation_audited_mut() {
                    audited.stamp_creation(now, actor.cloned());
                }
                if let Some(token) = entity.concurrency_safe_mut() {
                    if token.concurrency_stamp().is_empty() {
                        token.set_concurrency_stamp(new_concurrency_stamp());
                    }
                }
            }
            EntryState::Modified => {
                if let Some(audited) = entity.audited_mut() {
                    audited.stamp_modification(now, actor.cloned());
                }
                if let Some(token) = entity.concurrency_safe_mut() {
                    token.set_concurrency_stamp(new_concurrency_stamp());
                }
                let deleted = entity.soft_delete().is_some_and(|s| s.is_deleted());
                if deleted {
                    if let Some(audited) = entity.deletion_audited_mut() {
                        if audited.deletion_time().is_none() {
                            audited.stamp_deletion(now, actor.cloned());
                        }
                    }
                }
            }
            EntryState::Deleted | EntryState::Unchanged => {}
        }
    }
}

impl fmt::Debug for AuditStamper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditStamper").finish_non_exhaustive()
    }
}

#[async_trait]
impl CommitHook for AuditStamper {
    async fn before_commit(&self, changes: &mut [PendingChange]) -> RepositoryResult<()> {
        let now = Utc::now();
        let actor = self.actor.actor_id();
        let mut stamped = 0_usize;
        for change in changes.iter_mut().filter(|c| !c.entity.audit_exempt()) {
            Self::stamp(change, now, actor.as_ref());
            stamped += 1;
        }
        debug!(stamped, actor = actor.as_deref().unwrap_or("-"), "Audit fields stamped");
        Ok(())
    }
}

/// A new opaque concurrency token (32 hex characters)
#[must_use]
pub fn new_concurrency_stamp() -> String {
    Uuid::new_v4().simple().to_string()
}
