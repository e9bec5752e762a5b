//! Fixture entities and model shared by the unit tests

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{
    Audited, ConcurrencySafe, CreationAudited, DeletionAudited, Entity, SoftDelete,
};
use crate::model::ModelRegistry;
use crate::repository::UnitOfWork;
use crate::store::MemoryStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub customer: String,
    pub total: i64,
    pub shipping_address: Option<Address>,
    pub is_deleted: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub creator_id: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub modifier_id: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleter_id: Option<String>,
    pub concurrency_stamp: String,
    #[serde(skip)]
    pub lines: Option<Vec<OrderLine>>,
    #[serde(skip)]
    pub tags: Option<Vec<Tag>>,
}

impl Order {
    pub fn new(id: i64, customer: &str) -> Self {
        Self {
            id,
            customer: customer.to_string(),
            total: 0,
            shipping_address: Some(Address {
                street: "1 Main St".to_string(),
                city: "Oslo".to_string(),
            }),
            is_deleted: false,
            created_at: None,
            creator_id: None,
            modified_at: None,
            modifier_id: None,
            deleted_at: None,
            deleter_id: None,
            concurrency_stamp: format!("initial-{id}"),
            lines: None,
            tags: None,
        }
    }

    pub fn with_total(mut self, total: i64) -> Self {
        self.total = total;
        self
    }
}

impl SoftDelete for Order {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

impl CreationAudited for Order {
    fn creator_id(&self) -> Option<&str> {
        self.creator_id.as_deref()
    }

    fn stamp_creation(&mut self, at: DateTime<Utc>, actor: Option<String>) {
        self.created_at = Some(at);
        self.creator_id = actor;
    }
}

impl Audited for Order {
    fn last_modifier_id(&self) -> Option<&str> {
        self.modifier_id.as_deref()
    }

    fn stamp_modification(&mut self, at: DateTime<Utc>, actor: Option<String>) {
        self.modified_at = Some(at);
        self.modifier_id = actor;
    }
}

impl DeletionAudited for Order {
    fn deletion_time(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn deleter_id(&self) -> Option<&str> {
        self.deleter_id.as_deref()
    }

    fn stamp_deletion(&mut self, at: DateTime<Utc>, actor: Option<String>) {
        self.deleted_at = Some(at);
        self.deleter_id = actor;
    }
}

impl ConcurrencySafe for Order {
    fn concurrency_stamp(&self) -> &str {
        &self.concurrency_stamp
    }

    fn set_concurrency_stamp(&mut self, stamp: String) {
        self.concurrency_stamp = stamp;
    }
}

impl Entity for Order {
    type Key = i64;
    const NAME: &'static str = "orders";

    fn id(&self) -> i64 {
        self.id
    }

    fn soft_delete(&self) -> Option<&dyn SoftDelete> {
        Some(self)
    }

    fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
        Some(self)
    }

    fn creation_audited_mut(&mut self) -> Option<&mut dyn CreationAudited> {
        Some(self)
    }

    fn audited_mut(&mut self) -> Option<&mut dyn Audited> {
        Some(self)
    }

    fn deletion_audited_mut(&mut self) -> Option<&mut dyn DeletionAudited> {
        Some(self)
    }

    fn concurrency_safe(&self) -> Option<&dyn ConcurrencySafe> {
        Some(self)
    }

    fn concurrency_safe_mut(&mut self) -> Option<&mut dyn ConcurrencySafe> {
        Some(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub sku: String,
    pub is_deleted: bool,
    #[serde(skip)]
    pub order: Option<Box<Order>>,
    #[serde(skip)]
    pub notes: Option<Vec<LineNote>>,
}

impl OrderLine {
    pub fn new(id: i64, order_id: i64, sku: &str) -> Self {
        Self {
            id,
            order_id,
            sku: sku.to_string(),
            is_deleted: false,
            order: None,
            notes: None,
        }
    }
}

impl SoftDelete for OrderLine {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

impl Entity for OrderLine {
    type Key = i64;
    const NAME: &'static str = "order_lines";

    fn id(&self) -> i64 {
        self.id
    }

    fn soft_delete(&self) -> Option<&dyn SoftDelete> {
        Some(self)
    }

    fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
        Some(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineNote {
    pub id: i64,
    pub line_id: i64,
    pub text: String,
    pub is_deleted: bool,
}

impl LineNote {
    pub fn new(id: i64, line_id: i64, text: &str) -> Self {
        Self {
            id,
            line_id,
            text: text.to_string(),
            is_deleted: false,
        }
    }
}

impl SoftDelete for LineNote {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

impl Entity for LineNote {
    type Key = i64;
    const NAME: &'static str = "line_notes";

    fn id(&self) -> i64 {
        self.id
    }

    fn soft_delete(&self) -> Option<&dyn SoftDelete> {
        Some(self)
    }

    fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
        Some(self)
    }
}

/// Not soft-deletable: cascades leave tags to the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub order_id: Option<i64>,
    pub label: String,
}

impl Tag {
    pub fn new(id: i64, label: &str) -> Self {
        Self {
            id,
            order_id: None,
            label: label.to_string(),
        }
    }

    pub fn on_order(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

impl Entity for Tag {
    type Key = i64;
    const NAME: &'static str = "tags";
    const AUDIT_EXEMPT: bool = true;

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub is_deleted: bool,
    #[serde(skip)]
    pub profile: Option<Box<Profile>>,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            is_deleted: false,
            profile: None,
        }
    }
}

impl SoftDelete for User {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

impl Entity for User {
    type Key = Uuid;
    const NAME: &'static str = "users";

    fn id(&self) -> Uuid {
        self.id
    }

    fn soft_delete(&self) -> Option<&dyn SoftDelete> {
        Some(self)
    }

    fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
        Some(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub user_id: Uuid,
    pub bio: String,
    pub is_deleted: bool,
    #[serde(skip)]
    pub user: Option<Box<User>>,
}

impl Profile {
    pub fn new(id: i64, user_id: Uuid, bio: &str) -> Self {
        Self {
            id,
            user_id,
            bio: bio.to_string(),
            is_deleted: false,
            user: None,
        }
    }
}

impl SoftDelete for Profile {
    fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }
}

impl Entity for Profile {
    type Key = i64;
    const NAME: &'static str = "profiles";

    fn id(&self) -> i64 {
        self.id
    }

    fn soft_delete(&self) -> Option<&dyn SoftDelete> {
        Some(self)
    }

    fn soft_delete_mut(&mut self) -> Option<&mut dyn SoftDelete> {
        Some(self)
    }
}

/// Orders own a shipping address, cascade to lines (and on to notes) and
/// tags; users have a one-to-one profile.
pub fn registry() -> Arc<ModelRegistry> {
    ModelRegistry::builder()
        .entity::<Order>()
        .entity::<OrderLine>()
        .entity::<LineNote>()
        .entity::<Tag>()
        .entity::<User>()
        .entity::<Profile>()
        .owns_one::<Order>("shipping_address")
        .has_many::<Order, OrderLine>("lines", "order_id", |o| &mut o.lines)
        .inverse::<OrderLine, Order>("order", |l| &mut l.order)
        .has_many::<OrderLine, LineNote>("notes", "line_id", |l| &mut l.notes)
        .has_many::<Order, Tag>("tags", "order_id", |o| &mut o.tags)
        .has_one::<User, Profile>("profile", "user_id", |u| &mut u.profile)
        .inverse::<Profile, User>("user", |p| &mut p.user)
        .build()
        .expect("fixture model is valid")
}

/// A memory store wired to the fixture model
pub fn store() -> MemoryStore {
    MemoryStore::with_registry(registry())
}

/// A unit of work over `store` without commit hooks
pub fn unit_of_work(store: MemoryStore) -> Arc<UnitOfWork<MemoryStore>> {
    Arc::new(UnitOfWork::new(store, registry()))
}
