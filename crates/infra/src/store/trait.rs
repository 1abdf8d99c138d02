use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_stream::Stream;

use pantry_core::ItemId;
use pantry_inventory::{
    CounterDelta, ExpirationUnit, Item, ItemType, ItemView, ListQuery, NewItem, NewUnit, Substitution,
};

/// Lazily consumed, finite, non-restartable listing of items.
pub type ItemViewStream<'a> = Pin<Box<dyn Stream<Item = Result<ItemView, StoreError>> + Send + 'a>>;

/// Storage operation error.
///
/// These are **infrastructure errors** as opposed to domain errors
/// (validation, invariants). The ledger maps them onto its own taxonomy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The item row does not exist (or vanished under a concurrent delete).
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// A unique name constraint was hit.
    #[error("name already exists: {0}")]
    DuplicateName(String),

    /// A foreign reference (type / substitution / item) does not exist.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Fewer active units than requested were available for removal.
    #[error("insufficient units: requested {requested}, removed {removed}")]
    InsufficientUnits { requested: u32, removed: u32 },

    /// The transaction was aborted before it could commit.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Connection, query or driver failure.
    #[error("database error in {operation}: {message}")]
    Database { operation: String, message: String },
}

impl StoreError {
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Persistent inventory store: entry point for transactions and reads.
///
/// ## Isolation
///
/// - Writers on the **same item** are serialized by the row lock taken in
///   [`StoreTx::lock_item_by_name`] (or implicitly by any unit/counter write on
///   that item); the lock is held until commit or rollback.
/// - Writers on **different items** never wait for each other.
/// - Reads never take item locks and observe committed state only.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;

    /// Committed item by name, without locking.
    async fn find_by_name(&self, name: &str) -> Result<Option<Item>, StoreError>;

    /// Committed active units of an item, in retirement order.
    async fn units(&self, item_id: ItemId) -> Result<Vec<ExpirationUnit>, StoreError>;

    /// Items joined with lookup names, filtered, ordered by id ascending.
    fn list_items(&self, query: ListQuery) -> ItemViewStream<'_>;

    /// All item types ordered by name.
    async fn item_types(&self) -> Result<Vec<ItemType>, StoreError>;

    /// All substitutions ordered by name.
    async fn substitutions(&self) -> Result<Vec<Substitution>, StoreError>;
}

/// A single write transaction spanning items, units and lookups.
#[async_trait]
pub trait StoreTx: Send {
    /// Load the item and take its row lock for the rest of the transaction.
    async fn lock_item_by_name(&mut self, name: &str) -> Result<Option<Item>, StoreError>;

    /// Insert a new item row with zeroed cumulative counters.
    ///
    /// Fails with `DuplicateName` if the name is taken and `InvalidReference`
    /// if a lookup id does not exist.
    async fn create_item(&mut self, new: &NewItem, at: DateTime<Utc>) -> Result<Item, StoreError>;

    /// Create `count` copies of `unit`, each with its own id.
    async fn add_units(&mut self, unit: NewUnit, count: u32) -> Result<Vec<ExpirationUnit>, StoreError>;

    /// Delete the `count` earliest-expiring units (ties: smallest id).
    ///
    /// If fewer are available, all of them are removed and
    /// `InsufficientUnits` is returned; the caller must then abandon the
    /// transaction.
    async fn remove_oldest(&mut self, item_id: ItemId, count: u32) -> Result<Vec<ExpirationUnit>, StoreError>;

    /// Active unit count as seen by this transaction.
    async fn count_active(&mut self, item_id: ItemId) -> Result<i64, StoreError>;

    /// Adjust the three counters and stamp `last_modified_at`.
    async fn apply_delta(
        &mut self,
        item_id: ItemId,
        delta: CounterDelta,
        at: DateTime<Utc>,
    ) -> Result<Item, StoreError>;

    async fn create_item_type(&mut self, name: &str) -> Result<ItemType, StoreError>;

    async fn create_substitution(&mut self, name: &str) -> Result<Substitution, StoreError>;

    /// Durably apply every staged change.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every staged change. Dropping the transaction has the same effect.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        (**self).begin().await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Item>, StoreError> {
        (**self).find_by_name(name).await
    }

    async fn units(&self, item_id: ItemId) -> Result<Vec<ExpirationUnit>, StoreError> {
        (**self).units(item_id).await
    }

    fn list_items(&self, query: ListQuery) -> ItemViewStream<'_> {
        (**self).list_items(query)
    }

    async fn item_types(&self) -> Result<Vec<ItemType>, StoreError> {
        (**self).item_types().await
    }

    async fn substitutions(&self) -> Result<Vec<Substitution>, StoreError> {
        (**self).substitutions().await
    }
}
