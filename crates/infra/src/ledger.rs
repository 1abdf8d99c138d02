//! Ledger operations: the only writers of items and expiration units.
//!
//! Every mutation runs inside one store transaction. The item row is locked
//! before its quantity is read, the unit change and the counter change are
//! staged together, and nothing is applied unless `commit` is reached. An
//! early return drops the transaction, which discards the staged changes.

use std::pin::Pin;

use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, instrument};

use pantry_core::{Clock, DomainError, ItemId, SystemClock};
use pantry_inventory::{
    DisposeSnapshot, ExpirationUnit, Item, ItemSnapshot, ItemType, ItemView, LedgerOp, ListQuery, NewItem,
    NewUnit, Substitution,
};

use crate::store::{InventoryStore, StoreError, StoreTx};

/// Ledger operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("item not found: {0}")]
    NotFound(String),

    #[error("name already exists: {0}")]
    DuplicateName(String),

    #[error("insufficient stock for item: {0}")]
    InsufficientStock(String),

    /// The cached quantity and the unit fleet disagree. Never repaired here.
    #[error("consistency violation for item {item}: {detail}")]
    Consistency { item: String, detail: String },

    #[error("validation failed: {0}")]
    Validation(String),

    /// The whole operation rolled back and may be retried.
    #[error("storage failure during {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

impl LedgerError {
    /// Errors caused by the request rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound(_)
                | LedgerError::DuplicateName(_)
                | LedgerError::InsufficientStock(_)
                | LedgerError::Validation(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage { .. })
    }

    fn from_store(op: &'static str, item: &str, err: StoreError) -> Self {
        match err {
            StoreError::ItemNotFound(_) => LedgerError::NotFound(item.to_string()),
            StoreError::DuplicateName(name) => LedgerError::DuplicateName(name),
            StoreError::InvalidReference(what) => LedgerError::Validation(format!("unknown {what}")),
            StoreError::InsufficientUnits { requested, removed } => LedgerError::Consistency {
                item: item.to_string(),
                detail: format!("requested {requested} units, found {removed}"),
            },
            source @ (StoreError::Aborted(_) | StoreError::Database { .. }) => {
                LedgerError::Storage { op, source }
            }
        }
    }

    fn from_domain(item: &str, err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::InsufficientStock => LedgerError::InsufficientStock(item.to_string()),
            DomainError::InvariantViolation(detail) => LedgerError::Consistency {
                item: item.to_string(),
                detail,
            },
        }
    }
}

/// Stream of listed items with errors already mapped.
pub type LedgerViewStream<'a> = Pin<Box<dyn Stream<Item = Result<ItemView, LedgerError>> + Send + 'a>>;

/// Entry point for all inventory mutations and reads.
///
/// Holds the storage handle and the clock explicitly; there is no global
/// connection state.
#[derive(Debug, Clone)]
pub struct Ledger<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S> Ledger<S, SystemClock>
where
    S: InventoryStore,
{
    pub fn with_system_clock(store: S) -> Self {
        Self::new(store, SystemClock)
    }
}

impl<S, C> Ledger<S, C>
where
    S: InventoryStore,
    C: Clock,
{
    pub fn new(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// Create an item and back its initial quantity with units, atomically.
    #[instrument(skip(self, new), fields(item = %new.name), err)]
    pub async fn add(&self, new: NewItem) -> Result<ItemId, LedgerError> {
        let new = new
            .validated()
            .map_err(|e| LedgerError::from_domain("", e))?;
        let name = new.name.clone();
        let count = u32::try_from(new.quantity)
            .map_err(|_| LedgerError::Validation(format!("quantity {} is too large", new.quantity)))?;

        let now = self.clock.now();
        let mut tx = self.begin("add", &name).await?;
        let item = tx
            .create_item(&new, now)
            .await
            .map_err(|e| LedgerError::from_store("create_item", &name, e))?;
        let unit = NewUnit::stamped(item.id, item.expiration_period_days, now)
            .map_err(|e| LedgerError::from_domain(&name, e))?;
        tx.add_units(unit, count)
            .await
            .map_err(|e| LedgerError::from_store("add_units", &name, e))?;
        tx.commit()
            .await
            .map_err(|e| LedgerError::from_store("commit", &name, e))?;

        info!(item_id = %item.id, quantity = item.quantity, "item added");
        Ok(item.id)
    }

    /// Add `count` units to an existing item.
    pub async fn restock(&self, name: &str, count: u32) -> Result<ItemSnapshot, LedgerError> {
        self.apply(name, LedgerOp::Restock { count })
            .await
            .map(|item| item.snapshot())
    }

    /// Use the earliest-expiring unit.
    pub async fn consume(&self, name: &str) -> Result<ItemSnapshot, LedgerError> {
        self.apply(name, LedgerOp::Consume)
            .await
            .map(|item| item.snapshot())
    }

    /// Toss the earliest-expiring unit.
    pub async fn dispose(&self, name: &str) -> Result<DisposeSnapshot, LedgerError> {
        self.apply(name, LedgerOp::Dispose)
            .await
            .map(|item| item.dispose_snapshot())
    }

    /// Run one ledger operation as a single transaction and return the
    /// updated item.
    #[instrument(skip(self, op), fields(item = %name, op = op.name()), err)]
    pub async fn apply(&self, name: &str, op: LedgerOp) -> Result<Item, LedgerError> {
        let name = name.trim();
        let mut tx = self.begin(op.name(), name).await?;

        let item = tx
            .lock_item_by_name(name)
            .await
            .map_err(|e| LedgerError::from_store("lock_item", name, e))?
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))?;

        if let Err(e) = op.check(&item) {
            let err = LedgerError::from_domain(name, e);
            if matches!(err, LedgerError::InsufficientStock(_)) {
                debug!(item_id = %item.id, quantity = item.quantity, "rejected: no stock");
            }
            return Err(err);
        }

        let now = self.clock.now();
        match op {
            LedgerOp::Restock { count } => {
                let unit = NewUnit::stamped(item.id, item.expiration_period_days, now)
                    .map_err(|e| LedgerError::from_domain(name, e))?;
                tx.add_units(unit, count)
                    .await
                    .map_err(|e| LedgerError::from_store("add_units", name, e))?;
            }
            LedgerOp::Consume | LedgerOp::Dispose => {
                let wanted = op.units_retired() as u32;
                match tx.remove_oldest(item.id, wanted).await {
                    Ok(_) => {}
                    Err(StoreError::InsufficientUnits { requested, removed }) => {
                        error!(
                            item_id = %item.id,
                            quantity = item.quantity,
                            units_found = removed,
                            "cached quantity has no backing units"
                        );
                        tx.rollback()
                            .await
                            .map_err(|e| LedgerError::from_store("rollback", name, e))?;
                        return Err(LedgerError::Consistency {
                            item: name.to_string(),
                            detail: format!(
                                "quantity {} but only {removed} of {requested} units available",
                                item.quantity
                            ),
                        });
                    }
                    Err(e) => return Err(LedgerError::from_store("remove_oldest", name, e)),
                }
            }
        }

        let updated = tx
            .apply_delta(item.id, op.delta(), now)
            .await
            .map_err(|e| LedgerError::from_store("apply_delta", name, e))?;
        tx.commit()
            .await
            .map_err(|e| LedgerError::from_store("commit", name, e))?;

        info!(
            item_id = %updated.id,
            quantity = updated.quantity,
            used_to_date = updated.used_to_date,
            total_tossed = updated.total_tossed,
            "{op} applied"
        );
        Ok(updated)
    }

    /// Items ordered by id, filtered per `query`.
    pub fn list(&self, query: ListQuery) -> LedgerViewStream<'_> {
        Box::pin(
            self.store
                .list_items(query)
                .map(|row| row.map_err(|e| LedgerError::from_store("list_items", "", e))),
        )
    }

    pub async fn item(&self, name: &str) -> Result<Item, LedgerError> {
        let name = name.trim();
        self.store
            .find_by_name(name)
            .await
            .map_err(|e| LedgerError::from_store("find_by_name", name, e))?
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))
    }

    /// Active units of the item in the order they will be retired.
    pub async fn units(&self, name: &str) -> Result<Vec<ExpirationUnit>, LedgerError> {
        let item = self.item(name).await?;
        self.store
            .units(item.id)
            .await
            .map_err(|e| LedgerError::from_store("units", name, e))
    }

    /// Compare the cached quantity with the unit fleet. Read-only.
    #[instrument(skip(self), fields(item = %name), err)]
    pub async fn verify(&self, name: &str) -> Result<Item, LedgerError> {
        let name = name.trim();
        let mut tx = self.begin("verify", name).await?;
        let item = tx
            .lock_item_by_name(name)
            .await
            .map_err(|e| LedgerError::from_store("lock_item", name, e))?
            .ok_or_else(|| LedgerError::NotFound(name.to_string()))?;
        let active = tx
            .count_active(item.id)
            .await
            .map_err(|e| LedgerError::from_store("count_active", name, e))?;
        tx.rollback()
            .await
            .map_err(|e| LedgerError::from_store("rollback", name, e))?;

        if active != item.quantity {
            error!(item_id = %item.id, quantity = item.quantity, units_found = active, "quantity diverged from units");
            return Err(LedgerError::Consistency {
                item: name.to_string(),
                detail: format!("quantity {} but {active} active units", item.quantity),
            });
        }
        Ok(item)
    }

    #[instrument(skip(self), err)]
    pub async fn create_item_type(&self, name: &str) -> Result<ItemType, LedgerError> {
        let name = ItemType::validate_name(name).map_err(|e| LedgerError::from_domain(name, e))?;
        let mut tx = self.begin("create_item_type", &name).await?;
        let item_type = tx
            .create_item_type(&name)
            .await
            .map_err(|e| LedgerError::from_store("create_item_type", &name, e))?;
        tx.commit()
            .await
            .map_err(|e| LedgerError::from_store("commit", &name, e))?;
        info!(type_id = %item_type.id, name = %item_type.name, "item type created");
        Ok(item_type)
    }

    #[instrument(skip(self), err)]
    pub async fn create_substitution(&self, name: &str) -> Result<Substitution, LedgerError> {
        let name = Substitution::validate_name(name).map_err(|e| LedgerError::from_domain(name, e))?;
        let mut tx = self.begin("create_substitution", &name).await?;
        let substitution = tx
            .create_substitution(&name)
            .await
            .map_err(|e| LedgerError::from_store("create_substitution", &name, e))?;
        tx.commit()
            .await
            .map_err(|e| LedgerError::from_store("commit", &name, e))?;
        info!(substitution_id = %substitution.id, name = %substitution.name, "substitution created");
        Ok(substitution)
    }

    pub async fn item_types(&self) -> Result<Vec<ItemType>, LedgerError> {
        self.store
            .item_types()
            .await
            .map_err(|e| LedgerError::from_store("item_types", "", e))
    }

    pub async fn substitutions(&self) -> Result<Vec<Substitution>, LedgerError> {
        self.store
            .substitutions()
            .await
            .map_err(|e| LedgerError::from_store("substitutions", "", e))
    }

    async fn begin(&self, op: &'static str, item: &str) -> Result<Box<dyn StoreTx + '_>, LedgerError> {
        self.store
            .begin()
            .await
            .map_err(|e| LedgerError::from_store(op, item, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryInventoryStore;
    use chrono::{TimeZone, Utc};
    use pantry_core::{ItemTypeId, ManualClock};
    use std::sync::Arc;

    fn ledger() -> Ledger<InMemoryInventoryStore, Arc<ManualClock>> {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        Ledger::new(InMemoryInventoryStore::new(), clock)
    }

    fn new_item(name: &str, quantity: i64) -> NewItem {
        NewItem {
            name: name.to_string(),
            quantity,
            minimum_quantity: 1,
            expiration_period_days: 14,
            type_id: None,
            substitution_id: None,
        }
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(LedgerError::NotFound("x".into()).is_client_error());
        assert!(LedgerError::InsufficientStock("x".into()).is_client_error());
        assert!(LedgerError::Validation("x".into()).is_client_error());
        let consistency = LedgerError::Consistency {
            item: "x".into(),
            detail: "d".into(),
        };
        assert!(!consistency.is_client_error());
        assert!(!consistency.is_retryable());

        let storage = LedgerError::from_store("commit", "x", StoreError::database("commit", "gone"));
        assert!(!storage.is_client_error());
        assert!(storage.is_retryable());
    }

    #[test]
    fn domain_errors_keep_their_meaning() {
        assert_eq!(
            LedgerError::from_domain("Tea", DomainError::InsufficientStock),
            LedgerError::InsufficientStock("Tea".to_string())
        );
        let overflow = LedgerError::from_domain("Tea", DomainError::invariant("counter overflow"));
        assert_eq!(
            overflow,
            LedgerError::Consistency {
                item: "Tea".to_string(),
                detail: "counter overflow".to_string(),
            }
        );
        assert!(!overflow.is_client_error());
    }

    #[tokio::test]
    async fn huge_expiration_period_is_rejected() {
        let ledger = ledger();
        let mut forever = new_item("Salt", 1);
        forever.expiration_period_days = 1_000_000_000_000;
        assert!(matches!(ledger.add(forever).await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.item("Salt").await, Err(LedgerError::NotFound(_))));

        let mut max = new_item("Salt", 1);
        max.expiration_period_days = i64::MAX;
        assert!(matches!(ledger.add(max).await, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let ledger = ledger();
        assert_eq!(
            ledger.consume("Nothing").await.unwrap_err(),
            LedgerError::NotFound("Nothing".to_string())
        );
        assert!(matches!(ledger.restock("Nothing", 1).await, Err(LedgerError::NotFound(_))));
        assert!(matches!(ledger.item("Nothing").await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn restock_of_zero_is_rejected() {
        let ledger = ledger();
        ledger.add(new_item("Jam", 1)).await.unwrap();
        assert!(matches!(ledger.restock("Jam", 0).await, Err(LedgerError::Validation(_))));
        assert_eq!(ledger.item("Jam").await.unwrap().quantity, 1);
    }

    #[tokio::test]
    async fn add_rejects_bad_input_without_creating_anything() {
        let ledger = ledger();
        assert!(matches!(ledger.add(new_item("  ", 1)).await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.add(new_item("Eggs", -1)).await, Err(LedgerError::Validation(_))));

        let mut bad_ref = new_item("Eggs", 2);
        bad_ref.type_id = Some(ItemTypeId::new(42));
        assert!(matches!(ledger.add(bad_ref).await, Err(LedgerError::Validation(_))));
        assert!(matches!(ledger.item("Eggs").await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn names_are_trimmed_on_add_and_lookup() {
        let ledger = ledger();
        ledger.add(new_item("  Pasta ", 2)).await.unwrap();
        let snap = ledger.consume(" Pasta").await.unwrap();
        assert_eq!(snap.name, "Pasta");
        assert_eq!(snap.quantity, 1);
    }

    #[tokio::test]
    async fn lookups_are_listed_by_name_and_unique() {
        let ledger = ledger();
        ledger.create_item_type("Produce").await.unwrap();
        ledger.create_item_type("Dairy").await.unwrap();
        assert_eq!(
            ledger.create_item_type("Dairy").await.unwrap_err(),
            LedgerError::DuplicateName("Dairy".to_string())
        );
        ledger.create_substitution("Oat milk").await.unwrap();

        let names: Vec<_> = ledger
            .item_types()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["Dairy", "Produce"]);
        assert_eq!(ledger.substitutions().await.unwrap().len(), 1);
    }
}
