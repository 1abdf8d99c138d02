use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pantry_core::{DomainError, DomainResult, ItemId, ItemTypeId, SubstitutionId};

/// Longest accepted item or lookup name (matches the `VARCHAR(255)` columns).
pub const MAX_NAME_LEN: usize = 255;

/// Longest accepted shelf life, one hundred years.
pub const MAX_EXPIRATION_PERIOD_DAYS: i64 = 36_500;

/// Aggregate root: an inventory item and its cached counters.
///
/// `quantity` caches the number of active expiration units owned by the item;
/// the two must agree after every completed ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub quantity: i64,
    pub minimum_quantity: i64,
    pub used_to_date: i64,
    pub total_tossed: i64,
    pub type_id: Option<ItemTypeId>,
    pub substitution_id: Option<SubstitutionId>,
    pub expiration_period_days: i64,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl Item {
    /// Materialize a freshly inserted item from its validated creation request.
    ///
    /// Counters start at zero; `quantity` is the initial stock the caller is
    /// about to back with units in the same transaction.
    pub fn from_new(id: ItemId, new: &NewItem, at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name.clone(),
            quantity: new.quantity,
            minimum_quantity: new.minimum_quantity,
            used_to_date: 0,
            total_tossed: 0,
            type_id: new.type_id,
            substitution_id: new.substitution_id,
            expiration_period_days: new.expiration_period_days,
            created_at: at,
            last_modified_at: at,
        }
    }

    pub fn is_under_minimum(&self) -> bool {
        self.quantity < self.minimum_quantity
    }

    pub fn has_stock(&self) -> bool {
        self.quantity > 0
    }

    /// Apply a counter delta and stamp `last_modified_at`.
    ///
    /// Rejects deltas that would take quantity below zero or move a cumulative
    /// counter backwards. On error `self` is left untouched.
    pub fn apply_delta(&mut self, delta: CounterDelta, at: DateTime<Utc>) -> DomainResult<()> {
        let next = delta.applied_to(self)?;
        self.quantity = next.0;
        self.used_to_date = next.1;
        self.total_tossed = next.2;
        self.last_modified_at = at;
        Ok(())
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            id: self.id,
            name: self.name.clone(),
            quantity: self.quantity,
            used_to_date: self.used_to_date,
        }
    }

    pub fn dispose_snapshot(&self) -> DisposeSnapshot {
        DisposeSnapshot {
            total_tossed: self.total_tossed,
            quantity: self.quantity,
        }
    }
}

/// Item creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub quantity: i64,
    pub minimum_quantity: i64,
    pub expiration_period_days: i64,
    pub type_id: Option<ItemTypeId>,
    pub substitution_id: Option<SubstitutionId>,
}

impl NewItem {
    /// Validate required fields and normalize the name (surrounding
    /// whitespace is not part of an item's identity).
    pub fn validated(mut self) -> DomainResult<Self> {
        self.name = validate_name("item name", &self.name)?;
        if self.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        if self.minimum_quantity < 0 {
            return Err(DomainError::validation("minimum quantity cannot be negative"));
        }
        if self.expiration_period_days < 0 {
            return Err(DomainError::validation("expiration period cannot be negative"));
        }
        if self.expiration_period_days > MAX_EXPIRATION_PERIOD_DAYS {
            return Err(DomainError::validation(format!(
                "expiration period cannot exceed {MAX_EXPIRATION_PERIOD_DAYS} days"
            )));
        }
        Ok(self)
    }
}

pub(crate) fn validate_name(what: &str, raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation(format!("{what} cannot be empty")));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "{what} cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Adjustment of an item's three counters, applied atomically.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterDelta {
    pub quantity: i64,
    pub used: i64,
    pub tossed: i64,
}

impl CounterDelta {
    pub fn restock(count: u32) -> Self {
        Self {
            quantity: i64::from(count),
            used: 0,
            tossed: 0,
        }
    }

    pub fn consume() -> Self {
        Self {
            quantity: -1,
            used: 1,
            tossed: 0,
        }
    }

    pub fn dispose() -> Self {
        Self {
            quantity: -1,
            used: 0,
            tossed: 1,
        }
    }

    /// Resulting `(quantity, used_to_date, total_tossed)` if applied to `item`.
    pub fn applied_to(&self, item: &Item) -> DomainResult<(i64, i64, i64)> {
        if self.used < 0 || self.tossed < 0 {
            return Err(DomainError::invariant("cumulative counters cannot decrease"));
        }
        let overflow = || DomainError::invariant("counter overflow");
        let quantity = item.quantity.checked_add(self.quantity).ok_or_else(overflow)?;
        let used = item.used_to_date.checked_add(self.used).ok_or_else(overflow)?;
        let tossed = item.total_tossed.checked_add(self.tossed).ok_or_else(overflow)?;
        if quantity < 0 {
            return Err(DomainError::invariant("stock cannot go negative"));
        }
        Ok((quantity, used, tossed))
    }
}

/// Kind of ledger mutation applied to an existing item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOp {
    Restock { count: u32 },
    Consume,
    Dispose,
}

impl LedgerOp {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerOp::Restock { .. } => "restock",
            LedgerOp::Consume => "consume",
            LedgerOp::Dispose => "dispose",
        }
    }

    pub fn delta(&self) -> CounterDelta {
        match self {
            LedgerOp::Restock { count } => CounterDelta::restock(*count),
            LedgerOp::Consume => CounterDelta::consume(),
            LedgerOp::Dispose => CounterDelta::dispose(),
        }
    }

    /// Number of units this operation retires (oldest-expiring first).
    pub fn units_retired(&self) -> usize {
        match self {
            LedgerOp::Restock { .. } => 0,
            LedgerOp::Consume | LedgerOp::Dispose => 1,
        }
    }

    /// Decide whether the operation may run against `item` in its current state.
    pub fn check(&self, item: &Item) -> DomainResult<()> {
        match self {
            LedgerOp::Restock { count } if *count == 0 => {
                Err(DomainError::validation("restock count must be at least 1"))
            }
            LedgerOp::Restock { .. } => Ok(()),
            LedgerOp::Consume | LedgerOp::Dispose if !item.has_stock() => {
                Err(DomainError::InsufficientStock)
            }
            LedgerOp::Consume | LedgerOp::Dispose => Ok(()),
        }
    }
}

impl core::fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result payload of Restock and Consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: ItemId,
    pub name: String,
    pub quantity: i64,
    pub used_to_date: i64,
}

/// Result payload of Dispose.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisposeSnapshot {
    pub total_tossed: i64,
    pub quantity: i64,
}
