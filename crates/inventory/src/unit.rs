//! Expiration units: one dated row per physical unit of stock.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use pantry_core::{DomainError, DomainResult, ItemId, UnitId};

/// A single unit of stock owned by exactly one item.
///
/// `expires_at` is frozen when the unit is added; later changes to the item
/// never move it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationUnit {
    pub id: UnitId,
    pub item_id: ItemId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ExpirationUnit {
    /// Sort key for retirement: earliest `expires_at` first, then smallest id.
    pub fn retirement_key(&self) -> (DateTime<Utc>, UnitId) {
        (self.expires_at, self.id)
    }
}

/// A unit about to be inserted (id not yet assigned).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NewUnit {
    pub item_id: ItemId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewUnit {
    /// Fails with `Validation` when the expiry is not representable.
    pub fn stamped(item_id: ItemId, expiration_period_days: i64, at: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            item_id,
            created_at: at,
            expires_at: expires_at(at, expiration_period_days)?,
        })
    }

    pub fn with_id(self, id: UnitId) -> ExpirationUnit {
        ExpirationUnit {
            id,
            item_id: self.item_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Expiry of a unit added at `created_at` for an item with the given period.
pub fn expires_at(created_at: DateTime<Utc>, expiration_period_days: i64) -> DomainResult<DateTime<Utc>> {
    TimeDelta::try_days(expiration_period_days)
        .and_then(|period| created_at.checked_add_signed(period))
        .ok_or_else(|| {
            DomainError::validation(format!(
                "expiration period of {expiration_period_days} days is out of range"
            ))
        })
}

/// Order units the way they will be retired.
pub fn sort_for_retirement(units: &mut [ExpirationUnit]) {
    units.sort_by_key(ExpirationUnit::retirement_key);
}

/// Remove and return up to `count` units in retirement order.
///
/// The returned vector is shorter than `count` only when `units` runs out.
pub fn take_oldest(units: &mut Vec<ExpirationUnit>, count: usize) -> Vec<ExpirationUnit> {
    sort_for_retirement(units);
    let n = count.min(units.len());
    units.drain(..n).collect()
}
