//! Read-side types: item listings joined with lookup names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pantry_core::ItemId;

use crate::item::Item;

/// Item fields plus resolved type and substitution names (empty if unset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: ItemId,
    pub name: String,
    pub quantity: i64,
    pub minimum_quantity: i64,
    pub used_to_date: i64,
    pub total_tossed: i64,
    pub expiration_period_days: i64,
    pub type_name: String,
    pub substitution_name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
}

impl ItemView {
    pub fn from_item(item: &Item, type_name: Option<&str>, substitution_name: Option<&str>) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            quantity: item.quantity,
            minimum_quantity: item.minimum_quantity,
            used_to_date: item.used_to_date,
            total_tossed: item.total_tossed,
            expiration_period_days: item.expiration_period_days,
            type_name: type_name.unwrap_or_default().to_string(),
            substitution_name: substitution_name.unwrap_or_default().to_string(),
            created_at: item.created_at,
            last_modified_at: item.last_modified_at,
        }
    }
}

/// Filters for listing items. Results are always ordered by id ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Maximum number of rows; `0` means unlimited.
    pub limit: u32,
    /// Exact match on the resolved type name.
    pub type_name: Option<String>,
    /// Only items with `quantity < minimum_quantity`.
    pub under_minimum_only: bool,
}

impl ListQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn of_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn under_minimum(mut self) -> Self {
        self.under_minimum_only = true;
        self
    }

    pub fn max_rows(&self) -> Option<usize> {
        (self.limit > 0).then_some(self.limit as usize)
    }

    /// Whether a row passes the filters (the limit is applied by the caller).
    pub fn admits(&self, item: &Item, type_name: Option<&str>) -> bool {
        if self.under_minimum_only && !item.is_under_minimum() {
            return false;
        }
        match &self.type_name {
            Some(wanted) => type_name == Some(wanted.as_str()),
            None => true,
        }
    }
}
