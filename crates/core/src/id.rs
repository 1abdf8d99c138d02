//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers are storage-assigned, positive and strictly increasing in
//! allocation order, so comparing two ids of the same kind tells which row was
//! created first.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an inventory item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(i64);

/// Identifier of a single expiration unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(i64);

/// Identifier of an item type lookup row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemTypeId(i64);

/// Identifier of a substitution lookup row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubstitutionId(i64);

macro_rules! impl_serial_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = i64::from_str(s.trim())
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                if value <= 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must be positive, got {}",
                        $name, value
                    )));
                }
                Ok(Self(value))
            }
        }
    };
}

impl_serial_newtype!(ItemId, "ItemId");
impl_serial_newtype!(UnitId, "UnitId");
impl_serial_newtype!(ItemTypeId, "ItemTypeId");
impl_serial_newtype!(SubstitutionId, "SubstitutionId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids() {
        let id: ItemTypeId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!(matches!("0".parse::<ItemId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("abc".parse::<SubstitutionId>(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn ids_order_by_allocation() {
        assert!(UnitId::new(3) < UnitId::new(7));
    }

    #[test]
    fn get_works_as_a_map_function() {
        let type_id = Some(ItemTypeId::new(5));
        assert_eq!(type_id.map(ItemTypeId::get), Some(5));
        assert_eq!(None::<SubstitutionId>.map(SubstitutionId::get), None);
    }
}
