//! Lookup entities referenced by items (name-to-id mappings).

use serde::{Deserialize, Serialize};

use pantry_core::{DomainResult, ItemTypeId, SubstitutionId};

use crate::item::validate_name;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemType {
    pub id: ItemTypeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub id: SubstitutionId,
    pub name: String,
}

impl ItemType {
    pub fn validate_name(raw: &str) -> DomainResult<String> {
        validate_name("item type name", raw)
    }
}

impl Substitution {
    pub fn validate_name(raw: &str) -> DomainResult<String> {
        validate_name("substitution name", raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_names_are_trimmed_and_required() {
        assert_eq!(ItemType::validate_name(" Grain ").unwrap(), "Grain");
        assert!(Substitution::validate_name("").is_err());
    }
}
