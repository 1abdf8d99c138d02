use std::str::FromStr;

use serde::Deserialize;

use pantry_core::{ItemTypeId, SubstitutionId};
use pantry_inventory::{DisposeSnapshot, ItemSnapshot, ItemType, ItemView, ListQuery, NewItem, Substitution};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------
//
// Form fields arrive as text and are parsed here so malformed numbers get the
// same JSON error body as every other validation failure.

#[derive(Debug, Default, Deserialize)]
pub struct AddItemForm {
    #[serde(rename = "itemName", default)]
    pub item_name: String,
    #[serde(rename = "itemQTY", default)]
    pub item_qty: String,
    #[serde(rename = "minimumQTY", default)]
    pub minimum_qty: String,
    #[serde(rename = "itemExpirationPeriod", default)]
    pub expiration_period: String,
    #[serde(rename = "itemTypeID", default)]
    pub item_type_id: Option<String>,
    #[serde(rename = "itemSubstitutionID", default)]
    pub item_substitution_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateItemForm {
    #[serde(rename = "itemName", default)]
    pub item_name: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DisposeItemForm {
    #[serde(rename = "itemName", default)]
    pub item_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupForm {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListItemsParams {
    pub limit: Option<u32>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub under_minimum: Option<bool>,
}

/// `+` restocks one unit, `-` consumes one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpdateAction {
    Restock,
    Consume,
}

impl UpdateItemForm {
    pub fn parse_action(&self) -> Result<UpdateAction, axum::response::Response> {
        match self.action.trim() {
            "+" => Ok(UpdateAction::Restock),
            "-" => Ok(UpdateAction::Consume),
            other => Err(errors::bad_request(format!(
                "action must be '+' or '-', got '{other}'"
            ))),
        }
    }
}

impl AddItemForm {
    pub fn into_new_item(self) -> Result<NewItem, axum::response::Response> {
        Ok(NewItem {
            quantity: parse_int("itemQTY", &self.item_qty)?,
            minimum_quantity: parse_int("minimumQTY", &self.minimum_qty)?,
            expiration_period_days: parse_int("itemExpirationPeriod", &self.expiration_period)?,
            type_id: parse_optional_id::<ItemTypeId>("itemTypeID", self.item_type_id.as_deref())?,
            substitution_id: parse_optional_id::<SubstitutionId>(
                "itemSubstitutionID",
                self.item_substitution_id.as_deref(),
            )?,
            name: self.item_name,
        })
    }
}

impl ListItemsParams {
    pub fn into_query(self) -> ListQuery {
        let mut query = ListQuery::all().with_limit(self.limit.unwrap_or(0));
        if let Some(t) = self.item_type.filter(|t| !t.trim().is_empty()) {
            query = query.of_type(t.trim());
        }
        if self.under_minimum.unwrap_or(false) {
            query = query.under_minimum();
        }
        query
    }
}

fn parse_int(field: &str, raw: &str) -> Result<i64, axum::response::Response> {
    raw.trim()
        .parse()
        .map_err(|_| errors::bad_request(format!("{field} must be an integer, got '{raw}'")))
}

/// Empty and `0` mean "not set".
fn parse_optional_id<T>(field: &str, raw: Option<&str>) -> Result<Option<T>, axum::response::Response>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.map(str::trim) {
        None | Some("") | Some("0") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| errors::bad_request(format!("{field}: {e}"))),
    }
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn item_view_to_json(view: ItemView) -> serde_json::Value {
    serde_json::json!({
        "id": view.id.get(),
        "itemName": view.name,
        "itemQTY": view.quantity,
        "minimumQTY": view.minimum_quantity,
        "itemUsedToDate": view.used_to_date,
        "itemTotalTossed": view.total_tossed,
        "itemExpirationPeriod": view.expiration_period_days,
        "itemTypeName": view.type_name,
        "itemSubstitutionName": view.substitution_name,
        "createDate": view.created_at.to_rfc3339(),
        "lastModifiedDate": view.last_modified_at.to_rfc3339(),
    })
}

pub fn item_snapshot_to_json(snap: ItemSnapshot) -> serde_json::Value {
    serde_json::json!({
        "id": snap.id.get(),
        "itemName": snap.name,
        "itemQTY": snap.quantity,
        "itemUsedToDate": snap.used_to_date,
    })
}

pub fn dispose_snapshot_to_json(snap: DisposeSnapshot) -> serde_json::Value {
    serde_json::json!({
        "itemTotalTossed": snap.total_tossed,
        "itemQTY": snap.quantity,
    })
}

pub fn item_type_to_json(t: ItemType) -> serde_json::Value {
    serde_json::json!({
        "id": t.id.get(),
        "name": t.name,
    })
}

pub fn substitution_to_json(s: Substitution) -> serde_json::Value {
    serde_json::json!({
        "id": s.id.get(),
        "name": s.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(qty: &str, type_id: Option<&str>) -> AddItemForm {
        AddItemForm {
            item_name: "Rice".to_string(),
            item_qty: qty.to_string(),
            minimum_qty: "2".to_string(),
            expiration_period: "30".to_string(),
            item_type_id: type_id.map(str::to_string),
            item_substitution_id: Some(String::new()),
        }
    }

    #[test]
    fn add_form_parses_numbers_and_optional_ids() {
        let new = form(" 5 ", Some("3")).into_new_item().unwrap();
        assert_eq!(new.quantity, 5);
        assert_eq!(new.type_id, Some(ItemTypeId::new(3)));
        assert_eq!(new.substitution_id, None);

        let unset = form("1", Some("0")).into_new_item().unwrap();
        assert_eq!(unset.type_id, None);
    }

    #[test]
    fn add_form_rejects_malformed_values() {
        assert!(form("five", None).into_new_item().is_err());
        assert!(form("5", Some("-2")).into_new_item().is_err());
    }

    #[test]
    fn update_action_is_plus_or_minus() {
        let mut f = UpdateItemForm {
            item_name: "Rice".to_string(),
            action: "+".to_string(),
        };
        assert_eq!(f.parse_action().unwrap(), UpdateAction::Restock);
        f.action = "-".to_string();
        assert_eq!(f.parse_action().unwrap(), UpdateAction::Consume);
        f.action = "*".to_string();
        assert!(f.parse_action().is_err());
    }

    #[test]
    fn list_params_map_to_query() {
        let q = ListItemsParams {
            limit: Some(3),
            item_type: Some(" Canned ".to_string()),
            under_minimum: Some(true),
        }
        .into_query();
        assert_eq!(q, ListQuery::all().with_limit(3).of_type("Canned").under_minimum());

        assert_eq!(ListItemsParams::default().into_query(), ListQuery::all());
    }
}
