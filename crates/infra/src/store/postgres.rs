//! Postgres-backed inventory store.
//!
//! ## Locking
//!
//! Ledger writers take the item row lock with `SELECT ... FOR UPDATE` and keep
//! it until the transaction ends, so operations on one item are serialized
//! while different items proceed in parallel. Unit removal additionally locks
//! the selected unit rows before deleting them.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |-----------------------|------------|----------|
//! | `23505` | `DuplicateName` | Unique name already taken |
//! | `23503` | `InvalidReference` | Unknown item type / substitution / item |
//! | `23514` | `Database` | Check constraint (e.g. negative quantity) |
//! | Any other | `Database` | Connection failures, timeouts, etc. |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio_stream::StreamExt;
use tracing::{Span, field, instrument};

use pantry_core::{ItemId, ItemTypeId, SubstitutionId, UnitId};
use pantry_inventory::unit::sort_for_retirement;
use pantry_inventory::{
    CounterDelta, ExpirationUnit, Item, ItemType, ItemView, ListQuery, NewItem, NewUnit, Substitution,
};

use super::r#trait::{InventoryStore, ItemViewStream, StoreError, StoreTx};

const ITEM_COLUMNS: &str = "id, name, quantity, minimum_quantity, used_to_date, total_tossed, \
     type_id, substitution_id, expiration_period_days, created_at, last_modified_at";

/// Postgres-backed inventory store.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: Arc<PgPool>,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    #[instrument(skip(self), fields(operation = field::Empty), err)]
    async fn find_by_name(&self, name: &str) -> Result<Option<Item>, StoreError> {
        Span::current().record("operation", "find_by_name");

        let sql = format!("SELECT {ITEM_COLUMNS} FROM item WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_name", e))?;

        row.map(|r| decode_item(&r)).transpose()
    }

    #[instrument(skip(self), fields(item_id = %item_id, operation = field::Empty), err)]
    async fn units(&self, item_id: ItemId) -> Result<Vec<ExpirationUnit>, StoreError> {
        Span::current().record("operation", "units");

        let rows = sqlx::query(
            r#"
            SELECT id, item_id, created_at, expires_at
            FROM expiration_unit
            WHERE item_id = $1
            ORDER BY expires_at ASC, id ASC
            "#,
        )
        .bind(item_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("units", e))?;

        rows.iter().map(decode_unit).collect()
    }

    fn list_items(&self, query: ListQuery) -> ItemViewStream<'_> {
        let limit = query.max_rows().map(|n| n as i64);

        let rows = sqlx::query(
            r#"
            SELECT
                i.id, i.name, i.quantity, i.minimum_quantity, i.used_to_date,
                i.total_tossed, i.expiration_period_days, i.created_at,
                i.last_modified_at,
                COALESCE(t.name, '') AS type_name,
                COALESCE(s.name, '') AS substitution_name
            FROM item i
            LEFT JOIN item_type t ON t.id = i.type_id
            LEFT JOIN item_substitution s ON s.id = i.substitution_id
            WHERE ($1::text IS NULL OR t.name = $1)
                AND (NOT $2 OR i.quantity < i.minimum_quantity)
            ORDER BY i.id ASC
            LIMIT $3
            "#,
        )
        .bind(query.type_name)
        .bind(query.under_minimum_only)
        .bind(limit)
        .fetch(&*self.pool);

        Box::pin(rows.map(|row| {
            let row = row.map_err(|e| map_sqlx_error("list_items", e))?;
            ItemViewRow::from_row(&row)
                .map(ItemView::from)
                .map_err(|e| decode_error("item view", e))
        }))
    }

    #[instrument(skip(self), err)]
    async fn item_types(&self) -> Result<Vec<ItemType>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM item_type ORDER BY name ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("item_types", e))?;

        rows.iter()
            .map(|r| -> Result<ItemType, StoreError> {
                Ok(ItemType {
                    id: ItemTypeId::new(r.try_get("id").map_err(|e| decode_error("item type", e))?),
                    name: r.try_get("name").map_err(|e| decode_error("item type", e))?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn substitutions(&self) -> Result<Vec<Substitution>, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM item_substitution ORDER BY name ASC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("substitutions", e))?;

        rows.iter()
            .map(|r| -> Result<Substitution, StoreError> {
                Ok(Substitution {
                    id: SubstitutionId::new(r.try_get("id").map_err(|e| decode_error("substitution", e))?),
                    name: r.try_get("name").map_err(|e| decode_error("substitution", e))?,
                })
            })
            .collect()
    }
}

/// A Postgres transaction. Dropping it without commit rolls back.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    #[instrument(skip(self), err)]
    async fn lock_item_by_name(&mut self, name: &str) -> Result<Option<Item>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM item WHERE name = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_item_by_name", e))?;

        row.map(|r| decode_item(&r)).transpose()
    }

    #[instrument(skip(self, new), fields(name = %new.name), err)]
    async fn create_item(&mut self, new: &NewItem, at: DateTime<Utc>) -> Result<Item, StoreError> {
        let sql = format!(
            "INSERT INTO item (name, quantity, minimum_quantity, used_to_date, total_tossed, \
             type_id, substitution_id, expiration_period_days, created_at, last_modified_at) \
             VALUES ($1, $2, $3, 0, 0, $4, $5, $6, $7, $7) \
             RETURNING {ITEM_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&new.name)
            .bind(new.quantity)
            .bind(new.minimum_quantity)
            .bind(new.type_id.map(ItemTypeId::get))
            .bind(new.substitution_id.map(SubstitutionId::get))
            .bind(new.expiration_period_days)
            .bind(at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateName(new.name.clone())
                } else {
                    map_sqlx_error("create_item", e)
                }
            })?;

        decode_item(&row)
    }

    #[instrument(skip(self, unit), fields(item_id = %unit.item_id), err)]
    async fn add_units(&mut self, unit: NewUnit, count: u32) -> Result<Vec<ExpirationUnit>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            INSERT INTO expiration_unit (item_id, created_at, expires_at)
            SELECT $1, $2, $3 FROM generate_series(1, $4)
            RETURNING id, item_id, created_at, expires_at
            "#,
        )
        .bind(unit.item_id.get())
        .bind(unit.created_at)
        .bind(unit.expires_at)
        .bind(i64::from(count))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                StoreError::ItemNotFound(unit.item_id)
            } else {
                map_sqlx_error("add_units", e)
            }
        })?;

        rows.iter().map(decode_unit).collect()
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    async fn remove_oldest(&mut self, item_id: ItemId, count: u32) -> Result<Vec<ExpirationUnit>, StoreError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM expiration_unit
            WHERE id IN (
                SELECT id FROM expiration_unit
                WHERE item_id = $1
                ORDER BY expires_at ASC, id ASC
                LIMIT $2
                FOR UPDATE
            )
            RETURNING id, item_id, created_at, expires_at
            "#,
        )
        .bind(item_id.get())
        .bind(i64::from(count))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("remove_oldest", e))?;

        let mut removed = rows.iter().map(decode_unit).collect::<Result<Vec<_>, _>>()?;
        if removed.len() < count as usize {
            return Err(StoreError::InsufficientUnits {
                requested: count,
                removed: removed.len() as u32,
            });
        }
        sort_for_retirement(&mut removed);
        Ok(removed)
    }

    async fn count_active(&mut self, item_id: ItemId) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS active FROM expiration_unit WHERE item_id = $1")
            .bind(item_id.get())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_active", e))?;

        row.try_get("active").map_err(|e| decode_error("unit count", e))
    }

    #[instrument(skip(self), fields(item_id = %item_id), err)]
    async fn apply_delta(
        &mut self,
        item_id: ItemId,
        delta: CounterDelta,
        at: DateTime<Utc>,
    ) -> Result<Item, StoreError> {
        let sql = format!(
            "UPDATE item SET quantity = quantity + $2, used_to_date = used_to_date + $3, \
             total_tossed = total_tossed + $4, last_modified_at = $5 \
             WHERE id = $1 RETURNING {ITEM_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(item_id.get())
            .bind(delta.quantity)
            .bind(delta.used)
            .bind(delta.tossed)
            .bind(at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("apply_delta", e))?;

        match row {
            Some(row) => decode_item(&row),
            None => Err(StoreError::ItemNotFound(item_id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn create_item_type(&mut self, name: &str) -> Result<ItemType, StoreError> {
        let row = sqlx::query("INSERT INTO item_type (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateName(name.to_string())
                } else {
                    map_sqlx_error("create_item_type", e)
                }
            })?;

        Ok(ItemType {
            id: ItemTypeId::new(row.try_get("id").map_err(|e| decode_error("item type", e))?),
            name: name.to_string(),
        })
    }

    #[instrument(skip(self), err)]
    async fn create_substitution(&mut self, name: &str) -> Result<Substitution, StoreError> {
        let row = sqlx::query("INSERT INTO item_substitution (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::DuplicateName(name.to_string())
                } else {
                    map_sqlx_error("create_substitution", e)
                }
            })?;

        Ok(Substitution {
            id: SubstitutionId::new(row.try_get("id").map_err(|e| decode_error("substitution", e))?),
            name: name.to_string(),
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::DuplicateName(msg),
                Some("23503") => StoreError::InvalidReference(msg),
                _ => StoreError::database(operation, msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::database(operation, "connection pool closed"),
        sqlx::Error::PoolTimedOut => StoreError::database(operation, "connection pool timed out"),
        _ => StoreError::database(operation, format!("sqlx error: {}", err)),
    }
}

fn has_code(err: &sqlx::Error, wanted: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == wanted;
        }
    }
    false
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_code(err, "23505")
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    has_code(err, "23503")
}

fn decode_error(what: &str, err: sqlx::Error) -> StoreError {
    StoreError::database("decode", format!("failed to deserialize {what} row: {err}"))
}

fn decode_item(row: &PgRow) -> Result<Item, StoreError> {
    ItemRow::from_row(row)
        .map(Item::from)
        .map_err(|e| decode_error("item", e))
}

fn decode_unit(row: &PgRow) -> Result<ExpirationUnit, StoreError> {
    UnitRow::from_row(row)
        .map(ExpirationUnit::from)
        .map_err(|e| decode_error("expiration unit", e))
}

// SQLx row types

#[derive(Debug)]
struct ItemRow {
    id: i64,
    name: String,
    quantity: i64,
    minimum_quantity: i64,
    used_to_date: i64,
    total_tossed: i64,
    type_id: Option<i64>,
    substitution_id: Option<i64>,
    expiration_period_days: i64,
    created_at: DateTime<Utc>,
    last_modified_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            quantity: row.try_get("quantity")?,
            minimum_quantity: row.try_get("minimum_quantity")?,
            used_to_date: row.try_get("used_to_date")?,
            total_tossed: row.try_get("total_tossed")?,
            type_id: row.try_get("type_id")?,
            substitution_id: row.try_get("substitution_id")?,
            expiration_period_days: row.try_get("expiration_period_days")?,
            created_at: row.try_get("created_at")?,
            last_modified_at: row.try_get("last_modified_at")?,
        })
    }
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: ItemId::new(row.id),
            name: row.name,
            quantity: row.quantity,
            minimum_quantity: row.minimum_quantity,
            used_to_date: row.used_to_date,
            total_tossed: row.total_tossed,
            type_id: row.type_id.map(ItemTypeId::new),
            substitution_id: row.substitution_id.map(SubstitutionId::new),
            expiration_period_days: row.expiration_period_days,
            created_at: row.created_at,
            last_modified_at: row.last_modified_at,
        }
    }
}

#[derive(Debug)]
struct UnitRow {
    id: i64,
    item_id: i64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for UnitRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UnitRow {
            id: row.try_get("id")?,
            item_id: row.try_get("item_id")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl From<UnitRow> for ExpirationUnit {
    fn from(row: UnitRow) -> Self {
        ExpirationUnit {
            id: UnitId::new(row.id),
            item_id: ItemId::new(row.item_id),
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug)]
struct ItemViewRow {
    id: i64,
    name: String,
    quantity: i64,
    minimum_quantity: i64,
    used_to_date: i64,
    total_tossed: i64,
    expiration_period_days: i64,
    type_name: String,
    substitution_name: String,
    created_at: DateTime<Utc>,
    last_modified_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ItemViewRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemViewRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            quantity: row.try_get("quantity")?,
            minimum_quantity: row.try_get("minimum_quantity")?,
            used_to_date: row.try_get("used_to_date")?,
            total_tossed: row.try_get("total_tossed")?,
            expiration_period_days: row.try_get("expiration_period_days")?,
            type_name: row.try_get("type_name")?,
            substitution_name: row.try_get("substitution_name")?,
            created_at: row.try_get("created_at")?,
            last_modified_at: row.try_get("last_modified_at")?,
        })
    }
}

impl From<ItemViewRow> for ItemView {
    fn from(row: ItemViewRow) -> Self {
        ItemView {
            id: ItemId::new(row.id),
            name: row.name,
            quantity: row.quantity,
            minimum_quantity: row.minimum_quantity,
            used_to_date: row.used_to_date,
            total_tossed: row.total_tossed,
            expiration_period_days: row.expiration_period_days,
            type_name: row.type_name,
            substitution_name: row.substitution_name,
            created_at: row.created_at,
            last_modified_at: row.last_modified_at,
        }
    }
}

#[cfg(test)]
mod tests {
    //! These need a live database:
    //! `PANTRY_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`

    use super::*;
    use crate::schema::ensure_schema;

    async fn store() -> PostgresInventoryStore {
        let url = std::env::var("PANTRY_TEST_DATABASE_URL")
            .expect("PANTRY_TEST_DATABASE_URL must be set for Postgres tests");
        let store = PostgresInventoryStore::connect(&url, 4).await.unwrap();
        ensure_schema(store.pool()).await.unwrap();
        store
    }

    fn unique(prefix: &str) -> String {
        format!("{prefix}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    fn new_item(name: &str, quantity: i64) -> NewItem {
        NewItem {
            name: name.to_string(),
            quantity,
            minimum_quantity: 2,
            expiration_period_days: 10,
            type_id: None,
            substitution_id: None,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn duplicate_item_name_maps_to_duplicate_name() {
        let store = store().await;
        let name = unique("dup");

        let mut tx = store.begin().await.unwrap();
        tx.create_item(&new_item(&name, 0), Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.create_item(&new_item(&name, 0), Utc::now()).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicateName(name));
    }

    #[tokio::test]
    #[ignore]
    async fn rolled_back_units_are_not_persisted() {
        let store = store().await;
        let name = unique("rollback");

        let mut tx = store.begin().await.unwrap();
        let item = tx.create_item(&new_item(&name, 2), Utc::now()).await.unwrap();
        tx.add_units(NewUnit::stamped(item.id, 10, Utc::now()).unwrap(), 2)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_item_by_name(&name).await.unwrap().unwrap();
        tx.remove_oldest(item.id, 1).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.units(item.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    #[ignore]
    async fn remove_oldest_reports_shortfall() {
        let store = store().await;
        let name = unique("short");

        let mut tx = store.begin().await.unwrap();
        let item = tx.create_item(&new_item(&name, 1), Utc::now()).await.unwrap();
        tx.add_units(NewUnit::stamped(item.id, 10, Utc::now()).unwrap(), 1)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.remove_oldest(item.id, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientUnits { requested: 2, removed: 1 }));
    }

    #[tokio::test]
    #[ignore]
    async fn list_items_streams_in_id_order() {
        let store = store().await;
        let first = unique("list-a");
        let second = unique("list-b");

        let mut tx = store.begin().await.unwrap();
        tx.create_item(&new_item(&first, 0), Utc::now()).await.unwrap();
        tx.create_item(&new_item(&second, 5), Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        let views: Vec<_> = store
            .list_items(ListQuery::all())
            .collect::<Result<Vec<_>, _>>()
            .await
            .unwrap();
        let ids: Vec<_> = views.iter().map(|v| v.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let low: Vec<_> = store
            .list_items(ListQuery::all().under_minimum())
            .collect::<Result<Vec<_>, _>>()
            .await
            .unwrap();
        assert!(low.iter().any(|v| v.name == first));
        assert!(!low.iter().any(|v| v.name == second));
    }
}
