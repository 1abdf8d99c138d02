//! Postgres schema for the inventory ledger.
//!
//! Statements are idempotent (`IF NOT EXISTS`) and run in order on startup.

use sqlx::PgPool;
use tracing::{debug, instrument};

use crate::store::StoreError;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS item_type (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS item_substitution (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS item (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        quantity BIGINT NOT NULL CHECK (quantity >= 0),
        minimum_quantity BIGINT NOT NULL DEFAULT 0 CHECK (minimum_quantity >= 0),
        used_to_date BIGINT NOT NULL DEFAULT 0 CHECK (used_to_date >= 0),
        total_tossed BIGINT NOT NULL DEFAULT 0 CHECK (total_tossed >= 0),
        type_id BIGINT NULL REFERENCES item_type (id),
        substitution_id BIGINT NULL REFERENCES item_substitution (id),
        expiration_period_days BIGINT NOT NULL CHECK (expiration_period_days BETWEEN 0 AND 36500),
        created_at TIMESTAMPTZ NOT NULL,
        last_modified_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS expiration_unit (
        id BIGSERIAL PRIMARY KEY,
        item_id BIGINT NOT NULL REFERENCES item (id),
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS expiration_unit_retirement_idx
        ON expiration_unit (item_id, expires_at, id)
    "#,
];

/// Create missing tables and indexes.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::database("ensure_schema", e.to_string()))?;
    }
    debug!(statements = STATEMENTS.len(), "schema ensured");
    Ok(())
}
