//! Transactional storage boundary for items, expiration units and lookups.
//!
//! Every write goes through a [`StoreTx`] obtained from
//! [`InventoryStore::begin`]. A transaction is applied only by
//! [`StoreTx::commit`]; dropping it (early return, `?`, panic unwind) discards
//! every staged change.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use r#trait::{InventoryStore, ItemViewStream, StoreError, StoreTx};
