//! Infrastructure layer: storage backends, the ledger service, config.

pub mod config;
pub mod ledger;
pub mod schema;
pub mod store;

pub use config::{AppConfig, ConfigError, StorageBackend};
pub use ledger::{Ledger, LedgerError};
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError, StoreTx};
