//! Storage and ledger wiring.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use pantry_core::{Clock, SystemClock};
use pantry_infra::schema::ensure_schema;
use pantry_infra::{
    AppConfig, InMemoryInventoryStore, InventoryStore, Ledger, PostgresInventoryStore, StorageBackend,
};

/// Ledger over whichever backend the process was configured with.
pub type SharedLedger = Ledger<Arc<dyn InventoryStore>, Arc<dyn Clock>>;

pub struct AppServices {
    pub ledger: SharedLedger,
}

impl AppServices {
    pub fn new(store: Arc<dyn InventoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: Ledger::new(store, clock),
        }
    }
}

/// In-memory services (tests/dev).
pub fn in_memory_services() -> AppServices {
    AppServices::new(InMemoryInventoryStore::arc(), Arc::new(SystemClock))
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    match config.storage {
        StorageBackend::Memory => {
            info!("using in-memory storage");
            Ok(in_memory_services())
        }
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set when PANTRY_STORAGE=postgres")?;
            let store = PostgresInventoryStore::connect(url, config.max_connections).await?;
            ensure_schema(store.pool()).await?;
            info!(max_connections = config.max_connections, "using postgres storage");
            Ok(AppServices::new(Arc::new(store), Arc::new(SystemClock)))
        }
    }
}
