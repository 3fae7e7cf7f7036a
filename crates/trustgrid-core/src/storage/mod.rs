//! Storage layer for organizations, credentials, citizens and consent records.
//!
//! Every state transition that must not race (credential revoke, verification
//! write, consent resolution) is a conditional update inside the backend.

mod memory;
mod postgres;
mod traits;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use traits::{
    CitizenStorage, ConsentStorage, CredentialStorage, OrganizationStorage, Storage,
    StorageResult,
};

use std::sync::Arc;
use tracing::info;

/// Persistence backend configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Keep everything in process memory only.
    Memory,
    /// Persist to PostgreSQL, creating tables on startup if missing.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }

    /// Open the configured backend.
    pub async fn open(&self) -> StorageResult<Arc<dyn Storage>> {
        info!(backend = self.label(), "Opening TrustGrid storage");
        match self {
            Self::Memory => Ok(Arc::new(MemoryStorage::new())),
            Self::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStorage::connect(database_url, *max_connections).await?;
                store.ensure_schema().await?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}
