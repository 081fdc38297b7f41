mod store;

pub use store::{EmbeddedTable, StoreStats, TableRecord, TableStore};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SearchError};

/// Source of descriptive text for candidates surfaced by retrieval
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Descriptions keyed by identifier; unknown identifiers are omitted
    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, String>>;
}

/// `MetadataStore` backed by the LMDB table store
pub struct StoreMetadata {
    store: Arc<TableStore>,
}

impl StoreMetadata {
    pub fn new(store: Arc<TableStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MetadataStore for StoreMetadata {
    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let store = Arc::clone(&self.store);
        let ids = ids.to_vec();

        tokio::task::spawn_blocking(move || store.descriptions(&ids))
            .await
            .map_err(|e| SearchError::retrieval("metadata", e))?
            .map_err(|e| SearchError::retrieval("metadata", format!("{:#}", e)))
    }
}

// Re-export for advanced usage
pub use arroy;
pub use heed;
