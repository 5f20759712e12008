//! Build the configured [`Store`] backend.

use std::sync::Arc;

use anyhow::{Context, Result};
use vetchat_core::store::memory::InMemoryStore;
use vetchat_core::store::Store;

use crate::airtable::{AirtableClient, AirtableStore};
use crate::config::Config;
use crate::sqlite_store::SqliteStore;

pub async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    match config.store.backend.as_str() {
        "memory" => {
            tracing::warn!("using the in-memory store; data is lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        "sqlite" => Ok(Arc::new(SqliteStore::open(&config.store.path).await?)),
        "airtable" => {
            let airtable = &config.store.airtable;
            let base_id = airtable
                .base_id
                .as_deref()
                .context("store.airtable.base_id (or AIRTABLE_BASE_ID) is required")?;
            let api_key = config
                .secrets
                .airtable_api_key
                .as_deref()
                .context("AIRTABLE_API_KEY is required for the airtable backend")?;
            let client =
                AirtableClient::new(&airtable.api_url, base_id, api_key, airtable.timeout_secs)?
                    .with_max_retries(airtable.max_retries);
            Ok(Arc::new(AirtableStore::new(client, airtable.tables.clone())))
        }
        other => anyhow::bail!("unknown store backend: {other}"),
    }
}
