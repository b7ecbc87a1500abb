use std::{collections::HashMap, sync::Arc, time::Duration};

use marginfi_risk_types::types::{BankMetadata, Pubkey};
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::info;

use crate::{scheduler::ScheduledTask, ServiceError, ServiceResult};

/// Bank metadata keyed by bank address, as published in the public cache file.
pub fn parse_bank_metadata(raw: &str) -> ServiceResult<HashMap<Pubkey, BankMetadata>> {
    serde_json::from_str(raw).map_err(|e| ServiceError::Decode(format!("bank metadata: {e}")))
}

pub struct BankMetadataCache {
    url: String,
    client: Client,
    entries: RwLock<HashMap<Pubkey, BankMetadata>>,
}

impl BankMetadataCache {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetches the cache file and swaps it in whole. The previous entries stay on failure.
    pub async fn refresh(&self) -> ServiceResult<usize> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let entries = parse_bank_metadata(&response.text().await?)?;
        let count = entries.len();
        self.replace(entries).await;

        info!("Loaded metadata for {} banks", count);
        Ok(count)
    }

    pub async fn replace(&self, entries: HashMap<Pubkey, BankMetadata>) {
        *self.entries.write().await = entries;
    }

    pub async fn get(&self, bank_pk: &Pubkey) -> Option<BankMetadata> {
        self.entries.read().await.get(bank_pk).cloned()
    }

    pub async fn by_symbol(&self, symbol: &str) -> Option<(Pubkey, BankMetadata)> {
        self.entries
            .read()
            .await
            .iter()
            .find(|(_, meta)| meta.token_symbol.eq_ignore_ascii_case(symbol))
            .map(|(bank_pk, meta)| (*bank_pk, meta.clone()))
    }

    pub async fn snapshot(&self) -> HashMap<Pubkey, BankMetadata> {
        self.entries.read().await.clone()
    }

    pub fn spawn_refresh(self: &Arc<Self>, period: Duration) -> ScheduledTask {
        let cache = self.clone();
        ScheduledTask::spawn("bank-metadata-refresh", period, move || {
            let cache = cache.clone();
            async move { cache.refresh().await.map(|_| ()) }
        })
    }
}
