use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::future::try_join_all;
use marginfi_risk_types::types::Pubkey;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    account::Account, address_lookup_table::AddressLookupTableAccount,
    commitment_config::CommitmentConfig,
};
use tracing::warn;

use crate::{
    retry::retry_limited,
    transaction::{decode_lookup_table, to_solana_pubkey},
    ServiceResult,
};

/// `getMultipleAccounts` request cap.
const MAX_MULTIPLE_ACCOUNTS: usize = 100;
pub const RPC_RETRY_ATTEMPTS: usize = 5;

/// Source of address lookup table contents for message compilation.
#[async_trait]
pub trait LookupTableSource: Send + Sync {
    /// Tables that do not exist or fail to decode are left out. Transport failures are
    /// returned once retries run out.
    async fn fetch_lookup_tables(
        &self,
        keys: &[Pubkey],
    ) -> ServiceResult<Vec<AddressLookupTableAccount>>;
}

/// Accounts for `keys` in order, fetched in parallel chunks with each chunk retried on its own.
pub async fn get_multiple_accounts_chunked(
    rpc_client: &RpcClient,
    keys: &[Pubkey],
) -> ServiceResult<Vec<Option<Account>>> {
    let keys: Vec<_> = keys.iter().map(to_solana_pubkey).collect();

    let chunks = try_join_all(keys.chunks(MAX_MULTIPLE_ACCOUNTS).map(|chunk| {
        retry_limited(
            ExponentialBackoffBuilder::new()
                .with_max_interval(Duration::from_secs(5))
                .build(),
            RPC_RETRY_ATTEMPTS,
            "getMultipleAccounts",
            move || async move {
                rpc_client
                    .get_multiple_accounts_with_commitment(chunk, CommitmentConfig::confirmed())
                    .await
                    .map(|response| response.value)
            },
        )
    }))
    .await?;

    Ok(chunks.into_iter().flatten().collect())
}

#[async_trait]
impl LookupTableSource for RpcClient {
    async fn fetch_lookup_tables(
        &self,
        keys: &[Pubkey],
    ) -> ServiceResult<Vec<AddressLookupTableAccount>> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        let accounts = get_multiple_accounts_chunked(self, keys).await?;

        Ok(keys
            .iter()
            .zip(accounts)
            .filter_map(|(key, account)| {
                let Some(account) = account else {
                    warn!("Lookup table {} not found", key);
                    return None;
                };
                decode_lookup_table(key, &account.data)
                    .map_err(|e| warn!("Skipping lookup table: {}", e))
                    .ok()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceError;
    use assert_matches::assert_matches;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use solana_client::rpc_request::RpcRequest;
    use solana_sdk::address_lookup_table::state::{AddressLookupTable, LookupTableMeta};
    use std::{borrow::Cow, collections::HashMap};

    fn table_data(addresses: &[Pubkey]) -> Vec<u8> {
        AddressLookupTable {
            meta: LookupTableMeta::default(),
            addresses: Cow::Owned(addresses.iter().map(to_solana_pubkey).collect()),
        }
        .serialize_for_tests()
        .unwrap()
    }

    fn ui_account(data: &[u8]) -> serde_json::Value {
        json!({
            "lamports": 1_000_000,
            "data": [STANDARD.encode(data), "base64"],
            "owner": "AddressLookupTab1e1111111111111111111111111",
            "executable": false,
            "rentEpoch": 0,
            "space": data.len(),
        })
    }

    #[tokio::test]
    async fn skips_missing_and_malformed_tables() {
        let stored = [Pubkey::new_from_seed(5), Pubkey::new_from_seed(6)];
        let response = json!({
            "context": { "slot": 1 },
            "value": [null, ui_account(&table_data(&stored)), ui_account(&[1, 2, 3])],
        });
        let client = RpcClient::new_mock_with_mocks(
            "succeeds".to_string(),
            HashMap::from([(RpcRequest::GetMultipleAccounts, response)]),
        );

        let keys = [
            Pubkey::new_from_seed(1),
            Pubkey::new_from_seed(2),
            Pubkey::new_from_seed(3),
        ];
        let tables = client.fetch_lookup_tables(&keys).await.unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].key, to_solana_pubkey(&keys[1]));
        assert_eq!(
            tables[0].addresses,
            stored.iter().map(to_solana_pubkey).collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_surface_after_retries() {
        let client = RpcClient::new_mock("fails".to_string());

        let result = client
            .fetch_lookup_tables(&[Pubkey::new_from_seed(1)])
            .await;

        assert_matches!(result, Err(ServiceError::Rpc(_)));
    }

    #[tokio::test]
    async fn no_keys_means_no_request() {
        // any request against this client would fail
        let client = RpcClient::new_mock("fails".to_string());
        assert!(client.fetch_lookup_tables(&[]).await.unwrap().is_empty());
    }
}
