use std::path::Path;

use marginfi_risk_engine::prelude::MarketState;
use marginfi_risk_types::types::{MarginfiAccount, Pubkey};
use serde::{Deserialize, Serialize};

use crate::{ServiceError, ServiceResult};

/// Account payload as handed to the service, either bare or with the address it lives at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UserData {
    Raw { account: MarginfiAccount },
    Wrapped { address: Pubkey, account: MarginfiAccount },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchedAccount {
    pub address: Pubkey,
    pub account: MarginfiAccount,
}

impl UserData {
    /// A bare account is keyed by its authority.
    pub fn into_account(self) -> WatchedAccount {
        match self {
            UserData::Raw { account } => WatchedAccount {
                address: account.authority,
                account,
            },
            UserData::Wrapped { address, account } => WatchedAccount { address, account },
        }
    }
}

/// Market state plus the accounts the monitor watches, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub market: MarketState,
    #[serde(default)]
    pub accounts: Vec<UserData>,
}

impl MarketSnapshot {
    pub fn from_json(raw: &str) -> ServiceResult<Self> {
        serde_json::from_str(raw).map_err(|e| ServiceError::Decode(format!("market snapshot: {e}")))
    }

    pub async fn load(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServiceError::Decode(format!("{}: {e}", path.display())))?;

        Self::from_json(&raw)
    }

    pub fn watched_accounts(&self) -> Vec<WatchedAccount> {
        self.accounts.iter().cloned().map(UserData::into_account).collect()
    }
}
