use std::collections::HashMap;

use marginfi_risk_types::types::{Bank, BankMetadata, MarginfiAccount, OraclePrice, Pubkey};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    errors::RiskError,
    state::{
        bank::BankImpl,
        price::{OraclePriceFeedAdapter, PriceAdapter, RawOracleFeed},
        risk_engine::RiskEngine,
    },
    RiskResult,
};

/// Owner of every bank, oracle price and bank metadata entry the engine reads. Computations
/// borrow from it, updates go through it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketState {
    pub banks: HashMap<Pubkey, Bank>,
    pub oracle_prices: HashMap<Pubkey, OraclePrice>,
    #[serde(default)]
    pub metadata: HashMap<Pubkey, BankMetadata>,
}

impl MarketState {
    pub fn new(
        banks: HashMap<Pubkey, Bank>,
        oracle_prices: HashMap<Pubkey, OraclePrice>,
    ) -> Self {
        Self {
            banks,
            oracle_prices,
            metadata: HashMap::new(),
        }
    }

    pub fn get_bank(&self, bank_pk: &Pubkey) -> RiskResult<&Bank> {
        self.banks
            .get(bank_pk)
            .ok_or(RiskError::BankNotFound(*bank_pk))
    }

    pub fn get_price(&self, bank_pk: &Pubkey) -> RiskResult<&OraclePrice> {
        self.oracle_prices
            .get(bank_pk)
            .ok_or(RiskError::PriceNotFound(*bank_pk))
    }

    pub fn upsert_bank(&mut self, bank_pk: Pubkey, bank: Bank) {
        self.banks.insert(bank_pk, bank);
    }

    pub fn set_oracle_price(&mut self, bank_pk: Pubkey, price: OraclePrice) {
        self.oracle_prices.insert(bank_pk, price);
    }

    pub fn set_metadata(&mut self, metadata: HashMap<Pubkey, BankMetadata>) {
        self.metadata = metadata;
    }

    /// Validates `feed` against the bank's oracle setup and stores the resulting price.
    pub fn refresh_oracle_price(
        &mut self,
        bank_pk: &Pubkey,
        feed: Option<RawOracleFeed>,
        current_timestamp: i64,
    ) -> RiskResult<OraclePrice> {
        let bank = self.get_bank(bank_pk)?;
        let price =
            OraclePriceFeedAdapter::try_from_bank(bank, feed, current_timestamp)?.to_oracle_price()?;

        self.oracle_prices.insert(*bank_pk, price);

        Ok(price)
    }

    /// Accrues interest on every bank up to `current_timestamp`. A bank that fails to accrue
    /// keeps its previous state.
    pub fn accrue_interest(&mut self, current_timestamp: i64) {
        for (bank_pk, bank) in self.banks.iter_mut() {
            let mut accrued = *bank;
            match accrued.accrue_interest(current_timestamp) {
                Ok(()) => *bank = accrued,
                Err(e) => warn!("Failed to accrue interest for bank {}: {}", bank_pk, e),
            }
        }
    }

    pub fn bank_by_mint(&self, mint: &Pubkey) -> Option<(&Pubkey, &Bank)> {
        self.banks.iter().find(|(_, bank)| bank.mint == *mint)
    }

    pub fn bank_by_symbol(&self, symbol: &str) -> Option<(&Pubkey, &Bank)> {
        let (bank_pk, _) = self
            .metadata
            .iter()
            .find(|(_, meta)| meta.token_symbol.eq_ignore_ascii_case(symbol))?;

        self.banks.get_key_value(bank_pk)
    }

    pub fn risk_engine<'a>(&'a self, account: &'a MarginfiAccount) -> RiskResult<RiskEngine<'a>> {
        RiskEngine::new(account, &self.banks, &self.oracle_prices)
    }
}
