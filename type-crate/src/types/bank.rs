use bytemuck::Zeroable;
use fixed::types::I80F48;
use serde::{Deserialize, Serialize};

use super::{BankConfig, Pubkey, WrappedI80F48};

#[derive(Debug, PartialEq, Eq, Copy, Clone, Zeroable, Serialize, Deserialize)]
pub struct Bank {
    pub mint: Pubkey,
    pub mint_decimals: u8,

    pub group: Pubkey,

    pub asset_share_value: WrappedI80F48,
    pub liability_share_value: WrappedI80F48,

    pub liquidity_vault: Pubkey,
    pub insurance_vault: Pubkey,
    pub fee_vault: Pubkey,

    /// Fees collected and pending withdraw for the `insurance_vault`
    pub collected_insurance_fees_outstanding: WrappedI80F48,
    /// Fees collected and pending withdraw for the `fee_vault`
    pub collected_group_fees_outstanding: WrappedI80F48,

    pub total_liability_shares: WrappedI80F48,
    pub total_asset_shares: WrappedI80F48,

    pub last_update: i64,

    pub config: BankConfig,

    /// Bank Config Flags
    ///
    /// - EMISSIONS_FLAG_BORROW_ACTIVE: 1
    /// - EMISSIONS_FLAG_LENDING_ACTIVE: 2
    /// - PERMISSIONLESS_BAD_DEBT_SETTLEMENT: 4
    /// - FREEZE_SETTINGS: 8
    ///
    pub flags: u64,
    /// Emissions APR.
    /// Number of emitted tokens (emissions_mint) per 1e(bank.mint_decimal) tokens (bank mint) (native amount) per 1 YEAR.
    pub emissions_rate: u64,
    pub emissions_remaining: WrappedI80F48,
    pub emissions_mint: Pubkey,

    /// Price reported for the bank's mint when `config.oracle_setup` is `OracleSetup::Fixed`
    pub fixed_price: WrappedI80F48,
}

impl Bank {
    pub fn new(
        group: Pubkey,
        config: BankConfig,
        mint: Pubkey,
        mint_decimals: u8,
        current_timestamp: i64,
    ) -> Bank {
        Bank {
            mint,
            mint_decimals,
            group,
            asset_share_value: I80F48::ONE.into(),
            liability_share_value: I80F48::ONE.into(),
            last_update: current_timestamp,
            config,
            ..Bank::zeroed()
        }
    }
}

impl Default for Bank {
    fn default() -> Self {
        Bank::zeroed()
    }
}
