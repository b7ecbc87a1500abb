use fixed::types::I80F48;
use marginfi_risk_types::types::{Balance, MarginfiAccount, Pubkey};

use crate::banks::TEST_GROUP;

pub const TEST_AUTHORITY: Pubkey = Pubkey::new_from_seed(77);

/// Lays out balances slot by slot. Amounts are shares, which equal native units on a fresh bank.
pub struct AccountBuilder {
    account: MarginfiAccount,
    next_slot: usize,
}

impl Default for AccountBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountBuilder {
    pub fn new() -> Self {
        Self {
            account: MarginfiAccount::new(TEST_GROUP, TEST_AUTHORITY),
            next_slot: 0,
        }
    }

    pub fn asset(self, bank_pk: Pubkey, shares: I80F48) -> Self {
        self.push(bank_pk, |balance| balance.asset_shares = shares.into())
    }

    pub fn liability(self, bank_pk: Pubkey, shares: I80F48) -> Self {
        self.push(bank_pk, |balance| balance.liability_shares = shares.into())
    }

    /// Active balance with nothing in it.
    pub fn empty(self, bank_pk: Pubkey) -> Self {
        self.push(bank_pk, |_| {})
    }

    pub fn flag(mut self, flag: u64) -> Self {
        self.account.set_flag(flag);
        self
    }

    pub fn build(self) -> MarginfiAccount {
        self.account
    }

    fn push(mut self, bank_pk: Pubkey, fill: impl FnOnce(&mut Balance)) -> Self {
        let mut balance = Balance::new_active(bank_pk, 0);
        fill(&mut balance);
        self.account.lending_account.balances[self.next_slot] = balance;
        self.next_slot += 1;
        self
    }
}

/// Parses an account dumped by the service as JSON.
pub fn account_from_json(raw: &str) -> anyhow::Result<MarginfiAccount> {
    Ok(serde_json::from_str(raw)?)
}
