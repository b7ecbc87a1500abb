use bytemuck::Zeroable;
use fixed::types::I80F48;
use serde::{Deserialize, Serialize};

use crate::constants::EMPTY_BALANCE_THRESHOLD;

use super::{Pubkey, WrappedI80F48};

#[derive(Debug, PartialEq, Eq, Zeroable, Copy, Clone, Serialize, Deserialize)]
pub struct MarginfiAccount {
    pub group: Pubkey,
    pub authority: Pubkey,
    pub lending_account: LendingAccount,
    /// The flags that indicate the state of the account. This is u64 bitfield, where each bit
    /// represents a flag.
    ///
    /// Flags:
    /// - 1: `ACCOUNT_DISABLED` - Indicates that the account is disabled and no further actions can
    /// be taken on it.
    /// - 2: `ACCOUNT_IN_FLASHLOAN` - Only set when an account is within a flash loan, e.g. when
    ///   start_flashloan is called, then unset when the flashloan ends.
    pub account_flags: u64,
}

pub const ACCOUNT_DISABLED: u64 = 1 << 0;
pub const ACCOUNT_IN_FLASHLOAN: u64 = 1 << 1;

pub const MAX_LENDING_ACCOUNT_BALANCES: usize = 16;

impl MarginfiAccount {
    pub fn new(group: Pubkey, authority: Pubkey) -> Self {
        Self {
            group,
            authority,
            ..Self::zeroed()
        }
    }

    pub fn get_flag(&self, flag: u64) -> bool {
        self.account_flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u64) {
        self.account_flags |= flag;
    }

    pub fn unset_flag(&mut self, flag: u64) {
        self.account_flags &= !flag;
    }
}

#[derive(Debug, PartialEq, Eq, Zeroable, Copy, Clone, Serialize, Deserialize)]
pub struct LendingAccount {
    pub balances: [Balance; MAX_LENDING_ACCOUNT_BALANCES],
}

impl LendingAccount {
    pub fn get_balance(&self, bank_pk: &Pubkey) -> Option<&Balance> {
        self.balances
            .iter()
            .find(|balance| balance.active && balance.bank_pk.eq(bank_pk))
    }

    pub fn get_active_balances_iter(&self) -> impl Iterator<Item = &Balance> {
        self.balances.iter().filter(|b| b.active)
    }

    pub fn get_first_empty_balance(&self) -> Option<usize> {
        self.balances.iter().position(|b| !b.active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceSide {
    Assets,
    Liabilities,
}

#[derive(Debug, PartialEq, Eq, Zeroable, Copy, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub active: bool,
    pub bank_pk: Pubkey,
    pub asset_shares: WrappedI80F48,
    pub liability_shares: WrappedI80F48,
    pub emissions_outstanding: WrappedI80F48,
    pub last_update: u64,
}

impl Balance {
    /// Check whether a balance is empty while accounting for any rounding errors
    /// that might have occured during depositing/withdrawing.
    #[inline]
    pub fn is_empty(&self, side: BalanceSide) -> bool {
        let shares: I80F48 = match side {
            BalanceSide::Assets => self.asset_shares,
            BalanceSide::Liabilities => self.liability_shares,
        }
        .into();

        shares < EMPTY_BALANCE_THRESHOLD
    }

    /// Side the balance sits on, `None` when both sides are dust.
    pub fn get_side(&self) -> Option<BalanceSide> {
        if I80F48::from(self.asset_shares) >= EMPTY_BALANCE_THRESHOLD {
            Some(BalanceSide::Assets)
        } else if I80F48::from(self.liability_shares) >= EMPTY_BALANCE_THRESHOLD {
            Some(BalanceSide::Liabilities)
        } else {
            None
        }
    }

    pub fn empty_deactivated() -> Self {
        Self::zeroed()
    }

    pub fn new_active(bank_pk: Pubkey, last_update: u64) -> Self {
        Balance {
            active: true,
            bank_pk,
            last_update,
            ..Self::zeroed()
        }
    }
}
