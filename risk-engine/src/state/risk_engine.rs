use std::{collections::HashMap, ops::Not};

use fixed::types::I80F48;
use marginfi_risk_types::{
    constants::{BANKRUPT_THRESHOLD, ZERO_AMOUNT_THRESHOLD},
    types::{
        BalanceSide, Bank, MarginfiAccount, OraclePrice, Pubkey, RiskTier, ACCOUNT_IN_FLASHLOAN,
    },
};

use crate::{
    check, debug,
    errors::RiskError,
    math_error,
    state::marginfi_account::{BankAccountWithPrice, RequirementType},
    RiskResult,
};

#[derive(Debug)]
pub struct RiskEngine<'a> {
    marginfi_account: &'a MarginfiAccount,
    bank_accounts_with_price: Vec<BankAccountWithPrice<'a>>,
}

impl<'a> RiskEngine<'a> {
    pub fn new(
        marginfi_account: &'a MarginfiAccount,
        banks: &'a HashMap<Pubkey, Bank>,
        oracle_prices: &'a HashMap<Pubkey, OraclePrice>,
    ) -> RiskResult<Self> {
        check!(
            !marginfi_account.get_flag(ACCOUNT_IN_FLASHLOAN),
            RiskError::AccountInFlashloan
        );

        Self::new_no_flashloan_check(marginfi_account, banks, oracle_prices, &[])
    }

    /// Builds the engine over every active balance except those in `excluded_banks`, without
    /// looking at the flash-loan flag.
    pub fn new_no_flashloan_check(
        marginfi_account: &'a MarginfiAccount,
        banks: &'a HashMap<Pubkey, Bank>,
        oracle_prices: &'a HashMap<Pubkey, OraclePrice>,
        excluded_banks: &[Pubkey],
    ) -> RiskResult<Self> {
        let bank_accounts_with_price = BankAccountWithPrice::load(
            &marginfi_account.lending_account,
            banks,
            oracle_prices,
            excluded_banks,
        )?;

        Ok(Self {
            marginfi_account,
            bank_accounts_with_price,
        })
    }

    /// Checks account is healthy after performing actions that increase risk (removing liquidity).
    ///
    /// Skipped while the account is inside a flash loan.
    pub fn check_account_init_health(
        marginfi_account: &'a MarginfiAccount,
        banks: &'a HashMap<Pubkey, Bank>,
        oracle_prices: &'a HashMap<Pubkey, OraclePrice>,
    ) -> RiskResult<()> {
        if marginfi_account.get_flag(ACCOUNT_IN_FLASHLOAN) {
            return Ok(());
        }

        Self::new_no_flashloan_check(marginfi_account, banks, oracle_prices, &[])?
            .check_account_health(RequirementType::Initial)?;

        Ok(())
    }

    /// Returns the total assets and liabilities of the account in the form of (assets, liabilities)
    pub fn get_account_health_components(
        &self,
        requirement_type: RequirementType,
    ) -> RiskResult<(I80F48, I80F48)> {
        self.sum_components(|a| a.calc_weighted_assets_and_liabilities_values(requirement_type))
    }

    pub fn get_account_health_components_without_bias(
        &self,
        requirement_type: RequirementType,
    ) -> RiskResult<(I80F48, I80F48)> {
        self.sum_components(|a| {
            a.calc_weighted_assets_and_liabilities_values_without_bias(requirement_type)
        })
    }

    fn sum_components<F>(&self, value_of: F) -> RiskResult<(I80F48, I80F48)>
    where
        F: Fn(&BankAccountWithPrice<'a>) -> RiskResult<(I80F48, I80F48)>,
    {
        let mut total_assets = I80F48::ZERO;
        let mut total_liabilities = I80F48::ZERO;

        for a in &self.bank_accounts_with_price {
            let (assets, liabilities) = value_of(a)?;

            total_assets = total_assets.checked_add(assets).ok_or_else(math_error!())?;
            total_liabilities = total_liabilities
                .checked_add(liabilities)
                .ok_or_else(math_error!())?;
        }

        Ok((total_assets, total_liabilities))
    }

    pub fn get_account_health(&self, requirement_type: RequirementType) -> RiskResult<I80F48> {
        let (total_weighted_assets, total_weighted_liabilities) =
            self.get_account_health_components(requirement_type)?;

        total_weighted_assets
            .checked_sub(total_weighted_liabilities)
            .ok_or_else(math_error!())
    }

    pub fn bank_accounts(&self) -> &[BankAccountWithPrice<'a>] {
        &self.bank_accounts_with_price
    }

    fn check_account_health(&self, requirement_type: RequirementType) -> RiskResult {
        let (total_weighted_assets, total_weighted_liabilities) =
            self.get_account_health_components(requirement_type)?;

        debug!(
            "check_health: assets {} - liabs: {}",
            total_weighted_assets,
            total_weighted_liabilities
        );

        check!(
            total_weighted_assets >= total_weighted_liabilities,
            RiskError::BadAccountHealth
        );

        self.check_account_risk_tiers()?;

        Ok(())
    }

    /// Checks
    /// 1. Account is liquidatable
    /// 2. Account has an outstanding liability for the provided liability bank
    pub fn check_pre_liquidation_condition_and_get_account_health(
        &self,
        bank_pk: &Pubkey,
    ) -> RiskResult<I80F48> {
        check!(
            !self.marginfi_account.get_flag(ACCOUNT_IN_FLASHLOAN),
            RiskError::AccountInFlashloan
        );

        let liability_bank_balance = self.find_bank_account(bank_pk)?;

        check!(
            liability_bank_balance
                .is_empty(BalanceSide::Liabilities)
                .not(),
            RiskError::IllegalLiquidation
        );

        check!(
            liability_bank_balance.is_empty(BalanceSide::Assets),
            RiskError::IllegalLiquidation
        );

        let (assets, liabs) = self.get_account_health_components(RequirementType::Maintenance)?;

        let account_health = assets.checked_sub(liabs).ok_or_else(math_error!())?;

        debug!(
            "pre_liquidation_health: {} ({} - {})",
            account_health,
            assets,
            liabs
        );

        check!(
            account_health <= I80F48::ZERO,
            RiskError::IllegalLiquidation,
            "Account not unhealthy"
        );

        Ok(account_health)
    }

    /// Check that the account is at most at the maintenance requirement level post liquidation.
    ///
    /// 1. The liquidated liability is not exhausted, so the liquidation was not too large.
    /// 2. The account is still at most at the maintenance requirement level.
    /// 3. Health improved compared to `pre_liquidation_health`.
    pub fn check_post_liquidation_condition_and_get_account_health(
        &self,
        bank_pk: &Pubkey,
        pre_liquidation_health: I80F48,
    ) -> RiskResult<I80F48> {
        check!(
            !self.marginfi_account.get_flag(ACCOUNT_IN_FLASHLOAN),
            RiskError::AccountInFlashloan
        );

        let liability_bank_balance = self.find_bank_account(bank_pk)?;

        check!(
            liability_bank_balance
                .is_empty(BalanceSide::Liabilities)
                .not(),
            RiskError::IllegalLiquidation,
            "Liability payoff too severe, exhausted liability"
        );

        check!(
            liability_bank_balance.is_empty(BalanceSide::Assets),
            RiskError::IllegalLiquidation,
            "Liability payoff too severe, liability balance has assets"
        );

        let (assets, liabs) = self.get_account_health_components(RequirementType::Maintenance)?;

        let account_health = assets.checked_sub(liabs).ok_or_else(math_error!())?;

        check!(
            account_health <= I80F48::ZERO,
            RiskError::IllegalLiquidation,
            "Liquidation too severe, account above maintenance requirement"
        );

        debug!(
            "account_health: {} ({} - {}), pre_liquidation_health: {}",
            account_health,
            assets,
            liabs,
            pre_liquidation_health
        );

        check!(
            account_health > pre_liquidation_health,
            RiskError::IllegalLiquidation,
            "Post liquidation health worse"
        );

        Ok(account_health)
    }

    /// Check that the account is in a bankrupt state.
    /// Account needs to be insolvent and total value of assets need to be below the bankruptcy threshold.
    pub fn check_account_bankrupt(&self) -> RiskResult {
        check!(
            !self.marginfi_account.get_flag(ACCOUNT_IN_FLASHLOAN),
            RiskError::AccountInFlashloan
        );

        let (total_assets, total_liabilities) =
            self.get_account_health_components(RequirementType::Equity)?;

        debug!(
            "check_bankrupt: assets {} - liabs: {}",
            total_assets,
            total_liabilities
        );

        check!(
            total_assets < total_liabilities,
            RiskError::AccountNotBankrupt
        );
        check!(
            total_assets < BANKRUPT_THRESHOLD && total_liabilities > ZERO_AMOUNT_THRESHOLD,
            RiskError::AccountNotBankrupt
        );

        Ok(())
    }

    fn find_bank_account(&self, bank_pk: &Pubkey) -> RiskResult<&BankAccountWithPrice<'a>> {
        self.bank_accounts_with_price
            .iter()
            .find(|a| a.balance.bank_pk == *bank_pk)
            .ok_or(RiskError::LendingAccountBalanceNotFound)
    }

    /// An isolated-tier liability must be the account's only liability.
    fn check_account_risk_tiers(&self) -> RiskResult {
        let balances_with_liabilities = self
            .bank_accounts_with_price
            .iter()
            .filter(|a| a.balance.is_empty(BalanceSide::Liabilities).not());

        let n_balances_with_liabilities = balances_with_liabilities.clone().count();

        let is_in_isolated_risk_tier = balances_with_liabilities
            .clone()
            .any(|a| a.bank.config.risk_tier == RiskTier::Isolated);

        check!(
            !is_in_isolated_risk_tier || n_balances_with_liabilities == 1,
            RiskError::IsolatedAccountIllegalState
        );

        Ok(())
    }
}
