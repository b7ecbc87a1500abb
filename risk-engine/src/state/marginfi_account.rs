use std::{
    cmp::{max, min},
    collections::HashMap,
};

use fixed::types::I80F48;
use marginfi_risk_types::{
    constants::{
        EMISSIONS_FLAG_BORROW_ACTIVE, EMISSIONS_FLAG_LENDING_ACTIVE, MIN_EMISSIONS_START_TIME,
        SECONDS_PER_YEAR, ZERO_AMOUNT_THRESHOLD,
    },
    types::{
        Balance, BalanceSide, Bank, LendingAccount, OraclePrice, OraclePriceType, PriceBias,
        Pubkey, RiskTier,
    },
};
use serde::{Deserialize, Serialize};

use crate::{
    check, debug,
    errors::RiskError,
    math_error,
    prelude::{BankConfigImpl, BankImpl},
    utils::{exp_10, NumTraitsWithTolerance},
    RiskResult,
};

#[derive(Debug)]
pub enum BalanceIncreaseType {
    Any,
    RepayOnly,
    DepositOnly,
    BypassDepositLimit,
}

#[derive(Debug)]
pub enum BalanceDecreaseType {
    Any,
    WithdrawOnly,
    BorrowOnly,
    BypassBorrowLimit,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequirementType {
    Initial,
    Maintenance,
    Equity,
}

impl RequirementType {
    /// Get oracle price type for the requirement type.
    ///
    /// Initial requirement uses the time weighted price feed.
    /// Maintenance and equity use the real time price feed, the same price liquidators act on.
    pub fn get_oracle_price_type(&self) -> OraclePriceType {
        match self {
            RequirementType::Initial => OraclePriceType::TimeWeighted,
            RequirementType::Maintenance | RequirementType::Equity => OraclePriceType::RealTime,
        }
    }
}

/// An active balance together with the bank and price it is valued against.
#[derive(Debug, Clone, Copy)]
pub struct BankAccountWithPrice<'a> {
    pub bank_pk: Pubkey,
    pub bank: &'a Bank,
    pub price: &'a OraclePrice,
    pub balance: &'a Balance,
}

impl<'a> BankAccountWithPrice<'a> {
    /// Pairs every active, non-excluded balance with its bank and oracle price.
    pub fn load(
        lending_account: &'a LendingAccount,
        banks: &'a HashMap<Pubkey, Bank>,
        oracle_prices: &'a HashMap<Pubkey, OraclePrice>,
        excluded_banks: &[Pubkey],
    ) -> RiskResult<Vec<BankAccountWithPrice<'a>>> {
        lending_account
            .get_active_balances_iter()
            .filter(|balance| !excluded_banks.contains(&balance.bank_pk))
            .map(|balance| {
                let bank = banks
                    .get(&balance.bank_pk)
                    .ok_or(RiskError::BankNotFound(balance.bank_pk))?;
                let price = oracle_prices
                    .get(&balance.bank_pk)
                    .ok_or(RiskError::PriceNotFound(balance.bank_pk))?;

                Ok(BankAccountWithPrice {
                    bank_pk: balance.bank_pk,
                    bank,
                    price,
                    balance,
                })
            })
            .collect()
    }

    #[inline(always)]
    /// Calculate the value of the assets and liabilities of the account in the form of (assets, liabilities)
    ///
    /// Nuances:
    /// 1. Maintenance and equity requirements are calculated using the real time price.
    /// 2. Initial requirement is calculated using the time weighted price.
    /// 3. Initial requirement is discounted by the initial discount, if enabled and the usd limit is exceeded.
    /// 4. Assets are only calculated for collateral risk tier.
    pub fn calc_weighted_assets_and_liabilities_values(
        &self,
        requirement_type: RequirementType,
    ) -> RiskResult<(I80F48, I80F48)> {
        self.calc_weighted_values(requirement_type, true)
    }

    /// Same as [`Self::calc_weighted_assets_and_liabilities_values`], valued at the plain
    /// oracle price instead of the confidence-adjusted bounds.
    pub fn calc_weighted_assets_and_liabilities_values_without_bias(
        &self,
        requirement_type: RequirementType,
    ) -> RiskResult<(I80F48, I80F48)> {
        self.calc_weighted_values(requirement_type, false)
    }

    fn calc_weighted_values(
        &self,
        requirement_type: RequirementType,
        biased: bool,
    ) -> RiskResult<(I80F48, I80F48)> {
        match self.balance.get_side() {
            Some(BalanceSide::Assets) => Ok((
                self.calc_weighted_assets(requirement_type, biased.then_some(PriceBias::Low))?,
                I80F48::ZERO,
            )),
            Some(BalanceSide::Liabilities) => Ok((
                I80F48::ZERO,
                self.calc_weighted_liabs(requirement_type, biased.then_some(PriceBias::High))?,
            )),
            None => Ok((I80F48::ZERO, I80F48::ZERO)),
        }
    }

    #[inline(always)]
    fn calc_weighted_assets(
        &self,
        requirement_type: RequirementType,
        bias: Option<PriceBias>,
    ) -> RiskResult<I80F48> {
        match self.bank.config.risk_tier {
            RiskTier::Collateral => {
                let mut asset_weight = self
                    .bank
                    .config
                    .get_weight(requirement_type, BalanceSide::Assets);

                let price = self
                    .price
                    .get_price_of_type(requirement_type.get_oracle_price_type(), bias);

                if matches!(requirement_type, RequirementType::Initial) {
                    if let Some(discount) = self.bank.maybe_get_asset_weight_init_discount(price)? {
                        asset_weight = asset_weight
                            .checked_mul(discount)
                            .ok_or_else(math_error!())?;
                    }
                }

                calc_value(
                    self.bank.get_asset_amount(self.balance.asset_shares.into())?,
                    price,
                    self.bank.mint_decimals,
                    Some(asset_weight),
                )
            }
            RiskTier::Isolated => Ok(I80F48::ZERO),
        }
    }

    #[inline(always)]
    fn calc_weighted_liabs(
        &self,
        requirement_type: RequirementType,
        bias: Option<PriceBias>,
    ) -> RiskResult<I80F48> {
        let liability_weight = self
            .bank
            .config
            .get_weight(requirement_type, BalanceSide::Liabilities);

        let price = self
            .price
            .get_price_of_type(requirement_type.get_oracle_price_type(), bias);

        calc_value(
            self.bank
                .get_liability_amount(self.balance.liability_shares.into())?,
            price,
            self.bank.mint_decimals,
            Some(liability_weight),
        )
    }

    #[inline]
    pub fn is_empty(&self, side: BalanceSide) -> bool {
        self.balance.is_empty(side)
    }
}

/// Calculate the value of an asset, given its quantity with a decimal exponent, and a price with a decimal exponent, and an optional weight.
#[inline]
pub fn calc_value(
    amount: I80F48,
    price: I80F48,
    mint_decimals: u8,
    weight: Option<I80F48>,
) -> RiskResult<I80F48> {
    if amount == I80F48::ZERO {
        return Ok(I80F48::ZERO);
    }

    let scaling_factor = exp_10(mint_decimals)?;

    let weighted_asset_amount = if let Some(weight) = weight {
        amount.checked_mul(weight).ok_or_else(math_error!())?
    } else {
        amount
    };

    debug!(
        "weighted_asset_qt: {}, price: {}, expo: {}",
        weighted_asset_amount,
        price,
        mint_decimals
    );

    let value = weighted_asset_amount
        .checked_mul(price)
        .ok_or_else(math_error!())?
        .checked_div(scaling_factor)
        .ok_or_else(math_error!())?;

    Ok(value)
}

#[inline]
pub fn calc_amount(value: I80F48, price: I80F48, mint_decimals: u8) -> RiskResult<I80F48> {
    let scaling_factor = exp_10(mint_decimals)?;

    let qt = value
        .checked_mul(scaling_factor)
        .ok_or_else(math_error!())?
        .checked_div(price)
        .ok_or_else(math_error!())?;

    Ok(qt)
}

pub trait BalanceImpl {
    fn change_asset_shares(&mut self, delta: I80F48) -> RiskResult;
    fn change_liability_shares(&mut self, delta: I80F48) -> RiskResult;
    fn close(&mut self) -> RiskResult;
}

impl BalanceImpl for Balance {
    fn change_asset_shares(&mut self, delta: I80F48) -> RiskResult {
        let asset_shares: I80F48 = self.asset_shares.into();
        self.asset_shares = asset_shares
            .checked_add(delta)
            .ok_or_else(math_error!())?
            .into();
        Ok(())
    }

    fn change_liability_shares(&mut self, delta: I80F48) -> RiskResult {
        let liability_shares: I80F48 = self.liability_shares.into();
        self.liability_shares = liability_shares
            .checked_add(delta)
            .ok_or_else(math_error!())?
            .into();
        Ok(())
    }

    fn close(&mut self) -> RiskResult {
        check!(
            I80F48::from(self.emissions_outstanding) < I80F48::ONE,
            RiskError::CannotCloseOutstandingEmissions
        );

        *self = Self::empty_deactivated();

        Ok(())
    }
}

#[derive(Debug)]
pub struct BankAccountWrapper<'a> {
    pub balance: &'a mut Balance,
    pub bank: &'a mut Bank,
    current_timestamp: i64,
}

impl<'a> BankAccountWrapper<'a> {
    // Find existing user lending account balance by bank address.
    pub fn find(
        bank_pk: &Pubkey,
        bank: &'a mut Bank,
        lending_account: &'a mut LendingAccount,
        current_timestamp: i64,
    ) -> RiskResult<BankAccountWrapper<'a>> {
        let balance = lending_account
            .balances
            .iter_mut()
            .find(|balance| balance.active && balance.bank_pk.eq(bank_pk))
            .ok_or(RiskError::LendingAccountBalanceNotFound)?;

        Ok(Self {
            balance,
            bank,
            current_timestamp,
        })
    }

    // Find existing user lending account balance by bank address.
    // Create it if not found.
    pub fn find_or_create(
        bank_pk: &Pubkey,
        bank: &'a mut Bank,
        lending_account: &'a mut LendingAccount,
        current_timestamp: i64,
    ) -> RiskResult<BankAccountWrapper<'a>> {
        let balance_index = lending_account
            .balances
            .iter()
            .position(|balance| balance.active && balance.bank_pk.eq(bank_pk));

        let index = match balance_index {
            Some(balance_index) => balance_index,
            None => {
                let empty_index = lending_account
                    .get_first_empty_balance()
                    .ok_or(RiskError::LendingAccountBalanceSlotsFull)?;

                lending_account.balances[empty_index] =
                    Balance::new_active(*bank_pk, timestamp_to_u64(current_timestamp)?);

                empty_index
            }
        };

        let balance = lending_account
            .balances
            .get_mut(index)
            .ok_or(RiskError::LendingAccountBalanceNotFound)?;

        Ok(Self {
            balance,
            bank,
            current_timestamp,
        })
    }

    // ------------ Borrow / Lend primitives

    /// Deposit an asset, will repay any outstanding liabilities.
    pub fn deposit(&mut self, amount: I80F48) -> RiskResult {
        self.increase_balance_internal(amount, BalanceIncreaseType::Any)
    }

    /// Repay a liability, will error if there is not enough liability - depositing is not allowed.
    pub fn repay(&mut self, amount: I80F48) -> RiskResult {
        self.increase_balance_internal(amount, BalanceIncreaseType::RepayOnly)
    }

    /// Withdraw an asset, will error if there is not enough asset - borrowing is not allowed.
    pub fn withdraw(&mut self, amount: I80F48) -> RiskResult {
        self.decrease_balance_internal(amount, BalanceDecreaseType::WithdrawOnly)
    }

    /// Incur a borrow, will withdraw any existing assets.
    pub fn borrow(&mut self, amount: I80F48) -> RiskResult {
        self.decrease_balance_internal(amount, BalanceDecreaseType::Any)
    }

    // ------------ Hybrid operations for seamless repay + deposit / withdraw + borrow

    pub fn increase_balance(&mut self, amount: I80F48) -> RiskResult {
        self.increase_balance_internal(amount, BalanceIncreaseType::Any)
    }

    pub fn increase_balance_in_liquidation(&mut self, amount: I80F48) -> RiskResult {
        self.increase_balance_internal(amount, BalanceIncreaseType::BypassDepositLimit)
    }

    pub fn decrease_balance(&mut self, amount: I80F48) -> RiskResult {
        self.decrease_balance_internal(amount, BalanceDecreaseType::Any)
    }

    /// Bypasses borrow limits so liquidations can happen in banks with maxed out borrows.
    pub fn decrease_balance_in_liquidation(&mut self, amount: I80F48) -> RiskResult {
        self.decrease_balance_internal(amount, BalanceDecreaseType::BypassBorrowLimit)
    }

    /// Withdraw existing asset in full - will error if there is no asset.
    pub fn withdraw_all(&mut self) -> RiskResult<u64> {
        self.claim_emissions(timestamp_to_u64(self.current_timestamp)?)?;

        let balance = &mut self.balance;
        let bank = &mut self.bank;

        bank.assert_operational_mode(None)?;

        let total_asset_shares: I80F48 = balance.asset_shares.into();
        let current_asset_amount = bank.get_asset_amount(total_asset_shares)?;
        let current_liability_amount =
            bank.get_liability_amount(balance.liability_shares.into())?;

        debug!("Withdrawing all: {}", current_asset_amount);

        check!(
            current_asset_amount.is_positive_with_tolerance(ZERO_AMOUNT_THRESHOLD),
            RiskError::NoAssetFound
        );

        check!(
            current_liability_amount.is_zero_with_tolerance(ZERO_AMOUNT_THRESHOLD),
            RiskError::NoAssetFound
        );

        balance.close()?;
        bank.change_asset_shares(-total_asset_shares, false)?;

        bank.check_utilization_ratio()?;

        let withdraw_amount = current_asset_amount
            .checked_floor()
            .ok_or_else(math_error!())?;

        bank.collected_insurance_fees_outstanding = {
            current_asset_amount
                .checked_sub(withdraw_amount)
                .ok_or_else(math_error!())?
                .checked_add(bank.collected_insurance_fees_outstanding.into())
                .ok_or_else(math_error!())?
                .into()
        };

        withdraw_amount.checked_to_num().ok_or_else(math_error!())
    }

    /// Repay existing liability in full - will error if there is no liability.
    pub fn repay_all(&mut self) -> RiskResult<u64> {
        self.claim_emissions(timestamp_to_u64(self.current_timestamp)?)?;

        let balance = &mut self.balance;
        let bank = &mut self.bank;

        bank.assert_operational_mode(None)?;

        let total_liability_shares: I80F48 = balance.liability_shares.into();
        let current_liability_amount = bank.get_liability_amount(total_liability_shares)?;
        let current_asset_amount = bank.get_asset_amount(balance.asset_shares.into())?;

        debug!("Repaying all: {}", current_liability_amount);

        check!(
            current_liability_amount.is_positive_with_tolerance(ZERO_AMOUNT_THRESHOLD),
            RiskError::NoLiabilityFound
        );

        check!(
            current_asset_amount.is_zero_with_tolerance(ZERO_AMOUNT_THRESHOLD),
            RiskError::NoLiabilityFound
        );

        balance.close()?;
        bank.change_liability_shares(-total_liability_shares, false)?;

        let repay_amount = current_liability_amount
            .checked_ceil()
            .ok_or_else(math_error!())?;

        bank.collected_insurance_fees_outstanding = {
            repay_amount
                .checked_sub(current_liability_amount)
                .ok_or_else(math_error!())?
                .checked_add(bank.collected_insurance_fees_outstanding.into())
                .ok_or_else(math_error!())?
                .into()
        };

        repay_amount.checked_to_num().ok_or_else(math_error!())
    }

    // ------------ Internal accounting logic

    fn increase_balance_internal(
        &mut self,
        balance_delta: I80F48,
        operation_type: BalanceIncreaseType,
    ) -> RiskResult {
        debug!(
            "Balance increase: {} (type: {:?})",
            balance_delta,
            operation_type
        );

        self.claim_emissions(timestamp_to_u64(self.current_timestamp)?)?;

        let balance = &mut self.balance;
        let bank = &mut self.bank;

        let current_liability_shares: I80F48 = balance.liability_shares.into();
        let current_liability_amount = bank.get_liability_amount(current_liability_shares)?;

        let (liability_amount_decrease, asset_amount_increase) = (
            min(current_liability_amount, balance_delta),
            max(
                balance_delta
                    .checked_sub(current_liability_amount)
                    .ok_or_else(math_error!())?,
                I80F48::ZERO,
            ),
        );

        match operation_type {
            BalanceIncreaseType::RepayOnly => {
                check!(
                    asset_amount_increase.is_zero_with_tolerance(ZERO_AMOUNT_THRESHOLD),
                    RiskError::OperationRepayOnly
                );
            }
            BalanceIncreaseType::DepositOnly => {
                check!(
                    liability_amount_decrease.is_zero_with_tolerance(ZERO_AMOUNT_THRESHOLD),
                    RiskError::OperationDepositOnly
                );
            }
            BalanceIncreaseType::Any | BalanceIncreaseType::BypassDepositLimit => {}
        }

        {
            let is_asset_amount_increasing =
                asset_amount_increase.is_positive_with_tolerance(ZERO_AMOUNT_THRESHOLD);
            bank.assert_operational_mode(Some(is_asset_amount_increasing))?;
        }

        let asset_shares_increase = bank.get_asset_shares(asset_amount_increase)?;
        balance.change_asset_shares(asset_shares_increase)?;
        bank.change_asset_shares(
            asset_shares_increase,
            matches!(operation_type, BalanceIncreaseType::BypassDepositLimit),
        )?;

        let liability_shares_decrease = bank.get_liability_shares(liability_amount_decrease)?;
        balance.change_liability_shares(-liability_shares_decrease)?;
        bank.change_liability_shares(-liability_shares_decrease, true)?;

        Ok(())
    }

    fn decrease_balance_internal(
        &mut self,
        balance_delta: I80F48,
        operation_type: BalanceDecreaseType,
    ) -> RiskResult {
        debug!(
            "Balance decrease: {} of (type: {:?})",
            balance_delta,
            operation_type
        );

        self.claim_emissions(timestamp_to_u64(self.current_timestamp)?)?;

        let balance = &mut self.balance;
        let bank = &mut self.bank;

        let current_asset_shares: I80F48 = balance.asset_shares.into();
        let current_asset_amount = bank.get_asset_amount(current_asset_shares)?;

        let (asset_amount_decrease, liability_amount_increase) = (
            min(current_asset_amount, balance_delta),
            max(
                balance_delta
                    .checked_sub(current_asset_amount)
                    .ok_or_else(math_error!())?,
                I80F48::ZERO,
            ),
        );

        match operation_type {
            BalanceDecreaseType::WithdrawOnly => {
                check!(
                    liability_amount_increase.is_zero_with_tolerance(ZERO_AMOUNT_THRESHOLD),
                    RiskError::OperationWithdrawOnly
                );
            }
            BalanceDecreaseType::BorrowOnly => {
                check!(
                    asset_amount_decrease.is_zero_with_tolerance(ZERO_AMOUNT_THRESHOLD),
                    RiskError::OperationBorrowOnly
                );
            }
            BalanceDecreaseType::Any | BalanceDecreaseType::BypassBorrowLimit => {}
        }

        {
            let is_liability_amount_increasing =
                liability_amount_increase.is_positive_with_tolerance(ZERO_AMOUNT_THRESHOLD);
            bank.assert_operational_mode(Some(is_liability_amount_increasing))?;
        }

        let asset_shares_decrease = bank.get_asset_shares(asset_amount_decrease)?;
        balance.change_asset_shares(-asset_shares_decrease)?;
        bank.change_asset_shares(-asset_shares_decrease, false)?;

        let liability_shares_increase = bank.get_liability_shares(liability_amount_increase)?;
        balance.change_liability_shares(liability_shares_increase)?;
        bank.change_liability_shares(
            liability_shares_increase,
            matches!(operation_type, BalanceDecreaseType::BypassBorrowLimit),
        )?;

        bank.check_utilization_ratio()?;

        Ok(())
    }

    /// Claim any unclaimed emissions and add them to the outstanding emissions amount.
    pub fn claim_emissions(&mut self, current_timestamp: u64) -> RiskResult {
        if let Some(balance_amount) = match (
            self.balance.get_side(),
            self.bank.get_flag(EMISSIONS_FLAG_LENDING_ACTIVE),
            self.bank.get_flag(EMISSIONS_FLAG_BORROW_ACTIVE),
        ) {
            (Some(BalanceSide::Assets), true, _) => Some(
                self.bank
                    .get_asset_amount(self.balance.asset_shares.into())?,
            ),
            (Some(BalanceSide::Liabilities), _, true) => Some(
                self.bank
                    .get_liability_amount(self.balance.liability_shares.into())?,
            ),
            _ => None,
        } {
            let emissions = calc_emissions(
                balance_amount,
                self.bank.mint_decimals,
                self.bank.emissions_rate,
                self.balance.last_update,
                current_timestamp,
            )?;

            let emissions_real = min(emissions, I80F48::from(self.bank.emissions_remaining));

            debug!(
                "Emitting {} ({} calculated), outstanding {}",
                emissions_real,
                emissions,
                I80F48::from(self.balance.emissions_outstanding)
            );

            self.balance.emissions_outstanding = {
                I80F48::from(self.balance.emissions_outstanding)
                    .checked_add(emissions_real)
                    .ok_or_else(math_error!())?
            }
            .into();
            self.bank.emissions_remaining = {
                I80F48::from(self.bank.emissions_remaining)
                    .checked_sub(emissions_real)
                    .ok_or_else(math_error!())?
            }
            .into();
        }

        self.balance.last_update = current_timestamp;

        Ok(())
    }
}

/// Emissions accrued by `balance_amount` native units between `last_update` and
/// `current_timestamp`, uncapped by the bank's remaining emissions.
pub fn calc_emissions(
    balance_amount: I80F48,
    mint_decimals: u8,
    emissions_rate: u64,
    last_update: u64,
    current_timestamp: u64,
) -> RiskResult<I80F48> {
    let last_update = if last_update < MIN_EMISSIONS_START_TIME {
        current_timestamp
    } else {
        last_update
    };
    let period = I80F48::from_num(
        current_timestamp
            .checked_sub(last_update)
            .ok_or_else(math_error!())?,
    );
    let emissions_rate = I80F48::from_num(emissions_rate);

    period
        .checked_mul(balance_amount)
        .ok_or_else(math_error!())?
        .checked_div(exp_10(mint_decimals)?)
        .ok_or_else(math_error!())?
        .checked_mul(emissions_rate)
        .ok_or_else(math_error!())?
        .checked_div(SECONDS_PER_YEAR)
        .ok_or_else(math_error!())
}

fn timestamp_to_u64(timestamp: i64) -> RiskResult<u64> {
    u64::try_from(timestamp).map_err(|_| RiskError::MathError)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use fixed_macro::types::I80F48;
    use fixtures::banks::{test_bank, TestBank};
    use marginfi_risk_types::types::{
        BankOperationalState, MarginfiAccount, MAX_LENDING_ACCOUNT_BALANCES,
    };

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_calc_asset_value() {
        assert_eq!(
            calc_value(I80F48!(10_000_000), I80F48!(1_000_000), 6, None).unwrap(),
            I80F48!(10_000_000)
        );

        assert_eq!(
            calc_value(I80F48!(1_000_000_000), I80F48!(10_000_000), 9, None).unwrap(),
            I80F48!(10_000_000)
        );

        assert_eq!(
            calc_value(I80F48!(1_000_000_000), I80F48!(10_000_000), 9, Some(I80F48!(0.5)))
                .unwrap(),
            I80F48!(5_000_000)
        );
    }

    #[test]
    fn calc_amount_inverts_value() {
        assert_eq!(
            calc_amount(I80F48!(300), I80F48!(150), 9).unwrap(),
            I80F48!(2_000_000_000)
        );
        assert!(calc_amount(I80F48!(1), I80F48::ZERO, 6).is_err());
    }

    #[test]
    fn deposit_repays_liability_first() {
        let bank_pk = Pubkey::new_from_seed(1);
        let mut bank = test_bank(TestBank::Usdc);
        bank.total_asset_shares = I80F48!(1_000_000_000).into();
        let mut account = MarginfiAccount::new(Pubkey::default(), Pubkey::default());

        {
            let mut wrapper = BankAccountWrapper::find_or_create(
                &bank_pk,
                &mut bank,
                &mut account.lending_account,
                NOW,
            )
            .unwrap();
            wrapper.borrow(I80F48!(50_000_000)).unwrap();
            wrapper.deposit(I80F48!(80_000_000)).unwrap();
        }

        let balance = account.lending_account.get_balance(&bank_pk).unwrap();
        assert_eq!(I80F48::from(balance.liability_shares), I80F48::ZERO);
        assert_eq!(I80F48::from(balance.asset_shares), I80F48!(30_000_000));
        assert_eq!(
            I80F48::from(bank.total_liability_shares),
            I80F48::ZERO
        );
    }

    #[test]
    fn repay_and_withdraw_only_touch_their_side() {
        let bank_pk = Pubkey::new_from_seed(1);
        let mut bank = test_bank(TestBank::Usdc);
        let mut account = MarginfiAccount::new(Pubkey::default(), Pubkey::default());

        let mut wrapper = BankAccountWrapper::find_or_create(
            &bank_pk,
            &mut bank,
            &mut account.lending_account,
            NOW,
        )
        .unwrap();
        wrapper.deposit(I80F48!(10_000_000)).unwrap();

        assert_eq!(
            wrapper.repay(I80F48!(1_000_000)),
            Err(RiskError::OperationRepayOnly)
        );
        assert_eq!(
            wrapper.withdraw(I80F48!(10_000_001)),
            Err(RiskError::OperationWithdrawOnly)
        );
        assert!(wrapper.withdraw(I80F48!(4_000_000)).is_ok());
    }

    #[test]
    fn borrow_is_blocked_by_utilization() {
        let bank_pk = Pubkey::new_from_seed(1);
        let mut bank = test_bank(TestBank::Usdc);
        let mut account = MarginfiAccount::new(Pubkey::default(), Pubkey::default());

        let mut wrapper = BankAccountWrapper::find_or_create(
            &bank_pk,
            &mut bank,
            &mut account.lending_account,
            NOW,
        )
        .unwrap();
        wrapper.deposit(I80F48!(10_000_000)).unwrap();

        // withdrawing the deposit and borrowing on top leaves the bank with more debt than assets
        assert_eq!(
            wrapper.borrow(I80F48!(15_000_000)),
            Err(RiskError::IllegalUtilizationRatio)
        );
    }

    #[test]
    fn withdraw_all_closes_balance_and_floors() {
        let bank_pk = Pubkey::new_from_seed(1);
        let mut bank = test_bank(TestBank::Usdc);
        let mut account = MarginfiAccount::new(Pubkey::default(), Pubkey::default());

        let withdrawn = {
            let mut wrapper = BankAccountWrapper::find_or_create(
                &bank_pk,
                &mut bank,
                &mut account.lending_account,
                NOW,
            )
            .unwrap();
            wrapper.deposit(I80F48!(10_000_000.75)).unwrap();
            wrapper.withdraw_all().unwrap()
        };

        assert_eq!(withdrawn, 10_000_000);
        assert!(account.lending_account.get_balance(&bank_pk).is_none());
        assert_eq!(
            I80F48::from(bank.collected_insurance_fees_outstanding),
            I80F48!(0.75)
        );
    }

    #[test]
    fn repay_all_requires_liability() {
        let bank_pk = Pubkey::new_from_seed(1);
        let mut bank = test_bank(TestBank::Usdc);
        bank.total_asset_shares = I80F48!(1_000_000_000).into();
        let mut account = MarginfiAccount::new(Pubkey::default(), Pubkey::default());

        let mut wrapper = BankAccountWrapper::find_or_create(
            &bank_pk,
            &mut bank,
            &mut account.lending_account,
            NOW,
        )
        .unwrap();
        wrapper.deposit(I80F48!(1_000)).unwrap();
        assert_eq!(wrapper.repay_all(), Err(RiskError::NoLiabilityFound));

        wrapper.withdraw_all().unwrap();
    }

    #[test]
    fn paused_bank_rejects_deposits() {
        let bank_pk = Pubkey::new_from_seed(1);
        let mut bank = test_bank(TestBank::Usdc);
        bank.config.operational_state = BankOperationalState::Paused;
        let mut account = MarginfiAccount::new(Pubkey::default(), Pubkey::default());

        let mut wrapper = BankAccountWrapper::find_or_create(
            &bank_pk,
            &mut bank,
            &mut account.lending_account,
            NOW,
        )
        .unwrap();
        assert_eq!(wrapper.deposit(I80F48!(1)), Err(RiskError::BankPaused));
    }

    #[test]
    fn full_account_has_no_free_slot() {
        let mut bank = test_bank(TestBank::Usdc);
        let mut account = MarginfiAccount::new(Pubkey::default(), Pubkey::default());
        for i in 0..MAX_LENDING_ACCOUNT_BALANCES {
            account.lending_account.balances[i] =
                Balance::new_active(Pubkey::new_from_seed(100 + i as u8), 0);
        }

        let result = BankAccountWrapper::find_or_create(
            &Pubkey::new_from_seed(1),
            &mut bank,
            &mut account.lending_account,
            NOW,
        );
        assert_matches!(result, Err(RiskError::LendingAccountBalanceSlotsFull));

        let missing = BankAccountWrapper::find(
            &Pubkey::new_from_seed(1),
            &mut bank,
            &mut account.lending_account,
            NOW,
        );
        assert_matches!(missing, Err(RiskError::LendingAccountBalanceNotFound));
    }

    #[test]
    fn lending_emissions_accrue() {
        let bank_pk = Pubkey::new_from_seed(1);
        let mut bank = test_bank(TestBank::Usdc);
        bank.flags = EMISSIONS_FLAG_LENDING_ACTIVE;
        // 1 emission token per whole deposited token per year
        bank.emissions_rate = 1;
        bank.emissions_remaining = I80F48!(1_000_000).into();
        let mut account = MarginfiAccount::new(Pubkey::default(), Pubkey::default());

        let start = NOW as u64;
        let year = 31_536_000u64;

        let mut wrapper = BankAccountWrapper::find_or_create(
            &bank_pk,
            &mut bank,
            &mut account.lending_account,
            NOW,
        )
        .unwrap();
        wrapper.deposit(I80F48!(100_000_000)).unwrap();

        wrapper.claim_emissions(start + year).unwrap();
        assert_eq!(
            I80F48::from(wrapper.balance.emissions_outstanding),
            I80F48!(100)
        );
        assert_eq!(I80F48::from(wrapper.bank.emissions_remaining), I80F48!(999_900));
    }

    #[test]
    fn outstanding_emissions_block_close() {
        let mut balance = Balance::new_active(Pubkey::new_from_seed(1), 0);
        balance.emissions_outstanding = I80F48!(2).into();
        assert_eq!(
            balance.close(),
            Err(RiskError::CannotCloseOutstandingEmissions)
        );

        balance.emissions_outstanding = I80F48!(0.5).into();
        assert!(balance.close().is_ok());
        assert!(!balance.active);
    }

    #[test]
    fn weighted_values_use_biased_prices() {
        let bank = test_bank(TestBank::Sol);
        let price = fixtures::prices::oracle_price(I80F48!(100), I80F48!(1));
        let mut balance = Balance::new_active(Pubkey::new_from_seed(2), 0);
        balance.asset_shares = I80F48!(1_000_000_000).into();

        let bank_account = BankAccountWithPrice {
            bank_pk: balance.bank_pk,
            bank: &bank,
            price: &price,
            balance: &balance,
        };

        let (assets, liabs) = bank_account
            .calc_weighted_assets_and_liabilities_values(RequirementType::Maintenance)
            .unwrap();
        // 1 SOL at the low price of 99, maintenance weight 0.9
        crate::assert_eq_with_tolerance!(assets, I80F48!(89.1), I80F48!(0.000001));
        assert_eq!(liabs, I80F48::ZERO);

        let (assets, _) = bank_account
            .calc_weighted_assets_and_liabilities_values_without_bias(RequirementType::Equity)
            .unwrap();
        assert_eq!(assets, I80F48!(100));
    }
}
