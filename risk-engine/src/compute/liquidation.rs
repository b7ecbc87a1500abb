use std::collections::HashMap;

use fixed::types::I80F48;
use fixed_macro::types::I80F48;
use marginfi_risk_types::{
    constants::LIQUIDATION_DISCOUNT,
    types::{BalanceSide, Bank, MarginfiAccount, OraclePrice, Pubkey},
};
use serde::{Deserialize, Serialize};

use crate::{
    compute::{
        account::{
            compute_balance_usd_value, compute_max_borrow_for_bank,
            compute_max_liquidatable_asset_amount, lookup,
        },
        bank::get_price,
    },
    debug,
    errors::RiskError,
    math_error,
    prelude::{BankAccountWrapper, RequirementType, RiskEngine},
    utils::ui_to_native,
    RiskResult,
};

/// Share of the liquidatable collateral actually seized, leaving room for swap slippage.
pub const LIQUIDATION_SLIPPAGE_FACTOR: I80F48 = I80F48!(0.75);
/// Liabilities worth less than this many dollars, or seizures of fewer collateral tokens, are
/// not worth liquidating.
pub const LIQUIDATION_DUST_THRESHOLD: I80F48 = I80F48!(0.1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationPlan {
    pub asset_bank: Pubkey,
    pub liability_bank: Pubkey,
    /// Collateral to seize, in UI units of the asset bank.
    pub asset_amount: I80F48,
    /// Collateral the liquidatee can lose before health is restored, in UI units.
    pub max_liquidatable_amount: I80F48,
    /// Collateral the liquidator can pay for with its borrowing power, in UI units.
    pub liquidator_capacity: I80F48,
    pub pre_liquidation_health: I80F48,
    pub post_liquidation_health: I80F48,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidationDecision {
    Liquidate(LiquidationPlan),
    /// Maintenance health is positive.
    Healthy,
    /// Nothing left to seize, the debt has to be handled as bad debt.
    Bankrupt,
    /// Unhealthy, but the liability or the seizable collateral is too small to bother.
    Dust,
}

/// Picks the liability and collateral to liquidate on `liquidatee` and sizes the seizure to what
/// both the liquidatee and the `liquidator` can bear.
///
/// The largest liability and the largest collateral, by USD value, are chosen. With
/// `exclude_isolated_banks`, banks whose deposits carry no initial weight are skipped on both
/// sides. The plan is simulated against the post-liquidation health rules before it is returned.
pub fn plan_liquidation(
    liquidatee: &MarginfiAccount,
    liquidator: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    exclude_isolated_banks: bool,
    current_timestamp: i64,
) -> RiskResult<LiquidationDecision> {
    let engine = RiskEngine::new(liquidatee, banks, oracle_prices)?;
    match engine.check_account_bankrupt() {
        Ok(()) => return Ok(LiquidationDecision::Bankrupt),
        Err(RiskError::AccountNotBankrupt) => {}
        Err(e) => return Err(e),
    }

    let Some((liability_bank_pk, liability_usd)) = largest_balance(
        liquidatee,
        banks,
        oracle_prices,
        BalanceSide::Liabilities,
        exclude_isolated_banks,
    )?
    else {
        return Ok(LiquidationDecision::Healthy);
    };

    let pre_liquidation_health =
        match engine.check_pre_liquidation_condition_and_get_account_health(&liability_bank_pk) {
            Ok(health) => health,
            Err(RiskError::IllegalLiquidation) => return Ok(LiquidationDecision::Healthy),
            Err(e) => return Err(e),
        };

    if liability_usd < LIQUIDATION_DUST_THRESHOLD {
        debug!("Largest liability is ${}, nothing to liquidate", liability_usd);
        return Ok(LiquidationDecision::Dust);
    }

    let Some((asset_bank_pk, _)) = largest_balance(
        liquidatee,
        banks,
        oracle_prices,
        BalanceSide::Assets,
        exclude_isolated_banks,
    )?
    else {
        return Ok(LiquidationDecision::Dust);
    };

    let max_liquidatable_amount = compute_max_liquidatable_asset_amount(
        liquidatee,
        banks,
        oracle_prices,
        &asset_bank_pk,
        &liability_bank_pk,
    )?;

    let (_, asset_price) = lookup(banks, oracle_prices, &asset_bank_pk)?;
    let (_, liability_price) = lookup(banks, oracle_prices, &liability_bank_pk)?;
    let asset_price = get_price(asset_price, None, RequirementType::Equity);
    let liability_price = get_price(liability_price, None, RequirementType::Equity);

    let liquidator_capacity =
        compute_max_borrow_for_bank(liquidator, banks, oracle_prices, &liability_bank_pk, None)?
            .checked_mul(liability_price)
            .ok_or_else(math_error!())?
            .checked_div(asset_price)
            .ok_or_else(math_error!())?;

    let asset_amount = max_liquidatable_amount
        .min(liquidator_capacity)
        .checked_mul(LIQUIDATION_SLIPPAGE_FACTOR)
        .ok_or_else(math_error!())?;

    debug!(
        "max liquidatable: {}, liquidator capacity: {}, seizing {}",
        max_liquidatable_amount,
        liquidator_capacity,
        asset_amount
    );

    if asset_amount < LIQUIDATION_DUST_THRESHOLD {
        return Ok(LiquidationDecision::Dust);
    }

    // Liability repaid for the seized collateral, net of the liquidation discount.
    let liability_amount = asset_amount
        .checked_mul(asset_price)
        .ok_or_else(math_error!())?
        .checked_mul(LIQUIDATION_DISCOUNT)
        .ok_or_else(math_error!())?
        .checked_div(liability_price)
        .ok_or_else(math_error!())?;

    let post_liquidation_health = simulate_liquidation(
        liquidatee,
        banks,
        oracle_prices,
        (&asset_bank_pk, asset_amount),
        (&liability_bank_pk, liability_amount),
        pre_liquidation_health,
        current_timestamp,
    )?;

    Ok(LiquidationDecision::Liquidate(LiquidationPlan {
        asset_bank: asset_bank_pk,
        liability_bank: liability_bank_pk,
        asset_amount,
        max_liquidatable_amount,
        liquidator_capacity,
        pre_liquidation_health,
        post_liquidation_health,
    }))
}

/// Active balance with the largest equity USD value on `side`.
fn largest_balance(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    side: BalanceSide,
    exclude_isolated_banks: bool,
) -> RiskResult<Option<(Pubkey, I80F48)>> {
    let mut largest: Option<(Pubkey, I80F48)> = None;

    for balance in account.lending_account.get_active_balances_iter() {
        let (bank, price) = lookup(banks, oracle_prices, &balance.bank_pk)?;
        if exclude_isolated_banks && I80F48::from(bank.config.asset_weight_init).is_zero() {
            continue;
        }

        let value = compute_balance_usd_value(balance, bank, price, RequirementType::Equity)?;
        let value = match side {
            BalanceSide::Assets => value.assets,
            BalanceSide::Liabilities => value.liabilities,
        };

        if value.is_positive() && largest.map_or(true, |(_, best)| value > best) {
            largest = Some((balance.bank_pk, value));
        }
    }

    Ok(largest)
}

/// Applies the seizure and repayment to copies of the account and banks, and checks the
/// resulting health the way the liquidation instruction would.
fn simulate_liquidation(
    liquidatee: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    (asset_bank_pk, asset_amount): (&Pubkey, I80F48),
    (liability_bank_pk, liability_amount): (&Pubkey, I80F48),
    pre_liquidation_health: I80F48,
    current_timestamp: i64,
) -> RiskResult<I80F48> {
    let mut account = *liquidatee;
    let mut banks = banks.clone();

    {
        let bank = banks
            .get_mut(asset_bank_pk)
            .ok_or(RiskError::BankNotFound(*asset_bank_pk))?;
        let native = I80F48::from_num(ui_to_native(asset_amount, bank.mint_decimals)?);
        BankAccountWrapper::find(
            asset_bank_pk,
            bank,
            &mut account.lending_account,
            current_timestamp,
        )?
        .withdraw(native)?;
    }

    {
        let bank = banks
            .get_mut(liability_bank_pk)
            .ok_or(RiskError::BankNotFound(*liability_bank_pk))?;
        let native = I80F48::from_num(ui_to_native(liability_amount, bank.mint_decimals)?);
        BankAccountWrapper::find(
            liability_bank_pk,
            bank,
            &mut account.lending_account,
            current_timestamp,
        )?
        .increase_balance_in_liquidation(native)?;
    }

    RiskEngine::new(&account, &banks, oracle_prices)?
        .check_post_liquidation_condition_and_get_account_health(
            liability_bank_pk,
            pre_liquidation_health,
        )
}
