use fixed::types::I80F48;
use marginfi_risk_types::{
    constants::SECONDS_PER_YEAR,
    types::{BalanceSide, Bank, OraclePrice, PriceBias},
};
use serde::{Deserialize, Serialize};

use crate::{
    math_error,
    prelude::{BankConfigImpl, BankImpl, RequirementType},
    state::{interest_rate::ComputedInterestRates, marginfi_account::calc_value},
    RiskResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingCapacity {
    /// `None` when the bank has no deposit limit.
    pub deposit_capacity: Option<I80F48>,
    /// `None` when the bank has no borrow limit.
    pub borrow_capacity: Option<I80F48>,
}

/// Asset weight for `requirement_type`, with the initial weight scaled down once the bank's
/// deposits exceed its USD init limit.
pub fn get_asset_weight(
    bank: &Bank,
    requirement_type: RequirementType,
    oracle_price: &OraclePrice,
) -> RiskResult<I80F48> {
    let weight = bank
        .config
        .get_weight(requirement_type, BalanceSide::Assets);

    if !matches!(requirement_type, RequirementType::Initial) {
        return Ok(weight);
    }

    let lowest_price = oracle_price.get_price_of_type(
        RequirementType::Equity.get_oracle_price_type(),
        Some(PriceBias::Low),
    );

    match bank.maybe_get_asset_weight_init_discount(lowest_price)? {
        Some(discount) => weight.checked_mul(discount).ok_or_else(math_error!()),
        None => Ok(weight),
    }
}

pub fn get_liability_weight(bank: &Bank, requirement_type: RequirementType) -> I80F48 {
    bank.config
        .get_weight(requirement_type, BalanceSide::Liabilities)
}

pub fn get_price(
    oracle_price: &OraclePrice,
    bias: Option<PriceBias>,
    requirement_type: RequirementType,
) -> I80F48 {
    oracle_price.get_price_of_type(requirement_type.get_oracle_price_type(), bias)
}

pub fn compute_asset_usd_value(
    bank: &Bank,
    oracle_price: &OraclePrice,
    asset_shares: I80F48,
    requirement_type: RequirementType,
    bias: Option<PriceBias>,
) -> RiskResult<I80F48> {
    calc_value(
        bank.get_asset_amount(asset_shares)?,
        get_price(oracle_price, bias, requirement_type),
        bank.mint_decimals,
        Some(get_asset_weight(bank, requirement_type, oracle_price)?),
    )
}

pub fn compute_liability_usd_value(
    bank: &Bank,
    oracle_price: &OraclePrice,
    liability_shares: I80F48,
    requirement_type: RequirementType,
    bias: Option<PriceBias>,
) -> RiskResult<I80F48> {
    calc_value(
        bank.get_liability_amount(liability_shares)?,
        get_price(oracle_price, bias, requirement_type),
        bank.mint_decimals,
        Some(get_liability_weight(bank, requirement_type)),
    )
}

/// Net USD value held by the bank, deposits minus borrows at the plain oracle price.
pub fn compute_tvl(bank: &Bank, oracle_price: &OraclePrice) -> RiskResult<I80F48> {
    let deposits = compute_asset_usd_value(
        bank,
        oracle_price,
        bank.total_asset_shares.into(),
        RequirementType::Equity,
        None,
    )?;
    let borrows = compute_liability_usd_value(
        bank,
        oracle_price,
        bank.total_liability_shares.into(),
        RequirementType::Equity,
        None,
    )?;

    deposits.checked_sub(borrows).ok_or_else(math_error!())
}

pub fn compute_utilization_rate(bank: &Bank) -> RiskResult<I80F48> {
    bank.compute_utilization_rate()
}

pub fn compute_interest_rates(bank: &Bank) -> RiskResult<ComputedInterestRates> {
    bank.compute_interest_rates()
}

/// Room left under the deposit and borrow limits, in native units.
///
/// Interest accrued since the bank's last update is not yet reflected in its share values, so
/// twice the pending interest is held back from each capacity.
pub fn compute_remaining_capacity(
    bank: &Bank,
    current_timestamp: i64,
) -> RiskResult<RemainingCapacity> {
    let total_deposits = bank.get_total_asset_amount()?;
    let total_borrows = bank.get_total_liability_amount()?;

    let elapsed = I80F48::from_num(current_timestamp.saturating_sub(bank.last_update).max(0));
    let ComputedInterestRates {
        lending_rate_apr,
        borrowing_rate_apr,
        ..
    } = bank.compute_interest_rates()?;

    let pending_interest = |apr: I80F48, total: I80F48| -> RiskResult<I80F48> {
        apr.checked_mul(elapsed)
            .ok_or_else(math_error!())?
            .checked_div(SECONDS_PER_YEAR)
            .ok_or_else(math_error!())?
            .checked_mul(total)
            .ok_or_else(math_error!())?
            .checked_mul(I80F48::from_num(2))
            .ok_or_else(math_error!())
    };

    let deposit_capacity = if bank.config.is_deposit_limit_active() {
        let room = (I80F48::from_num(bank.config.deposit_limit) - total_deposits).max(I80F48::ZERO);
        Some(room - pending_interest(lending_rate_apr, total_deposits)?)
    } else {
        None
    };

    let borrow_capacity = if bank.config.is_borrow_limit_active() {
        let room = (I80F48::from_num(bank.config.borrow_limit) - total_borrows).max(I80F48::ZERO);
        Some(room - pending_interest(borrowing_rate_apr, total_borrows)?)
    } else {
        None
    };

    Ok(RemainingCapacity {
        deposit_capacity,
        borrow_capacity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_with_tolerance;
    use fixed_macro::types::I80F48;
    use fixtures::{
        banks::{test_bank, test_bank_with_liquidity, TestBank},
        prices::oracle_price,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn tvl_nets_borrows_out() {
        // 1000 SOL deposited, 400 borrowed
        let bank = test_bank_with_liquidity(TestBank::Sol, 1_000_000_000_000, 400_000_000_000);
        let price = oracle_price(I80F48!(20), I80F48!(0.5));

        assert_eq!(compute_tvl(&bank, &price).unwrap(), I80F48!(12_000));
    }

    #[test]
    fn init_weight_is_discounted_over_usd_limit() {
        let mut bank = test_bank_with_liquidity(TestBank::Sol, 1_000_000_000_000, 0);
        bank.config.total_asset_value_init_limit = 10_000;
        let price = oracle_price(I80F48!(20), I80F48::ZERO);

        // 1000 SOL at $20 is twice the limit
        assert_eq_with_tolerance!(
            get_asset_weight(&bank, RequirementType::Initial, &price).unwrap(),
            I80F48!(0.4),
            I80F48!(0.000001)
        );
        assert_eq_with_tolerance!(
            get_asset_weight(&bank, RequirementType::Maintenance, &price).unwrap(),
            I80F48!(0.9),
            I80F48!(0.000001)
        );
    }

    #[test]
    fn capacity_is_unbounded_without_limits() {
        let mut bank = test_bank(TestBank::Usdc);
        bank.config.deposit_limit = 0;
        bank.config.borrow_limit = 0;

        let capacity = compute_remaining_capacity(&bank, 0).unwrap();
        assert_eq!(capacity.deposit_capacity, None);
        assert_eq!(capacity.borrow_capacity, None);
    }

    #[test]
    fn capacity_holds_back_pending_interest() {
        let mut bank = test_bank_with_liquidity(TestBank::Usdc, 1_000_000, 500_000);
        bank.config.deposit_limit = 2_000_000;
        bank.config.borrow_limit = 600_000;

        let fresh = compute_remaining_capacity(&bank, 0).unwrap();
        assert_eq!(fresh.deposit_capacity, Some(I80F48!(1_000_000)));
        assert_eq!(fresh.borrow_capacity, Some(I80F48!(100_000)));

        // half a year at ur 0.5: lenders 30% apr, borrowers 60% apr
        let later = compute_remaining_capacity(&bank, 15_768_000).unwrap();
        assert_eq_with_tolerance!(
            later.deposit_capacity.unwrap(),
            I80F48!(700_000),
            I80F48!(0.01)
        );
        assert_eq_with_tolerance!(
            later.borrow_capacity.unwrap(),
            I80F48!(-200_000),
            I80F48!(0.01)
        );
    }
}
