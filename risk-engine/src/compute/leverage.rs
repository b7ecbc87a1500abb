use fixed::types::I80F48;
use fixed_macro::types::I80F48;
use marginfi_risk_types::types::{Bank, OraclePrice, PriceBias};
use serde::{Deserialize, Serialize};

use crate::{
    check,
    compute::bank::get_price,
    errors::RiskError,
    math_error,
    prelude::RequirementType,
    utils::ui_to_native,
    RiskResult,
};

const BPS_DENOMINATOR: I80F48 = I80F48!(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxLeverage {
    /// `None` when the deposit is worth at least the borrow it backs, so looping never hits the
    /// initial requirement.
    pub max_leverage: Option<I80F48>,
    pub ltv: I80F48,
}

/// Amounts, in UI units, of a looped position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopingParams {
    pub total_deposit_amount: I80F48,
    pub borrow_amount: I80F48,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustedLoopingParams {
    pub deposit_amount: I80F48,
    pub borrow_amount: I80F48,
    pub borrow_amount_native: u64,
}

/// Leverage reached by depositing into `deposit_bank` and borrowing from `borrow_bank` until
/// the initial requirement is met: `1 / (1 - ltv)`.
pub fn compute_max_leverage(deposit_bank: &Bank, borrow_bank: &Bank) -> RiskResult<MaxLeverage> {
    let asset_weight_init: I80F48 = deposit_bank.config.asset_weight_init.into();
    let liability_weight_init: I80F48 = borrow_bank.config.liability_weight_init.into();

    let ltv = asset_weight_init
        .checked_div(liability_weight_init)
        .ok_or_else(math_error!())?;

    let max_leverage = if ltv >= I80F48::ONE {
        None
    } else {
        Some(
            I80F48::ONE
                .checked_div(I80F48::ONE - ltv)
                .ok_or_else(math_error!())?,
        )
    };

    Ok(MaxLeverage { max_leverage, ltv })
}

pub fn compute_looping_params(
    principal: I80F48,
    target_leverage: I80F48,
    deposit_bank: &Bank,
    borrow_bank: &Bank,
    deposit_price: &OraclePrice,
    borrow_price: &OraclePrice,
) -> RiskResult<LoopingParams> {
    let MaxLeverage { max_leverage, .. } = compute_max_leverage(deposit_bank, borrow_bank)?;

    check!(
        target_leverage >= I80F48::ONE,
        RiskError::InvalidLeverage(format!(
            "target leverage {target_leverage} needs to be at least 1"
        ))
    );
    if let Some(max_leverage) = max_leverage {
        check!(
            target_leverage <= max_leverage,
            RiskError::InvalidLeverage(format!(
                "target leverage {target_leverage} exceeds max leverage for banks {max_leverage}"
            ))
        );
    }

    let total_deposit_amount = principal
        .checked_mul(target_leverage)
        .ok_or_else(math_error!())?;
    let additional_deposit_amount = total_deposit_amount
        .checked_sub(principal)
        .ok_or_else(math_error!())?;

    let deposit_lowest = get_price(deposit_price, Some(PriceBias::Low), RequirementType::Initial);
    let borrow_highest = get_price(borrow_price, Some(PriceBias::High), RequirementType::Initial);

    let borrow_amount = additional_deposit_amount
        .checked_mul(deposit_lowest)
        .ok_or_else(math_error!())?
        .checked_div(borrow_highest)
        .ok_or_else(math_error!())?;

    Ok(LoopingParams {
        total_deposit_amount,
        borrow_amount,
    })
}

/// Looping params for a principal reduced by the swap slippage buffer,
/// `amount * leverage * slippage_bps / 10000`.
pub fn get_looping_params(
    amount: I80F48,
    target_leverage: I80F48,
    slippage_bps: u16,
    deposit_bank: &Bank,
    borrow_bank: &Bank,
    deposit_price: &OraclePrice,
    borrow_price: &OraclePrice,
) -> RiskResult<AdjustedLoopingParams> {
    let principal_buffer = amount
        .checked_mul(target_leverage)
        .ok_or_else(math_error!())?
        .checked_mul(I80F48::from_num(slippage_bps))
        .ok_or_else(math_error!())?
        .checked_div(BPS_DENOMINATOR)
        .ok_or_else(math_error!())?;
    let adjusted_principal = amount
        .checked_sub(principal_buffer)
        .ok_or_else(math_error!())?;

    let LoopingParams {
        total_deposit_amount,
        borrow_amount,
    } = compute_looping_params(
        adjusted_principal,
        target_leverage,
        deposit_bank,
        borrow_bank,
        deposit_price,
        borrow_price,
    )?;

    Ok(AdjustedLoopingParams {
        deposit_amount: total_deposit_amount,
        borrow_amount,
        borrow_amount_native: ui_to_native(borrow_amount, borrow_bank.mint_decimals)?,
    })
}
