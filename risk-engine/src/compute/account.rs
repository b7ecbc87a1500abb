use std::collections::{HashMap, HashSet};

use fixed::types::I80F48;
use marginfi_risk_types::{
    constants::{EMISSIONS_FLAG_BORROW_ACTIVE, EMISSIONS_FLAG_LENDING_ACTIVE, LIQUIDATION_DISCOUNT},
    types::{Balance, Bank, MarginfiAccount, OraclePrice, PriceBias, Pubkey, RiskTier},
};
use serde::{Deserialize, Serialize};

use crate::{
    compute::bank::{
        compute_asset_usd_value, compute_liability_usd_value, get_asset_weight,
        get_liability_weight, get_price,
    },
    debug,
    errors::RiskError,
    math_error,
    prelude::{BankImpl, RequirementType, RiskEngine},
    state::marginfi_account::calc_emissions,
    utils::{apr_to_apy, native_to_ui},
    RiskResult,
};

/// Weighted USD value of an account or a single balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthComponents {
    pub assets: I80F48,
    pub liabilities: I80F48,
}

/// Token amounts of a balance, in native or UI units depending on the producer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuantity {
    pub assets: I80F48,
    pub liabilities: I80F48,
}

pub fn compute_health_components(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    requirement_type: RequirementType,
    excluded_banks: &[Pubkey],
) -> RiskResult<HealthComponents> {
    let (assets, liabilities) =
        RiskEngine::new_no_flashloan_check(account, banks, oracle_prices, excluded_banks)?
            .get_account_health_components(requirement_type)?;

    Ok(HealthComponents {
        assets,
        liabilities,
    })
}

pub fn compute_health_components_without_bias(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    requirement_type: RequirementType,
    excluded_banks: &[Pubkey],
) -> RiskResult<HealthComponents> {
    let (assets, liabilities) =
        RiskEngine::new_no_flashloan_check(account, banks, oracle_prices, excluded_banks)?
            .get_account_health_components_without_bias(requirement_type)?;

    Ok(HealthComponents {
        assets,
        liabilities,
    })
}

/// `(assets - liabilities) / assets`. An account without assets is fully healthy.
pub fn compute_health_factor(assets: I80F48, liabilities: I80F48) -> RiskResult<I80F48> {
    if assets.is_zero() {
        return Ok(I80F48::ONE);
    }

    assets
        .checked_sub(liabilities)
        .ok_or_else(math_error!())?
        .checked_div(assets)
        .ok_or_else(math_error!())
}

pub fn compute_free_collateral(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
) -> RiskResult<I80F48> {
    Ok(compute_free_collateral_unclamped(account, banks, oracle_prices)?.max(I80F48::ZERO))
}

/// Initial requirement headroom, negative once the account is below it.
pub fn compute_free_collateral_unclamped(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
) -> RiskResult<I80F48> {
    let HealthComponents {
        assets,
        liabilities,
    } = compute_health_components(account, banks, oracle_prices, RequirementType::Initial, &[])?;

    assets.checked_sub(liabilities).ok_or_else(math_error!())
}

pub fn compute_account_value(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
) -> RiskResult<I80F48> {
    let HealthComponents {
        assets,
        liabilities,
    } = compute_health_components(account, banks, oracle_prices, RequirementType::Equity, &[])?;

    assets.checked_sub(liabilities).ok_or_else(math_error!())
}

/// Lending income minus borrowing cost, weighted by each balance's share of the account value,
/// as a compounded APY.
pub fn compute_net_apy(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
) -> RiskResult<f64> {
    let account_value = compute_account_value(account, banks, oracle_prices)?;
    let denominator = if account_value.is_zero() {
        I80F48::ONE
    } else {
        account_value
    };

    let mut apr = I80F48::ZERO;
    for balance in account.lending_account.get_active_balances_iter() {
        let bank = banks
            .get(&balance.bank_pk)
            .ok_or(RiskError::BankNotFound(balance.bank_pk))?;
        let price = oracle_prices
            .get(&balance.bank_pk)
            .ok_or(RiskError::PriceNotFound(balance.bank_pk))?;

        let rates = bank.compute_interest_rates()?;
        let value = compute_balance_usd_value(balance, bank, price, RequirementType::Equity)?;

        let earned = rates
            .lending_rate_apr
            .checked_mul(value.assets)
            .ok_or_else(math_error!())?;
        let paid = rates
            .borrowing_rate_apr
            .checked_mul(value.liabilities)
            .ok_or_else(math_error!())?;

        apr = earned
            .checked_sub(paid)
            .ok_or_else(math_error!())?
            .checked_div(denominator)
            .ok_or_else(math_error!())?
            .checked_add(apr)
            .ok_or_else(math_error!())?;
    }

    Ok(apr_to_apy(apr.to_num::<f64>()))
}

pub fn compute_balance_usd_value(
    balance: &Balance,
    bank: &Bank,
    oracle_price: &OraclePrice,
    requirement_type: RequirementType,
) -> RiskResult<HealthComponents> {
    balance_usd_value(balance, bank, oracle_price, requirement_type, None, None)
}

/// Balance value with assets at the low price bound and liabilities at the high one.
pub fn compute_balance_usd_value_with_price_bias(
    balance: &Balance,
    bank: &Bank,
    oracle_price: &OraclePrice,
    requirement_type: RequirementType,
) -> RiskResult<HealthComponents> {
    balance_usd_value(
        balance,
        bank,
        oracle_price,
        requirement_type,
        Some(PriceBias::Low),
        Some(PriceBias::High),
    )
}

fn balance_usd_value(
    balance: &Balance,
    bank: &Bank,
    oracle_price: &OraclePrice,
    requirement_type: RequirementType,
    asset_bias: Option<PriceBias>,
    liability_bias: Option<PriceBias>,
) -> RiskResult<HealthComponents> {
    Ok(HealthComponents {
        assets: compute_asset_usd_value(
            bank,
            oracle_price,
            balance.asset_shares.into(),
            requirement_type,
            asset_bias,
        )?,
        liabilities: compute_liability_usd_value(
            bank,
            oracle_price,
            balance.liability_shares.into(),
            requirement_type,
            liability_bias,
        )?,
    })
}

pub fn compute_quantity(balance: &Balance, bank: &Bank) -> RiskResult<BalanceQuantity> {
    Ok(BalanceQuantity {
        assets: bank.get_asset_amount(balance.asset_shares.into())?,
        liabilities: bank.get_liability_amount(balance.liability_shares.into())?,
    })
}

pub fn compute_quantity_ui(balance: &Balance, bank: &Bank) -> RiskResult<BalanceQuantity> {
    let native = compute_quantity(balance, bank)?;

    Ok(BalanceQuantity {
        assets: native_to_ui(native.assets, bank.mint_decimals)?,
        liabilities: native_to_ui(native.liabilities, bank.mint_decimals)?,
    })
}

pub(crate) fn lookup<'a>(
    banks: &'a HashMap<Pubkey, Bank>,
    oracle_prices: &'a HashMap<Pubkey, OraclePrice>,
    bank_pk: &Pubkey,
) -> RiskResult<(&'a Bank, &'a OraclePrice)> {
    let bank = banks
        .get(bank_pk)
        .ok_or(RiskError::BankNotFound(*bank_pk))?;
    let price = oracle_prices
        .get(bank_pk)
        .ok_or(RiskError::PriceNotFound(*bank_pk))?;

    Ok((bank, price))
}

/// The account's balance in `bank_pk`, or an empty one if there is none.
fn balance_or_empty(account: &MarginfiAccount, bank_pk: &Pubkey) -> Balance {
    account
        .lending_account
        .get_balance(bank_pk)
        .copied()
        .unwrap_or_else(|| Balance::new_active(*bank_pk, 0))
}

/// Maximum amount, in UI units, that can be borrowed from `bank_pk` on top of the current
/// position, withdrawing any deposit in that bank first.
///
/// fc = free collateral
/// ucb = untied collateral for bank
///
/// q = (min(fc, ucb) / (price_lowest_bias * deposit_weight)) + (fc - min(fc, ucb)) / (price_highest_bias * liab_weight)
///
/// Does not account for collateral received when liquidating an account.
pub fn compute_max_borrow_for_bank(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    bank_pk: &Pubkey,
    volatility_factor: Option<I80F48>,
) -> RiskResult<I80F48> {
    let (bank, price) = lookup(banks, oracle_prices, bank_pk)?;

    let borrowing_isolated_with_active_debt = bank.config.risk_tier == RiskTier::Isolated
        && !compute_health_components(
            account,
            banks,
            oracle_prices,
            RequirementType::Equity,
            &[*bank_pk],
        )?
        .liabilities
        .is_zero();

    let mut borrowing_with_existing_isolated_debt = false;
    for balance in account.lending_account.get_active_balances_iter() {
        if I80F48::from(balance.liability_shares) <= I80F48::ZERO || balance.bank_pk == *bank_pk {
            continue;
        }
        let liability_bank = banks
            .get(&balance.bank_pk)
            .ok_or(RiskError::BankNotFound(balance.bank_pk))?;
        if liability_bank.config.risk_tier == RiskTier::Isolated {
            borrowing_with_existing_isolated_debt = true;
        }
    }

    debug!(
        "isolated with active debt: {}, existing isolated debt: {}",
        borrowing_isolated_with_active_debt,
        borrowing_with_existing_isolated_debt
    );

    if borrowing_isolated_with_active_debt || borrowing_with_existing_isolated_debt {
        return compute_max_withdraw_for_bank(
            account,
            banks,
            oracle_prices,
            bank_pk,
            volatility_factor,
        );
    }

    let volatility_factor = volatility_factor.unwrap_or(I80F48::ONE);
    let balance = balance_or_empty(account, bank_pk);

    let free_collateral = compute_free_collateral(account, banks, oracle_prices)?
        .checked_mul(volatility_factor)
        .ok_or_else(math_error!())?;

    let untied_collateral_for_bank = compute_asset_usd_value(
        bank,
        price,
        balance.asset_shares.into(),
        RequirementType::Initial,
        Some(PriceBias::Low),
    )?
    .min(free_collateral);

    let price_lowest = get_price(price, Some(PriceBias::Low), RequirementType::Initial);
    let price_highest = get_price(price, Some(PriceBias::High), RequirementType::Initial);
    let asset_weight = get_asset_weight(bank, RequirementType::Initial, price)?;
    let liability_weight = get_liability_weight(bank, RequirementType::Initial);

    let borrowable = free_collateral
        .checked_sub(untied_collateral_for_bank)
        .ok_or_else(math_error!())?
        .checked_div(
            price_highest
                .checked_mul(liability_weight)
                .ok_or_else(math_error!())?,
        )
        .ok_or_else(math_error!())?;

    let withdrawable = if asset_weight.is_zero() {
        compute_quantity_ui(&balance, bank)?.assets
    } else {
        untied_collateral_for_bank
            .checked_div(
                price_lowest
                    .checked_mul(asset_weight)
                    .ok_or_else(math_error!())?,
            )
            .ok_or_else(math_error!())?
    };

    withdrawable.checked_add(borrowable).ok_or_else(math_error!())
}

/// Maximum amount, in UI units, that can be withdrawn from `bank_pk` without borrowing.
pub fn compute_max_withdraw_for_bank(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    bank_pk: &Pubkey,
    volatility_factor: Option<I80F48>,
) -> RiskResult<I80F48> {
    let (bank, price) = lookup(banks, oracle_prices, bank_pk)?;
    let volatility_factor = volatility_factor.unwrap_or(I80F48::ONE);

    let init_asset_weight = get_asset_weight(bank, RequirementType::Initial, price)?;
    let maint_asset_weight = get_asset_weight(bank, RequirementType::Maintenance, price)?;
    let balance = balance_or_empty(account, bank_pk);

    let free_collateral = compute_free_collateral(account, banks, oracle_prices)?;
    let init_collateral_for_bank = compute_asset_usd_value(
        bank,
        price,
        balance.asset_shares.into(),
        RequirementType::Initial,
        Some(PriceBias::Low),
    )?;

    let entire_balance = compute_quantity_ui(&balance, bank)?.assets;

    let liabilities_init = compute_health_components(
        account,
        banks,
        oracle_prices,
        RequirementType::Initial,
        &[],
    )?
    .liabilities;

    // isolated bank, or a collateral bank with both weights zeroed
    if bank.config.risk_tier == RiskTier::Isolated
        || (init_asset_weight.is_zero() && maint_asset_weight.is_zero())
    {
        // an account at its init requirement with open debt may not withdraw, even though the
        // deposit carries no weight
        if free_collateral.is_zero() && !liabilities_init.is_zero() {
            return Ok(I80F48::ZERO);
        }
        return Ok(entire_balance);
    }

    // collateral bank being retired
    if init_asset_weight.is_zero() && !maint_asset_weight.is_zero() {
        if liabilities_init.is_zero() {
            return Ok(entire_balance);
        }
        if free_collateral.is_zero() {
            return Ok(I80F48::ZERO);
        }

        let HealthComponents {
            assets: maint_assets,
            liabilities: maint_liabilities,
        } = compute_health_components(
            account,
            banks,
            oracle_prices,
            RequirementType::Maintenance,
            &[],
        )?;
        let maint_untied_collateral = maint_assets
            .checked_sub(maint_liabilities)
            .ok_or_else(math_error!())?;

        let price_lowest = get_price(price, Some(PriceBias::Low), RequirementType::Initial);
        let maint_weighted_price = price_lowest
            .checked_mul(maint_asset_weight)
            .ok_or_else(math_error!())?;

        let max_withdraw = maint_untied_collateral
            .checked_div(maint_weighted_price)
            .ok_or_else(math_error!())?;

        return Ok(max_withdraw.min(entire_balance));
    }

    // all collateral untied, no volatility buffer needed
    if liabilities_init.is_zero() || init_collateral_for_bank <= free_collateral {
        return Ok(entire_balance);
    }

    let init_untied_collateral_for_bank = free_collateral
        .checked_mul(volatility_factor)
        .ok_or_else(math_error!())?;

    let price_lowest = get_price(price, Some(PriceBias::Low), RequirementType::Initial);
    let init_weighted_price = price_lowest
        .checked_mul(init_asset_weight)
        .ok_or_else(math_error!())?;

    init_untied_collateral_for_bank
        .checked_div(init_weighted_price)
        .ok_or_else(math_error!())
}

/// Price of `bank_pk`'s token at which the account reaches its maintenance requirement, all
/// other prices held constant. `None` when the position cannot be liquidated through this
/// bank's price.
pub fn compute_liquidation_price_for_bank(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    bank_pk: &Pubkey,
) -> RiskResult<Option<I80F48>> {
    let (bank, _) = lookup(banks, oracle_prices, bank_pk)?;

    let Some(balance) = account.lending_account.get_balance(bank_pk) else {
        return Ok(None);
    };

    let is_lending = I80F48::from(balance.liability_shares).is_zero();
    let quantity = compute_quantity_ui(balance, bank)?;
    let amount = if is_lending {
        quantity.assets
    } else {
        quantity.liabilities
    };

    compute_liquidation_price_for_bank_amount(
        account,
        banks,
        oracle_prices,
        bank_pk,
        is_lending,
        amount,
    )
}

/// Like [`compute_liquidation_price_for_bank`], for a hypothetical `amount` (UI units) held on
/// the lending or borrowing side.
pub fn compute_liquidation_price_for_bank_amount(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    bank_pk: &Pubkey,
    is_lending: bool,
    amount: I80F48,
) -> RiskResult<Option<I80F48>> {
    let (bank, price) = lookup(banks, oracle_prices, bank_pk)?;

    if account.lending_account.get_balance(bank_pk).is_none() || amount <= I80F48::ZERO {
        return Ok(None);
    }

    let HealthComponents {
        assets,
        liabilities,
    } = compute_health_components(
        account,
        banks,
        oracle_prices,
        RequirementType::Maintenance,
        &[*bank_pk],
    )?;

    let market_price = get_price(price, None, RequirementType::Maintenance);

    let liquidation_price = if is_lending {
        if liabilities.is_zero() {
            return Ok(None);
        }

        let asset_weight = get_asset_weight(bank, RequirementType::Maintenance, price)?;
        let price_confidence = market_price
            - get_price(price, Some(PriceBias::Low), RequirementType::Maintenance);

        amount
            .checked_mul(asset_weight)
            .and_then(|weighted| (liabilities - assets).checked_div(weighted))
            .and_then(|p| p.checked_add(price_confidence))
    } else {
        let liability_weight = get_liability_weight(bank, RequirementType::Maintenance);
        let price_confidence = get_price(price, Some(PriceBias::High), RequirementType::Maintenance)
            - market_price;

        amount
            .checked_mul(liability_weight)
            .and_then(|weighted| (assets - liabilities).checked_div(weighted))
            .and_then(|p| p.checked_sub(price_confidence))
    };

    Ok(liquidation_price.filter(|p| *p >= I80F48::ZERO))
}

/// Max amount of collateral, in UI units, a liquidator may seize to bring the account's
/// maintenance health back to zero.
///
/// Bounded by the collateral balance and by the liability it covers at the liquidation discount.
pub fn compute_max_liquidatable_asset_amount(
    account: &MarginfiAccount,
    banks: &HashMap<Pubkey, Bank>,
    oracle_prices: &HashMap<Pubkey, OraclePrice>,
    asset_bank_pk: &Pubkey,
    liability_bank_pk: &Pubkey,
) -> RiskResult<I80F48> {
    let (asset_bank, asset_price) = lookup(banks, oracle_prices, asset_bank_pk)?;
    let (liability_bank, liability_price) = lookup(banks, oracle_prices, liability_bank_pk)?;

    let HealthComponents {
        assets,
        liabilities,
    } = compute_health_components(
        account,
        banks,
        oracle_prices,
        RequirementType::Maintenance,
        &[],
    )?;
    let current_health = assets.checked_sub(liabilities).ok_or_else(math_error!())?;

    let price_asset_lower = get_price(
        asset_price,
        Some(PriceBias::Low),
        RequirementType::Maintenance,
    );
    let asset_maint_weight: I80F48 = asset_bank.config.asset_weight_maint.into();

    let price_liab_highest = get_price(
        liability_price,
        Some(PriceBias::High),
        RequirementType::Maintenance,
    );
    let liab_maint_weight: I80F48 = liability_bank.config.liability_weight_maint.into();

    debug!(
        "h: {}, w_a: {}, w_l: {}, d: {}",
        current_health,
        asset_maint_weight,
        liab_maint_weight,
        LIQUIDATION_DISCOUNT
    );

    let underwater_maint_usd_value = current_health
        .checked_div(
            asset_maint_weight
                .checked_sub(
                    liab_maint_weight
                        .checked_mul(LIQUIDATION_DISCOUNT)
                        .ok_or_else(math_error!())?,
                )
                .ok_or_else(math_error!())?,
        )
        .ok_or_else(math_error!())?;

    let assets_amount_ui =
        compute_quantity_ui(&balance_or_empty(account, asset_bank_pk), asset_bank)?.assets;
    let assets_usd_value = assets_amount_ui
        .checked_mul(price_asset_lower)
        .ok_or_else(math_error!())?;

    let liabilities_amount_ui =
        compute_quantity_ui(&balance_or_empty(account, liability_bank_pk), liability_bank)?
            .liabilities;
    let liab_usd_value = liabilities_amount_ui
        .checked_mul(LIQUIDATION_DISCOUNT)
        .ok_or_else(math_error!())?
        .checked_mul(price_liab_highest)
        .ok_or_else(math_error!())?;

    let max_liquidatable_usd_value = assets_usd_value
        .min(underwater_maint_usd_value)
        .min(liab_usd_value)
        .max(I80F48::ZERO);

    debug!("Max liquidatable usd value: {}", max_liquidatable_usd_value);

    max_liquidatable_usd_value
        .checked_div(price_asset_lower)
        .ok_or_else(math_error!())
}

/// Emissions accrued since the balance's last update that have not been claimed yet.
pub fn compute_claimed_emissions(
    balance: &Balance,
    bank: &Bank,
    current_timestamp: u64,
) -> RiskResult<I80F48> {
    let quantity = compute_quantity(balance, bank)?;

    let balance_amount = if bank.get_flag(EMISSIONS_FLAG_LENDING_ACTIVE) {
        quantity.assets
    } else if bank.get_flag(EMISSIONS_FLAG_BORROW_ACTIVE) {
        quantity.liabilities
    } else {
        return Ok(I80F48::ZERO);
    };

    let emissions = calc_emissions(
        balance_amount,
        bank.mint_decimals,
        bank.emissions_rate,
        balance.last_update,
        current_timestamp,
    )?;

    Ok(emissions.min(bank.emissions_remaining.into()))
}

pub fn compute_total_outstanding_emissions(
    balance: &Balance,
    bank: &Bank,
    current_timestamp: u64,
) -> RiskResult<I80F48> {
    I80F48::from(balance.emissions_outstanding)
        .checked_add(compute_claimed_emissions(balance, bank, current_timestamp)?)
        .ok_or_else(math_error!())
}

/// Banks the program expects in a health check after the next instruction: the active balances
/// that are not `excluded_banks`, plus the `mandatory_banks` the instruction opens, placed in the
/// first free slots.
pub fn compute_health_check_accounts(
    account: &MarginfiAccount,
    mandatory_banks: &[Pubkey],
    excluded_banks: &[Pubkey],
) -> Vec<Pubkey> {
    let excluded: HashSet<&Pubkey> = excluded_banks.iter().collect();
    let active: HashSet<Pubkey> = account
        .lending_account
        .get_active_balances_iter()
        .map(|b| b.bank_pk)
        .collect();

    let mut seen = HashSet::new();
    let mut banks_to_add = mandatory_banks
        .iter()
        .filter(|pk| !active.contains(*pk) && seen.insert(**pk))
        .copied()
        .collect::<Vec<_>>()
        .into_iter();

    account
        .lending_account
        .balances
        .iter()
        .filter_map(|balance| {
            if balance.active {
                (!excluded.contains(&balance.bank_pk)).then_some(balance.bank_pk)
            } else {
                banks_to_add.next()
            }
        })
        .collect()
}

/// `[bank, oracle]` key pairs for the banks of a health check, in order.
pub fn compute_health_account_metas(
    bank_pks: &[Pubkey],
    banks: &HashMap<Pubkey, Bank>,
) -> RiskResult<Vec<Pubkey>> {
    bank_pks
        .iter()
        .map(|bank_pk| {
            let bank = banks
                .get(bank_pk)
                .ok_or(RiskError::BankNotFound(*bank_pk))?;
            Ok([*bank_pk, bank.config.oracle_keys[0]])
        })
        .collect::<RiskResult<Vec<_>>>()
        .map(|pairs| pairs.concat())
}
