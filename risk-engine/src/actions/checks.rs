use fixed::types::I80F48;
use marginfi_risk_types::{
    constants::WSOL_MINT,
    types::{
        BalanceSide, Bank, BankOperationalState, MarginfiAccount, OracleSetup, Pubkey, RiskTier,
    },
};

use crate::{
    actions::messages::{ActionMessage, StaticMessage},
    compute::{compute_free_collateral, compute_health_components, compute_remaining_capacity},
    prelude::{BankConfigImpl, MarketState, RequirementType},
    utils::short_address,
    RiskResult,
};

/// SOL kept aside for transaction fees when depositing native SOL.
const FEE_MARGIN: f64 = 0.01;
const PRICE_IMPACT_WARNING_THRESHOLD: f64 = 0.01;
const PRICE_IMPACT_ERROR_THRESHOLD: f64 = 0.05;

/// Wallet holdings relevant to an action, in UI units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WalletBalance {
    pub token_balance: f64,
    pub native_sol_balance: f64,
}

fn token_symbol(state: &MarketState, bank_pk: &Pubkey) -> String {
    state
        .metadata
        .get(bank_pk)
        .map(|meta| meta.token_symbol.clone())
        .unwrap_or_else(|| short_address(&bank_pk.to_string()))
}

/// `Some(true)` when the account lends in the bank, `Some(false)` when it borrows.
fn position_is_lending(account: Option<&MarginfiAccount>, bank_pk: &Pubkey) -> Option<bool> {
    account?
        .lending_account
        .get_balance(bank_pk)
        .map(|balance| balance.is_empty(BalanceSide::Liabilities))
}

fn is_paused(bank: &Bank) -> bool {
    bank.config.operational_state == BankOperationalState::Paused
}

fn is_reduce_only(bank: &Bank) -> bool {
    bank.config.operational_state == BankOperationalState::ReduceOnly
}

fn is_oracle_stale(state: &MarketState, bank_pk: &Pubkey, current_timestamp: i64) -> RiskResult<bool> {
    let bank = state.get_bank(bank_pk)?;
    if bank.config.oracle_setup == OracleSetup::Fixed {
        return Ok(false);
    }

    let price = state.get_price(bank_pk)?;
    let age = current_timestamp.saturating_sub(price.timestamp);

    Ok(age > bank.config.get_oracle_max_age() as i64)
}

fn price_impact_checks(price_impact_pct: Option<f64>, checks: &mut Vec<ActionMessage>) {
    match price_impact_pct {
        None => checks.push(ActionMessage::disabled()),
        Some(impact) if impact > PRICE_IMPACT_ERROR_THRESHOLD => {
            checks.push(ActionMessage::price_impact_error(impact))
        }
        Some(impact) if impact > PRICE_IMPACT_WARNING_THRESHOLD => {
            checks.push(ActionMessage::price_impact_warning(impact))
        }
        Some(_) => {}
    }
}

fn floor_to_decimals(value: f64, decimals: u8) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).floor() / scale
}

pub fn can_be_lent(
    state: &MarketState,
    bank_pk: &Pubkey,
    account: Option<&MarginfiAccount>,
    wallet: WalletBalance,
    current_timestamp: i64,
) -> RiskResult<Vec<ActionMessage>> {
    let bank = state.get_bank(bank_pk)?;
    let symbol = token_symbol(state, bank_pk);
    let mut checks = vec![];

    if is_paused(bank) {
        checks.push(ActionMessage::bank_paused(&symbol));
    }

    if is_reduce_only(bank) {
        checks.push(ActionMessage::reduce_only(&symbol));
    }

    if bank.config.is_retiring() {
        checks.push(ActionMessage::bank_retired(&symbol));
    }

    if position_is_lending(account, bank_pk) == Some(false) {
        checks.push(StaticMessage::AlreadyBorrowing.into());
    }

    let capacity = compute_remaining_capacity(bank, current_timestamp)?;
    if capacity
        .deposit_capacity
        .is_some_and(|capacity| capacity <= I80F48::ZERO)
    {
        checks.push(ActionMessage::deposit_capacity(&symbol));
    }

    let available = if bank.mint.to_string() == WSOL_MINT {
        (wallet.token_balance + wallet.native_sol_balance - FEE_MARGIN).max(0.0)
    } else {
        wallet.token_balance
    };
    if floor_to_decimals(available, bank.mint_decimals) == 0.0 {
        checks.push(ActionMessage::insufficient_balance(&symbol));
    }

    Ok(checks)
}

pub fn can_be_borrowed(
    state: &MarketState,
    bank_pk: &Pubkey,
    account: Option<&MarginfiAccount>,
    current_timestamp: i64,
) -> RiskResult<Vec<ActionMessage>> {
    let bank = state.get_bank(bank_pk)?;
    let symbol = token_symbol(state, bank_pk);
    let mut checks = vec![];

    if is_paused(bank) {
        checks.push(ActionMessage::bank_paused(&symbol));
    }

    if is_reduce_only(bank) {
        checks.push(ActionMessage::reduce_only(&symbol));
    }

    if bank.config.is_retiring() {
        checks.push(ActionMessage::bank_retired(&symbol));
    }

    let capacity = compute_remaining_capacity(bank, current_timestamp)?;
    if capacity
        .borrow_capacity
        .is_some_and(|capacity| capacity <= I80F48::ZERO)
    {
        checks.push(ActionMessage::borrow_capacity(&symbol));
    }

    if position_is_lending(account, bank_pk) == Some(true) {
        checks.push(StaticMessage::AlreadyLending.into());
    }

    let Some(account) = account else {
        checks.push(StaticMessage::NoCollateral.into());
        return Ok(checks);
    };

    if compute_free_collateral(account, &state.banks, &state.oracle_prices)?.is_zero() {
        checks.push(StaticMessage::NoCollateral.into());
    }

    for balance in account.lending_account.get_active_balances_iter() {
        if balance.is_empty(BalanceSide::Liabilities) || balance.bank_pk == *bank_pk {
            continue;
        }
        if state.get_bank(&balance.bank_pk)?.config.risk_tier == RiskTier::Isolated {
            checks.push(ActionMessage::existing_isolated_borrow(&token_symbol(
                state,
                &balance.bank_pk,
            )));
            break;
        }
    }

    if bank.config.risk_tier == RiskTier::Isolated
        && !compute_health_components(
            account,
            &state.banks,
            &state.oracle_prices,
            RequirementType::Equity,
            &[*bank_pk],
        )?
        .liabilities
        .is_zero()
    {
        checks.push(StaticMessage::ExistingBorrow.into());
    }

    if is_oracle_stale(state, bank_pk, current_timestamp)? {
        checks.push(ActionMessage::stale_oracle("Borrows"));
    }

    Ok(checks)
}

pub fn can_be_withdrawn(
    state: &MarketState,
    bank_pk: &Pubkey,
    account: Option<&MarginfiAccount>,
    current_timestamp: i64,
) -> RiskResult<Vec<ActionMessage>> {
    let bank = state.get_bank(bank_pk)?;
    let symbol = token_symbol(state, bank_pk);
    let mut checks = vec![];

    if is_paused(bank) {
        checks.push(ActionMessage::bank_paused(&symbol));
    }

    match position_is_lending(account, bank_pk) {
        None => checks.push(StaticMessage::NoPositions.into()),
        Some(false) => checks.push(ActionMessage::not_lending(&symbol)),
        Some(true) => {}
    }

    if let Some(account) = account {
        let no_free_collateral =
            compute_free_collateral(account, &state.banks, &state.oracle_prices)?.is_zero();
        if no_free_collateral && bank.config.risk_tier != RiskTier::Isolated {
            checks.push(StaticMessage::NoCollateral.into());
        }
    }

    if is_oracle_stale(state, bank_pk, current_timestamp)? {
        checks.push(ActionMessage::stale_oracle("Withdrawals"));
    }

    Ok(checks)
}

/// `max_repay` is the most the wallet can repay, in UI units.
pub fn can_be_repaid(
    state: &MarketState,
    bank_pk: &Pubkey,
    account: Option<&MarginfiAccount>,
    max_repay: I80F48,
) -> RiskResult<Vec<ActionMessage>> {
    let bank = state.get_bank(bank_pk)?;
    let symbol = token_symbol(state, bank_pk);
    let mut checks = vec![];

    if is_paused(bank) {
        checks.push(ActionMessage::bank_paused(&symbol));
    }

    match position_is_lending(account, bank_pk) {
        None => checks.push(StaticMessage::NoPositions.into()),
        Some(true) => checks.push(ActionMessage::not_borrowing(&symbol)),
        Some(false) => {}
    }

    if max_repay.is_zero() {
        checks.push(ActionMessage::insufficient_liquidity_to_repay(&symbol, false));
    }

    Ok(checks)
}

/// `bank_pk` holds the debt, `deposit_bank_pk` the collateral swapped to repay it.
pub fn can_be_repaid_with_collateral(
    state: &MarketState,
    bank_pk: &Pubkey,
    deposit_bank_pk: Option<&Pubkey>,
    account: Option<&MarginfiAccount>,
    price_impact_pct: Option<f64>,
    wallet: WalletBalance,
    current_timestamp: i64,
) -> RiskResult<Vec<ActionMessage>> {
    let bank = state.get_bank(bank_pk)?;
    let symbol = token_symbol(state, bank_pk);
    let mut checks = vec![];

    if is_paused(bank) {
        checks.push(ActionMessage::bank_paused(&symbol));
    }

    match position_is_lending(account, bank_pk) {
        None => checks.push(StaticMessage::NoPositions.into()),
        Some(true) => checks.push(ActionMessage::not_borrowing(&symbol)),
        Some(false) => {}
    }

    price_impact_checks(price_impact_pct, &mut checks);

    let deposit_stale = match deposit_bank_pk {
        Some(deposit_bank_pk) => is_oracle_stale(state, deposit_bank_pk, current_timestamp)?,
        None => false,
    };
    if deposit_stale || is_oracle_stale(state, bank_pk, current_timestamp)? {
        checks.push(ActionMessage::stale_oracle("Repayments"));
    }

    if wallet.token_balance > 0.0 {
        checks.push(ActionMessage::wallet_repay(&symbol));
    }

    Ok(checks)
}

/// `bank_pk` receives the looped deposit, `borrow_bank_pk` lends the borrowed side.
pub fn can_be_looped(
    state: &MarketState,
    bank_pk: &Pubkey,
    borrow_bank_pk: Option<&Pubkey>,
    price_impact_pct: Option<f64>,
    current_timestamp: i64,
) -> RiskResult<Vec<ActionMessage>> {
    let bank = state.get_bank(bank_pk)?;
    let borrow_bank = borrow_bank_pk
        .map(|pk| state.get_bank(pk).map(|bank| (pk, bank)))
        .transpose()?;
    let mut checks = vec![];

    if is_paused(bank) {
        checks.push(ActionMessage::bank_paused(&token_symbol(state, bank_pk)));
    } else if let Some((borrow_bank_pk, borrow_bank)) = borrow_bank {
        if is_paused(borrow_bank) {
            checks.push(ActionMessage::bank_paused(&token_symbol(
                state,
                borrow_bank_pk,
            )));
        }
    }

    price_impact_checks(price_impact_pct, &mut checks);

    let borrow_stale = match borrow_bank_pk {
        Some(borrow_bank_pk) => is_oracle_stale(state, borrow_bank_pk, current_timestamp)?,
        None => false,
    };
    if borrow_stale || is_oracle_stale(state, bank_pk, current_timestamp)? {
        checks.push(ActionMessage::stale_oracle("Looping"));
    }

    Ok(checks)
}
