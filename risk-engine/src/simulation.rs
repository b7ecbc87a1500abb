use std::collections::HashMap;

use fixed::types::I80F48;
use marginfi_risk_types::types::{Bank, MarginfiAccount, Pubkey};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    compute::{
        compute_free_collateral, compute_health_components, compute_health_factor,
        compute_liquidation_price_for_bank, HealthComponents,
    },
    errors::RiskError,
    prelude::{BankAccountWrapper, MarketState, RequirementType, RiskEngine},
    utils::ui_to_native,
    RiskResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    Deposit,
    Withdraw,
    Borrow,
    Repay,
    RepayWithCollateral,
    Loop,
}

/// An action against the target bank. Amounts are in UI units of the bank they move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SimulationAction {
    Deposit {
        amount: I80F48,
    },
    #[serde(rename_all = "camelCase")]
    Withdraw {
        amount: I80F48,
        #[serde(default)]
        withdraw_all: bool,
    },
    Borrow {
        amount: I80F48,
    },
    #[serde(rename_all = "camelCase")]
    Repay {
        amount: I80F48,
        #[serde(default)]
        repay_all: bool,
    },
    /// Withdraws collateral from `deposit_bank`, swaps it, and repays the target bank's debt.
    #[serde(rename_all = "camelCase")]
    RepayWithCollateral {
        deposit_bank: Pubkey,
        withdraw_amount: I80F48,
        repay_amount: I80F48,
        #[serde(default)]
        withdraw_all: bool,
        #[serde(default)]
        repay_all: bool,
    },
    /// Deposits into the target bank what was borrowed from `borrow_bank` and swapped.
    #[serde(rename_all = "camelCase")]
    Loop {
        borrow_bank: Pubkey,
        deposit_amount: I80F48,
        borrow_amount: I80F48,
    },
}

impl SimulationAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            SimulationAction::Deposit { .. } => ActionType::Deposit,
            SimulationAction::Withdraw { .. } => ActionType::Withdraw,
            SimulationAction::Borrow { .. } => ActionType::Borrow,
            SimulationAction::Repay { .. } => ActionType::Repay,
            SimulationAction::RepayWithCollateral { .. } => ActionType::RepayWithCollateral,
            SimulationAction::Loop { .. } => ActionType::Loop,
        }
    }

    /// Actions that take liquidity out of the account and so end with an init health check.
    fn removes_liquidity(&self) -> bool {
        !matches!(
            self,
            SimulationAction::Deposit { .. } | SimulationAction::Repay { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub account: MarginfiAccount,
    /// Post-action state of the banks the action touched.
    pub banks: HashMap<Pubkey, Bank>,
    pub health_factor: I80F48,
    pub liquidation_price: Option<I80F48>,
    pub free_collateral: I80F48,
    pub assets: I80F48,
    pub liabilities: I80F48,
}

/// Dry-runs `action` against `bank_pk` on copies of the account and banks. Nothing in `state`
/// changes.
pub fn simulate_action(
    state: &MarketState,
    account: &MarginfiAccount,
    bank_pk: &Pubkey,
    action: &SimulationAction,
    current_timestamp: i64,
) -> RiskResult<SimulationResult> {
    let mut account = *account;
    let mut banks = state.banks.clone();
    let mut touched = vec![*bank_pk];

    debug!("Simulating {:?} on bank {}", action, bank_pk);

    match *action {
        SimulationAction::Deposit { amount } => {
            with_balance(&mut account, &mut banks, bank_pk, current_timestamp, |wrapper| {
                let native = to_native(amount, wrapper.bank)?;
                wrapper.deposit(native)
            })?;
        }
        SimulationAction::Withdraw {
            amount,
            withdraw_all,
        } => {
            with_existing_balance(&mut account, &mut banks, bank_pk, current_timestamp, |wrapper| {
                withdraw(wrapper, amount, withdraw_all)
            })?;
        }
        SimulationAction::Borrow { amount } => {
            with_balance(&mut account, &mut banks, bank_pk, current_timestamp, |wrapper| {
                let native = to_native(amount, wrapper.bank)?;
                wrapper.borrow(native)
            })?;
        }
        SimulationAction::Repay { amount, repay_all } => {
            with_existing_balance(&mut account, &mut banks, bank_pk, current_timestamp, |wrapper| {
                repay(wrapper, amount, repay_all)
            })?;
        }
        SimulationAction::RepayWithCollateral {
            deposit_bank,
            withdraw_amount,
            repay_amount,
            withdraw_all,
            repay_all,
        } => {
            touched.push(deposit_bank);
            with_existing_balance(
                &mut account,
                &mut banks,
                &deposit_bank,
                current_timestamp,
                |wrapper| withdraw(wrapper, withdraw_amount, withdraw_all),
            )?;
            with_existing_balance(&mut account, &mut banks, bank_pk, current_timestamp, |wrapper| {
                repay(wrapper, repay_amount, repay_all)
            })?;
        }
        SimulationAction::Loop {
            borrow_bank,
            deposit_amount,
            borrow_amount,
        } => {
            touched.push(borrow_bank);
            with_balance(&mut account, &mut banks, bank_pk, current_timestamp, |wrapper| {
                let native = to_native(deposit_amount, wrapper.bank)?;
                wrapper.deposit(native)
            })?;
            with_balance(
                &mut account,
                &mut banks,
                &borrow_bank,
                current_timestamp,
                |wrapper| {
                    let native = to_native(borrow_amount, wrapper.bank)?;
                    wrapper.borrow(native)
                },
            )?;
        }
    }

    if action.removes_liquidity() {
        RiskEngine::check_account_init_health(&account, &banks, &state.oracle_prices)?;
    }

    let HealthComponents {
        assets,
        liabilities,
    } = compute_health_components(
        &account,
        &banks,
        &state.oracle_prices,
        RequirementType::Maintenance,
        &[],
    )?;

    let health_factor = compute_health_factor(assets, liabilities)?;
    let free_collateral = compute_free_collateral(&account, &banks, &state.oracle_prices)?;
    let liquidation_price =
        compute_liquidation_price_for_bank(&account, &banks, &state.oracle_prices, bank_pk)?;

    let banks = touched
        .into_iter()
        .filter_map(|pk| banks.get(&pk).map(|bank| (pk, *bank)))
        .collect();

    Ok(SimulationResult {
        account,
        banks,
        health_factor,
        liquidation_price,
        free_collateral,
        assets,
        liabilities,
    })
}

fn to_native(amount: I80F48, bank: &Bank) -> RiskResult<I80F48> {
    Ok(I80F48::from_num(ui_to_native(amount, bank.mint_decimals)?))
}

fn withdraw(wrapper: &mut BankAccountWrapper, amount: I80F48, withdraw_all: bool) -> RiskResult {
    if withdraw_all {
        wrapper.withdraw_all().map(|_| ())
    } else {
        let native = to_native(amount, wrapper.bank)?;
        wrapper.withdraw(native)
    }
}

fn repay(wrapper: &mut BankAccountWrapper, amount: I80F48, repay_all: bool) -> RiskResult {
    if repay_all {
        wrapper.repay_all().map(|_| ())
    } else {
        let native = to_native(amount, wrapper.bank)?;
        wrapper.repay(native)
    }
}

fn with_balance<F>(
    account: &mut MarginfiAccount,
    banks: &mut HashMap<Pubkey, Bank>,
    bank_pk: &Pubkey,
    current_timestamp: i64,
    op: F,
) -> RiskResult
where
    F: FnOnce(&mut BankAccountWrapper) -> RiskResult,
{
    let bank = banks
        .get_mut(bank_pk)
        .ok_or(RiskError::BankNotFound(*bank_pk))?;
    let mut wrapper = BankAccountWrapper::find_or_create(
        bank_pk,
        bank,
        &mut account.lending_account,
        current_timestamp,
    )?;

    op(&mut wrapper)
}

fn with_existing_balance<F>(
    account: &mut MarginfiAccount,
    banks: &mut HashMap<Pubkey, Bank>,
    bank_pk: &Pubkey,
    current_timestamp: i64,
    op: F,
) -> RiskResult
where
    F: FnOnce(&mut BankAccountWrapper) -> RiskResult,
{
    let bank = banks
        .get_mut(bank_pk)
        .ok_or(RiskError::BankNotFound(*bank_pk))?;
    let mut wrapper =
        BankAccountWrapper::find(bank_pk, bank, &mut account.lending_account, current_timestamp)?;

    op(&mut wrapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_with_tolerance;
    use assert_matches::assert_matches;
    use fixed_macro::types::I80F48;
    use fixtures::{
        accounts::AccountBuilder,
        banks::{test_bank_with_liquidity, TestBank},
        prices::oracle_price,
    };
    use marginfi_risk_types::types::{BankOperationalState, OraclePrice};
    use pretty_assertions::assert_eq;

    const SOL: Pubkey = Pubkey::new_from_seed(1);
    const USDC: Pubkey = Pubkey::new_from_seed(2);
    const NOW: i64 = 1_700_000_000;

    fn state() -> MarketState {
        MarketState::new(
            HashMap::from([
                (
                    SOL,
                    test_bank_with_liquidity(TestBank::Sol, 100_000_000_000_000, 0),
                ),
                (
                    USDC,
                    test_bank_with_liquidity(TestBank::Usdc, 100_000_000_000, 0),
                ),
            ]),
            HashMap::<Pubkey, OraclePrice>::from([
                (SOL, oracle_price(I80F48!(100), I80F48::ZERO)),
                (USDC, oracle_price(I80F48!(1), I80F48::ZERO)),
            ]),
        )
    }

    #[test]
    fn deposit_into_empty_account() {
        let state = state();
        let account = AccountBuilder::new().build();

        let result = simulate_action(
            &state,
            &account,
            &SOL,
            &SimulationAction::Deposit {
                amount: I80F48!(2),
            },
            NOW,
        )
        .unwrap();

        // 2 SOL at maint weight 0.9
        assert_eq_with_tolerance!(result.assets, I80F48!(180), I80F48!(0.0001));
        assert_eq!(result.liabilities, I80F48::ZERO);
        assert_eq!(result.health_factor, I80F48::ONE);
        assert_eq!(result.liquidation_price, None);
        assert_eq!(
            I80F48::from(result.banks[&SOL].total_asset_shares),
            I80F48!(100_002_000_000_000)
        );

        // the inputs are untouched
        assert!(account.lending_account.get_balance(&SOL).is_none());
        assert_eq!(
            I80F48::from(state.banks[&SOL].total_asset_shares),
            I80F48!(100_000_000_000_000)
        );
    }

    #[test]
    fn borrow_reports_health_and_liquidation_price() {
        let state = state();
        let account = AccountBuilder::new()
            .asset(SOL, I80F48!(10_000_000_000))
            .build();

        let result = simulate_action(
            &state,
            &account,
            &USDC,
            &SimulationAction::Borrow {
                amount: I80F48!(450),
            },
            NOW,
        )
        .unwrap();

        // 900 of maint assets against 450 of debt
        assert_eq_with_tolerance!(result.health_factor, I80F48!(0.5), I80F48!(0.0001));
        assert_eq_with_tolerance!(result.free_collateral, I80F48!(350), I80F48!(0.0001));
        // the debt is liquidated once USDC trades at 900 / 450
        assert_eq_with_tolerance!(
            result.liquidation_price.unwrap(),
            I80F48!(2),
            I80F48!(0.0001)
        );
        assert_eq!(result.banks.len(), 1);
        assert_eq!(
            I80F48::from(result.banks[&USDC].total_liability_shares),
            I80F48!(450_000_000)
        );
    }

    #[test]
    fn borrow_past_init_health_fails() {
        let state = state();
        let account = AccountBuilder::new()
            .asset(SOL, I80F48!(10_000_000_000))
            .build();

        assert_eq!(
            simulate_action(
                &state,
                &account,
                &USDC,
                &SimulationAction::Borrow {
                    amount: I80F48!(801),
                },
                NOW,
            ),
            Err(RiskError::BadAccountHealth)
        );
    }

    #[test]
    fn withdraw_all_closes_the_balance() {
        let state = state();
        let account = AccountBuilder::new()
            .asset(SOL, I80F48!(10_000_000_000))
            .build();

        let result = simulate_action(
            &state,
            &account,
            &SOL,
            &SimulationAction::Withdraw {
                amount: I80F48::ZERO,
                withdraw_all: true,
            },
            NOW,
        )
        .unwrap();

        assert!(result.account.lending_account.get_balance(&SOL).is_none());
        assert_eq!(result.assets, I80F48::ZERO);
        assert_eq!(result.health_factor, I80F48::ONE);
    }

    #[test]
    fn withdraw_without_balance_fails() {
        let state = state();
        let account = AccountBuilder::new().build();

        assert_matches!(
            simulate_action(
                &state,
                &account,
                &SOL,
                &SimulationAction::Withdraw {
                    amount: I80F48!(1),
                    withdraw_all: false,
                },
                NOW,
            ),
            Err(RiskError::LendingAccountBalanceNotFound)
        );
    }

    #[test]
    fn repay_with_collateral_moves_both_balances() {
        let state = state();
        let account = AccountBuilder::new()
            .asset(SOL, I80F48!(10_000_000_000))
            .liability(USDC, I80F48!(400_000_000))
            .build();

        let result = simulate_action(
            &state,
            &account,
            &USDC,
            &SimulationAction::RepayWithCollateral {
                deposit_bank: SOL,
                withdraw_amount: I80F48!(4),
                repay_amount: I80F48!(400),
                withdraw_all: false,
                repay_all: true,
            },
            NOW,
        )
        .unwrap();

        assert!(result.account.lending_account.get_balance(&USDC).is_none());
        assert_eq!(result.liabilities, I80F48::ZERO);
        assert_eq!(result.banks.len(), 2);
        let sol = result.account.lending_account.get_balance(&SOL).unwrap();
        assert_eq!(I80F48::from(sol.asset_shares), I80F48!(6_000_000_000));
    }

    #[test]
    fn loop_deposits_and_borrows() {
        let state = state();
        let account = AccountBuilder::new().build();

        let result = simulate_action(
            &state,
            &account,
            &SOL,
            &SimulationAction::Loop {
                borrow_bank: USDC,
                deposit_amount: I80F48!(3),
                borrow_amount: I80F48!(200),
            },
            NOW,
        )
        .unwrap();

        // 270 of maint assets against 200 of debt
        assert_eq_with_tolerance!(result.assets, I80F48!(270), I80F48!(0.0001));
        assert_eq!(result.liabilities, I80F48!(200));
        // 200 / (3 * 0.9)
        assert_eq_with_tolerance!(
            result.liquidation_price.unwrap(),
            I80F48!(74.074074),
            I80F48!(0.0001)
        );
    }

    #[test]
    fn paused_bank_rejects_actions() {
        let mut state = state();
        let mut sol = *state.get_bank(&SOL).unwrap();
        sol.config.operational_state = BankOperationalState::Paused;
        state.upsert_bank(SOL, sol);

        assert_eq!(
            simulate_action(
                &state,
                &AccountBuilder::new().build(),
                &SOL,
                &SimulationAction::Deposit {
                    amount: I80F48!(1),
                },
                NOW,
            ),
            Err(RiskError::BankPaused)
        );
    }
}
