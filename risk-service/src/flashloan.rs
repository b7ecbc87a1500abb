//! Flash-loan composition for looping, repaying with collateral and closing a position. Each
//! flow quotes the swap leg with progressively tighter account budgets until the composed
//! transaction fits in a single v0 message.

use std::{collections::HashMap, time::Duration};

use anchor_lang::InstructionData;
use fixed::types::I80F48;
use fixed_macro::types::I80F48;
use marginfi_risk_engine::{
    actions::{ActionMessage, StaticMessage},
    compute::{
        compute_health_account_metas, compute_health_check_accounts, compute_quantity_ui,
        get_looping_params, AdjustedLoopingParams, BalanceQuantity,
    },
    prelude::MarketState,
    utils::{native_to_ui, ui_to_native},
    RiskError,
};
use marginfi_risk_types::{
    constants::{
        CLOSE_POSITION_MAX_ACCOUNTS, LOOP_MAX_ACCOUNTS, MAX_FLASHLOAN_MESSAGE_SIZE,
        MAX_TX_ACCOUNT_KEYS, SYSVAR_INSTRUCTIONS_ID, TOKEN_PROGRAM_ID,
    },
    types::{BalanceSide, Bank, MarginfiAccount, Pubkey},
};
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    instruction::{AccountMeta, Instruction},
    message::v0,
};
use tracing::{debug, info, warn};

use crate::{
    jupiter::{
        get_swap_quote_with_retry, QuoteRequest, QuoteResponse, SwapMode, SwapProvider,
        QUOTE_RETRY_ATTEMPTS, QUOTE_RETRY_DELAY,
    },
    rpc::LookupTableSource,
    transaction::{compile_v0, readonly, to_solana_pubkey, writable, MessageLimits},
    ServiceError, ServiceResult,
};

const MAX_REPAY_QUOTE_ACCOUNTS: usize = 40;
const MAX_REPAY_USD_VALUE: I80F48 = I80F48!(700_000);
const EXACT_OUT_BUFFER: I80F48 = I80F48!(1.01);
const PRICE_FALLBACK_HAIRCUT: I80F48 = I80F48!(0.9998);
const EXACT_OUT_RETRIES: usize = 2;

/// Accounts shared by every marginfi instruction of one margin account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginfiAccounts {
    pub program_id: Pubkey,
    pub group: Pubkey,
    pub marginfi_account: Pubkey,
    pub authority: Pubkey,
}

/// Per-bank token accounts touched by a transfer in or out of the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankAccounts {
    pub bank: Pubkey,
    pub liquidity_vault: Pubkey,
    pub liquidity_vault_authority: Pubkey,
    pub token_program: Pubkey,
    pub user_token_account: Pubkey,
}

impl BankAccounts {
    pub fn new(
        bank_pk: Pubkey,
        bank: &Bank,
        liquidity_vault_authority: Pubkey,
        user_token_account: Pubkey,
    ) -> Self {
        Self {
            bank: bank_pk,
            liquidity_vault: bank.liquidity_vault,
            liquidity_vault_authority,
            token_program: TOKEN_PROGRAM_ID,
            user_token_account,
        }
    }
}

/// Arguments of the marginfi lending instructions, encoded behind their anchor discriminators.
pub mod args {
    use anchor_lang::{prelude::borsh, AnchorSerialize, Discriminator, InstructionData};
    use marginfi_risk_types::constants::ix_discriminators::*;

    macro_rules! marginfi_instruction {
        ($name:ident, $discriminator:expr) => {
            impl Discriminator for $name {
                const DISCRIMINATOR: &'static [u8] = &$discriminator;
            }

            impl InstructionData for $name {}
        };
    }

    #[derive(AnchorSerialize)]
    pub struct LendingAccountDeposit {
        pub amount: u64,
    }

    #[derive(AnchorSerialize)]
    pub struct LendingAccountRepay {
        pub amount: u64,
        pub repay_all: Option<bool>,
    }

    #[derive(AnchorSerialize)]
    pub struct LendingAccountWithdraw {
        pub amount: u64,
        pub withdraw_all: Option<bool>,
    }

    #[derive(AnchorSerialize)]
    pub struct LendingAccountBorrow {
        pub amount: u64,
    }

    #[derive(AnchorSerialize)]
    pub struct LendingAccountStartFlashloan {
        pub end_index: u64,
    }

    #[derive(AnchorSerialize)]
    pub struct LendingAccountEndFlashloan {}

    marginfi_instruction!(LendingAccountDeposit, LENDING_ACCOUNT_DEPOSIT);
    marginfi_instruction!(LendingAccountRepay, LENDING_ACCOUNT_REPAY);
    marginfi_instruction!(LendingAccountWithdraw, LENDING_ACCOUNT_WITHDRAW);
    marginfi_instruction!(LendingAccountBorrow, LENDING_ACCOUNT_BORROW);
    marginfi_instruction!(LendingAccountStartFlashloan, START_FLASHLOAN);
    marginfi_instruction!(LendingAccountEndFlashloan, END_FLASHLOAN);
}

impl MarginfiAccounts {
    fn instruction(&self, accounts: Vec<AccountMeta>, args: impl InstructionData) -> Instruction {
        Instruction {
            program_id: to_solana_pubkey(&self.program_id),
            accounts,
            data: args.data(),
        }
    }

    pub fn start_flashloan(&self, end_index: u64) -> Instruction {
        self.instruction(
            vec![
                writable(&self.marginfi_account, false),
                readonly(&self.authority, true),
                readonly(&SYSVAR_INSTRUCTIONS_ID, false),
            ],
            args::LendingAccountStartFlashloan { end_index },
        )
    }

    /// `health_accounts` are the `[bank, oracle]` pairs checked once the loan closes.
    pub fn end_flashloan(&self, health_accounts: &[Pubkey]) -> Instruction {
        let mut accounts = vec![
            writable(&self.marginfi_account, false),
            readonly(&self.authority, true),
        ];
        accounts.extend(health_accounts.iter().map(|pk| readonly(pk, false)));

        self.instruction(accounts, args::LendingAccountEndFlashloan {})
    }

    fn outflow_accounts(&self, bank: &BankAccounts) -> Vec<AccountMeta> {
        vec![
            readonly(&self.group, false),
            writable(&self.marginfi_account, false),
            readonly(&self.authority, true),
            writable(&bank.bank, false),
            writable(&bank.user_token_account, false),
            readonly(&bank.liquidity_vault_authority, false),
            writable(&bank.liquidity_vault, false),
            readonly(&bank.token_program, false),
        ]
    }

    fn inflow_accounts(&self, bank: &BankAccounts) -> Vec<AccountMeta> {
        vec![
            readonly(&self.group, false),
            writable(&self.marginfi_account, false),
            readonly(&self.authority, true),
            writable(&bank.bank, false),
            writable(&bank.user_token_account, false),
            writable(&bank.liquidity_vault, false),
            readonly(&bank.token_program, false),
        ]
    }

    pub fn borrow(&self, bank: &BankAccounts, amount: u64) -> Instruction {
        self.instruction(
            self.outflow_accounts(bank),
            args::LendingAccountBorrow { amount },
        )
    }

    pub fn withdraw(&self, bank: &BankAccounts, amount: u64, withdraw_all: bool) -> Instruction {
        self.instruction(
            self.outflow_accounts(bank),
            args::LendingAccountWithdraw {
                amount,
                withdraw_all: withdraw_all.then_some(true),
            },
        )
    }

    pub fn deposit(&self, bank: &BankAccounts, amount: u64) -> Instruction {
        self.instruction(
            self.inflow_accounts(bank),
            args::LendingAccountDeposit { amount },
        )
    }

    pub fn repay(&self, bank: &BankAccounts, amount: u64, repay_all: bool) -> Instruction {
        self.instruction(
            self.inflow_accounts(bank),
            args::LendingAccountRepay {
                amount,
                repay_all: repay_all.then_some(true),
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlashloanTx {
    pub message: v0::Message,
    pub lookup_tables: Vec<AddressLookupTableAccount>,
}

/// Wraps `instructions` between `start_flashloan` and `end_flashloan` and compiles the result.
pub fn build_flashloan_tx(
    accounts: &MarginfiAccounts,
    instructions: Vec<Instruction>,
    health_accounts: &[Pubkey],
    lookup_tables: Vec<AddressLookupTableAccount>,
) -> ServiceResult<FlashloanTx> {
    let end_index = instructions.len() as u64 + 1;

    let mut ixs = Vec::with_capacity(instructions.len() + 2);
    ixs.push(accounts.start_flashloan(end_index));
    ixs.extend(instructions);
    ixs.push(accounts.end_flashloan(health_accounts));

    let message = compile_v0(&accounts.authority, &ixs, &lookup_tables)?;

    Ok(FlashloanTx {
        message,
        lookup_tables,
    })
}

/// Rejects transactions that would not land, either for the account key count or the byte
/// size. A message that fails to compile counts as too large.
pub fn verify_flashloan_tx_size(
    built: ServiceResult<FlashloanTx>,
) -> Result<FlashloanTx, ActionMessage> {
    let tx = built.map_err(|e| {
        warn!("Failed to build flash loan transaction: {}", e);
        ActionMessage::from(StaticMessage::TxSize)
    })?;

    let total_keys = tx.message.total_account_keys();
    if total_keys >= MAX_TX_ACCOUNT_KEYS {
        debug!("Flash loan uses {} account keys", total_keys);
        return Err(StaticMessage::KeySize.into());
    }

    let size = tx.message.serialized_size();
    if size > MAX_FLASHLOAN_MESSAGE_SIZE {
        debug!("Flash loan message is {} bytes", size);
        return Err(StaticMessage::TxSize.into());
    }

    Ok(tx)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopingPlan {
    pub params: AdjustedLoopingParams,
    /// Swap output floor plus the principal, in UI units of the deposit bank.
    pub actual_deposit_amount: I80F48,
    pub quote: QuoteResponse,
    pub transaction: FlashloanTx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepayCollateralPlan {
    pub amount_to_repay: I80F48,
    pub quote: QuoteResponse,
    pub transaction: FlashloanTx,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosePositionPlan {
    pub max_amount: I80F48,
    pub quote: QuoteResponse,
    pub transaction: FlashloanTx,
}

/// Plans flash loans for one margin account against a market snapshot.
pub struct FlashloanPlanner<'a> {
    state: &'a MarketState,
    account: &'a MarginfiAccount,
    accounts: MarginfiAccounts,
    bank_accounts: &'a HashMap<Pubkey, BankAccounts>,
    swap_provider: &'a dyn SwapProvider,
    lookup_source: &'a dyn LookupTableSource,
    /// Tables the marginfi side of the transaction is compiled against.
    marginfi_lookup_tables: Vec<AddressLookupTableAccount>,
    slippage_bps: u16,
    quote_retries: usize,
    quote_retry_delay: Duration,
}

impl<'a> FlashloanPlanner<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a MarketState,
        account: &'a MarginfiAccount,
        accounts: MarginfiAccounts,
        bank_accounts: &'a HashMap<Pubkey, BankAccounts>,
        swap_provider: &'a dyn SwapProvider,
        lookup_source: &'a dyn LookupTableSource,
        marginfi_lookup_tables: Vec<AddressLookupTableAccount>,
        slippage_bps: u16,
    ) -> Self {
        Self {
            state,
            account,
            accounts,
            bank_accounts,
            swap_provider,
            lookup_source,
            marginfi_lookup_tables,
            slippage_bps,
            quote_retries: QUOTE_RETRY_ATTEMPTS,
            quote_retry_delay: QUOTE_RETRY_DELAY,
        }
    }

    pub fn with_quote_retry(mut self, retries: usize, delay: Duration) -> Self {
        self.quote_retries = retries;
        self.quote_retry_delay = delay;
        self
    }

    fn bank(&self, bank_pk: &Pubkey) -> ServiceResult<&'a Bank> {
        Ok(self.state.get_bank(bank_pk)?)
    }

    fn bank_accounts(&self, bank_pk: &Pubkey) -> ServiceResult<&'a BankAccounts> {
        self.bank_accounts
            .get(bank_pk)
            .ok_or_else(|| ServiceError::action(StaticMessage::BankNotInitialized))
    }

    fn realtime_price(&self, bank_pk: &Pubkey) -> ServiceResult<I80F48> {
        Ok(self.state.get_price(bank_pk)?.price_realtime.price.into())
    }

    /// The account's position in `bank_pk` in UI units, zero when it has none.
    fn position(&self, bank_pk: &Pubkey) -> ServiceResult<BalanceQuantity> {
        match self.account.lending_account.get_balance(bank_pk) {
            Some(balance) => Ok(compute_quantity_ui(balance, self.bank(bank_pk)?)?),
            None => Ok(BalanceQuantity::default()),
        }
    }

    fn health_accounts(
        &self,
        mandatory: &[Pubkey],
        excluded: &[Pubkey],
    ) -> ServiceResult<Vec<Pubkey>> {
        let banks = compute_health_check_accounts(self.account, mandatory, excluded);
        Ok(compute_health_account_metas(&banks, &self.state.banks)?)
    }

    fn quote_request(
        &self,
        input: &Bank,
        output: &Bank,
        amount: u64,
        swap_mode: SwapMode,
        max_accounts: Option<usize>,
    ) -> QuoteRequest {
        QuoteRequest::new(&input.mint, &output.mint, amount, swap_mode)
            .with_slippage_bps(self.slippage_bps)
            .with_max_accounts(max_accounts)
    }

    async fn quote(&self, request: &QuoteRequest, retries: usize) -> ServiceResult<QuoteResponse> {
        get_swap_quote_with_retry(self.swap_provider, request, retries, self.quote_retry_delay)
            .await
    }

    /// `before`, the swap leg of `quote`, then `after`, all inside one flash loan. Fetch
    /// failures are returned as errors, an oversized result as the rejection message.
    async fn compose(
        &self,
        quote: &QuoteResponse,
        before: Vec<Instruction>,
        after: Vec<Instruction>,
        health_accounts: &[Pubkey],
    ) -> ServiceResult<Result<FlashloanTx, ActionMessage>> {
        let swap = self
            .swap_provider
            .swap_instructions(quote, &self.accounts.authority)
            .await?;
        let swap_tables = self
            .lookup_source
            .fetch_lookup_tables(&swap.lookup_table_addresses)
            .await?;

        let mut lookup_tables = self.marginfi_lookup_tables.clone();
        lookup_tables.extend(swap_tables);

        let mut ixs = before;
        ixs.extend(swap.into_instructions());
        ixs.extend(after);

        Ok(verify_flashloan_tx_size(build_flashloan_tx(
            &self.accounts,
            ixs,
            health_accounts,
            lookup_tables,
        )))
    }

    /// Borrows from `borrow_bank_pk`, swaps into the deposit mint and deposits the output plus
    /// `principal` into `deposit_bank_pk`.
    pub async fn calculate_looping_params(
        &self,
        deposit_bank_pk: &Pubkey,
        borrow_bank_pk: &Pubkey,
        principal: I80F48,
        target_leverage: I80F48,
    ) -> ServiceResult<LoopingPlan> {
        let deposit_bank = self.bank(deposit_bank_pk)?;
        let borrow_bank = self.bank(borrow_bank_pk)?;
        let deposit_accounts = self.bank_accounts(deposit_bank_pk)?;
        let borrow_accounts = self.bank_accounts(borrow_bank_pk)?;

        let params = get_looping_params(
            principal,
            target_leverage,
            self.slippage_bps,
            deposit_bank,
            borrow_bank,
            self.state.get_price(deposit_bank_pk)?,
            self.state.get_price(borrow_bank_pk)?,
        )?;
        let health_accounts = self.health_accounts(&[*deposit_bank_pk, *borrow_bank_pk], &[])?;

        for max_accounts in LOOP_MAX_ACCOUNTS {
            info!("Quoting loop swap with max accounts {:?}", max_accounts);
            let request = self.quote_request(
                borrow_bank,
                deposit_bank,
                params.borrow_amount_native,
                SwapMode::ExactIn,
                max_accounts,
            );
            let quote = self.quote(&request, self.quote_retries).await?;

            let swapped = native_to_ui(
                I80F48::from_num(quote.other_amount_threshold),
                deposit_bank.mint_decimals,
            )?;
            let actual_deposit_amount = swapped
                .checked_add(principal)
                .ok_or(RiskError::MathError)?;

            let built = self
                .compose(
                    &quote,
                    vec![self
                        .accounts
                        .borrow(borrow_accounts, params.borrow_amount_native)],
                    vec![self.accounts.deposit(
                        deposit_accounts,
                        ui_to_native(actual_deposit_amount, deposit_bank.mint_decimals)?,
                    )],
                    &health_accounts,
                )
                .await?;

            match built {
                Ok(transaction) => {
                    return Ok(LoopingPlan {
                        params,
                        actual_deposit_amount,
                        quote,
                        transaction,
                    })
                }
                Err(message) => debug!("Loop candidate rejected: {}", message.description),
            }
        }

        Err(ServiceError::action(StaticMessage::FlFailed))
    }

    /// Withdraws `withdraw_amount` of collateral from `deposit_bank_pk`, swaps it and repays
    /// debt in `borrow_bank_pk`, never more than the outstanding debt.
    pub async fn calculate_repay_collateral_params(
        &self,
        borrow_bank_pk: &Pubkey,
        deposit_bank_pk: &Pubkey,
        withdraw_amount: I80F48,
    ) -> ServiceResult<RepayCollateralPlan> {
        let deposit_bank = self.bank(deposit_bank_pk)?;
        let borrow_bank = self.bank(borrow_bank_pk)?;
        let deposit_accounts = self.bank_accounts(deposit_bank_pk)?;
        let borrow_accounts = self.bank_accounts(borrow_bank_pk)?;

        let max_repay = self.position(borrow_bank_pk)?.liabilities;
        let withdraw_all = withdraw_amount >= self.position(deposit_bank_pk)?.assets;
        let withdraw_native = ui_to_native(withdraw_amount, deposit_bank.mint_decimals)?;

        for max_accounts in LOOP_MAX_ACCOUNTS {
            info!("Quoting collateral swap with max accounts {:?}", max_accounts);
            let request = self.quote_request(
                deposit_bank,
                borrow_bank,
                withdraw_native,
                SwapMode::ExactIn,
                max_accounts,
            );
            let quote = self.quote(&request, self.quote_retries).await?;

            let out_amount =
                native_to_ui(I80F48::from_num(quote.out_amount), borrow_bank.mint_decimals)?;
            let amount_to_repay = if out_amount > max_repay {
                max_repay
            } else {
                native_to_ui(
                    I80F48::from_num(quote.other_amount_threshold),
                    borrow_bank.mint_decimals,
                )?
            };
            let repay_all = amount_to_repay >= max_repay;

            let excluded: Vec<Pubkey> = [
                (withdraw_all, *deposit_bank_pk),
                (repay_all, *borrow_bank_pk),
            ]
            .into_iter()
            .filter_map(|(closed, pk)| closed.then_some(pk))
            .collect();

            let built = self
                .compose(
                    &quote,
                    vec![self
                        .accounts
                        .withdraw(deposit_accounts, withdraw_native, withdraw_all)],
                    vec![self.accounts.repay(
                        borrow_accounts,
                        ui_to_native(amount_to_repay, borrow_bank.mint_decimals)?,
                        repay_all,
                    )],
                    &self.health_accounts(&[], &excluded)?,
                )
                .await?;

            match built {
                Ok(transaction) => {
                    return Ok(RepayCollateralPlan {
                        amount_to_repay,
                        quote,
                        transaction,
                    })
                }
                Err(message) => debug!("Repay candidate rejected: {}", message.description),
            }
        }

        Err(ServiceError::action(StaticMessage::FlFailed))
    }

    /// Closes the debt in `borrow_bank_pk` with collateral from `deposit_bank_pk`, emptying both
    /// balances.
    pub async fn calculate_borrow_lend_position_params(
        &self,
        borrow_bank_pk: &Pubkey,
        deposit_bank_pk: &Pubkey,
    ) -> ServiceResult<ClosePositionPlan> {
        let is_borrowing = self
            .account
            .lending_account
            .get_balance(borrow_bank_pk)
            .is_some_and(|b| b.get_side() == Some(BalanceSide::Liabilities));
        if !is_borrowing {
            return Err(ServiceError::action(StaticMessage::BankNotActiveCheck));
        }

        let deposit_bank = self.bank(deposit_bank_pk)?;
        let borrow_bank = self.bank(borrow_bank_pk)?;
        let deposit_accounts = self.bank_accounts(deposit_bank_pk)?;
        let borrow_accounts = self.bank_accounts(borrow_bank_pk)?;

        let max_amount = self
            .calculate_max_repayable_collateral(borrow_bank_pk, deposit_bank_pk)
            .await;
        if max_amount.is_zero() {
            return Err(ServiceError::action(StaticMessage::ClosePositionsFlFailed));
        }
        let max_amount_native = ui_to_native(max_amount, deposit_bank.mint_decimals)?;
        let health_accounts = self.health_accounts(&[], &[*deposit_bank_pk, *borrow_bank_pk])?;

        for max_accounts in CLOSE_POSITION_MAX_ACCOUNTS {
            let request = self.quote_request(
                deposit_bank,
                borrow_bank,
                max_amount_native,
                SwapMode::ExactIn,
                max_accounts,
            );
            let quote = self.quote(&request, self.quote_retries).await?;

            let built = self
                .compose(
                    &quote,
                    vec![self
                        .accounts
                        .withdraw(deposit_accounts, max_amount_native, true)],
                    vec![self
                        .accounts
                        .repay(borrow_accounts, quote.other_amount_threshold, true)],
                    &health_accounts,
                )
                .await?;

            match built {
                Ok(transaction) => {
                    return Ok(ClosePositionPlan {
                        max_amount,
                        quote,
                        transaction,
                    })
                }
                Err(message) => debug!("Close candidate rejected: {}", message.description),
            }
        }

        Err(ServiceError::action(StaticMessage::ClosePositionsFlFailed))
    }

    /// Collateral in `repay_bank_pk` needed to clear the debt in `bank_pk`, capped at $700k of
    /// debt. Zero when the account has no collateral there or when quoting fails.
    pub async fn calculate_max_repayable_collateral(
        &self,
        bank_pk: &Pubkey,
        repay_bank_pk: &Pubkey,
    ) -> I80F48 {
        self.try_max_repayable_collateral(bank_pk, repay_bank_pk)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to compute max repayable collateral: {}", e);
                I80F48::ZERO
            })
    }

    async fn try_max_repayable_collateral(
        &self,
        bank_pk: &Pubkey,
        repay_bank_pk: &Pubkey,
    ) -> ServiceResult<I80F48> {
        let bank = self.bank(bank_pk)?;
        let repay_bank = self.bank(repay_bank_pk)?;
        let bank_price = self.realtime_price(bank_pk)?;

        let amount = self.position(repay_bank_pk)?.assets;
        let mut max_repay = self.position(bank_pk)?.liabilities;

        let max_repay_value = max_repay.checked_mul(bank_price).ok_or(RiskError::MathError)?;
        if max_repay_value > MAX_REPAY_USD_VALUE {
            max_repay = MAX_REPAY_USD_VALUE
                .checked_div(bank_price)
                .ok_or(RiskError::MathError)?;
        }

        if amount.is_zero() {
            return Ok(I80F48::ZERO);
        }

        let request = self.quote_request(
            repay_bank,
            bank,
            ui_to_native(amount, repay_bank.mint_decimals)?,
            SwapMode::ExactIn,
            Some(MAX_REPAY_QUOTE_ACCOUNTS),
        );
        let quote = self.quote(&request, self.quote_retries).await?;
        let amount_in_debt = native_to_ui(
            I80F48::from_num(quote.other_amount_threshold),
            bank.mint_decimals,
        )?;

        if amount_in_debt <= max_repay {
            return Ok(amount);
        }

        let exact_out = self.quote_request(
            repay_bank,
            bank,
            ui_to_native(max_repay, bank.mint_decimals)?,
            SwapMode::ExactOut,
            None,
        );
        match self.quote(&exact_out, EXACT_OUT_RETRIES).await {
            Ok(quote) => Ok(native_to_ui(
                I80F48::from_num(quote.other_amount_threshold),
                repay_bank.mint_decimals,
            )?
            .checked_mul(EXACT_OUT_BUFFER)
            .ok_or(RiskError::MathError)?),
            Err(e) => {
                warn!("Exact out quote failed, estimating from prices: {}", e);
                let repay_price = self.realtime_price(repay_bank_pk)?;
                Ok(max_repay
                    .checked_mul(bank_price)
                    .and_then(|v| v.checked_mul(PRICE_FALLBACK_HAIRCUT))
                    .and_then(|v| v.checked_div(repay_price))
                    .ok_or(RiskError::MathError)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jupiter::{tests::quote, SwapInstructions};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use marginfi_risk_types::constants::{
        ix_discriminators::{END_FLASHLOAN, LENDING_ACCOUNT_WITHDRAW},
        MARGINFI_PROGRAM_ID,
    };
    use fixtures::{
        accounts::{AccountBuilder, TEST_AUTHORITY},
        banks::{test_bank_with_liquidity, TestBank, TEST_GROUP},
        native,
        prices::oracle_price,
    };
    use marginfi_risk_engine::assert_eq_with_tolerance;
    use pretty_assertions::assert_eq;
    use solana_sdk::message::CompileError;
    use std::sync::Mutex;

    const SOL_BANK: Pubkey = Pubkey::new_from_seed(1);
    const USDC_BANK: Pubkey = Pubkey::new_from_seed(2);
    const SWAP_TABLE: Pubkey = Pubkey::new_from_seed(250);

    fn swap_account(i: usize) -> Pubkey {
        let mut bytes = [0xAA; 32];
        bytes[0] = i as u8;
        Pubkey::new(bytes)
    }

    /// Answers every quote with `exact_in` (or `exact_out`), and builds swap legs whose account
    /// count depends on the requested account budget.
    struct MockSwap {
        exact_in: QuoteResponse,
        exact_out: Option<QuoteResponse>,
        accounts_for: fn(Option<usize>) -> usize,
        requests: Mutex<Vec<QuoteRequest>>,
    }

    impl MockSwap {
        fn new(exact_in: QuoteResponse, accounts_for: fn(Option<usize>) -> usize) -> Self {
            Self {
                exact_in,
                exact_out: None,
                accounts_for,
                requests: Mutex::new(vec![]),
            }
        }

        fn requests(&self) -> Vec<QuoteRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SwapProvider for MockSwap {
        async fn quote(&self, request: &QuoteRequest) -> ServiceResult<QuoteResponse> {
            self.requests.lock().unwrap().push(request.clone());
            match request.swap_mode {
                Some(SwapMode::ExactOut) => self.exact_out.clone().ok_or(ServiceError::Status {
                    status: 400,
                    body: "no route".to_string(),
                }),
                _ => Ok(self.exact_in.clone()),
            }
        }

        async fn swap_instructions(
            &self,
            _quote: &QuoteResponse,
            _user: &Pubkey,
        ) -> ServiceResult<SwapInstructions> {
            let max_accounts = self
                .requests
                .lock()
                .unwrap()
                .last()
                .and_then(|r| r.max_accounts);
            let count = (self.accounts_for)(max_accounts);

            Ok(SwapInstructions {
                setup: vec![],
                swap: Instruction {
                    program_id: to_solana_pubkey(&Pubkey::new_from_seed(240)),
                    accounts: (0..count)
                        .map(|i| writable(&swap_account(i), false))
                        .collect(),
                    data: vec![0; 40],
                },
                cleanup: None,
                lookup_table_addresses: vec![SWAP_TABLE],
            })
        }
    }

    fn swap_table(key: &Pubkey) -> AddressLookupTableAccount {
        AddressLookupTableAccount {
            key: to_solana_pubkey(key),
            addresses: (0..200).map(|i| to_solana_pubkey(&swap_account(i))).collect(),
        }
    }

    enum MockTables {
        /// One table per key, each holding every swap account.
        Serve,
        Empty,
        Unavailable,
    }

    #[async_trait]
    impl LookupTableSource for MockTables {
        async fn fetch_lookup_tables(
            &self,
            keys: &[Pubkey],
        ) -> ServiceResult<Vec<AddressLookupTableAccount>> {
            match self {
                MockTables::Serve => Ok(keys.iter().map(swap_table).collect()),
                MockTables::Empty => Ok(vec![]),
                MockTables::Unavailable => Err(ServiceError::Status {
                    status: 503,
                    body: "node behind".to_string(),
                }),
            }
        }
    }

    /// 10 SOL at $100 collateral against 200 USDC of debt.
    fn market() -> (MarketState, MarginfiAccount, HashMap<Pubkey, BankAccounts>) {
        let sol = test_bank_with_liquidity(TestBank::Sol, native!(1_000, "SOL"), 0);
        let usdc = test_bank_with_liquidity(
            TestBank::Usdc,
            native!(1_000_000, "USDC"),
            native!(200, "USDC"),
        );

        let mut state = MarketState::default();
        state.upsert_bank(SOL_BANK, sol);
        state.upsert_bank(USDC_BANK, usdc);
        state.set_oracle_price(SOL_BANK, oracle_price(I80F48!(100), I80F48::ZERO));
        state.set_oracle_price(USDC_BANK, oracle_price(I80F48!(1), I80F48::ZERO));

        let account = AccountBuilder::new()
            .asset(SOL_BANK, I80F48::from_num(native!(10, "SOL")))
            .liability(USDC_BANK, I80F48::from_num(native!(200, "USDC")))
            .build();

        let bank_accounts = HashMap::from([
            (
                SOL_BANK,
                BankAccounts::new(
                    SOL_BANK,
                    &sol,
                    Pubkey::new_from_seed(101),
                    Pubkey::new_from_seed(111),
                ),
            ),
            (
                USDC_BANK,
                BankAccounts::new(
                    USDC_BANK,
                    &usdc,
                    Pubkey::new_from_seed(102),
                    Pubkey::new_from_seed(112),
                ),
            ),
        ]);

        (state, account, bank_accounts)
    }

    fn marginfi_accounts() -> MarginfiAccounts {
        MarginfiAccounts {
            program_id: MARGINFI_PROGRAM_ID,
            group: TEST_GROUP,
            marginfi_account: Pubkey::new_from_seed(90),
            authority: TEST_AUTHORITY,
        }
    }

    fn planner<'a>(
        state: &'a MarketState,
        account: &'a MarginfiAccount,
        bank_accounts: &'a HashMap<Pubkey, BankAccounts>,
        swap: &'a MockSwap,
        tables: &'a MockTables,
    ) -> FlashloanPlanner<'a> {
        FlashloanPlanner::new(
            state,
            account,
            marginfi_accounts(),
            bank_accounts,
            swap,
            tables,
            vec![],
            0,
        )
        .with_quote_retry(1, Duration::ZERO)
    }

    #[test]
    fn instruction_data_follows_anchor_layout() {
        let accounts = marginfi_accounts();
        let bank = BankAccounts {
            bank: SOL_BANK,
            liquidity_vault: Pubkey::new_from_seed(3),
            liquidity_vault_authority: Pubkey::new_from_seed(4),
            token_program: TOKEN_PROGRAM_ID,
            user_token_account: Pubkey::new_from_seed(5),
        };

        let withdraw_all = accounts.withdraw(&bank, 7, true);
        assert_eq!(&withdraw_all.data[..8], &LENDING_ACCOUNT_WITHDRAW);
        assert_eq!(&withdraw_all.data[8..16], &7u64.to_le_bytes());
        assert_eq!(&withdraw_all.data[16..], &[1, 1]);

        assert_eq!(&accounts.repay(&bank, 7, false).data[16..], &[0]);
        assert_eq!(accounts.borrow(&bank, 7).data.len(), 16);
        assert_eq!(accounts.start_flashloan(3).data[8..], 3u64.to_le_bytes());
        assert_eq!(accounts.end_flashloan(&[]).data, END_FLASHLOAN.to_vec());
    }

    #[test]
    fn flashloan_end_index_points_at_last_instruction() {
        let accounts = marginfi_accounts();
        let tx = build_flashloan_tx(&accounts, vec![], &[SOL_BANK], vec![]).unwrap();

        assert_eq!(tx.message.instructions.len(), 2);
        assert_eq!(tx.message.instructions[0].data[8..], 1u64.to_le_bytes());
    }

    fn swap_leg(accounts: usize, data_len: usize) -> Instruction {
        Instruction {
            program_id: to_solana_pubkey(&Pubkey::new_from_seed(240)),
            accounts: (0..accounts)
                .map(|i| writable(&swap_account(i), false))
                .collect(),
            data: vec![0; data_len],
        }
    }

    #[test]
    fn size_check_flags_keys_before_bytes() {
        let accounts = marginfi_accounts();

        // 70 static keys are over both limits
        assert_eq!(
            verify_flashloan_tx_size(build_flashloan_tx(
                &accounts,
                vec![swap_leg(70, 0)],
                &[],
                vec![]
            ))
            .unwrap_err(),
            StaticMessage::KeySize.message()
        );
        assert_eq!(
            verify_flashloan_tx_size(build_flashloan_tx(
                &accounts,
                vec![swap_leg(0, 1200)],
                &[],
                vec![]
            ))
            .unwrap_err(),
            StaticMessage::TxSize.message()
        );
        assert_eq!(
            verify_flashloan_tx_size(Err(ServiceError::Compile(
                CompileError::AccountIndexOverflow
            )))
            .unwrap_err(),
            StaticMessage::TxSize.message()
        );
    }

    #[test]
    fn account_key_limit_rejects_sixty_four() {
        let accounts = marginfi_accounts();
        let build = |swap_accounts| {
            build_flashloan_tx(
                &accounts,
                vec![swap_leg(swap_accounts, 0)],
                &[],
                vec![swap_table(&SWAP_TABLE)],
            )
        };

        // fee payer, margin account, instructions sysvar and both programs
        assert_eq!(build(0).unwrap().message.total_account_keys(), 5);

        let at_limit = verify_flashloan_tx_size(build(58)).unwrap();
        assert_eq!(at_limit.message.total_account_keys(), 63);

        let over = build(59);
        assert_eq!(over.as_ref().unwrap().message.total_account_keys(), 64);
        assert_eq!(
            verify_flashloan_tx_size(over).unwrap_err(),
            StaticMessage::KeySize.message()
        );
    }

    #[test]
    fn message_size_limit_accepts_exactly_1158_bytes() {
        let accounts = marginfi_accounts();
        let build = |data_len| {
            build_flashloan_tx(&accounts, vec![swap_leg(0, data_len)], &[], vec![])
        };

        // past 127 bytes the data length prefix stays at two bytes, so every added byte of
        // data adds one byte to the message
        let size_at_200 = build(200).unwrap().message.serialized_size();
        let fitting = 200 + MAX_FLASHLOAN_MESSAGE_SIZE - size_at_200;

        let at_limit = verify_flashloan_tx_size(build(fitting)).unwrap();
        assert_eq!(at_limit.message.serialized_size(), 1158);

        let over = build(fitting + 1);
        assert_eq!(over.as_ref().unwrap().message.serialized_size(), 1159);
        assert_eq!(
            verify_flashloan_tx_size(over).unwrap_err(),
            StaticMessage::TxSize.message()
        );
    }

    #[tokio::test]
    async fn looping_falls_back_to_tighter_account_budgets() {
        let (state, account, bank_accounts) = market();
        // the unbounded route is too wide, the 50 account one fits
        let swap = MockSwap::new(quote(native!(100, "USDC"), 995_000_000, 990_000_000), |max| {
            match max {
                None => 70,
                Some(_) => 20,
            }
        });
        let tables = MockTables::Serve;

        let plan = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_looping_params(&SOL_BANK, &USDC_BANK, I80F48!(1), I80F48!(2))
            .await
            .unwrap();

        let requests = swap.requests();
        assert_eq!(
            requests.iter().map(|r| r.max_accounts).collect::<Vec<_>>(),
            vec![None, Some(50)]
        );
        assert_eq!(requests[0].amount, native!(100, "USDC"));
        assert_eq!(requests[0].input_mint, TestBank::Usdc.mint().to_string());
        assert_eq!(plan.params.borrow_amount_native, native!(100, "USDC"));
        assert_eq_with_tolerance!(plan.actual_deposit_amount, I80F48!(1.99), I80F48!(0.000001));
        assert!(plan.transaction.message.total_account_keys() < MAX_TX_ACCOUNT_KEYS);
    }

    #[tokio::test]
    async fn looping_fails_when_no_budget_fits() {
        let (state, account, bank_accounts) = market();
        let swap = MockSwap::new(quote(native!(100, "USDC"), 995_000_000, 990_000_000), |_| 30);
        // without tables every swap account is a static key
        let tables = MockTables::Empty;

        let result = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_looping_params(&SOL_BANK, &USDC_BANK, I80F48!(1), I80F48!(2))
            .await;

        assert_matches!(
            result,
            Err(ServiceError::Action(message)) if message == StaticMessage::FlFailed.message()
        );
        assert_eq!(swap.requests().len(), LOOP_MAX_ACCOUNTS.len());
    }

    #[tokio::test]
    async fn lookup_table_outage_is_not_a_size_rejection() {
        let (state, account, bank_accounts) = market();
        let swap = MockSwap::new(quote(native!(100, "USDC"), 995_000_000, 990_000_000), |_| 10);
        let tables = MockTables::Unavailable;

        let result = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_looping_params(&SOL_BANK, &USDC_BANK, I80F48!(1), I80F48!(2))
            .await;

        assert_matches!(result, Err(ServiceError::Status { status: 503, .. }));
        // no tighter budget is quoted
        assert_eq!(swap.requests().len(), 1);
    }

    #[tokio::test]
    async fn repay_with_collateral_caps_at_outstanding_debt() {
        let (state, account, bank_accounts) = market();
        // 3 SOL swaps into ~300 USDC, more than the 200 owed
        let swap = MockSwap::new(quote(native!(3, "SOL"), 300_000_000, 297_000_000), |_| 10);
        let tables = MockTables::Serve;

        let plan = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_repay_collateral_params(&USDC_BANK, &SOL_BANK, I80F48!(3))
            .await
            .unwrap();

        assert_eq!(plan.amount_to_repay, I80F48!(200));
        assert_eq!(swap.requests()[0].output_mint, TestBank::Usdc.mint().to_string());
    }

    #[tokio::test]
    async fn repay_with_collateral_uses_the_output_floor() {
        let (state, account, bank_accounts) = market();
        let swap = MockSwap::new(quote(native!(1, "SOL"), 100_000_000, 99_000_000), |_| 10);
        let tables = MockTables::Serve;

        let plan = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_repay_collateral_params(&USDC_BANK, &SOL_BANK, I80F48!(1))
            .await
            .unwrap();

        assert_eq!(plan.amount_to_repay, I80F48!(99));
    }

    #[tokio::test]
    async fn max_repayable_requotes_exact_out() {
        let (state, account, bank_accounts) = market();
        let mut swap = MockSwap::new(quote(native!(10, "SOL"), 1_000_000_000, 990_000_000), |_| 10);
        swap.exact_out = Some(quote(2_020_000_000, native!(200, "USDC"), 2_020_000_000));
        let tables = MockTables::Serve;

        let amount = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_max_repayable_collateral(&USDC_BANK, &SOL_BANK)
            .await;

        assert_eq_with_tolerance!(amount, I80F48!(2.0402), I80F48!(0.000001));
        let requests = swap.requests();
        assert_eq!(requests[0].max_accounts, Some(40));
        assert_eq!(requests[1].swap_mode, Some(SwapMode::ExactOut));
        assert_eq!(requests[1].amount, native!(200, "USDC"));
    }

    #[tokio::test]
    async fn max_repayable_falls_back_to_prices() {
        let (state, account, bank_accounts) = market();
        let swap = MockSwap::new(quote(native!(10, "SOL"), 1_000_000_000, 990_000_000), |_| 10);
        let tables = MockTables::Serve;

        let amount = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_max_repayable_collateral(&USDC_BANK, &SOL_BANK)
            .await;

        // 200 USDC at $1, less 0.02%, in SOL at $100
        assert_eq_with_tolerance!(amount, I80F48!(1.9996), I80F48!(0.000001));
    }

    #[tokio::test]
    async fn max_repayable_is_whole_collateral_when_it_falls_short() {
        let (state, account, bank_accounts) = market();
        let swap = MockSwap::new(quote(native!(10, "SOL"), 150_000_000, 148_000_000), |_| 10);
        let tables = MockTables::Serve;

        let amount = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_max_repayable_collateral(&USDC_BANK, &SOL_BANK)
            .await;

        assert_eq!(amount, I80F48!(10));
    }

    #[tokio::test]
    async fn closing_requires_an_active_borrow() {
        let (state, account, bank_accounts) = market();
        let swap = MockSwap::new(quote(0, 0, 0), |_| 10);
        let tables = MockTables::Serve;

        let result = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_borrow_lend_position_params(&SOL_BANK, &USDC_BANK)
            .await;

        assert_matches!(
            result,
            Err(ServiceError::Action(message))
                if message == StaticMessage::BankNotActiveCheck.message()
        );
        assert!(swap.requests().is_empty());
    }

    #[tokio::test]
    async fn closing_position_withdraws_and_repays_everything() {
        let (state, account, bank_accounts) = market();
        let mut swap = MockSwap::new(quote(native!(10, "SOL"), 1_000_000_000, 990_000_000), |_| 10);
        swap.exact_out = Some(quote(2_020_000_000, native!(200, "USDC"), 2_020_000_000));
        let tables = MockTables::Serve;

        let plan = planner(&state, &account, &bank_accounts, &swap, &tables)
            .calculate_borrow_lend_position_params(&USDC_BANK, &SOL_BANK)
            .await
            .unwrap();

        assert_eq_with_tolerance!(plan.max_amount, I80F48!(2.0402), I80F48!(0.000001));
        // two sizing quotes, then the first close budget
        assert_eq!(swap.requests()[2].max_accounts, Some(40));
        // both banks close, so end_flashloan carries no health accounts
        let end = plan.transaction.message.instructions.last().unwrap();
        assert_eq!(end.accounts.len(), 2);
    }
}
