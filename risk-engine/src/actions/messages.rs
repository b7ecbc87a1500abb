use serde::{Deserialize, Serialize};

use crate::{errors::RiskError, utils::percent_formatter};

const ORACLE_DOCS_LINK: &str = "https://docs.marginfi.com/faqs#what-does-the-stale-oracles-error-mean";
const NO_QUOTE: &str = "Unable to find a Jupiter quote for this pairing, please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionMethod {
    Info,
    Warning,
    Error,
}

/// Outcome of a pre-flight check or a mapped failure, shown next to the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub description: String,
    pub action_method: ActionMethod,
    pub retry: bool,
    /// Whether the action may still go ahead with this message shown.
    pub is_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl ActionMessage {
    fn warning(code: Option<u16>, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            action_method: ActionMethod::Warning,
            retry: false,
            is_enabled: false,
            link: None,
        }
    }

    fn with_method(mut self, action_method: ActionMethod) -> Self {
        self.action_method = action_method;
        self
    }

    fn retryable(mut self) -> Self {
        self.retry = true;
        self
    }

    fn enabled(mut self) -> Self {
        self.is_enabled = true;
        self
    }

    fn with_link(mut self, link: &str) -> Self {
        self.link = Some(link.to_string());
        self
    }

    /// Blocks the action without a description, e.g. while a quote is missing.
    pub fn disabled() -> Self {
        Self::warning(None, "")
    }

    pub fn custom(description: impl Into<String>) -> Self {
        Self::warning(None, description).enabled()
    }

    pub fn bank_paused(token_symbol: &str) -> Self {
        Self::warning(None, format!("The {token_symbol} bank is paused at this time."))
    }

    pub fn reduce_only(token_symbol: &str) -> Self {
        Self::warning(
            Some(136),
            format!(
                "The {token_symbol} bank is in reduce-only mode. You may only withdraw a deposit or repay a loan."
            ),
        )
    }

    pub fn bank_retired(token_symbol: &str) -> Self {
        Self::warning(
            Some(137),
            format!(
                "The {token_symbol} bank is being retired. You may only withdraw a deposit or repay a loan."
            ),
        )
    }

    pub fn borrow_capacity(token_symbol: &str) -> Self {
        Self::warning(
            Some(138),
            format!("The {token_symbol} bank is at borrow capacity."),
        )
    }

    pub fn deposit_capacity(token_symbol: &str) -> Self {
        Self::warning(
            None,
            format!("The {token_symbol} bank is at deposit capacity."),
        )
    }

    pub fn existing_isolated_borrow(token_symbol: &str) -> Self {
        Self::warning(
            Some(139),
            format!(
                "You have an active isolated borrow ({token_symbol}) which cannot be combined with other borrows."
            ),
        )
    }

    pub fn insufficient_balance(token_symbol: &str) -> Self {
        Self::warning(Some(140), format!("Insufficient {token_symbol} in wallet."))
    }

    pub fn repay_collateral_failed(token_symbol: &str) -> Self {
        Self::warning(
            Some(141),
            format!("Unable to repay using {token_symbol}, please select another collateral."),
        )
    }

    pub fn not_lending(token_symbol: &str) -> Self {
        Self::warning(Some(132), format!("You're not lending {token_symbol}."))
    }

    pub fn not_borrowing(token_symbol: &str) -> Self {
        Self::warning(Some(133), format!("You're not borrowing {token_symbol}."))
    }

    pub fn insufficient_liquidity_to_repay(token_symbol: &str, repay_with_collateral: bool) -> Self {
        let hint = if repay_with_collateral {
            " Change the token to repay with collateral."
        } else {
            ""
        };

        Self::warning(
            Some(134),
            format!("Insufficient {token_symbol} in wallet for loan repayment.{hint}"),
        )
    }

    pub fn wallet_repay(token_symbol: &str) -> Self {
        Self::warning(
            Some(135),
            format!("You have {token_symbol} in your wallet and can repay without using collateral."),
        )
        .with_method(ActionMethod::Info)
        .enabled()
    }

    pub fn price_impact_error(price_impact_pct: f64) -> Self {
        Self::warning(
            Some(128),
            format!("Price impact is {}.", percent_formatter(price_impact_pct)),
        )
        .with_method(ActionMethod::Error)
        .enabled()
    }

    pub fn price_impact_warning(price_impact_pct: f64) -> Self {
        Self::warning(
            Some(129),
            format!("Price impact is {}.", percent_formatter(price_impact_pct)),
        )
        .enabled()
    }

    /// `action` is the capitalised gerund or noun of the action, e.g. "Borrows".
    pub fn stale_oracle(action: &str) -> Self {
        Self::warning(
            None,
            format!(
                "{action} from this bank may fail due to network congestion preventing oracles from updating price data."
            ),
        )
        .with_link(ORACLE_DOCS_LINK)
        .enabled()
    }

    pub fn stale_or_health(action: &str) -> Self {
        Self::warning(
            Some(108),
            format!(
                "{action} may fail due to stale price data or poor account health. Check oracle status and collateral before retrying."
            ),
        )
        .enabled()
    }

    pub fn simulation_failed(details: Option<&str>) -> Self {
        Self::warning(Some(149), with_details("Simulating transaction failed. Please try again.", details))
    }

    pub fn processing_tx_failed(details: Option<&str>) -> Self {
        Self::warning(Some(150), with_details("Error processing transaction. Please try again.", details))
    }
}

fn with_details(base: &str, details: Option<&str>) -> String {
    match details {
        Some(details) if !details.is_empty() => format!("{base} Details: {details}"),
        _ => base.to_string(),
    }
}

/// Messages whose content never changes, keyed by their catalogue code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaticMessage {
    NotInitialized,
    Slippage,
    TxSize,
    FlFailed,
    ClosePositionsFlFailed,
    KeySize,
    StaleTrading,
    StaleTradingOrHealth,
    UserRejected,
    DepositCapExceeded,
    BorrowCapExceeded,
    UtilizationRatioInvalid,
    NoPositions,
    SimulationFailed,
    NoCollateral,
    AlreadyLending,
    AlreadyBorrowing,
    ExistingBorrow,
    TransactionExpired,
    InsufficientLamports,
    InsufficientFunds,
    InsufficientFundsRepay,
    BuildingLendingTx,
    IllegalAccountAuthorityTransfer,
    AccountNotInitialized,
    BankNotInitialized,
    MaxAmountCalculationFailed,
    SimulationNotReady,
    DepositFailed,
    CreateSwapFailed,
    RepayCollatFailed,
    TradeFailed,
    TxBuildFailed,
    BankNotActiveCheck,
    SlippageInvalidCheck,
    JupQuoteFailed,
    ActionTypeCheck,
}

impl StaticMessage {
    pub fn code(&self) -> Option<u16> {
        use StaticMessage::*;

        let code = match self {
            NotInitialized => 101,
            Slippage => 102,
            TxSize => 103,
            FlFailed => 104,
            ClosePositionsFlFailed => 105,
            KeySize => 106,
            StaleTrading => 107,
            StaleTradingOrHealth => 108,
            UserRejected => 109,
            DepositCapExceeded => 110,
            UtilizationRatioInvalid => 111,
            NoPositions => 112,
            SimulationFailed => 113,
            NoCollateral => 114,
            AlreadyLending => 115,
            AlreadyBorrowing => 116,
            ExistingBorrow => 117,
            TransactionExpired => 118,
            InsufficientLamports => 119,
            InsufficientFunds => 120,
            InsufficientFundsRepay => 121,
            BuildingLendingTx => 122,
            IllegalAccountAuthorityTransfer => 125,
            AccountNotInitialized => 131,
            BankNotInitialized => 132,
            MaxAmountCalculationFailed => 133,
            SimulationNotReady => 134,
            DepositFailed => 135,
            CreateSwapFailed => 136,
            RepayCollatFailed => 138,
            TradeFailed => 142,
            TxBuildFailed => 144,
            BankNotActiveCheck => 145,
            SlippageInvalidCheck => 146,
            JupQuoteFailed => 147,
            ActionTypeCheck => 148,
            BorrowCapExceeded => return None,
        };

        Some(code)
    }

    pub fn message(&self) -> ActionMessage {
        use StaticMessage::*;

        let message = ActionMessage::warning(self.code(), self.description());
        match self {
            Slippage | TxSize | FlFailed | ClosePositionsFlFailed | UserRejected
            | SimulationFailed | TransactionExpired | InsufficientFundsRepay
            | BuildingLendingTx | DepositFailed | CreateSwapFailed | JupQuoteFailed => {
                message.retryable()
            }
            StaleTrading => message.retryable().with_link(ORACLE_DOCS_LINK),
            IllegalAccountAuthorityTransfer | BankNotActiveCheck | ActionTypeCheck => {
                message.with_method(ActionMethod::Error)
            }
            _ => message,
        }
    }

    fn description(&self) -> &'static str {
        use StaticMessage::*;

        match self {
            NotInitialized => {
                "There was an issue with the marginfi client. Please refresh and try again."
            }
            Slippage => {
                "Max slippage was exceeded, please increase your max slippage in settings and try again."
            }
            TxSize | FlFailed | CreateSwapFailed | JupQuoteFailed => NO_QUOTE,
            ClosePositionsFlFailed => {
                "Failed to close position. Please try again or manually reduce your position size."
            }
            KeySize => {
                "You have too many open positions for this transaction to complete. Please move positions to sub accounts from your portfolio and try again."
            }
            StaleTrading => {
                "Some oracles were found to be stale causing inaccurate prices. Please try again."
            }
            StaleTradingOrHealth => {
                "Transaction failed due to poor account health, please increase your collateral and try again."
            }
            UserRejected => "Transaction was cancelled.",
            DepositCapExceeded => "The maximum deposit capacity for this asset has been reached.",
            BorrowCapExceeded => "The maximum borrow capacity for this asset has been reached.",
            UtilizationRatioInvalid => {
                "There is insufficient liquidity in the pool to complete this trade."
            }
            NoPositions => "This position could not be found. Please refresh and try again.",
            SimulationFailed => "Simulating transaction failed. Please try again.",
            NoCollateral => {
                "Insufficient collateral, you need to deposit funds first before you can borrow."
            }
            AlreadyLending => {
                "You cannot borrow an asset you are already lending. Please withdraw first to start borrowing."
            }
            AlreadyBorrowing => {
                "You cannot lend an asset you are already borrowing. Please repay first to start lending."
            }
            ExistingBorrow => {
                "Borrows of isolated assets can not be combined with other borrows. Please create a new sub account to take out this borrow."
            }
            TransactionExpired => "Transaction expired, please try again.",
            InsufficientLamports => "You do not have enough SOL to execute the transaction",
            InsufficientFunds => "You do not have available funds to execute this transaction.",
            InsufficientFundsRepay => "Insufficient funds for this quote. Please try again.",
            BuildingLendingTx => "Transaction failed to build, please open a ticket.",
            IllegalAccountAuthorityTransfer => "Account is not authorized for migration",
            AccountNotInitialized => {
                "There was an issue with the marginfi account. Please refresh and try again."
            }
            BankNotInitialized => {
                "There was an issue with the marginfi bank. Please refresh and try again."
            }
            MaxAmountCalculationFailed => {
                "Maximum collateral couldn't be accurately calculated, but you can still enter an amount manually to proceed."
            }
            SimulationNotReady => {
                "Transaction is not ready to execute yet. Please ensure it has been fully simulated before proceeding."
            }
            DepositFailed => "Failed to deposit funds. Please try again.",
            RepayCollatFailed => {
                "Unable to repay using collateral, please select another collateral."
            }
            TradeFailed => "Unable to execute trade, please try again.",
            TxBuildFailed => {
                "There was an unexpected error building the transaction, please contact support."
            }
            BankNotActiveCheck => {
                "An internal configuration issue has occurred: Bank is not active. Please create a support ticket for assistance."
            }
            SlippageInvalidCheck => {
                "The slippage is currently set to 0, which prevents the transaction from completing. Please increase the slippage or enable dynamic slippage mode to proceed."
            }
            ActionTypeCheck => {
                "Action type is undefined or incorrect within the context of the function, this error indicates a bug in the code."
            }
        }
    }
}

impl From<StaticMessage> for ActionMessage {
    fn from(message: StaticMessage) -> Self {
        message.message()
    }
}

impl From<&RiskError> for ActionMessage {
    fn from(error: &RiskError) -> Self {
        match error {
            RiskError::BadAccountHealth => StaticMessage::StaleTradingOrHealth.into(),
            RiskError::StaleOracle => StaticMessage::StaleTrading.into(),
            RiskError::BankAssetCapacityExceeded => StaticMessage::DepositCapExceeded.into(),
            RiskError::BankLiabilityCapacityExceeded => StaticMessage::BorrowCapExceeded.into(),
            RiskError::IllegalUtilizationRatio => StaticMessage::UtilizationRatioInvalid.into(),
            RiskError::LendingAccountBalanceNotFound => StaticMessage::NoPositions.into(),
            RiskError::BankNotFound(_) | RiskError::PriceNotFound(_) => {
                StaticMessage::BankNotInitialized.into()
            }
            RiskError::IsolatedAccountIllegalState => StaticMessage::ExistingBorrow.into(),
            RiskError::LendingAccountBalanceSlotsFull => StaticMessage::KeySize.into(),
            other => ActionMessage::simulation_failed(Some(&other.to_string())),
        }
    }
}

/// True when `error` mentions `code` in decimal or as a zero padded hex (`0x1771`).
fn matches_error_code(error: &str, code: u32) -> bool {
    error.contains(&format!("{code:#06x}")) || error.contains(&code.to_string())
}

/// True when `error` holds `code` as a standalone hex token, so `0x1` does not match `0x17`.
fn matches_error_code_exact(error: &str, code: u32) -> bool {
    let needle = format!("{code:#x}");
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

    error.match_indices(&needle).any(|(start, _)| {
        let before = error[..start].chars().next_back();
        let after = error[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Maps raw simulation or transaction error text onto the catalogue. `action` names the
/// attempted action for the stale oracle message. In arena mode the static stale messages are
/// used instead.
pub fn handle_error(error: &str, action: Option<&str>, is_arena: bool) -> Option<ActionMessage> {
    let lower = error.to_lowercase();
    let action_name = action.unwrap_or("The action");

    if lower.contains("slippage tolerance exceeded") {
        return Some(StaticMessage::Slippage.into());
    }

    if error.contains("RangeError") || lower.contains("too large") {
        return Some(StaticMessage::TxSize.into());
    }

    if lower.contains("stale") || matches_error_code(error, 6049) || matches_error_code(error, 6050)
    {
        return Some(if is_arena {
            StaticMessage::StaleTrading.into()
        } else {
            ActionMessage::stale_oracle(action_name)
        });
    }

    if lower.contains("block height exceeded")
        || lower.contains("blockhashnotfound")
        || lower.contains("blockhash not found")
    {
        return Some(StaticMessage::TransactionExpired.into());
    }

    if lower.contains("user rejected") {
        return Some(StaticMessage::UserRejected.into());
    }

    if lower.contains("insufficient funds") {
        return Some(if action == Some("Repaying") {
            StaticMessage::InsufficientFundsRepay.into()
        } else {
            StaticMessage::InsufficientFunds.into()
        });
    }

    if lower.contains("insufficient lamport")
        || matches_error_code_exact(error, 1)
        || error.contains("Attempt to debit an account but found no record of a prior credit")
        || error.contains("AccountNotFound")
    {
        return Some(StaticMessage::InsufficientLamports.into());
    }

    if matches_error_code(error, 6003) || lower.contains("deposit capacity exceeded") {
        return Some(StaticMessage::DepositCapExceeded.into());
    }

    if matches_error_code(error, 6027) || lower.contains("borrow cap exceeded") {
        return Some(StaticMessage::BorrowCapExceeded.into());
    }

    if matches_error_code(error, 6009) || lower.contains("bad health or stale oracle") {
        return Some(if is_arena {
            StaticMessage::StaleTradingOrHealth.into()
        } else {
            ActionMessage::stale_oracle(action_name)
        });
    }

    if matches_error_code(error, 6026) || lower.contains("utilization ratio") {
        return Some(StaticMessage::UtilizationRatioInvalid.into());
    }

    if is_arena && matches_error_code(error, 6001) {
        return Some(StaticMessage::Slippage.into());
    }

    if matches_error_code(error, 6041) {
        return Some(StaticMessage::IllegalAccountAuthorityTransfer.into());
    }

    None
}

pub fn handle_simulation_error(error: &str, action: Option<&str>, is_arena: bool) -> ActionMessage {
    handle_error(error, action, is_arena)
        .unwrap_or_else(|| ActionMessage::simulation_failed(Some(error)))
}

pub fn handle_transaction_error(error: &str, is_arena: bool) -> ActionMessage {
    handle_error(error, None, is_arena)
        .unwrap_or_else(|| ActionMessage::processing_tx_failed(Some(error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use marginfi_risk_types::types::Pubkey;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("Slippage tolerance exceeded", StaticMessage::Slippage ; "slippage")]
    #[test_case("RangeError: encoding overruns Uint8Array", StaticMessage::TxSize ; "range error")]
    #[test_case("Transaction too large: 1300 > 1232", StaticMessage::TxSize ; "too large")]
    #[test_case("custom program error: 0x1779 oracle is stale", StaticMessage::StaleTrading ; "stale")]
    #[test_case("custom program error: 0x1779", StaticMessage::StaleTradingOrHealth ; "bad health hex")]
    #[test_case("Error Number: 6010. Error Message: deposit capacity exceeded", StaticMessage::DepositCapExceeded ; "deposit cap message")]
    #[test_case("Blockhash not found", StaticMessage::TransactionExpired ; "blockhash")]
    #[test_case("block height exceeded", StaticMessage::TransactionExpired ; "block height")]
    #[test_case("WalletSignTransactionError: User rejected the request.", StaticMessage::UserRejected ; "user rejected")]
    #[test_case("Transfer: insufficient lamports 10, need 20", StaticMessage::InsufficientLamports ; "lamports")]
    #[test_case("custom program error: 0x1", StaticMessage::InsufficientLamports ; "exact hex one")]
    #[test_case("Error: insufficient funds", StaticMessage::InsufficientFunds ; "funds")]
    #[test_case("Error Code: IllegalUtilizationRatio. utilization ratio invalid", StaticMessage::UtilizationRatioInvalid ; "utilization")]
    fn arena_errors_map_to_catalogue(error: &str, expected: StaticMessage) {
        assert_eq!(handle_error(error, None, true), Some(expected.message()));
    }

    #[test]
    fn stale_outside_arena_names_the_action() {
        let message = handle_error("oracle is stale", Some("Borrowing"), false).unwrap();
        assert!(message.description.starts_with("Borrowing from this bank"));
        assert!(message.is_enabled);
        assert_eq!(message.link.as_deref(), Some(ORACLE_DOCS_LINK));
    }

    #[test]
    fn exact_hex_does_not_match_longer_codes() {
        assert!(matches_error_code_exact("error 0x1 here", 1));
        assert!(!matches_error_code_exact("error 0x17 here", 1));
        assert!(!matches_error_code_exact("error 0x1a here", 1));
    }

    #[test]
    fn repay_insufficient_funds_is_retryable() {
        let message = handle_error("insufficient funds", Some("Repaying"), false).unwrap();
        assert_eq!(message, StaticMessage::InsufficientFundsRepay.message());
        assert!(message.retry);
    }

    #[test]
    fn unknown_errors_fall_back() {
        assert_eq!(handle_error("something odd", None, false), None);

        let simulation = handle_simulation_error("something odd", None, false);
        assert_eq!(simulation.code, Some(149));
        assert_eq!(
            simulation.description,
            "Simulating transaction failed. Please try again. Details: something odd"
        );

        assert_eq!(handle_transaction_error("", false).code, Some(150));
    }

    #[test]
    fn static_messages_carry_severity_and_retry() {
        let jup = StaticMessage::JupQuoteFailed.message();
        assert_eq!(jup.code, Some(147));
        assert!(jup.retry);
        assert_eq!(jup.action_method, ActionMethod::Warning);

        let internal = StaticMessage::BankNotActiveCheck.message();
        assert_eq!(internal.action_method, ActionMethod::Error);
        assert!(!internal.retry);
        assert!(!internal.is_enabled);
    }

    #[test]
    fn engine_errors_map_to_messages() {
        assert_eq!(
            ActionMessage::from(&RiskError::BadAccountHealth),
            StaticMessage::StaleTradingOrHealth.message()
        );
        assert_eq!(
            ActionMessage::from(&RiskError::BankNotFound(Pubkey::new_from_seed(1))),
            StaticMessage::BankNotInitialized.message()
        );
        assert_eq!(ActionMessage::from(&RiskError::MathError).code, Some(149));
    }

    #[test]
    fn price_impact_is_formatted() {
        let message = ActionMessage::price_impact_error(0.0612);
        assert_eq!(message.description, "Price impact is 6.12%.");
        assert_eq!(message.action_method, ActionMethod::Error);
    }

    #[test]
    fn serializes_for_the_client() {
        let json = serde_json::to_value(StaticMessage::NoCollateral.message()).unwrap();
        assert_eq!(json["code"], 114);
        assert_eq!(json["actionMethod"], "WARNING");
        assert_eq!(json["isEnabled"], false);
        assert!(json.get("link").is_none());
    }
}
