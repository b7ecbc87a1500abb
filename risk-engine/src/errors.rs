use marginfi_risk_types::types::Pubkey;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RiskError {
    #[error("Math error")]
    MathError,
    #[error("Bank {0} not found")]
    BankNotFound(Pubkey),
    #[error("Oracle price for bank {0} not found")]
    PriceNotFound(Pubkey),
    #[error("Lending account balance not found")]
    LendingAccountBalanceNotFound,
    #[error("Bank deposit capacity exceeded")]
    BankAssetCapacityExceeded,
    #[error("Bank borrow capacity exceeded")]
    BankLiabilityCapacityExceeded,
    #[error("Bad account health")]
    BadAccountHealth,
    #[error("Lending account balance slots are full")]
    LendingAccountBalanceSlotsFull,
    #[error("Illegal liquidation")]
    IllegalLiquidation,
    #[error("Account is not bankrupt")]
    AccountNotBankrupt,
    #[error("Stale oracle data")]
    StaleOracle,
    #[error("Invalid oracle setup")]
    OracleNotSetup,
    #[error("Invalid oracle price")]
    InvalidPrice,
    #[error("Bank paused")]
    BankPaused,
    #[error("Bank is ReduceOnly mode")]
    BankReduceOnly,
    #[error("Operation is deposit-only")]
    OperationDepositOnly,
    #[error("Operation is withdraw-only")]
    OperationWithdrawOnly,
    #[error("Operation is borrow-only")]
    OperationBorrowOnly,
    #[error("Operation is repay-only")]
    OperationRepayOnly,
    #[error("No asset found")]
    NoAssetFound,
    #[error("No liability found")]
    NoLiabilityFound,
    #[error("Invalid bank utilization ratio")]
    IllegalUtilizationRatio,
    #[error("Isolated account cannot hold more than one liability")]
    IsolatedAccountIllegalState,
    #[error("Invalid balance state")]
    IllegalBalanceState,
    #[error("Cannot close balance because of outstanding emissions")]
    CannotCloseOutstandingEmissions,
    #[error("Account is in a flash loan")]
    AccountInFlashloan,
    #[error("Leverage {0} is out of range")]
    InvalidLeverage(String),
    #[error("Action requires a secondary bank")]
    MissingSecondaryBank,
}

pub type RiskResult<T = ()> = Result<T, RiskError>;
