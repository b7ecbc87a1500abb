use fixed_macro::types::I80F48;
use lazy_static::lazy_static;
use marginfi_risk_types::{
    constants::{USDC_MINT, WSOL_MINT},
    types::{
        Bank, BankConfig, BankOperationalState, InterestRateConfig, OracleSetup, Pubkey, RiskTier,
    },
};

use crate::native;

pub const TEST_GROUP: Pubkey = Pubkey::new_from_seed(42);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestBank {
    Usdc,
    Sol,
    /// Isolated tier bank whose deposits carry no collateral weight
    Isolated,
    /// Collateral bank being phased out, initial asset weight zeroed
    Retiring,
}

impl TestBank {
    pub fn mint(&self) -> Pubkey {
        match self {
            TestBank::Usdc => USDC_MINT.parse().unwrap(),
            TestBank::Sol => WSOL_MINT.parse().unwrap(),
            TestBank::Isolated => Pubkey::new_from_seed(200),
            TestBank::Retiring => Pubkey::new_from_seed(201),
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            TestBank::Sol => 9,
            TestBank::Usdc | TestBank::Isolated | TestBank::Retiring => 6,
        }
    }

    pub fn config(&self) -> BankConfig {
        match self {
            TestBank::Usdc => *DEFAULT_USDC_TEST_BANK_CONFIG,
            TestBank::Sol => *DEFAULT_SOL_TEST_BANK_CONFIG,
            TestBank::Isolated => *DEFAULT_ISOLATED_TEST_BANK_CONFIG,
            TestBank::Retiring => *DEFAULT_RETIRING_TEST_BANK_CONFIG,
        }
    }
}

/// Fresh bank with unit share values and no deposits.
pub fn test_bank(kind: TestBank) -> Bank {
    Bank::new(TEST_GROUP, kind.config(), kind.mint(), kind.decimals(), 0)
}

/// Bank with `deposits` and `borrows` native units already outstanding.
pub fn test_bank_with_liquidity(kind: TestBank, deposits: u64, borrows: u64) -> Bank {
    let mut bank = test_bank(kind);
    bank.total_asset_shares = fixed::types::I80F48::from_num(deposits).into();
    bank.total_liability_shares = fixed::types::I80F48::from_num(borrows).into();
    bank
}

lazy_static! {
    pub static ref DEFAULT_TEST_BANK_INTEREST_RATE_CONFIG: InterestRateConfig =
        InterestRateConfig {
            insurance_fee_fixed_apr: I80F48!(0).into(),
            insurance_ir_fee: I80F48!(0).into(),
            protocol_ir_fee: I80F48!(0).into(),
            protocol_fixed_fee_apr: I80F48!(0).into(),

            optimal_utilization_rate: I80F48!(0.5).into(),
            plateau_interest_rate: I80F48!(0.6).into(),
            max_interest_rate: I80F48!(3).into(),
            protocol_origination_fee: I80F48!(0).into(),
            ..Default::default()
        };
    pub static ref DEFAULT_TEST_BANK_CONFIG: BankConfig = BankConfig {
        oracle_setup: OracleSetup::PythPushOracle,
        asset_weight_maint: I80F48!(1).into(),
        asset_weight_init: I80F48!(1).into(),
        liability_weight_init: I80F48!(1).into(),
        liability_weight_maint: I80F48!(1).into(),

        operational_state: BankOperationalState::Operational,
        risk_tier: RiskTier::Collateral,

        interest_rate_config: *DEFAULT_TEST_BANK_INTEREST_RATE_CONFIG,
        oracle_max_age: 100,
        ..Default::default()
    };
    pub static ref DEFAULT_USDC_TEST_BANK_CONFIG: BankConfig = BankConfig {
        deposit_limit: native!(1_000_000_000, "USDC"),
        borrow_limit: native!(1_000_000_000, "USDC"),
        oracle_keys: [Pubkey::new_from_seed(10); 5],
        ..*DEFAULT_TEST_BANK_CONFIG
    };
    pub static ref DEFAULT_SOL_TEST_BANK_CONFIG: BankConfig = BankConfig {
        deposit_limit: native!(1_000_000, "SOL"),
        borrow_limit: native!(1_000_000, "SOL"),
        oracle_keys: [Pubkey::new_from_seed(11); 5],
        asset_weight_init: I80F48!(0.8).into(),
        asset_weight_maint: I80F48!(0.9).into(),
        liability_weight_init: I80F48!(1.25).into(),
        liability_weight_maint: I80F48!(1.1).into(),
        ..*DEFAULT_TEST_BANK_CONFIG
    };
    pub static ref DEFAULT_ISOLATED_TEST_BANK_CONFIG: BankConfig = BankConfig {
        deposit_limit: native!(1_000_000, "ISO"),
        borrow_limit: native!(1_000_000, "ISO"),
        oracle_keys: [Pubkey::new_from_seed(12); 5],
        risk_tier: RiskTier::Isolated,
        asset_weight_maint: I80F48!(0).into(),
        asset_weight_init: I80F48!(0).into(),
        liability_weight_init: I80F48!(1.5).into(),
        liability_weight_maint: I80F48!(1.25).into(),
        ..*DEFAULT_TEST_BANK_CONFIG
    };
    pub static ref DEFAULT_RETIRING_TEST_BANK_CONFIG: BankConfig = BankConfig {
        oracle_keys: [Pubkey::new_from_seed(13); 5],
        asset_weight_init: I80F48!(0).into(),
        asset_weight_maint: I80F48!(0.5).into(),
        ..*DEFAULT_TEST_BANK_CONFIG
    };
}
