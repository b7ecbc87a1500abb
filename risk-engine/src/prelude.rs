pub use crate::{
    errors::{RiskError, RiskResult},
    macros::*,
    state::{
        bank::BankImpl,
        bank_config::BankConfigImpl,
        interest_rate::RateModel,
        marginfi_account::{BankAccountWrapper, RequirementType},
        market::MarketState,
        risk_engine::RiskEngine,
    },
    utils::NumTraitsWithTolerance,
};
