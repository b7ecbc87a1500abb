pub mod bank;
pub mod bank_config;
pub mod interest_rate;
pub mod marginfi_account;
pub mod market;
pub mod price;
pub mod risk_engine;
