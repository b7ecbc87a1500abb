//! Shared fixtures for the risk engine and service tests: canned bank configs, oracle prices
//! and margin accounts built from share amounts.

pub mod accounts;
pub mod banks;
pub mod prices;

#[macro_export]
macro_rules! native {
    ($val: expr, "USDC") => {
        $val * 10_u64.pow(6)
    };

    ($val: expr, "USDC", f64) => {
        (($val) * 10_u64.pow(6) as f64) as u64
    };

    ($val: expr, "SOL") => {
        $val * 10_u64.pow(9)
    };

    ($val: expr, "SOL", f64) => {
        (($val) * 10_u64.pow(9) as f64) as u64
    };

    ($val: expr, "ISO") => {
        $val * 10_u64.pow(6)
    };
}
