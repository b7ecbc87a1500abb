//! Plain data model shared by the risk engine and the services around it: banks, oracle prices,
//! margin accounts and the fixed-point wrapper they are stored in.

pub mod constants;
pub mod types;
