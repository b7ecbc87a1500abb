pub mod bank;
pub mod bank_config;
pub mod bank_metadata;
pub mod interest_rate;
pub mod price;
pub mod pubkey;
pub mod user_account;
pub mod wrapped_i80f48;

pub use bank::*;
pub use bank_config::*;
pub use bank_metadata::*;
pub use interest_rate::*;
pub use price::*;
pub use pubkey::*;
pub use user_account::*;
pub use wrapped_i80f48::*;
