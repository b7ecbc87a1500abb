pub mod account;
pub mod bank;
pub mod leverage;
pub mod liquidation;

pub use account::*;
pub use bank::*;
pub use leverage::*;
pub use liquidation::*;
