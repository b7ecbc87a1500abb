pub mod actions;
pub mod compute;
pub mod errors;
pub mod macros;
pub mod prelude;
pub mod simulation;
pub mod state;
pub mod utils;

pub use errors::{RiskError, RiskResult};
