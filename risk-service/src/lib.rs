//! Off-chain services around the risk engine: swap quoting and flash-loan planning, bank
//! metadata caching, debounced simulation, session auth and health notifications.

pub mod auth;
pub mod config;
pub mod debounce;
pub mod error;
pub mod flashloan;
pub mod jupiter;
pub mod metadata;
pub mod notifier;
pub mod retry;
pub mod rpc;
pub mod scheduler;
pub mod serde_helpers;
pub mod snapshot;
pub mod transaction;

pub use error::{ApiError, ServiceError, ServiceResult};
