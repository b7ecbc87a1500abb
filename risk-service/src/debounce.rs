use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use marginfi_risk_engine::{
    prelude::MarketState,
    simulation::{simulate_action, SimulationAction, SimulationResult},
};
use marginfi_risk_types::types::{MarginfiAccount, Pubkey};
use tracing::debug;

use crate::{ServiceError, ServiceResult};

/// Collapses bursts of simulation requests: only the last request inside the window runs,
/// earlier ones resolve to [`ServiceError::Superseded`].
pub struct DebouncedSimulator {
    window: Duration,
    generation: AtomicU64,
}

impl DebouncedSimulator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: AtomicU64::new(0),
        }
    }

    pub async fn run<T>(&self, job: impl FnOnce() -> ServiceResult<T>) -> ServiceResult<T> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::time::sleep(self.window).await;

        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!("Simulation request {} superseded", ticket);
            return Err(ServiceError::Superseded);
        }

        job()
    }

    pub async fn simulate(
        &self,
        state: &MarketState,
        account: &MarginfiAccount,
        bank_pk: &Pubkey,
        action: &SimulationAction,
        current_timestamp: i64,
    ) -> ServiceResult<SimulationResult> {
        self.run(|| Ok(simulate_action(state, account, bank_pk, action, current_timestamp)?))
            .await
    }
}
