use std::{future::Future, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::ServiceResult;

/// Periodic background job. The first run happens immediately; failures are logged and the
/// job keeps its schedule.
pub struct ScheduledTask {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ServiceResult<()>> + Send + 'static,
    {
        let name = name.into();
        let (shutdown, mut stopped) = watch::channel(false);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = timer.tick() => {
                        if let Err(e) = job().await {
                            warn!("Scheduled task {} failed: {}", task_name, e);
                        }
                    }
                }
            }

            info!("Scheduled task {} stopped", task_name);
        });

        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the loop after the current run and waits for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!("Scheduled task {} panicked: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceError;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn runs_on_every_tick_and_survives_failures() {
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        let task = ScheduledTask::spawn("flaky", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                // every other run fails
                if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    return Err(ServiceError::Decode("bad payload".to_string()));
                }
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(task.name(), "flaky");
        assert!(!task.is_finished());
        task.shutdown().await;

        // ticks at 0, 10, 20 and 30
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_further_runs() {
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        let task = ScheduledTask::spawn("counter", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        task.shutdown().await;
        let after_shutdown = runs.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
    }
}
