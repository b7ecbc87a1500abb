use std::{
    fmt::Display,
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use backoff::{backoff::Backoff, future::retry_notify, Error};
use tracing::warn;

/// Retries `operation` on `backoff`'s schedule until it succeeds or `max_attempts` calls have
/// failed, returning the last error.
pub async fn retry_limited<B, T, E, F, Fut>(
    backoff: B,
    max_attempts: usize,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    B: Backoff,
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = AtomicUsize::new(0);
    let attempts = &attempts;

    retry_notify(
        backoff,
        || {
            let attempt = operation();
            async move {
                attempt.await.map_err(|e| {
                    if attempts.fetch_add(1, Ordering::Relaxed) + 1 >= max_attempts {
                        Error::permanent(e)
                    } else {
                        Error::transient(e)
                    }
                })
            }
        },
        |e: E, wait: Duration| warn!("{} failed, retrying in {:?}: {}", what, wait, e),
    )
    .await
}
