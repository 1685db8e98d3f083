//! Expiration Sweep Task
//!
//! Background task that periodically resolves due expirations.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{CacheKey, CacheValue, ObservableCache};

/// Spawns a background task that calls [`ObservableCache::expire_due`] every
/// `interval`.
///
/// The sweep runs on the blocking pool since factories and observers are
/// synchronous user code. Abort the returned handle to stop the task.
///
/// # Example
/// ```ignore
/// let cache: ObservableCache<String, String> = ObservableCache::new();
/// let sweeper = spawn_expiration_task(cache.clone(), Duration::from_millis(100));
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_expiration_task<K: CacheKey, V: CacheValue>(
    cache: ObservableCache<K, V>,
    interval: Duration,
) -> JoinHandle<()> {
    let interval = interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting expiration sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let sweeper = cache.clone();
            let resolved = match tokio::task::spawn_blocking(move || sweeper.expire_due()).await {
                Ok(resolved) => resolved,
                Err(error) => {
                    debug!(%error, "Expiration sweep did not complete");
                    continue;
                }
            };

            if resolved > 0 {
                info!(resolved, "Expiration sweep resolved entries");
            } else {
                debug!("Expiration sweep: nothing due");
            }
        }
    })
}
