use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::ports::ContextBackend;

/// Spawns the periodic expiry reaper and hands back its shutdown switch.
///
/// The task wakes every `interval` and purges expired entries. Each pass
/// runs under `op_timeout`, so a wedged backend costs one tick, not the
/// loop. Backend failures are logged and the pass skipped; the loop itself
/// never dies. Flipping the switch (done when the owning store drops) ends
/// the task.
///
/// # Panics
///
/// Panics when called outside a tokio runtime. Construct the store from
/// async context, or disable cleanup in `StoreConfig` and call `cleanup()`
/// manually.
pub(crate) fn spawn_reaper(
    backend: Arc<dyn ContextBackend>,
    interval: Duration,
    op_timeout: Duration,
) -> watch::Sender<bool> {
    if tokio::runtime::Handle::try_current().is_err() {
        panic!(
            "the cleanup reaper requires a tokio runtime; construct the store \
             from async context or disable cleanup in StoreConfig"
        );
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a freshly opened
        // store does not scan before anything was written.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tokio::time::timeout(op_timeout, backend.purge_expired(Utc::now())).await {
                        Ok(Ok(0)) => {}
                        Ok(Ok(removed)) => debug!("reaper removed {} expired entries", removed),
                        Ok(Err(e)) => warn!("reaper pass failed, skipping until next tick: {}", e),
                        Err(_) => warn!(
                            "reaper pass timed out after {:?}, skipping until next tick",
                            op_timeout
                        ),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("reaper shutting down");
                        break;
                    }
                }
            }
        }
    });

    shutdown_tx
}
