//! Recurring background sync.

use std::sync::Arc;
use std::time::Duration;

use galleria_core::{GallerySynchronizer, SyncRequest};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run a normal sync every `every`; the first tick fires immediately.
///
/// Returns `None` when the interval is zero. Slow runs skip missed ticks
/// instead of bunching them up.
pub fn spawn(synchronizer: Arc<GallerySynchronizer>, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        tracing::info!("Background gallery sync disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let response = synchronizer.sync(SyncRequest::default()).await;
            if let Some(error) = response.error.as_deref() {
                tracing::warn!(error, "Scheduled gallery sync degraded");
            } else {
                tracing::debug!(
                    items = response.total_count,
                    path = ?response.stats.as_ref().map(|stats| stats.path),
                    "Scheduled gallery sync finished"
                );
            }
        }
    }))
}
