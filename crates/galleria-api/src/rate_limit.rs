use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;

/// Fixed-window limits on the calls that trigger remote work.
///
/// Over-limit calls are not rejected: forced syncs are served as normal
/// requests and webhook events are acknowledged without scheduling a sync.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    force_sync_limit: u32,
    webhook_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Clone, Copy)]
pub enum ProtectedEndpoint {
    ForcedSync,
    Webhook,
}

#[derive(Default)]
struct RateLimitMetrics {
    forced_allowed: AtomicU64,
    forced_limited: AtomicU64,
    webhook_allowed: AtomicU64,
    webhook_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitMetricsSnapshot {
    pub forced_allowed: u64,
    pub forced_limited: u64,
    pub webhook_allowed: u64,
    pub webhook_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.force_sync_rate_limit_per_window,
            config.webhook_rate_limit_per_window,
        )
    }

    fn new(window: Duration, force_sync_limit: u32, webhook_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            force_sync_limit,
            webhook_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    /// Count one call from `caller` and report whether it is within the limit.
    pub async fn allow(&self, endpoint: ProtectedEndpoint, caller: &str) -> bool {
        let limit = match endpoint {
            ProtectedEndpoint::ForcedSync => self.force_sync_limit,
            ProtectedEndpoint::Webhook => self.webhook_limit,
        };

        let key = format!("{}:{caller}", endpoint.label());
        let now = Instant::now();
        let mut windows = self.state.lock().await;
        // Caller ids are client-supplied; only live windows are kept.
        windows.retain(|_, window| now.duration_since(window.started_at) < self.window);
        let entry = windows.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs();
            self.mark_limited(endpoint);
            tracing::warn!(
                endpoint = endpoint.label(),
                caller = caller_fingerprint(caller),
                retry_after_secs,
                "Rate limit exceeded; downgrading request"
            );
            return false;
        }

        entry.count += 1;
        self.mark_allowed(endpoint);
        true
    }

    #[cfg(test)]
    async fn tracked_windows(&self) -> usize {
        self.state.lock().await.len()
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            forced_allowed: self.metrics.forced_allowed.load(Ordering::Relaxed),
            forced_limited: self.metrics.forced_limited.load(Ordering::Relaxed),
            webhook_allowed: self.metrics.webhook_allowed.load(Ordering::Relaxed),
            webhook_limited: self.metrics.webhook_limited.load(Ordering::Relaxed),
        }
    }

    fn mark_allowed(&self, endpoint: ProtectedEndpoint) {
        match endpoint {
            ProtectedEndpoint::ForcedSync => {
                self.metrics.forced_allowed.fetch_add(1, Ordering::Relaxed);
            }
            ProtectedEndpoint::Webhook => {
                self.metrics.webhook_allowed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn mark_limited(&self, endpoint: ProtectedEndpoint) {
        match endpoint {
            ProtectedEndpoint::ForcedSync => {
                self.metrics.forced_limited.fetch_add(1, Ordering::Relaxed);
            }
            ProtectedEndpoint::Webhook => {
                self.metrics.webhook_limited.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ForcedSync => "forced_sync",
            Self::Webhook => "webhook",
        }
    }
}

/// Stable hash of a caller id, so raw addresses stay out of the logs.
pub fn caller_fingerprint(caller: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    caller.hash(&mut hasher);
    hasher.finish()
}
