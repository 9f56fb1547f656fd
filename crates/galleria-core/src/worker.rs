//! Bounded-concurrency batch execution for remote fan-out work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

/// Runs tasks in fixed-size batches with a pause between batches.
///
/// Every task holds a semaphore permit while it runs, so pools shared by
/// concurrent callers never exceed `batch_size` in-flight tasks. Results are
/// returned in input order; one task failing does not affect the others.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    batch_size: usize,
    pause: Duration,
}

impl WorkerPool {
    pub fn new(batch_size: usize, pause: Duration) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(batch_size)),
            batch_size,
            pause,
        }
    }

    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn run<I, T, F, Fut>(&self, items: Vec<I>, task: F) -> Vec<T>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut results = Vec::with_capacity(items.len());
        let mut pending = items.into_iter().peekable();

        while pending.peek().is_some() {
            if !results.is_empty() && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            let batch = pending.by_ref().take(self.batch_size).map(|item| {
                let permits = &self.permits;
                let work = task(item);
                async move {
                    let _permit = permits.acquire().await.ok();
                    work.await
                }
            });
            results.extend(join_all(batch).await);
        }

        results
    }
}
