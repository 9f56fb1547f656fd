//! Advisory in-process lock guarding full synchronization runs.
//!
//! Guarantees at most one run per process. A hold older than the configured
//! maximum is treated as abandoned and taken over; there is no exclusion
//! across processes or instances.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Hold {
    generation: u64,
    started_at: Instant,
}

#[derive(Debug, Default)]
struct LockState {
    hold: Option<Hold>,
    next_generation: u64,
}

#[derive(Debug)]
pub struct ProcessingLock {
    state: Mutex<LockState>,
    max_duration: Duration,
}

/// Releases the lock on drop unless it has since been taken over.
#[derive(Debug)]
pub struct ProcessingGuard<'a> {
    lock: &'a ProcessingLock,
    generation: u64,
}

impl ProcessingLock {
    pub fn new(max_duration: Duration) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            max_duration,
        }
    }

    /// Acquire without waiting. Returns `None` while a live run holds it.
    pub fn try_acquire(&self) -> Option<ProcessingGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hold) = state.hold {
            let held_for = hold.started_at.elapsed();
            if held_for < self.max_duration {
                return None;
            }
            tracing::warn!(
                held_for_ms = u64::try_from(held_for.as_millis()).unwrap_or(u64::MAX),
                "Processing lock exceeded its maximum duration; treating run as abandoned"
            );
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        state.hold = Some(Hold {
            generation,
            started_at: Instant::now(),
        });
        Some(ProcessingGuard {
            lock: self,
            generation,
        })
    }

    /// Whether a run currently holds the lock (expired holds count as free).
    pub fn is_held(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .hold
            .is_some_and(|hold| hold.started_at.elapsed() < self.max_duration)
    }

    fn release(&self, generation: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.hold.is_some_and(|hold| hold.generation == generation) {
            state.hold = None;
        }
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.generation);
    }
}
