//! Admission control for outbound fetches
//!
//! A counting semaphore caps how many remote calls are in flight across all
//! producers, independent of the producer pool size. Each call may be
//! followed by a fixed pacing delay during which its slot stays taken.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Global limiter shared by every producer
///
/// Cloning is cheap; clones share the same permits and counters.
#[derive(Clone, Debug)]
pub struct AdmissionLimiter {
    semaphore: Arc<Semaphore>,
    permits: usize,
    pacing: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl AdmissionLimiter {
    /// Create a limiter with `permits` concurrent slots and a post-call delay
    #[must_use]
    pub fn new(permits: usize, pacing: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
            pacing,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `call` inside one admission slot
    ///
    /// The slot is acquired before the call and released after the pacing
    /// delay on every exit path, including errors and cancellation of the
    /// returned future.
    pub async fn run<F, Fut, T>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Other("admission limiter closed".to_string()))?;
        let _slot = InFlight::enter(&self.in_flight, &self.peak);

        let result = call().await;

        if !self.pacing.is_zero() {
            tokio::time::sleep(self.pacing).await;
        }
        result
    }

    /// Total number of slots
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Highest number of simultaneously running calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// In-flight bookkeeping released on drop
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
