//! Admission control: concurrent-thread and calls-per-hour limits.
//!
//! Two small gates enforce the `limits` configuration section. The
//! [`ThreadGate`] bounds how many threads are actively worked at once; the
//! [`RateLimiter`] bounds LLM calls over a sliding one-hour window. Both
//! treat a limit of zero as unlimited, and the rate limiter takes its time
//! from the same injectable [`Clock`] the budget tracker uses.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::budget::{Clock, SystemClock};
use crate::error::{Error, Result};

/// Bounds the number of concurrently active threads.
///
/// Acquiring returns a permit; dropping the permit frees the slot.
#[derive(Debug)]
pub struct ThreadGate {
    semaphore: Option<Arc<Semaphore>>,
}

impl ThreadGate {
    /// Create a gate. Zero means unlimited.
    #[must_use]
    pub fn new(max_concurrent_threads: usize) -> Self {
        Self {
            semaphore: (max_concurrent_threads > 0)
                .then(|| Arc::new(Semaphore::new(max_concurrent_threads))),
        }
    }

    /// Wait for a slot. Returns `None` permit-holder when unlimited.
    pub async fn acquire(&self) -> Result<Option<OwnedSemaphorePermit>> {
        match &self.semaphore {
            None => Ok(None),
            Some(semaphore) => Arc::clone(semaphore)
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| Error::validation("thread gate closed")),
        }
    }

    /// Take a slot only if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Option<OwnedSemaphorePermit>> {
        match &self.semaphore {
            None => Some(None),
            Some(semaphore) => Arc::clone(semaphore)
                .try_acquire_owned()
                .ok()
                .map(Some),
        }
    }

    /// Free slots right now; `None` when unlimited.
    #[must_use]
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}

/// Sliding-window limiter for LLM calls per hour.
pub struct RateLimiter {
    max_calls_per_hour: u32,
    clock: Arc<dyn Clock>,
    stamps: Mutex<VecDeque<DateTime<Utc>>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_calls_per_hour", &self.max_calls_per_hour)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter on the system clock. Zero means unlimited.
    #[must_use]
    pub fn new(max_calls_per_hour: u32) -> Self {
        Self::with_clock(max_calls_per_hour, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit clock.
    #[must_use]
    pub fn with_clock(max_calls_per_hour: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_calls_per_hour,
            clock,
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one call if the window has room.
    ///
    /// Returns [`Error::Validation`] when the last hour is already full;
    /// the call is not recorded in that case.
    pub fn try_record_call(&self) -> Result<()> {
        if self.max_calls_per_hour == 0 {
            return Ok(());
        }
        let now = self.clock.now();
        let cutoff = now - Duration::hours(1);
        let mut stamps = self.stamps.lock();
        while stamps.front().is_some_and(|t| *t <= cutoff) {
            stamps.pop_front();
        }
        if stamps.len() as u32 >= self.max_calls_per_hour {
            return Err(Error::validation(format!(
                "hourly call limit of {} reached",
                self.max_calls_per_hour
            )));
        }
        stamps.push_back(now);
        Ok(())
    }

    /// Calls still allowed in the current window; `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        if self.max_calls_per_hour == 0 {
            return None;
        }
        let cutoff = self.clock.now() - Duration::hours(1);
        let stamps = self.stamps.lock();
        let in_window = stamps.iter().filter(|t| **t > cutoff).count() as u32;
        Some(self.max_calls_per_hour.saturating_sub(in_window))
    }
}
