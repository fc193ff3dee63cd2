//! Outbound call throttles shared by the classifier and the platform adapter.

use std::{future::Future, time::Duration};

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{errors::Error, Result};

// ============== Minimum Interval ==============

#[derive(Debug)]
pub struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    pub fn reserve(&mut self) -> Duration {
        self.reserve_at(Instant::now())
    }

    pub fn reserve_at(&mut self, now: Instant) -> Duration {
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

// ============== Token Bucket ==============

/// At most `capacity` calls per rolling `window`, refilled continuously.
#[derive(Clone, Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_update: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity / window_secs,
            last_update: Instant::now(),
        }
    }

    /// Take a token, or report how long until one is available.
    pub fn try_acquire_at(&mut self, now: Instant) -> std::result::Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }

        let secs = (1.0 - self.tokens) / self.refill_per_sec;
        Err(Duration::from_secs_f64(secs.max(0.0)))
    }

    /// Suspend until a token is available.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            match self.try_acquire_at(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
                    pause(cancel, wait).await?;
                }
            }
        }
    }
}

// ============== Retry / Backoff ==============

/// Bounded retries with doubling, capped delays.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 = the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

// ============== Cancellation-aware waits ==============

/// Sleep that wakes early with `Error::Cancelled`.
pub async fn pause(cancel: &CancellationToken, dur: Duration) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if dur.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = sleep(dur) => Ok(()),
    }
}

/// Run an outbound call, abandoning it if the run is cancelled first.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => out,
    }
}
