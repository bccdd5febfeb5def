//! Periodic refill of the token bucket.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::bucket::TokenBucket;

/// How often the limiter refills the bucket.
pub const REFILL_INTERVAL: Duration = Duration::from_secs(1);

/// Refill policy for one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillMode {
    /// Add the cap each interval; unused tokens roll over.
    Soft(u64),
    /// Reset to the cap each interval; unused tokens are discarded.
    Hard(u64),
}

impl RefillMode {
    /// Picks the mode for a cap of `max_bytes_per_sec` and a wire chunk of
    /// `chunk_size` bytes. No cap means unbounded tokens. A cap below one chunk
    /// must accumulate across intervals or fetchers would never get a full batch.
    pub fn for_limit(max_bytes_per_sec: Option<u64>, chunk_size: usize) -> Self {
        let cap = max_bytes_per_sec.unwrap_or(u64::MAX);
        if cap < chunk_size as u64 {
            RefillMode::Soft(cap)
        } else {
            RefillMode::Hard(cap)
        }
    }
}

/// Refills a [`TokenBucket`] once per interval until the bucket is terminated.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Arc<TokenBucket>,
    mode: RefillMode,
    interval: Duration,
}

impl RateLimiter {
    pub fn new(bucket: Arc<TokenBucket>, max_bytes_per_sec: Option<u64>, chunk_size: usize) -> Self {
        RateLimiter {
            bucket,
            mode: RefillMode::for_limit(max_bytes_per_sec, chunk_size),
            interval: REFILL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Applies one interval's refill.
    pub fn refill(&self) {
        match self.mode {
            RefillMode::Soft(cap) => self.bucket.add(cap),
            RefillMode::Hard(cap) => self.bucket.set(cap),
        }
    }

    /// Refill immediately, then once per interval; returns as soon as the
    /// bucket is terminated.
    pub fn run(&self) {
        tracing::debug!(mode = ?self.mode, "rate limiter started");
        loop {
            if self.bucket.terminated() {
                break;
            }
            self.refill();
            if self.bucket.wait_terminated(self.interval) {
                break;
            }
        }
        tracing::debug!("rate limiter stopped");
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("rdm-limiter".into())
            .spawn(move || self.run())
    }
}
