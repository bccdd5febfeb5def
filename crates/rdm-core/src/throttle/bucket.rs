//! Shared byte-token bucket.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct BucketState {
    available: u64,
    terminated: bool,
}

/// Thread-safe counter of byte tokens.
///
/// Fetchers block in [`TokenBucket::take`] until enough tokens exist; the rate
/// limiter replenishes with [`TokenBucket::set`] (hard) or [`TokenBucket::add`]
/// (soft). Tokens are only created by `set`/`add` and only destroyed by `take`
/// or a `set` that lowers the count.
#[derive(Debug, Default)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    changed: Condvar,
}

impl TokenBucket {
    /// Empty bucket; nothing can be taken until the limiter refills it.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: u64) -> Self {
        TokenBucket {
            state: Mutex::new(BucketState {
                available: tokens,
                terminated: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `n` tokens are available, then debits exactly `n`.
    ///
    /// Returns `false` without debiting if the bucket is terminated while waiting.
    pub fn take(&self, n: u64) -> bool {
        let mut state = self.lock();
        loop {
            if state.terminated {
                return false;
            }
            if state.available >= n {
                state.available -= n;
                return true;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Replaces the available tokens with `n` (hard limiting).
    pub fn set(&self, n: u64) {
        self.lock().available = n;
        self.changed.notify_all();
    }

    /// Adds `n` tokens, saturating at `u64::MAX` (soft limiting).
    pub fn add(&self, n: u64) {
        {
            let mut state = self.lock();
            state.available = state.available.saturating_add(n);
        }
        self.changed.notify_all();
    }

    pub fn available(&self) -> u64 {
        self.lock().available
    }

    /// One-way latch; wakes every waiter.
    pub fn terminate(&self) {
        self.lock().terminated = true;
        self.changed.notify_all();
    }

    pub fn terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Sleeps up to `timeout`, returning early (with `true`) once terminated.
    pub fn wait_terminated(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| !s.terminated)
            .unwrap_or_else(PoisonError::into_inner);
        state.terminated
    }
}
