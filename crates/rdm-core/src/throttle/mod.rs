//! Aggregate throughput limiting.
//!
//! A single [`TokenBucket`] is shared by every fetcher; the [`RateLimiter`]
//! thread refills it once per second in soft (additive) or hard (reset) mode.

mod bucket;
mod limiter;

pub use bucket::TokenBucket;
pub use limiter::{RateLimiter, RefillMode, REFILL_INTERVAL};
