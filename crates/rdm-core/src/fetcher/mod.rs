//! Range fetcher workers.
//!
//! Each worker loops claim → request → stream until the range set has nothing
//! left to claim. A failed range is released through the writer queue so the
//! release lands after the chunks the worker already delivered.

mod request;

pub use request::FetchOptions;

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::chunk::{ChunkSender, WriterMessage};
use crate::control::StopToken;
use crate::range_set::RangeSet;
use crate::retry::{classify, FetchError, RetryDecision, RetryPolicy};
use crate::throttle::TokenBucket;

/// State shared by every worker of one download.
#[derive(Debug)]
pub struct FetchContext {
    pub url: String,
    pub ranges: Arc<RangeSet>,
    pub bucket: Arc<TokenBucket>,
    pub options: FetchOptions,
    pub retry: RetryPolicy,
    pub stop: StopToken,
}

/// What one worker did before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetcherReport {
    pub ranges_completed: u64,
    pub bytes_delivered: u64,
    pub failures: u64,
    /// Exited because the retry policy said stop, not because work ran out.
    pub gave_up: bool,
}

/// One worker: owns a queue sender, borrows everything else from the context.
pub struct RangeFetcher {
    id: usize,
    ctx: Arc<FetchContext>,
    queue: ChunkSender,
}

impl RangeFetcher {
    pub fn new(id: usize, ctx: Arc<FetchContext>, queue: ChunkSender) -> Self {
        Self { id, ctx, queue }
    }

    /// Runs until no range can be claimed, the stop token fires, the writer
    /// goes away, or the retry policy gives up.
    pub fn run(self) -> FetcherReport {
        let ctx = &*self.ctx;
        let mut report = FetcherReport::default();
        let mut consecutive_failures = 0u32;

        loop {
            if ctx.stop.is_stopped() {
                debug!(worker = self.id, "stop requested");
                break;
            }
            let Some(range) = ctx.ranges.claim() else {
                break;
            };
            debug!(
                worker = self.id,
                range = %range,
                in_flight = ctx.ranges.claimed(),
                "claimed range"
            );

            let attempt = request::fetch_range(&ctx.url, range, &ctx.options, &ctx.bucket, &self.queue);
            report.bytes_delivered += attempt.delivered;
            let err = match attempt.result {
                Ok(()) => {
                    consecutive_failures = 0;
                    report.ranges_completed += 1;
                    continue;
                }
                Err(e) if e.is_shutdown() => {
                    debug!(worker = self.id, error = %e, "download shutting down");
                    break;
                }
                Err(e) => e,
            };

            report.failures += 1;
            consecutive_failures = if attempt.delivered > 0 {
                1
            } else {
                consecutive_failures + 1
            };
            warn!(
                worker = self.id,
                range = %range,
                delivered = attempt.delivered,
                error = %err,
                "range fetch failed"
            );

            let next = range.start + attempt.delivered;
            if next <= range.end {
                if let Err(e) = self.release(next) {
                    debug!(worker = self.id, error = %e, "release not applied");
                    break;
                }
            }

            match ctx.retry.decide(consecutive_failures, classify(&err)) {
                RetryDecision::RetryAfter(delay) => {
                    if ctx.stop.sleep(delay) {
                        break;
                    }
                }
                RetryDecision::NoRetry => {
                    warn!(
                        worker = self.id,
                        failures = consecutive_failures,
                        "giving up after repeated failures"
                    );
                    report.gave_up = true;
                    break;
                }
            }
        }

        debug!(
            worker = self.id,
            completed = report.ranges_completed,
            failures = report.failures,
            "worker finished"
        );
        report
    }

    /// Asks the writer to release the range now starting at `start` and waits
    /// until it has been applied.
    fn release(&self, start: u64) -> Result<(), FetchError> {
        let (ack, acked) = mpsc::sync_channel(1);
        self.queue
            .send(WriterMessage::Release { start, ack })
            .map_err(|_| FetchError::WriterGone)?;
        acked.recv().map_err(|_| FetchError::WriterGone)
    }

    pub fn spawn(self) -> io::Result<JoinHandle<FetcherReport>> {
        thread::Builder::new()
            .name(format!("rdm-fetch-{}", self.id))
            .spawn(move || self.run())
    }
}

/// Spawns `count` workers over one context. Each gets its own queue sender.
pub fn spawn_pool(
    count: usize,
    ctx: &Arc<FetchContext>,
    queue: &ChunkSender,
) -> io::Result<Vec<JoinHandle<FetcherReport>>> {
    (0..count)
        .map(|id| RangeFetcher::new(id, Arc::clone(ctx), queue.clone()).spawn())
        .collect()
}
