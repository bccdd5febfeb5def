//! Runs one download end to end.
//!
//! Sequence: probe size and validator → open output and range set (fresh or
//! resumed) → start limiter, writer and optional progress sampler → run the
//! fetcher pool to exhaustion → send `Finished` → join writer → terminate the
//! bucket → join limiter → validate that nothing is pending.

mod setup;

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::chunk::{chunk_queue, ChunkSender, WriterMessage};
use crate::config::RdmConfig;
use crate::control::{DownloadAborted, StopToken};
use crate::fetch_head;
use crate::fetcher::{self, FetchContext, FetchOptions, FetcherReport};
use crate::file_writer::FileWriter;
use crate::progress::{ProgressSampler, ProgressStats, PROGRESS_INTERVAL};
use crate::retry::RetryPolicy;
use crate::throttle::{RateLimiter, TokenBucket};
use crate::url_model;

/// Everything one run needs. Build with [`DownloadOptions::from_config`].
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub url: String,
    pub output_dir: PathBuf,
    /// Overrides the filename derived from the URL.
    pub file_name: Option<String>,
    /// Number of fetcher workers.
    pub concurrency: usize,
    /// Aggregate cap in bytes per second (None = unbounded).
    pub max_bytes_per_sec: Option<u64>,
    pub range_size: u64,
    pub queue_capacity: usize,
    pub fetch: FetchOptions,
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
}

impl DownloadOptions {
    /// One connection; cap and transfer settings from `cfg`.
    pub fn from_config(cfg: &RdmConfig, url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output_dir: output_dir.into(),
            file_name: None,
            concurrency: 1,
            max_bytes_per_sec: cfg.max_bytes_per_sec,
            range_size: cfg.range_size.max(1),
            queue_capacity: cfg.queue_capacity.max(1),
            fetch: FetchOptions {
                chunk_size: cfg.chunk_size.max(1),
                connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
                low_speed_limit: cfg.low_speed_limit,
                low_speed_time: Duration::from_secs(cfg.low_speed_time_secs),
            },
            retry: RetryPolicy::from(&cfg.retry),
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    /// `<output_dir>/<file name>`.
    pub fn output_path(&self) -> PathBuf {
        let name = self
            .file_name
            .clone()
            .unwrap_or_else(|| url_model::derive_filename(&self.url));
        self.output_dir.join(name)
    }
}

/// How a run ended when no fatal error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub output_path: PathBuf,
    pub file_size: u64,
    pub bytes_downloaded: u64,
    /// True if this run continued from persisted metadata.
    pub resumed: bool,
    /// False when every worker gave up with ranges still pending; metadata is kept.
    pub completed: bool,
}

/// Downloads `opts.url` into `opts.output_path()`.
///
/// Fatal errors (size discovery, file or metadata I/O) return `Err`. A stopped
/// token that leaves work pending returns `Err(DownloadAborted)`. Persisted
/// metadata is deleted only when the file is complete.
pub fn download(
    opts: &DownloadOptions,
    stop: &StopToken,
    progress: Option<Sender<ProgressStats>>,
) -> Result<DownloadOutcome> {
    if opts.concurrency == 0 {
        anyhow::bail!("concurrency must be at least 1");
    }

    let head = fetch_head::probe(&opts.url, opts.fetch.connect_timeout)
        .with_context(|| format!("failed to resolve size of {}", opts.url))?;
    let file_size = head
        .content_length
        .ok_or_else(|| anyhow!("{} did not report a Content-Length", opts.url))?;
    if !head.accept_ranges {
        warn!(url = %opts.url, "server does not advertise byte ranges; trying anyway");
    }

    let output_path = opts.output_path();
    let (file, ranges) =
        setup::prepare_output(&output_path, file_size, opts.range_size, head.validator())?;
    let ranges = Arc::new(ranges);
    let resumed = ranges.is_resumed();
    info!(
        url = %opts.url,
        path = %output_path.display(),
        size = file_size,
        resumed,
        workers = opts.concurrency,
        limit = ?opts.max_bytes_per_sec,
        "starting download"
    );

    let bucket = Arc::new(TokenBucket::new());
    let limiter = RateLimiter::new(Arc::clone(&bucket), opts.max_bytes_per_sec, opts.fetch.chunk_size)
        .spawn()
        .context("failed to start rate limiter")?;

    let (queue, rx) = chunk_queue(opts.queue_capacity);
    let writer = match FileWriter::new(file, Arc::clone(&ranges), rx, stop.clone()).spawn() {
        Ok(handle) => handle,
        Err(e) => {
            bucket.terminate();
            let _ = limiter.join();
            return Err(e).context("failed to start file writer");
        }
    };

    let sampler_done = StopToken::new();
    let sampler = progress.and_then(|tx| {
        ProgressSampler::new(Arc::clone(&ranges), tx, opts.progress_interval, sampler_done.clone())
            .spawn()
            .map_err(|e| warn!(error = %e, "progress sampler not started"))
            .ok()
    });

    let ctx = Arc::new(FetchContext {
        url: opts.url.clone(),
        ranges: Arc::clone(&ranges),
        bucket: Arc::clone(&bucket),
        options: opts.fetch,
        retry: opts.retry,
        stop: stop.clone(),
    });
    let workers = run_workers(opts.concurrency, &ctx, &queue);

    // Shutdown runs in full even when something above failed.
    let _ = queue.send(WriterMessage::Finished);
    drop(queue);
    let writer_joined = writer.join();
    bucket.terminate();
    let limiter_joined = limiter.join();
    sampler_done.stop();
    if let Some(handle) = sampler {
        let _ = handle.join();
    }

    let writer_report = writer_joined.map_err(|_| anyhow!("file writer panicked"))??;
    limiter_joined.map_err(|_| anyhow!("rate limiter panicked"))?;
    let reports = workers?;

    let outcome = DownloadOutcome {
        output_path,
        file_size,
        bytes_downloaded: ranges.bytes_downloaded(),
        resumed,
        completed: ranges.is_complete(),
    };
    info!(
        written = writer_report.bytes_written,
        releases = writer_report.releases,
        failures = reports.iter().map(|r| r.failures).sum::<u64>(),
        "workers finished"
    );

    if outcome.completed {
        ranges
            .discard_metadata()
            .context("failed to remove range metadata")?;
        info!(path = %outcome.output_path.display(), "download complete");
        return Ok(outcome);
    }
    if stop.is_stopped() {
        info!(downloaded = outcome.bytes_downloaded, "download stopped; metadata kept");
        return Err(DownloadAborted.into());
    }
    warn!(
        missing = ?ranges.snapshot(),
        gave_up = reports.iter().filter(|r| r.gave_up).count(),
        "download incomplete; metadata kept for resume"
    );
    Ok(outcome)
}

/// Spawns the pool and waits for every worker.
fn run_workers(
    count: usize,
    ctx: &Arc<FetchContext>,
    queue: &ChunkSender,
) -> Result<Vec<FetcherReport>> {
    let handles: Vec<JoinHandle<FetcherReport>> =
        fetcher::spawn_pool(count, ctx, queue).context("failed to start fetchers")?;
    handles
        .into_iter()
        .map(|h| h.join().map_err(|_| anyhow!("fetcher panicked")))
        .collect()
}
