//! Progress reporting for a download.
//!
//! A sampler thread reads the range set every interval and sends a
//! `ProgressStats` to the caller; consumers print or aggregate as they like.

use std::io;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::control::StopToken;
use crate::range_set::RangeSet;

/// Default sampling interval.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Snapshot of download progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressStats {
    /// Bytes durably written, including bytes from earlier runs.
    pub bytes_done: u64,
    /// Total file size in bytes.
    pub total_bytes: u64,
}

impl ProgressStats {
    /// Whole percent complete, rounded down.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        ((self.bytes_done as u128 * 100) / self.total_bytes as u128).min(100) as u8
    }
}

/// Samples `ranges` every `interval` until `done` is stopped, then sends a
/// final sample. A dropped receiver ends sampling early.
pub struct ProgressSampler {
    ranges: Arc<RangeSet>,
    tx: Sender<ProgressStats>,
    interval: Duration,
    done: StopToken,
}

impl ProgressSampler {
    pub fn new(
        ranges: Arc<RangeSet>,
        tx: Sender<ProgressStats>,
        interval: Duration,
        done: StopToken,
    ) -> Self {
        Self {
            ranges,
            tx,
            interval,
            done,
        }
    }

    pub fn sample(&self) -> ProgressStats {
        ProgressStats {
            bytes_done: self.ranges.bytes_downloaded(),
            total_bytes: self.ranges.file_size(),
        }
    }

    pub fn run(&self) {
        loop {
            let finished = self.done.sleep(self.interval);
            if self.tx.send(self.sample()).is_err() || finished {
                break;
            }
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("rdm-progress".to_string())
            .spawn(move || self.run())
    }
}
