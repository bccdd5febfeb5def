//! One HTTP range request: Easy2 handler that validates the 206 response,
//! paces body bytes through the token bucket, and enqueues them as chunks.

use std::str;
use std::sync::Arc;
use std::time::Duration;

use curl::easy::{Easy2, Handler, WriteError};

use crate::chunk::{Chunk, ChunkSender, WriterMessage, DEFAULT_CHUNK_SIZE};
use crate::fetch_head::{content_range_start, header_value, status_code};
use crate::range_set::Range;
use crate::retry::FetchError;
use crate::throttle::TokenBucket;

/// Transfer settings for range requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Bytes per chunk (and per token debit).
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    /// Abort when throughput stays below this many bytes/s ...
    pub low_speed_limit: u32,
    /// ... for this long.
    pub low_speed_time: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(30),
        }
    }
}

/// Result of one request. `delivered` counts bytes handed to the queue,
/// which is how far the writer will advance the range once it drains them.
#[derive(Debug)]
pub(crate) struct Attempt {
    pub delivered: u64,
    pub result: Result<(), FetchError>,
}

/// Handler state for one range transfer.
pub(crate) struct RangeHandler {
    range: Range,
    chunk_size: usize,
    bucket: Arc<TokenBucket>,
    queue: ChunkSender,
    headers: Vec<String>,
    /// None = not yet checked; Some(true) = 206 and Content-Range ok.
    accepted: Option<bool>,
    delivered: u64,
    failure: Option<FetchError>,
}

impl RangeHandler {
    pub(crate) fn new(
        range: Range,
        chunk_size: usize,
        bucket: Arc<TokenBucket>,
        queue: ChunkSender,
    ) -> Self {
        Self {
            range,
            chunk_size: chunk_size.max(1),
            bucket,
            queue,
            headers: Vec::new(),
            accepted: None,
            delivered: 0,
            failure: None,
        }
    }

    /// Checks status and Content-Range of the final response, recording why on rejection.
    fn check_response(&mut self) -> bool {
        let status = status_code(&self.headers).unwrap_or(0);
        if status != 206 {
            self.failure = Some(FetchError::Http(status));
            return false;
        }
        if let Some(got) = header_value(&self.headers, "content-range").and_then(content_range_start) {
            if got != self.range.start {
                self.failure = Some(FetchError::ContentRangeMismatch {
                    expected: self.range.start,
                    got,
                });
                return false;
            }
        }
        true
    }

    fn emit(&mut self, piece: &[u8]) -> Result<(), FetchError> {
        if !self.bucket.take(piece.len() as u64) {
            return Err(FetchError::Terminated);
        }
        let chunk = Chunk::new(self.range.start + self.delivered, piece.to_vec());
        self.queue
            .send(WriterMessage::Chunk(chunk))
            .map_err(|_| FetchError::WriterGone)?;
        self.delivered += piece.len() as u64;
        Ok(())
    }
}

impl Handler for RangeHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            if line.starts_with("HTTP/") {
                self.headers.clear();
            }
            self.headers.push(line.to_string());
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        if self.accepted.is_none() {
            let ok = self.check_response();
            self.accepted = Some(ok);
        }
        if self.accepted == Some(false) {
            return Ok(0);
        }

        let remaining = self.range.len() - self.delivered;
        let wanted = data.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        for piece in data[..wanted].chunks(self.chunk_size) {
            if let Err(e) = self.emit(piece) {
                self.failure = Some(e);
                return Ok(0);
            }
        }
        if wanted < data.len() {
            self.failure = Some(FetchError::Overrun {
                expected: self.range.len(),
            });
            return Ok(0);
        }
        Ok(data.len())
    }
}

fn configure(
    easy: &mut Easy2<RangeHandler>,
    url: &str,
    range: Range,
    options: &FetchOptions,
) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.connect_timeout(options.connect_timeout)?;
    easy.low_speed_limit(options.low_speed_limit)?;
    easy.low_speed_time(options.low_speed_time)?;
    easy.buffer_size(options.chunk_size)?;
    easy.range(&range.to_string())?;
    Ok(())
}

/// Fetches `range` and streams it into `queue`. Blocks until the transfer ends.
pub(crate) fn fetch_range(
    url: &str,
    range: Range,
    options: &FetchOptions,
    bucket: &Arc<TokenBucket>,
    queue: &ChunkSender,
) -> Attempt {
    let handler = RangeHandler::new(range, options.chunk_size, Arc::clone(bucket), queue.clone());
    let mut easy = Easy2::new(handler);
    if let Err(e) = configure(&mut easy, url, range, options) {
        return Attempt {
            delivered: 0,
            result: Err(FetchError::Curl(e)),
        };
    }

    let performed = easy.perform();
    let code = easy.response_code();
    let handler = easy.get_mut();
    let delivered = handler.delivered;
    let result = match performed {
        Err(e) if e.is_write_error() => Err(handler.failure.take().unwrap_or(FetchError::Curl(e))),
        Err(e) => Err(FetchError::Curl(e)),
        Ok(()) => match code {
            Ok(206) if delivered == range.len() => Ok(()),
            Ok(206) => Err(FetchError::ShortTransfer {
                expected: range.len(),
                received: delivered,
            }),
            Ok(other) => Err(FetchError::Http(other)),
            Err(e) => Err(FetchError::Curl(e)),
        },
    };
    Attempt { delivered, result }
}
