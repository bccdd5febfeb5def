//! Range fetch error type for retry classification.

/// Why one range fetch attempt ended early.
///
/// None of these escape the fetcher: failures release the range for a later
/// claim, and the stop variants end the worker quietly.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Curl reported an error (timeout, connection reset, DNS, ...).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// Response status was not 206 Partial Content.
    #[error("expected HTTP 206, got {0}")]
    Http(u32),
    /// `Content-Range` did not start at the requested offset.
    #[error("Content-Range starts at {got}, requested {expected}")]
    ContentRangeMismatch { expected: u64, got: u64 },
    /// Body ended before the requested range was delivered.
    #[error("short transfer: expected {expected} bytes, got {received}")]
    ShortTransfer { expected: u64, received: u64 },
    /// Server sent more bytes than requested.
    #[error("server sent more than the {expected} requested bytes")]
    Overrun { expected: u64 },
    /// The writer hung up; the download is aborting.
    #[error("chunk queue closed")]
    WriterGone,
    /// The token bucket was terminated while waiting for tokens.
    #[error("token bucket terminated")]
    Terminated,
}

impl FetchError {
    /// True for the variants that mean "stop working", not "this attempt failed".
    pub fn is_shutdown(&self) -> bool {
        matches!(self, FetchError::WriterGone | FetchError::Terminated)
    }
}
