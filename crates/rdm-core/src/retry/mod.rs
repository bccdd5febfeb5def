//! Fetch failure classification and per-worker backoff.
//!
//! A failed range is always released for re-claim; this module decides how
//! long the worker waits before claiming again, and when it stops trying.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::FetchError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
