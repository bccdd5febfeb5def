//! HTTP HEAD probe for resource discovery.
//!
//! Uses the curl crate (libcurl) to learn the total size before any range
//! work starts, and whether the server advertises `Accept-Ranges: bytes`.

mod parse;

pub(crate) use parse::{content_range_start, header_value, status_code};

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;

/// Result of a HEAD request: the headers the downloader cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadResult {
    /// Total size in bytes, if `Content-Length` is present.
    pub content_length: Option<u64>,
    /// True if server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// `ETag` value if present.
    pub etag: Option<String>,
    /// `Last-Modified` value if present.
    pub last_modified: Option<String>,
}

impl HeadResult {
    /// Identity of the resource version: the ETag, else Last-Modified.
    pub fn validator(&self) -> Option<&str> {
        self.etag.as_deref().or(self.last_modified.as_deref())
    }
}

/// Performs a HEAD request and returns parsed metadata.
///
/// Follows redirects; only the final response's headers are parsed.
/// Runs in the current thread.
pub fn probe(url: &str, connect_timeout: Duration) -> Result<HeadResult> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?; // HEAD request
    easy.follow_location(true)?;
    easy.connect_timeout(connect_timeout)?;
    easy.timeout(Duration::from_secs(30))?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                if line.starts_with("HTTP/") {
                    headers.clear();
                }
                headers.push(line.to_string());
            }
            true
        })?;
        transfer.perform().context("HEAD request failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    Ok(parse::parse_headers(&headers))
}
