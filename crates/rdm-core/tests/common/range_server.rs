//! Minimal HTTP/1.1 server that supports HEAD and Range GET for integration tests.
//!
//! Serves a single static body. Responds to HEAD with Content-Length and
//! Accept-Ranges: bytes; responds to GET with Range with 206 Partial Content.
//! Faults can be injected: truncated bodies on the first N GETs, 200 with the
//! full body on the first N range GETs, or ignoring Range entirely.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` header even if ranges work.
    pub advertise_ranges: bool,
    /// If false, HEAD omits Content-Length.
    pub head_length: bool,
    /// Cut the body after this many bytes ...
    pub truncate_after: Option<usize>,
    /// ... on this many of the first GET responses.
    pub truncated_responses: usize,
    /// Answer this many of the first range GETs with 200 and the full body.
    pub full_body_responses: usize,
    /// `ETag` sent with HEAD responses.
    pub etag: Option<&'static str>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            advertise_ranges: true,
            head_length: true,
            truncate_after: None,
            truncated_responses: 0,
            full_body_responses: 0,
            etag: None,
        }
    }
}

/// A running server. It serves until the process exits.
pub struct RangeServer {
    pub url: String,
    requests: Arc<Mutex<Vec<(u64, u64)>>>,
    truncated: Arc<AtomicUsize>,
    full_bodies: Arc<AtomicUsize>,
}

impl RangeServer {
    /// Every `Range: bytes=a-b` received by GET, in arrival order.
    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of responses that were cut short.
    pub fn truncated(&self) -> usize {
        self.truncated.load(Ordering::SeqCst)
    }

    /// Number of range GETs answered with 200 and the full body.
    pub fn full_bodies(&self) -> usize {
        self.full_bodies.load(Ordering::SeqCst)
    }
}

struct Shared {
    body: Vec<u8>,
    opts: RangeServerOptions,
    requests: Arc<Mutex<Vec<(u64, u64)>>>,
    truncated: Arc<AtomicUsize>,
    full_bodies: Arc<AtomicUsize>,
}

/// Bumps `counter` if it is still below `limit`; true when it was bumped.
fn take_fault(counter: &AtomicUsize, limit: usize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < limit).then_some(n + 1)
        })
        .is_ok()
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

/// Like `start` but allows customizing server behavior.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let truncated = Arc::new(AtomicUsize::new(0));
    let full_bodies = Arc::new(AtomicUsize::new(0));
    let shared = Arc::new(Shared {
        body,
        opts,
        requests: Arc::clone(&requests),
        truncated: Arc::clone(&truncated),
        full_bodies: Arc::clone(&full_bodies),
    });
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let shared = Arc::clone(&shared);
            thread::spawn(move || handle(stream, &shared));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/files/payload.bin", port),
        requests,
        truncated,
        full_bodies,
    }
}

fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while !data.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
    }
    String::from_utf8(data).ok()
}

fn handle(mut stream: TcpStream, shared: &Shared) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let (method, range) = parse_request(&request);
    let body = &shared.body;
    let opts = shared.opts;
    let total = body.len() as u64;
    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        let length = if opts.head_length {
            format!("Content-Length: {}\r\n", total)
        } else {
            String::new()
        };
        let etag = opts
            .etag
            .map(|tag| format!("ETag: \"{}\"\r\n", tag))
            .unwrap_or_default();
        let response = format!(
            "HTTP/1.1 200 OK\r\n{}{}{}Connection: close\r\n\r\n",
            length, accept_ranges, etag
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    let honor_range = opts.support_ranges
        && range.is_some()
        && !take_fault(&shared.full_bodies, opts.full_body_responses);
    let (status, content_range, slice) = match range {
        Some((start, end_incl)) if honor_range => {
            shared.requests.lock().unwrap().push((start, end_incl));
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl {
                ("416 Range Not Satisfiable", format!("bytes */{}", total), &body[0..0])
            } else {
                (
                    "206 Partial Content",
                    format!("bytes {}-{}/{}", start, end_incl, total),
                    &body[start as usize..=end_incl as usize],
                )
            }
        }
        _ => (
            "200 OK",
            format!("bytes 0-{}/{}", total.saturating_sub(1), total),
            &body[..],
        ),
    };

    let mut send = slice.len();
    if let Some(limit) = opts.truncate_after {
        if take_fault(&shared.truncated, opts.truncated_responses) {
            send = send.min(limit);
        }
    }

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Range: {}\r\n{}Connection: close\r\n\r\n",
        status,
        slice.len(),
        content_range,
        accept_ranges
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(&slice[..send]);
    let _ = stream.flush();
}

/// Returns (method, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let Some(spec) = value.trim().strip_prefix("bytes=") else {
            continue;
        };
        if let Some((a, b)) = spec.split_once('-') {
            let start = a.trim().parse::<u64>().unwrap_or(0);
            let end = b.trim().parse::<u64>().unwrap_or(u64::MAX);
            range = Some((start, end));
        }
    }
    (method, range)
}
