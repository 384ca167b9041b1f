use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap, RANGE};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::ReadAt;

/// HTTP Range reader for remote archive volumes
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: Arc<AtomicU64>,
    max_retry: u32,
}

fn http_error(err: reqwest::Error) -> io::Error {
    io::Error::other(err)
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl HttpRangeReader {
    /// Probe `url` with a HEAD request; a 404 yields `Ok(None)` so callers
    /// can look for volumes that may not exist.
    ///
    /// The server must answer with `Accept-Ranges: bytes` and a
    /// `Content-Length`.
    pub fn open(url: String) -> io::Result<Option<Self>> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(http_error)?;

        let resp = client.head(&url).send().map_err(http_error)?;
        match resp.status() {
            StatusCode::NOT_FOUND => {
                debug!("{url}: not found");
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(io::Error::other(format!("HEAD {url} failed: {status}")));
            }
            _ => {}
        }

        let headers = resp.headers();
        if !header_str(headers, ACCEPT_RANGES).is_some_and(|v| v.contains("bytes")) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{url}: server does not accept range requests"),
            ));
        }
        let size = header_str(headers, CONTENT_LENGTH)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| io::Error::other(format!("{url}: missing Content-Length")))?;

        debug!("{url}: {size} bytes, range requests supported");
        Ok(Some(Self {
            client,
            url,
            size,
            transferred_bytes: Arc::default(),
            max_retry: 10,
        }))
    }

    /// Count transferred bytes into `counter`, which may be shared by the
    /// readers of several volumes.
    pub fn with_transfer_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.transferred_bytes = counter;
        self
    }

    /// Bytes received so far, across every reader sharing the counter.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

impl HttpRangeReader {
    /// GET `first..=last`, retrying timeouts and connection failures with a
    /// growing delay.
    fn fetch_range(&self, first: u64, last: u64) -> io::Result<Response> {
        let mut attempt = 0;
        loop {
            let sent = self
                .client
                .get(&self.url)
                .header(RANGE, format!("bytes={first}-{last}"))
                .send();
            match sent {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => return Ok(resp),
                Ok(resp) => {
                    return Err(io::Error::other(format!(
                        "GET {} range {first}-{last} failed: {}",
                        self.url,
                        resp.status()
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    attempt += 1;
                    if attempt >= self.max_retry {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("{}: giving up after {attempt} attempts", self.url),
                        ));
                    }
                    warn!("{}: connection error, retry {attempt}/{}: {e}", self.url, self.max_retry);
                    thread::sleep(Duration::from_millis(500 * attempt as u64));
                }
                Err(e) => return Err(http_error(e)),
            }
        }
    }
}

impl ReadAt for HttpRangeReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let last = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let wanted = (last - offset + 1) as usize;

        // Servers may answer with a shorter range than asked for
        let mut filled = 0;
        while filled < wanted {
            let body = self
                .fetch_range(offset + filled as u64, last)?
                .bytes()
                .map_err(http_error)?;
            if body.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server returned an empty range",
                ));
            }
            let n = body.len().min(wanted - filled);
            buf[filled..filled + n].copy_from_slice(&body[..n]);
            filled += n;
            self.transferred_bytes.fetch_add(n as u64, Ordering::Relaxed);
        }

        Ok(filled)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
