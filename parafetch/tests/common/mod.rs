//! Shared fixtures for integration tests: an in-memory HTTP-like server and
//! an in-memory legacy (FTP) connector.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use parafetch::cancel::Deadline;
use parafetch::legacy::{LegacyConnector, LegacyEndpoint, LegacyTransfer};
use parafetch::plan::ByteRange;
use parafetch::{Cookie, DownloadError, DownloadResult, FetchRequest, FetchResponse, Transport};

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 256) % 251) as u8).collect()
}

/// A request the mock server saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: &'static str,
    pub range: Option<ByteRange>,
    pub cookie: Option<String>,
}

struct ServerState {
    data: Vec<u8>,
    ranges: bool,
    head_status: u16,
    get_status: u16,
    content_length: Option<String>,
    headers: Vec<(String, String)>,
    read_delay: Option<Duration>,
    slow_from: u64,
    broken_range_start: Option<u64>,
    transient: Mutex<HashMap<u64, u32>>,
    requests: Mutex<Vec<Recorded>>,
}

/// In-memory server. Clones share state, so a test can keep one handle for
/// assertions and give another to the downloader.
#[derive(Clone)]
pub struct MockServer {
    state: Arc<ServerState>,
}

pub struct MockServerBuilder {
    state: ServerState,
}

impl MockServer {
    pub fn builder(data: Vec<u8>) -> MockServerBuilder {
        let content_length = Some(data.len().to_string());
        MockServerBuilder {
            state: ServerState {
                data,
                ranges: true,
                head_status: 200,
                get_status: 200,
                content_length,
                headers: Vec::new(),
                read_delay: None,
                slow_from: 0,
                broken_range_start: None,
                transient: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
            },
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }

    pub fn gets(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .collect()
    }

    fn record(&self, method: &'static str, request: &FetchRequest<'_>) {
        self.state.requests.lock().push(Recorded {
            method,
            range: request.range,
            cookie: Cookie::header_value(request.cookies),
        });
    }

    fn headers(&self, length: Option<String>) -> Vec<(String, String)> {
        let mut headers = self.state.headers.clone();
        if self.state.ranges {
            headers.push(("Accept-Ranges".to_string(), "bytes".to_string()));
        }
        if let Some(length) = length {
            headers.push(("Content-Length".to_string(), length));
        }
        headers
    }
}

impl MockServerBuilder {
    pub fn no_ranges(mut self) -> Self {
        self.state.ranges = false;
        self
    }

    pub fn head_status(mut self, status: u16) -> Self {
        self.state.head_status = status;
        self
    }

    pub fn get_status(mut self, status: u16) -> Self {
        self.state.get_status = status;
        self
    }

    /// Replace the advertised `Content-Length` (`None` omits it).
    pub fn content_length(mut self, value: Option<&str>) -> Self {
        self.state.content_length = value.map(str::to_string);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.state
            .headers
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Sleep `delay` before every 1 KiB read of bodies starting at or after `from`.
    pub fn slow_bodies(mut self, delay: Duration, from: u64) -> Self {
        self.state.read_delay = Some(delay);
        self.state.slow_from = from;
        self
    }

    /// Ranged requests starting at `start` always get a 500.
    pub fn broken_range(mut self, start: u64) -> Self {
        self.state.broken_range_start = Some(start);
        self
    }

    /// Ranged requests starting at `start` fail `times` times first.
    pub fn transient_failures(self, start: u64, times: u32) -> Self {
        self.state.transient.lock().insert(start, times);
        self
    }

    pub fn build(self) -> MockServer {
        MockServer {
            state: Arc::new(self.state),
        }
    }
}

impl Transport for MockServer {
    fn head(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse> {
        self.record("HEAD", request);
        Ok(FetchResponse {
            status: self.state.head_status,
            url: request.url.to_string(),
            headers: self.headers(self.state.content_length.clone()),
            body: Box::new(io::empty()),
        })
    }

    fn get(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse> {
        self.record("GET", request);
        let state = &self.state;

        if let Some(range) = request.range {
            let mut transient = state.transient.lock();
            if let Some(left) = transient.get_mut(&range.start) {
                if *left > 0 {
                    *left -= 1;
                    return Err(DownloadError::transport(request.url, "connection reset"));
                }
            }
        }

        let (status, body, start) = match request.range {
            Some(range) if state.broken_range_start == Some(range.start) => {
                (500, Vec::new(), range.start)
            }
            Some(range) if state.ranges => {
                let end = (range.end as usize).min(state.data.len().saturating_sub(1));
                (206, state.data[range.start as usize..=end].to_vec(), range.start)
            }
            _ => (state.get_status, state.data.clone(), 0),
        };

        let length = body.len().to_string();
        let delay = state.read_delay.filter(|_| start >= state.slow_from);
        Ok(FetchResponse {
            status,
            url: request.url.to_string(),
            headers: self.headers(Some(length)),
            body: Box::new(SlowReader {
                inner: Cursor::new(body),
                delay,
            }),
        })
    }
}

/// Reads at most 1 KiB per call, optionally sleeping first.
struct SlowReader {
    inner: Cursor<Vec<u8>>,
    delay: Option<Duration>,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let len = buf.len().min(1024);
        self.inner.read(&mut buf[..len])
    }
}

/// In-memory legacy connector serving files by path.
#[derive(Clone, Default)]
pub struct MockLegacy {
    files: Arc<HashMap<String, Vec<u8>>>,
    password: Option<String>,
    logins: Arc<Mutex<Vec<LegacyEndpoint>>>,
    unreachable: bool,
    stall_after: Option<usize>,
}

impl MockLegacy {
    pub fn serving(path: &str, data: Vec<u8>) -> Self {
        let mut files = HashMap::new();
        files.insert(path.to_string(), data);
        Self {
            files: Arc::new(files),
            ..Default::default()
        }
    }

    /// Reject logins whose password differs.
    pub fn require_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Stop sending after `bytes`, like a server that goes quiet mid-transfer.
    /// The session then waits out the deadline as a socket read would.
    pub fn stall_after(mut self, bytes: usize) -> Self {
        self.stall_after = Some(bytes);
        self
    }

    pub fn logins(&self) -> Vec<LegacyEndpoint> {
        self.logins.lock().clone()
    }
}

impl LegacyConnector for MockLegacy {
    fn open(
        &self,
        endpoint: &LegacyEndpoint,
        _timeout: Duration,
    ) -> DownloadResult<Box<dyn LegacyTransfer>> {
        if self.unreachable {
            return Err(DownloadError::transport(&endpoint.host, "connection refused"));
        }
        self.logins.lock().push(endpoint.clone());
        if let Some(expected) = &self.password {
            if &endpoint.password != expected {
                return Err(DownloadError::Unauthorized {
                    url: endpoint.host.clone(),
                });
            }
        }
        Ok(Box::new(MockSession {
            files: Arc::clone(&self.files),
            stall_after: self.stall_after,
        }))
    }
}

struct MockSession {
    files: Arc<HashMap<String, Vec<u8>>>,
    stall_after: Option<usize>,
}

impl LegacyTransfer for MockSession {
    fn retrieve(
        &mut self,
        path: &str,
        deadline: Deadline,
        out: &mut dyn Write,
    ) -> DownloadResult<u64> {
        let data = self.files.get(path).ok_or_else(|| DownloadError::NotFound {
            url: path.to_string(),
        })?;
        if let Some(sent) = self.stall_after {
            out.write_all(&data[..sent.min(data.len())])
                .map_err(|e| DownloadError::transport(path, e))?;
            thread::sleep(deadline.remaining());
            return Err(DownloadError::transport(path, "read timed out"));
        }
        for chunk in data.chunks(4096) {
            out.write_all(chunk)
                .map_err(|e| DownloadError::transport(path, e))?;
        }
        Ok(data.len() as u64)
    }

    fn close(self: Box<Self>) {}
}
