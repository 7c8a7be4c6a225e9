//! Request/response transport abstraction.
//!
//! The engine never talks to the network directly; it issues metadata probes,
//! ranged fetches and full fetches through a [`Transport`]. The default
//! implementation uses `reqwest::blocking`. Tests inject an in-memory one.
//!
//! Transports do not interpret status codes. That is left to the probe and
//! the workers, which know what each status means for them.

use std::fmt;
use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{COOKIE, RANGE};

use crate::config::Cookie;
use crate::error::{DownloadError, DownloadResult};
use crate::plan::ByteRange;

/// HTTP status for partial content.
pub const STATUS_PARTIAL_CONTENT: u16 = 206;

/// A request issued by the probe or a worker.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub cookies: &'a [Cookie],
    /// Inclusive byte range to ask for; `None` fetches the whole resource.
    pub range: Option<ByteRange>,
    /// Time allowed for this request, including reading the body.
    pub timeout: Option<Duration>,
}

impl<'a> FetchRequest<'a> {
    pub fn new(url: &'a str, cookies: &'a [Cookie]) -> Self {
        Self {
            url,
            cookies,
            range: None,
            timeout: None,
        }
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response whose body has not been read yet.
pub struct FetchResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Box<dyn Read + Send>,
}

impl FetchResponse {
    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Content-Length`, if present and valid.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Trait for request/response transports.
///
/// Implementations must be shareable across worker threads.
pub trait Transport: Send + Sync {
    /// Metadata-only request. The body, if any, is ignored.
    fn head(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse>;

    /// Payload request, ranged when `request.range` is set.
    fn get(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse>;
}

/// Default transport backed by `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with default client settings.
    pub fn new() -> DownloadResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("parafetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                DownloadError::transport("", format!("failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn send(
        &self,
        builder: reqwest::blocking::RequestBuilder,
        request: &FetchRequest<'_>,
    ) -> DownloadResult<FetchResponse> {
        let mut builder = builder;
        if let Some(cookie) = Cookie::header_value(request.cookies) {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(range) = request.range {
            builder = builder.header(RANGE, range.header_value());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                DownloadError::Timeout {
                    timeout: request.timeout.unwrap_or_default(),
                }
            } else {
                DownloadError::transport(request.url, e)
            }
        })?;

        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(FetchResponse {
            status: response.status().as_u16(),
            url: response.url().to_string(),
            headers,
            body: Box::new(response),
        })
    }
}

impl Transport for ReqwestTransport {
    fn head(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse> {
        self.send(self.client.head(request.url), request)
    }

    fn get(&self, request: &FetchRequest<'_>) -> DownloadResult<FetchResponse> {
        self.send(self.client.get(request.url), request)
    }
}
