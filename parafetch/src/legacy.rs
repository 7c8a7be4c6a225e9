//! Legacy single-stream protocol (FTP).
//!
//! `ftp://` locators bypass probing and range planning: the job logs in,
//! retrieves the whole object as one stream and writes it in a single pass.
//! The protocol client sits behind [`LegacyConnector`] so it can be replaced
//! in tests.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::FtpStream;
use tracing::{debug, warn};

use crate::cancel::{CancelSignal, Deadline};
use crate::error::{DownloadError, DownloadResult};
use crate::progress::ProgressCounters;

/// User name sent when the locator carries none.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Buffer size for the data connection (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Socket timeouts must be non-zero.
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Opens authenticated sessions.
///
/// Connection failures are reported as [`DownloadError::Transport`];
/// rejected credentials as [`DownloadError::Unauthorized`].
pub trait LegacyConnector: Send + Sync {
    fn open(
        &self,
        endpoint: &LegacyEndpoint,
        timeout: Duration,
    ) -> DownloadResult<Box<dyn LegacyTransfer>>;
}

/// An authenticated session able to retrieve one object.
pub trait LegacyTransfer: Send {
    /// Stream the object at `path` into `out` until the end of transfer.
    ///
    /// No read may block past `deadline`.
    fn retrieve(
        &mut self,
        path: &str,
        deadline: Deadline,
        out: &mut dyn Write,
    ) -> DownloadResult<u64>;

    /// End the session. Errors are not interesting at this point.
    fn close(self: Box<Self>);
}

/// Default connector backed by `suppaftp`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpConnector;

impl FtpConnector {
    fn resolve(endpoint: &LegacyEndpoint) -> DownloadResult<SocketAddr> {
        (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| DownloadError::transport(&endpoint.host, e))?
            .next()
            .ok_or_else(|| DownloadError::transport(&endpoint.host, "host has no addresses"))
    }
}

impl LegacyConnector for FtpConnector {
    fn open(
        &self,
        endpoint: &LegacyEndpoint,
        timeout: Duration,
    ) -> DownloadResult<Box<dyn LegacyTransfer>> {
        let label = format!("ftp://{}:{}", endpoint.host, endpoint.port);
        let addr = Self::resolve(endpoint)?;

        let mut stream = FtpStream::connect_timeout(addr, timeout)
            .map_err(|e| DownloadError::transport(&label, format!("connect failed: {}", e)))?;
        set_read_timeout(stream.get_ref(), timeout, &label)?;

        if let Err(e) = stream.login(&endpoint.username, &endpoint.password) {
            warn!(host = %endpoint.host, user = %endpoint.username, error = %e, "FTP login rejected");
            stream.quit().ok();
            return Err(DownloadError::Unauthorized { url: label });
        }

        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| DownloadError::transport(&label, e))?;

        debug!(host = %endpoint.host, user = %endpoint.username, "FTP session open");
        Ok(Box::new(FtpTransfer { stream, label }))
    }
}

struct FtpTransfer {
    stream: FtpStream,
    label: String,
}

impl FtpTransfer {
    /// Bound the next control-channel read by what is left of `deadline`.
    fn bound_control(&self, deadline: Deadline) -> DownloadResult<()> {
        deadline.check()?;
        set_read_timeout(self.stream.get_ref(), deadline.remaining(), &self.label)
    }
}

impl LegacyTransfer for FtpTransfer {
    fn retrieve(
        &mut self,
        path: &str,
        deadline: Deadline,
        out: &mut dyn Write,
    ) -> DownloadResult<u64> {
        self.bound_control(deadline)?;
        let mut data = self.stream.retr_as_stream(path).map_err(|e| {
            DownloadError::transport(&self.label, format!("RETR {} failed: {}", path, e))
        })?;

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut copied = 0u64;
        loop {
            deadline.check()?;
            set_read_timeout(data.get_ref(), deadline.remaining(), &self.label)?;

            let n = match data.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if deadline.is_expired() || is_timeout(&e) => {
                    return Err(DownloadError::Timeout {
                        timeout: deadline.budget(),
                    })
                }
                Err(e) => {
                    return Err(DownloadError::transport(
                        &self.label,
                        format!("transfer failed: {}", e),
                    ))
                }
            };
            out.write_all(&buffer[..n]).map_err(|e| {
                DownloadError::transport(&self.label, format!("transfer failed: {}", e))
            })?;
            copied += n as u64;
        }

        self.bound_control(deadline)?;
        self.stream
            .finalize_retr_stream(data)
            .map_err(|e| DownloadError::transport(&self.label, e))?;
        Ok(copied)
    }

    fn close(mut self: Box<Self>) {
        self.stream.quit().ok();
    }
}

fn set_read_timeout(socket: &TcpStream, timeout: Duration, label: &str) -> DownloadResult<()> {
    socket
        .set_read_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))
        .map_err(|e| DownloadError::transport(label, format!("failed to set read timeout: {}", e)))
}

/// Read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Writer that stops a legacy transfer on cancellation or deadline expiry.
///
/// Complements the read timeouts: a transfer that keeps making progress is
/// still stopped once the job is cancelled or out of time.
pub(crate) struct GuardedWriter<'a, W: Write> {
    inner: W,
    signal: &'a CancelSignal,
    deadline: Deadline,
    progress: Option<&'a ProgressCounters>,
    written: u64,
}

impl<'a, W: Write> GuardedWriter<'a, W> {
    pub(crate) fn new(
        inner: W,
        signal: &'a CancelSignal,
        deadline: Deadline,
        progress: Option<&'a ProgressCounters>,
    ) -> Self {
        Self {
            inner,
            signal,
            deadline,
            progress,
            written: 0,
        }
    }

    pub(crate) fn written(&self) -> u64 {
        self.written
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for GuardedWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.signal.is_cancelled() {
            return Err(io::Error::other("download cancelled"));
        }
        if self.deadline.is_expired() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "download timed out"));
        }
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        if let Some(progress) = self.progress {
            progress.add(0, n as u64);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_writer_counts() {
        let signal = CancelSignal::new();
        let counters = ProgressCounters::new(1);
        let mut writer = GuardedWriter::new(
            Vec::new(),
            &signal,
            Deadline::start(Duration::from_secs(30)),
            Some(&counters),
        );

        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        assert_eq!(writer.written(), 11);
        assert_eq!(counters.total_bytes(), 11);
        assert_eq!(writer.into_inner(), b"hello world");
    }

    #[test]
    fn test_guarded_writer_stops_when_cancelled() {
        let signal = CancelSignal::new();
        let mut writer = GuardedWriter::new(
            Vec::new(),
            &signal,
            Deadline::start(Duration::from_secs(30)),
            None,
        );
        signal.trip(DownloadError::Interrupted);
        assert!(writer.write_all(b"x").is_err());
        assert!(writer.into_inner().is_empty());
    }

    #[test]
    fn test_guarded_writer_stops_after_deadline() {
        let signal = CancelSignal::new();
        let mut writer =
            GuardedWriter::new(Vec::new(), &signal, Deadline::start(Duration::ZERO), None);
        let err = writer.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_socket_timeout_never_zero() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let socket = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        set_read_timeout(&socket, Duration::ZERO, "ftp://127.0.0.1").unwrap();
        assert_eq!(socket.read_timeout().unwrap(), Some(MIN_SOCKET_TIMEOUT));
    }

    #[test]
    fn test_read_timeout_kinds() {
        assert!(is_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_timeout(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_timeout(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[test]
    fn test_connect_failure_is_transport_error() {
        let endpoint = LegacyEndpoint {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: ANONYMOUS_USER.to_string(),
            password: String::new(),
        };
        let result = FtpConnector.open(&endpoint, Duration::from_millis(200));
        assert!(matches!(result, Err(DownloadError::Transport { .. })));
    }
}
