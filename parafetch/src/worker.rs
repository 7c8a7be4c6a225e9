//! Chunk workers.
//!
//! A worker fetches one span of the resource and streams it into the shared
//! destination at the matching offset. Transient failures are retried a fixed
//! number of times. The first worker to give up trips the job's
//! [`CancelSignal`], which makes every sibling stop at its next check.

use std::io::{self, Read};

use tracing::{debug, error, warn};

use crate::cancel::{CancelSignal, Deadline};
use crate::config::Cookie;
use crate::error::{DownloadError, DownloadResult};
use crate::plan::ByteRange;
use crate::probe::check_status;
use crate::progress::ProgressCounters;
use crate::sink::SharedFile;
use crate::transport::{FetchRequest, Transport, STATUS_PARTIAL_CONTENT};

/// Retries after the first attempt (4 attempts in total).
pub const MAX_RETRIES: u32 = 3;

/// Buffer size for streaming response bodies (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Part of the resource a worker is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Span {
    /// A ranged request that must be answered with partial content.
    Range(ByteRange),
    /// The whole resource in one plain request. `expected` is the size the
    /// probe reported, if any.
    Whole { expected: Option<u64> },
}

impl Span {
    fn offset(&self) -> u64 {
        match self {
            Self::Range(range) => range.start,
            Self::Whole { .. } => 0,
        }
    }

    fn expected_len(&self) -> Option<u64> {
        match self {
            Self::Range(range) => Some(range.len()),
            Self::Whole { expected } => *expected,
        }
    }
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// All bytes of the span were written.
    Completed(u64),
    /// The worker gave up and recorded its error on the cancel signal.
    Failed,
    /// A sibling failure or external cancellation stopped the worker.
    Cancelled,
}

/// Everything the workers of one job share.
pub struct FetchContext<'a> {
    pub transport: &'a dyn Transport,
    /// Locator used for requests.
    pub url: &'a str,
    /// Locator as shown in logs and errors (password redacted).
    pub label: &'a str,
    pub cookies: &'a [Cookie],
    pub sink: &'a SharedFile,
    pub signal: &'a CancelSignal,
    pub deadline: Deadline,
    pub progress: Option<&'a ProgressCounters>,
}

impl FetchContext<'_> {
    /// Copy `body` into the sink starting at `offset`.
    ///
    /// Cancellation and the deadline are checked between reads. When `limit`
    /// is set, a body of any other length is an error.
    pub(crate) fn copy_body(
        &self,
        body: &mut dyn Read,
        offset: u64,
        limit: Option<u64>,
        worker: usize,
    ) -> DownloadResult<u64> {
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            if self.signal.is_cancelled() {
                return Err(DownloadError::Interrupted);
            }
            self.deadline.check()?;

            let n = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.read_error(e)),
            };

            if let Some(limit) = limit {
                if written + n as u64 > limit {
                    return Err(DownloadError::transport(
                        self.label,
                        format!("body longer than expected {} bytes", limit),
                    ));
                }
            }

            self.sink.write_at(offset + written, &buffer[..n])?;
            written += n as u64;
            if let Some(progress) = self.progress {
                progress.add(worker, n as u64);
            }
        }

        if let Some(limit) = limit {
            if written != limit {
                return Err(DownloadError::transport(
                    self.label,
                    format!("body ended after {} of {} bytes", written, limit),
                ));
            }
        }
        Ok(written)
    }

    fn read_error(&self, e: io::Error) -> DownloadError {
        if self.deadline.is_expired() {
            return self.timeout();
        }
        DownloadError::transport(self.label, format!("failed reading body: {}", e))
    }

    /// The job's timeout error, whatever budget the transport was given.
    fn timeout(&self) -> DownloadError {
        DownloadError::Timeout {
            timeout: self.deadline.budget(),
        }
    }
}

/// Fetches one span with retries.
pub struct ChunkWorker<'a> {
    index: usize,
    span: Span,
    ctx: &'a FetchContext<'a>,
}

impl<'a> ChunkWorker<'a> {
    pub fn new(index: usize, span: Span, ctx: &'a FetchContext<'a>) -> Self {
        Self { index, span, ctx }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Run until the span is written, retries are exhausted or the job is
    /// cancelled.
    pub fn run(&self) -> WorkerExit {
        let mut retries = 0;

        loop {
            // Checked before every attempt; does not cost a retry.
            if self.ctx.signal.is_cancelled() {
                debug!(index = self.index, "Cancelled before attempt");
                return WorkerExit::Cancelled;
            }
            if let Err(e) = self.ctx.deadline.check() {
                return self.give_up(e);
            }

            match self.attempt() {
                Ok(bytes) => {
                    debug!(index = self.index, bytes, "Chunk complete");
                    if let Some(progress) = self.ctx.progress {
                        progress.mark_completed();
                    }
                    return WorkerExit::Completed(bytes);
                }
                Err(_) if self.ctx.signal.is_cancelled() => {
                    debug!(index = self.index, "Cancelled during attempt");
                    return WorkerExit::Cancelled;
                }
                Err(e) if e.is_retryable() && retries < MAX_RETRIES => {
                    retries += 1;
                    warn!(
                        index = self.index,
                        retry = retries,
                        max_retries = MAX_RETRIES,
                        error = %e,
                        "Chunk attempt failed, retrying"
                    );
                    if let Some(progress) = self.ctx.progress {
                        progress.reset(self.index);
                    }
                }
                Err(e) => return self.give_up(e),
            }
        }
    }

    fn give_up(&self, e: DownloadError) -> WorkerExit {
        error!(index = self.index, error = %e, "Chunk failed");
        self.ctx.signal.trip(e);
        WorkerExit::Failed
    }

    fn attempt(&self) -> DownloadResult<u64> {
        let ctx = self.ctx;
        let mut request = FetchRequest::new(ctx.url, ctx.cookies)
            .with_timeout(ctx.deadline.remaining());
        if let Span::Range(range) = self.span {
            request = request.with_range(range);
        }

        let mut response = ctx.transport.get(&request).map_err(|e| match e {
            DownloadError::Timeout { .. } => ctx.timeout(),
            other => other,
        })?;

        match self.span {
            Span::Range(range) if response.status != STATUS_PARTIAL_CONTENT => {
                return Err(DownloadError::RangeNotHonored {
                    url: ctx.label.to_string(),
                    start: range.start,
                    end: range.end,
                    status: response.status,
                });
            }
            Span::Range(_) => {}
            Span::Whole { .. } => check_status(&response, ctx.label)?,
        }

        ctx.copy_body(
            &mut response.body,
            self.span.offset(),
            self.span.expected_len(),
            self.index,
        )
    }
}
