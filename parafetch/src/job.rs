//! Download jobs.
//!
//! A [`Job`] is one transfer attempt. It moves through
//! `Created → Probing → AwaitingDestination → Fetching` and ends in
//! `Succeeded`, `Failed` or `Cancelled`. A job runs once; asking it to
//! download again returns [`DownloadError::JobFinished`].
//!
//! Partially written files are left in place when a job fails.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use flate2::read::{DeflateDecoder, ZlibDecoder};
use tracing::{debug, error, info, info_span, Span as TraceSpan};

use crate::cancel::{CancelSignal, Deadline};
use crate::config::DownloadOptions;
use crate::destination::{self, Choice, DestinationChooser};
use crate::error::{DownloadError, DownloadResult};
use crate::legacy::{
    GuardedWriter, LegacyConnector, LegacyEndpoint, LegacyTransfer, ANONYMOUS_USER,
};
use crate::locator::Locator;
use crate::plan::plan;
use crate::probe::{self, check_status, suggest_file_name};
use crate::progress::{
    ProgressCallback, ProgressCounters, ProgressReporter, DEFAULT_POLL_INTERVAL,
};
use crate::sink::SharedFile;
use crate::transport::{FetchRequest, Transport};
use crate::worker::{ChunkWorker, FetchContext, Span, WorkerExit};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Probing,
    AwaitingDestination,
    Fetching,
    Succeeded,
    Failed,
    /// The destination chooser declined.
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` comes later in the lifecycle. Phases may be skipped
    /// but never revisited.
    pub fn precedes(&self, next: JobState) -> bool {
        self.rank() < next.rank()
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Probing => 1,
            Self::AwaitingDestination => 2,
            Self::Fetching => 3,
            Self::Succeeded | Self::Failed | Self::Cancelled => 4,
        }
    }
}

/// Non-error result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The file was written completely.
    Completed { path: PathBuf, bytes: u64 },
    /// The user declined the destination. Nothing was fetched.
    Cancelled,
}

/// Collaborators a job borrows from its downloader.
pub(crate) struct JobParts {
    pub id: u64,
    pub locator: Locator,
    pub options: DownloadOptions,
    pub transport: Arc<dyn Transport>,
    pub legacy: Arc<dyn LegacyConnector>,
    pub chooser: Option<Arc<dyn DestinationChooser>>,
    pub progress: Option<ProgressCallback>,
    pub signal: CancelSignal,
}

/// One transfer attempt.
pub struct Job {
    id: u64,
    locator: Locator,
    options: DownloadOptions,
    state: JobState,
    total_size: u64,
    supports_range: bool,
    file_name: Option<String>,
    /// Path picked by the chooser; used verbatim when set.
    chosen_path: Option<PathBuf>,
    transport: Arc<dyn Transport>,
    legacy: Arc<dyn LegacyConnector>,
    chooser: Option<Arc<dyn DestinationChooser>>,
    progress: Option<ProgressCallback>,
    signal: CancelSignal,
}

impl Job {
    pub(crate) fn new(parts: JobParts) -> Self {
        Self {
            id: parts.id,
            locator: parts.locator,
            options: parts.options,
            state: JobState::Created,
            total_size: 0,
            supports_range: false,
            file_name: None,
            chosen_path: None,
            transport: parts.transport,
            legacy: parts.legacy,
            chooser: parts.chooser,
            progress: parts.progress,
            signal: parts.signal,
        }
    }

    /// Identifier, unique within the creating downloader.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Adjust this job's options before it runs.
    pub fn options_mut(&mut self) -> &mut DownloadOptions {
        &mut self.options
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Size learned by the probe; 0 when unknown.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn supports_range(&self) -> bool {
        self.supports_range
    }

    /// Resolved file name, without prefix or directory.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Preset the file name. The probe will not replace it.
    pub fn set_file_name(&mut self, name: impl Into<String>) {
        self.file_name = Some(name.into());
    }

    /// Where the file will be (or was) written.
    pub fn target_file(&self) -> PathBuf {
        match &self.chosen_path {
            Some(path) => path.clone(),
            None => destination::target_path(
                &self.options.dir,
                &self.options.file_name_prefix,
                self.file_name.as_deref().unwrap_or_default(),
            ),
        }
    }

    /// Cancel this job from another thread.
    pub fn cancel_token(&self) -> tokio_util::sync::CancellationToken {
        self.signal.token().clone()
    }

    /// Probe, plan and fetch the resource in parallel ranges.
    ///
    /// `ftp://` locators take the single-stream legacy path instead.
    pub fn download(&mut self) -> DownloadResult<Outcome> {
        self.run(|job, span| {
            if job.locator.is_legacy() {
                job.run_legacy()
            } else {
                job.run_parallel(span)
            }
        })
    }

    /// Fetch the resource with one plain request, without probing.
    ///
    /// `Content-Encoding: deflate` bodies are decoded on the fly.
    pub fn download_single(&mut self) -> DownloadResult<Outcome> {
        self.run(|job, _| {
            if job.locator.is_legacy() {
                job.run_legacy()
            } else {
                job.run_single()
            }
        })
    }

    fn run<F>(&mut self, body: F) -> DownloadResult<Outcome>
    where
        F: FnOnce(&mut Self, &TraceSpan) -> DownloadResult<Outcome>,
    {
        if self.state != JobState::Created {
            return Err(DownloadError::JobFinished { id: self.id });
        }

        let span = info_span!("job", id = self.id);
        let _guard = span.enter();
        info!(url = %self.locator, "Download started");

        let result = body(self, &span);
        let end = match &result {
            Ok(Outcome::Completed { path, bytes }) => {
                info!(path = %path.display(), bytes, "Download complete");
                JobState::Succeeded
            }
            Ok(Outcome::Cancelled) => {
                info!("Destination declined, nothing downloaded");
                JobState::Cancelled
            }
            Err(e) => {
                error!(error = %e, "Download failed");
                JobState::Failed
            }
        };
        self.set_state(end);
        result
    }

    fn set_state(&mut self, next: JobState) {
        debug_assert!(
            self.state.precedes(next),
            "job state went from {:?} to {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "Job state changed");
        self.state = next;
    }

    fn check_interrupted(&self) -> DownloadResult<()> {
        if self.signal.is_cancelled() {
            return Err(self.signal.take_error().unwrap_or(DownloadError::Interrupted));
        }
        Ok(())
    }

    /// Consult the chooser, validate the name and create the file.
    ///
    /// `None` when the chooser declined.
    fn resolve_destination(&mut self) -> DownloadResult<Option<(File, PathBuf)>> {
        self.set_state(JobState::AwaitingDestination);

        let chooser = self
            .chooser
            .clone()
            .filter(|_| self.options.confirm_destination);
        if let Some(chooser) = chooser {
            match chooser.choose(&self.target_file()) {
                Choice::Accepted(path) => {
                    debug!(path = %path.display(), "Destination chosen");
                    self.chosen_path = Some(path);
                }
                Choice::Declined => return Ok(None),
            }
        }

        let name = match &self.chosen_path {
            Some(path) => file_name_of(path),
            None => self.file_name.clone().unwrap_or_default(),
        };
        destination::validate_file_name(&name)?;

        let (file, path) =
            destination::create_destination(&self.target_file(), self.options.overwrite)?;
        if self.chosen_path.is_some() {
            self.chosen_path = Some(path.clone());
        } else {
            let used = file_name_of(&path);
            let stripped = used
                .strip_prefix(self.options.file_name_prefix.as_str())
                .unwrap_or(&used)
                .to_string();
            self.file_name = Some(stripped);
        }
        Ok(Some((file, path)))
    }

    fn start_reporter(
        &self,
        counters: &Arc<ProgressCounters>,
        total: u64,
    ) -> Option<ProgressReporter> {
        self.progress.clone().map(|callback| {
            ProgressReporter::start(
                self.id,
                Arc::clone(counters),
                total,
                callback,
                DEFAULT_POLL_INTERVAL,
            )
        })
    }

    fn run_parallel(&mut self, job_span: &TraceSpan) -> DownloadResult<Outcome> {
        self.check_interrupted()?;
        self.set_state(JobState::Probing);
        let report = probe::probe(
            self.transport.as_ref(),
            &self.locator,
            &self.options.cookies,
            self.options.timeout,
        )?;
        self.total_size = report.total_size;
        self.supports_range = report.supports_range;
        if self.file_name.is_none() {
            self.file_name = report.file_name;
        }

        let Some((file, path)) = self.resolve_destination()? else {
            return Ok(Outcome::Cancelled);
        };
        self.check_interrupted()?;

        self.set_state(JobState::Fetching);
        let deadline = Deadline::start(self.options.timeout);
        let sink = SharedFile::new(file, path);
        if self.total_size > 0 {
            sink.allocate(self.total_size)?;
        }

        let plan = plan(
            self.total_size,
            self.options.min_chunk_size,
            self.options.max_workers,
            self.supports_range,
        );
        let spans: Vec<Span> = if plan.is_parallel() {
            plan.ranges.iter().copied().map(Span::Range).collect()
        } else {
            let expected = (self.total_size > 0).then_some(self.total_size);
            vec![Span::Whole { expected }]
        };
        info!(
            size = self.total_size,
            supports_range = self.supports_range,
            workers = spans.len(),
            path = %sink.path().display(),
            "Fetching"
        );

        let counters = Arc::new(ProgressCounters::new(spans.len()));
        let reporter = self.start_reporter(&counters, self.total_size);
        let label = self.locator.to_string();
        let ctx = FetchContext {
            transport: self.transport.as_ref(),
            url: self.locator.as_str(),
            label: &label,
            cookies: &self.options.cookies,
            sink: &sink,
            signal: &self.signal,
            deadline,
            progress: Some(&counters),
        };

        let exits = join_workers(&ctx, &spans, job_span);
        if let Some(reporter) = reporter {
            reporter.stop();
        }

        let mut bytes = 0;
        for exit in &exits {
            match exit {
                WorkerExit::Completed(n) => bytes += n,
                _ => {
                    return Err(self
                        .signal
                        .take_error()
                        .unwrap_or(DownloadError::Interrupted))
                }
            }
        }

        if self.total_size == 0 {
            // A retried stream of unknown length may have left a longer tail.
            sink.allocate(bytes)?;
        }
        let path = sink.finish()?;
        Ok(Outcome::Completed { path, bytes })
    }

    fn run_single(&mut self) -> DownloadResult<Outcome> {
        self.check_interrupted()?;
        // The payload request doubles as the probe.
        self.set_state(JobState::Probing);
        let deadline = Deadline::start(self.options.timeout);
        let label = self.locator.to_string();

        let request = FetchRequest::new(self.locator.as_str(), &self.options.cookies)
            .with_timeout(deadline.remaining());
        let response = self.transport.get(&request).map_err(|e| match e {
            DownloadError::Timeout { .. } => DownloadError::Timeout {
                timeout: deadline.budget(),
            },
            other => other,
        })?;
        check_status(&response, &label)?;
        if self.file_name.is_none() {
            self.file_name = suggest_file_name(&response, &self.locator);
        }

        let Some((file, path)) = self.resolve_destination()? else {
            return Ok(Outcome::Cancelled);
        };
        self.set_state(JobState::Fetching);

        let deflate = response
            .header("content-encoding")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("deflate"));
        let expected = if deflate { None } else { response.content_length() };
        self.total_size = expected.unwrap_or(0);
        let mut body: Box<dyn Read + Send> = if deflate {
            debug!("Decoding deflate body");
            inflate(response.body)
        } else {
            response.body
        };

        let sink = SharedFile::new(file, path);
        let counters = Arc::new(ProgressCounters::new(1));
        let reporter = self.start_reporter(&counters, self.total_size);
        let ctx = FetchContext {
            transport: self.transport.as_ref(),
            url: self.locator.as_str(),
            label: &label,
            cookies: &self.options.cookies,
            sink: &sink,
            signal: &self.signal,
            deadline,
            progress: Some(&counters),
        };

        let copied = ctx.copy_body(&mut body, 0, expected, 0);
        if copied.is_ok() {
            counters.mark_completed();
        }
        if let Some(reporter) = reporter {
            reporter.stop();
        }
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(DownloadError::Interrupted) => {
                return Err(self.signal.take_error().unwrap_or(DownloadError::Interrupted))
            }
            Err(e) => return Err(e),
        };

        let path = sink.finish()?;
        Ok(Outcome::Completed { path, bytes })
    }

    fn run_legacy(&mut self) -> DownloadResult<Outcome> {
        self.check_interrupted()?;
        let endpoint = self.legacy_endpoint();
        let mut session = self.legacy.open(&endpoint, self.options.timeout)?;
        let result = self.legacy_transfer(session.as_mut());
        session.close();
        result
    }

    fn legacy_endpoint(&self) -> LegacyEndpoint {
        let (username, password) = match self.locator.credentials() {
            Some(c) if !c.username.is_empty() => (c.username.clone(), c.password.clone()),
            Some(c) => (ANONYMOUS_USER.to_string(), c.password.clone()),
            None => (ANONYMOUS_USER.to_string(), String::new()),
        };
        LegacyEndpoint {
            host: self.locator.host().to_string(),
            port: self.locator.port_or_default(),
            username,
            password,
        }
    }

    fn legacy_transfer(&mut self, session: &mut dyn LegacyTransfer) -> DownloadResult<Outcome> {
        if self.file_name.is_none() {
            self.file_name = self.locator.file_name();
        }
        let Some((file, path)) = self.resolve_destination()? else {
            return Ok(Outcome::Cancelled);
        };

        self.set_state(JobState::Fetching);
        let deadline = Deadline::start(self.options.timeout);
        let remote_path = self.locator.decoded_path();
        info!(remote = %remote_path, path = %path.display(), "Fetching over legacy protocol");

        let counters = Arc::new(ProgressCounters::new(1));
        let reporter = self.start_reporter(&counters, 0);
        let mut writer =
            GuardedWriter::new(BufWriter::new(file), &self.signal, deadline, Some(&counters));

        let result = session.retrieve(&remote_path, deadline, &mut writer);
        if result.is_ok() {
            counters.mark_completed();
        }
        if let Some(reporter) = reporter {
            reporter.stop();
        }

        if let Err(e) = result {
            if deadline.is_expired() {
                return Err(DownloadError::Timeout {
                    timeout: deadline.budget(),
                });
            }
            if self.signal.is_cancelled() {
                return Err(self.signal.take_error().unwrap_or(DownloadError::Interrupted));
            }
            return Err(e);
        }

        let bytes = writer.written();
        let mut file = writer
            .into_inner()
            .into_inner()
            .map_err(|e| DownloadError::io(&path, e.into_error()))?;
        file.flush()
            .and_then(|_| file.sync_all())
            .map_err(|e| DownloadError::io(&path, e))?;
        Ok(Outcome::Completed { path, bytes })
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("locator", &self.locator.to_string())
            .field("state", &self.state)
            .field("total_size", &self.total_size)
            .field("supports_range", &self.supports_range)
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Run one worker per span on scoped threads and wait for all of them.
fn join_workers(
    ctx: &FetchContext<'_>,
    spans: &[Span],
    job_span: &TraceSpan,
) -> Vec<WorkerExit> {
    thread::scope(|scope| {
        let handles: Vec<_> = spans
            .iter()
            .enumerate()
            .map(|(index, span)| {
                let worker = ChunkWorker::new(index, *span, ctx);
                let chunk_span = info_span!(parent: job_span, "chunk", index);
                scope.spawn(move || chunk_span.in_scope(|| worker.run()))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    ctx.signal
                        .trip(DownloadError::transport(ctx.label, "worker thread panicked"));
                    WorkerExit::Failed
                })
            })
            .collect()
    })
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Wrap a `deflate` body in a decoder.
///
/// Servers send either raw deflate or zlib-wrapped data under that name; a
/// valid zlib header selects the latter.
fn inflate(body: Box<dyn Read + Send>) -> Box<dyn Read + Send> {
    let mut reader = BufReader::new(body);
    let zlib = match reader.fill_buf() {
        Ok([cmf, flg, ..]) => {
            cmf & 0x0f == 8 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    };
    if zlib {
        Box::new(ZlibDecoder::new(reader))
    } else {
        Box::new(DeflateDecoder::new(reader))
    }
}
