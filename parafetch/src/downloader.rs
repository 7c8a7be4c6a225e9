//! Job factory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::config::DownloadOptions;
use crate::destination::DestinationChooser;
use crate::error::DownloadResult;
use crate::job::{Job, JobParts, Outcome};
use crate::legacy::{FtpConnector, LegacyConnector};
use crate::locator::Locator;
use crate::progress::{Progress, ProgressCallback};
use crate::transport::{ReqwestTransport, Transport};

/// Hook run once on every new job before it is returned.
pub type AfterCreateJob = Box<dyn FnMut(&mut Job) + Send>;

type SharedHook = Arc<Mutex<AfterCreateJob>>;

/// Creates jobs that share collaborators but own their configuration.
///
/// Each job receives a copy of the downloader's options (optionally
/// replaced per job) and the next identifier.
pub struct Downloader {
    options: DownloadOptions,
    last_job_id: AtomicU64,
    transport: Arc<dyn Transport>,
    legacy: Arc<dyn LegacyConnector>,
    chooser: Option<Arc<dyn DestinationChooser>>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    after_create: Mutex<Option<SharedHook>>,
}

impl Downloader {
    /// Create a downloader using the default HTTP and FTP clients.
    pub fn new(options: DownloadOptions) -> DownloadResult<Self> {
        Ok(Self::with_transport(options, ReqwestTransport::new()?))
    }

    /// Create a downloader using a custom transport.
    pub fn with_transport(options: DownloadOptions, transport: impl Transport + 'static) -> Self {
        Self {
            options,
            last_job_id: AtomicU64::new(0),
            transport: Arc::new(transport),
            legacy: Arc::new(FtpConnector),
            chooser: None,
            progress: None,
            cancel: CancellationToken::new(),
            after_create: Mutex::new(None),
        }
    }

    /// Replace the legacy-protocol client.
    pub fn with_legacy(mut self, connector: impl LegacyConnector + 'static) -> Self {
        self.legacy = Arc::new(connector);
        self
    }

    /// Install a destination chooser.
    pub fn with_chooser(mut self, chooser: impl DestinationChooser + 'static) -> Self {
        self.chooser = Some(Arc::new(chooser));
        self
    }

    /// Make every job a child of `token`; cancelling it interrupts them all.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Receive progress snapshots from every job.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Install the post-creation hook, replacing any previous one.
    ///
    /// The hook runs synchronously inside [`Downloader::new_job`], once per
    /// job and never concurrently with itself. It may install a replacement,
    /// which takes effect from the next job. It must not create jobs on this
    /// downloader.
    pub fn after_create_job<F>(&self, hook: F)
    where
        F: FnMut(&mut Job) + Send + 'static,
    {
        let hook: AfterCreateJob = Box::new(hook);
        *self.after_create.lock() = Some(Arc::new(Mutex::new(hook)));
    }

    /// Default options given to new jobs.
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Change the defaults. Jobs already created keep their own copy.
    pub fn set_options(&mut self, options: DownloadOptions) {
        self.options = options;
    }

    /// Token cancelling every job of this downloader.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create a job with the default options.
    pub fn new_job(&self, url: &str) -> DownloadResult<Job> {
        self.new_job_with(url, self.options.clone())
    }

    /// Create a job with its own options.
    pub fn new_job_with(&self, url: &str, options: DownloadOptions) -> DownloadResult<Job> {
        let locator = Locator::parse(url)?;
        let id = self.last_job_id.fetch_add(1, Ordering::SeqCst) + 1;

        let mut job = Job::new(JobParts {
            id,
            locator,
            options,
            transport: Arc::clone(&self.transport),
            legacy: Arc::clone(&self.legacy),
            chooser: self.chooser.clone(),
            progress: self.progress.clone(),
            signal: CancelSignal::child_of(&self.cancel),
        });
        debug!(id, url = %job.locator(), "Job created");

        // Released before the hook runs so the hook can replace itself.
        let hook = self.after_create.lock().clone();
        if let Some(hook) = hook {
            let mut hook = hook.lock();
            (*hook)(&mut job);
        }
        Ok(job)
    }

    /// Create and run a parallel job.
    pub fn download(&self, url: &str) -> DownloadResult<Outcome> {
        self.new_job(url)?.download()
    }

    /// Create and run a single-stream job.
    pub fn download_single(&self, url: &str) -> DownloadResult<Outcome> {
        self.new_job(url)?.download_single()
    }
}
