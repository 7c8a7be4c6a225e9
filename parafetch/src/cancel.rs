//! Job-wide cancellation and deadline.
//!
//! [`CancelSignal`] is tripped at most once per job. The first tripper's
//! error is kept; later trips are ignored. Tripping broadcasts through a
//! [`CancellationToken`], which may itself be a child of a downloader-wide
//! token so that external cancellation (Ctrl-C) reaches every worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;

/// Shared trip-once cancellation flag for one job.
#[derive(Debug)]
pub struct CancelSignal {
    tripped: AtomicBool,
    first_error: Mutex<Option<DownloadError>>,
    token: CancellationToken,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    /// A standalone signal.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A signal that also fires when `parent` is cancelled.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            tripped: AtomicBool::new(false),
            first_error: Mutex::new(None),
            token,
        }
    }

    /// Record `error` and cancel all observers.
    ///
    /// Returns `true` only for the call that actually tripped the signal.
    pub fn trip(&self, error: DownloadError) -> bool {
        if self
            .tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.first_error.lock() = Some(error);
        self.token.cancel();
        true
    }

    /// Whether workers should stop, for any reason.
    pub fn is_cancelled(&self) -> bool {
        self.tripped.load(Ordering::Acquire) || self.token.is_cancelled()
    }

    /// Take the recorded error.
    ///
    /// Cancellation from outside the job, with no recorded error, yields
    /// [`DownloadError::Interrupted`]. `None` when nothing was cancelled.
    pub fn take_error(&self) -> Option<DownloadError> {
        if let Some(err) = self.first_error.lock().take() {
            return Some(err);
        }
        self.is_cancelled().then_some(DownloadError::Interrupted)
    }

    /// The underlying broadcast token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// A fixed budget measured from a start instant.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start the clock now.
    pub fn start(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// `Err(Timeout)` once the budget is spent.
    pub fn check(&self) -> Result<(), DownloadError> {
        if self.is_expired() {
            Err(DownloadError::Timeout {
                timeout: self.budget,
            })
        } else {
            Ok(())
        }
    }
}
