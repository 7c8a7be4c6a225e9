//! Error types for download jobs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can terminate a download job.
///
/// A job reports exactly one of these (first cause wins). A destination
/// declined by the user is not an error; see [`crate::Outcome::Cancelled`].
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The resource locator could not be parsed or uses an unsupported scheme.
    #[error("invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// The server reported that the resource does not exist.
    #[error("resource not found: {url}")]
    NotFound { url: String },

    /// The server (or legacy host) refused access.
    #[error("access denied: {url}")]
    Unauthorized { url: String },

    /// Connectivity failure or unsuccessful status.
    #[error("transfer from {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// A ranged request was answered with something other than partial content.
    #[error("server ignored range {start}-{end} of {url} (status {status})")]
    RangeNotHonored {
        url: String,
        start: u64,
        end: u64,
        status: u16,
    },

    /// Local filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The resolved file name has no extension separator.
    #[error("invalid file name: '{0}'")]
    InvalidFileName(String),

    /// The job deadline elapsed before the transfer finished.
    #[error("download timed out after {}s", timeout.as_secs_f64())]
    Timeout { timeout: std::time::Duration },

    /// The transfer was aborted from outside the job (e.g. Ctrl-C).
    #[error("download interrupted")]
    Interrupted,

    /// The job already reached a terminal state.
    #[error("job {id} has already run")]
    JobFinished { id: u64 },

    /// Configuration file problem.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DownloadError {
    /// Build an [`DownloadError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a [`DownloadError::Transport`] from anything displayable.
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a chunk worker may spend another attempt on this error.
    ///
    /// Deadline expiry and interruption are final, as is a bad file name.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Unauthorized { .. }
                | Self::Transport { .. }
                | Self::RangeNotHonored { .. }
                | Self::Io { .. }
        )
    }
}
