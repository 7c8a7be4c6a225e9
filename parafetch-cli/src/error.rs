//! CLI error types.

use std::fmt;

use parafetch::DownloadError;

/// Errors reported by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid configuration or arguments.
    Config(String),

    /// Error from the download library.
    Download(DownloadError),

    /// Some of several downloads failed.
    Failed { failed: usize, total: usize },

    /// The user pressed Ctrl-C.
    Interrupted,
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Interrupted => 130,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Download(e) => write!(f, "{}", e),
            CliError::Failed { failed, total } => {
                write!(f, "{} of {} downloads failed", failed, total)
            }
            CliError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Download(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::Interrupted => CliError::Interrupted,
            DownloadError::Config(msg) => CliError::Config(msg),
            other => CliError::Download(other),
        }
    }
}
