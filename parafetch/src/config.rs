//! Download options and the on-disk configuration file.
//!
//! [`DownloadOptions`] is the immutable per-job configuration value. Each job
//! captures its own copy when it is created, so changing a downloader's
//! defaults never affects a job that already exists.
//!
//! [`ConfigFile`] is the user's INI file (`~/.config/parafetch/config.ini`
//! on Linux). Values found there overlay the built-in defaults; command-line
//! flags overlay both.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;

use crate::error::{DownloadError, DownloadResult};

/// Default maximum number of parallel workers per job.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default minimum chunk size (500 KiB).
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 500 * 1024;

/// Default total transfer timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Section holding all download settings in the config file.
const DOWNLOAD_SECTION: &str = "download";

/// A cookie sent with every request of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Render a list of cookies as a single `Cookie` header value.
    pub fn header_value(cookies: &[Cookie]) -> Option<String> {
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl FromStr for Cookie {
    type Err = String;

    /// Parse `NAME=VALUE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| format!("cookie '{}' is not in NAME=VALUE form", s))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("cookie '{}' has an empty name", s));
        }
        Ok(Self::new(name, value.trim()))
    }
}

/// Configuration captured by each job.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOptions {
    /// Directory the file is saved into.
    pub dir: PathBuf,

    /// Prefix prepended to the resolved file name.
    pub file_name_prefix: String,

    /// Upper bound on parallel workers.
    pub max_workers: usize,

    /// Smallest range a worker is given.
    pub min_chunk_size: u64,

    /// Replace an existing file instead of picking `name(N).ext`.
    pub overwrite: bool,

    /// Ask the destination chooser (if one is installed) before fetching.
    pub confirm_destination: bool,

    /// Cookies sent with every request.
    pub cookies: Vec<Cookie>,

    /// Budget for the whole transfer.
    pub timeout: Duration,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            dir: std::env::current_dir().unwrap_or_default(),
            file_name_prefix: String::new(),
            max_workers: DEFAULT_MAX_WORKERS,
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            overwrite: false,
            confirm_destination: true,
            cookies: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl DownloadOptions {
    /// Set the destination directory.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the file name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_name_prefix = prefix.into();
        self
    }

    /// Set the worker ceiling.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Set the minimum chunk size in bytes.
    pub fn with_min_chunk_size(mut self, bytes: u64) -> Self {
        self.min_chunk_size = bytes;
        self
    }

    /// Set whether existing files are overwritten.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set whether the destination chooser is consulted.
    pub fn with_confirm_destination(mut self, confirm: bool) -> Self {
        self.confirm_destination = confirm;
        self
    }

    /// Add a cookie.
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Set the total transfer timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Get the default configuration file path.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parafetch")
        .join("config.ini")
}

/// Values read from the configuration file. Unset keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub threads: Option<usize>,
    pub min_chunk_size: Option<u64>,
    pub overwrite: Option<bool>,
    pub timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> DownloadResult<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load from a specific path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> DownloadResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| {
            DownloadError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::default();
        if let Some(section) = ini.section(Some(DOWNLOAD_SECTION)) {
            for key in ConfigKey::all() {
                if let Some(value) = section.get(key.key_name()) {
                    key.set(&mut config, value)?;
                }
            }
        }
        Ok(config)
    }

    /// Save to the default location.
    pub fn save(&self) -> DownloadResult<()> {
        self.save_to(&config_file_path())
    }

    /// Save to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> DownloadResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DownloadError::io(parent, e))?;
            }
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(DOWNLOAD_SECTION))
                    .set(key.key_name(), value);
            }
        }
        ini.write_to_file(path).map_err(|e| DownloadError::io(path, e))
    }

    /// Overlay the file's values onto `options`.
    pub fn apply(&self, mut options: DownloadOptions) -> DownloadOptions {
        if let Some(dir) = &self.dir {
            options.dir = dir.clone();
        }
        if let Some(prefix) = &self.prefix {
            options.file_name_prefix = prefix.clone();
        }
        if let Some(threads) = self.threads {
            options.max_workers = threads;
        }
        if let Some(size) = self.min_chunk_size {
            options.min_chunk_size = size;
        }
        if let Some(overwrite) = self.overwrite {
            options.overwrite = overwrite;
        }
        if let Some(secs) = self.timeout_secs {
            options.timeout = Duration::from_secs(secs);
        }
        options
    }
}

/// Settable configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Dir,
    Prefix,
    Threads,
    MinChunkSize,
    Overwrite,
    TimeoutSecs,
}

impl ConfigKey {
    /// Every key, in display order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            Self::Dir,
            Self::Prefix,
            Self::Threads,
            Self::MinChunkSize,
            Self::Overwrite,
            Self::TimeoutSecs,
        ]
    }

    /// INI section the key lives in.
    pub fn section(&self) -> &'static str {
        DOWNLOAD_SECTION
    }

    /// Key name inside its section.
    pub fn key_name(&self) -> &'static str {
        match self {
            Self::Dir => "dir",
            Self::Prefix => "prefix",
            Self::Threads => "threads",
            Self::MinChunkSize => "min_chunk_size",
            Self::Overwrite => "overwrite",
            Self::TimeoutSecs => "timeout_secs",
        }
    }

    /// Fully qualified `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value as a string; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            Self::Dir => config
                .dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_default(),
            Self::Prefix => config.prefix.clone().unwrap_or_default(),
            Self::Threads => opt_to_string(config.threads),
            Self::MinChunkSize => opt_to_string(config.min_chunk_size),
            Self::Overwrite => opt_to_string(config.overwrite),
            Self::TimeoutSecs => opt_to_string(config.timeout_secs),
        }
    }

    /// Parse and store a value. An empty string unsets the key.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> DownloadResult<()> {
        let value = value.trim();
        let invalid = |expected: &str| {
            DownloadError::Config(format!(
                "invalid value '{}' for {}: expected {}",
                value,
                self.name(),
                expected
            ))
        };
        let empty = value.is_empty();

        match self {
            Self::Dir => config.dir = (!empty).then(|| PathBuf::from(value)),
            Self::Prefix => config.prefix = (!empty).then(|| value.to_string()),
            Self::Threads => {
                config.threads = if empty {
                    None
                } else {
                    match value.parse::<usize>() {
                        Ok(n) if n >= 1 => Some(n),
                        _ => return Err(invalid("a positive integer")),
                    }
                }
            }
            Self::MinChunkSize => {
                config.min_chunk_size = if empty {
                    None
                } else {
                    Some(parse_size(value).ok_or_else(|| invalid("a size like 512K or 4M"))?)
                }
            }
            Self::Overwrite => {
                config.overwrite = if empty {
                    None
                } else {
                    Some(parse_bool(value).ok_or_else(|| invalid("true or false"))?)
                }
            }
            Self::TimeoutSecs => {
                config.timeout_secs = if empty {
                    None
                } else {
                    Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| invalid("a number of seconds"))?,
                    )
                }
            }
        }
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = String;

    /// Accepts `section.key` or the bare key name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.strip_prefix("download.").unwrap_or(s);
        Self::all()
            .iter()
            .copied()
            .find(|k| k.key_name() == key)
            .ok_or_else(|| format!("unknown configuration key '{}'", s))
    }
}

fn opt_to_string<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a byte size such as `1048576`, `512K`, `4M`, `1G` or `4MiB`.
///
/// Suffixes are binary (K = 1024).
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let digits_end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(digits_end);
    let number: u64 = number.parse().ok()?;

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(multiplier)
}
