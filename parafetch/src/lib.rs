//! Parafetch - resumable multi-connection file downloads
//!
//! Given a URL, parafetch asks the server whether it supports byte ranges,
//! splits the file into contiguous ranges, fetches them concurrently and
//! writes each one at its offset in a single destination file.
//!
//! ```no_run
//! use parafetch::{DownloadOptions, Downloader, Outcome};
//!
//! let downloader = Downloader::new(DownloadOptions::default().with_dir("/tmp"))?;
//! match downloader.download("https://example.com/big.iso")? {
//!     Outcome::Completed { path, bytes } => println!("{} bytes -> {}", bytes, path.display()),
//!     Outcome::Cancelled => println!("cancelled"),
//! }
//! # Ok::<(), parafetch::DownloadError>(())
//! ```

pub mod cancel;
pub mod config;
pub mod destination;
pub mod downloader;
pub mod error;
pub mod job;
pub mod legacy;
pub mod locator;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod sink;
pub mod transport;
pub mod worker;

pub use config::{Cookie, DownloadOptions};
pub use destination::{Choice, DestinationChooser};
pub use downloader::Downloader;
pub use error::{DownloadError, DownloadResult};
pub use job::{Job, JobState, Outcome};
pub use locator::Locator;
pub use progress::Progress;
pub use transport::{FetchRequest, FetchResponse, Transport};
