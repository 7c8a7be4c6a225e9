//! Shared destination file.
//!
//! All workers of a job write through one file handle. A handle has a single
//! cursor, so each seek and the write that follows it must happen under the
//! same lock; locking the write alone would let another worker move the
//! cursor in between.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{DownloadError, DownloadResult};

/// A file handle shared by every worker of one job.
#[derive(Debug)]
pub struct SharedFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl SharedFile {
    /// Wrap an already opened file.
    pub fn new(file: File, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pre-size the file so ranges can be written in any order.
    pub fn allocate(&self, len: u64) -> DownloadResult<()> {
        self.with_write_access(|file| file.set_len(len))
    }

    /// Run `f` with exclusive access to the handle.
    pub fn with_write_access<F, R>(&self, f: F) -> DownloadResult<R>
    where
        F: FnOnce(&mut File) -> io::Result<R>,
    {
        let mut file = self.file.lock();
        f(&mut file).map_err(|e| DownloadError::io(&self.path, e))
    }

    /// Write `buf` at `offset` as one exclusive (seek, write) unit.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> DownloadResult<()> {
        self.with_write_access(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)
        })
    }

    /// Flush and sync to disk, releasing the handle.
    pub fn finish(self) -> DownloadResult<PathBuf> {
        let mut file = self.file.into_inner();
        file.flush()
            .and_then(|_| file.sync_all())
            .map_err(|e| DownloadError::io(&self.path, e))?;
        Ok(self.path)
    }
}
