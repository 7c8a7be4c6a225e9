//! Destination resolution.
//!
//! Computes where a job writes, optionally lets an injected chooser change
//! it, validates the file name, and creates the file without clobbering an
//! existing one unless overwriting was requested.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DownloadError, DownloadResult};

/// Answer from a [`DestinationChooser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    /// Save to this path.
    Accepted(PathBuf),
    /// The user declined; the job ends as cancelled.
    Declined,
}

/// Interactive (or scripted) choice of the save location.
///
/// Called at most once per job, after the probe and before any payload
/// request, with the path the job would use on its own.
pub trait DestinationChooser: Send + Sync {
    fn choose(&self, suggested: &Path) -> Choice;
}

impl<F> DestinationChooser for F
where
    F: Fn(&Path) -> Choice + Send + Sync,
{
    fn choose(&self, suggested: &Path) -> Choice {
        self(suggested)
    }
}

/// Path a file name resolves to.
///
/// Absolute names are used as-is; relative ones go in `dir` behind `prefix`.
pub fn target_path(dir: &Path, prefix: &str, file_name: &str) -> PathBuf {
    let name = Path::new(file_name);
    if name.is_absolute() {
        return name.to_path_buf();
    }
    dir.join(format!("{}{}", prefix, file_name))
}

/// A file name is usable when it is non-empty and has an extension separator.
pub fn validate_file_name(file_name: &str) -> DownloadResult<()> {
    let last = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if last.is_empty() || !last.contains('.') {
        return Err(DownloadError::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

/// Name for the `index`-th collision candidate: `base(index).ext`.
///
/// The extension is everything from the last `.` of the name.
pub fn indexed_name(file_name: &str, index: u32) -> String {
    match file_name.rfind('.') {
        Some(dot) => format!("{}({}){}", &file_name[..dot], index, &file_name[dot..]),
        None => format!("{}({})", file_name, index),
    }
}

/// Create the destination file.
///
/// With `overwrite`, an existing file is truncated. Otherwise the first free
/// name among `path`, `base(1).ext`, `base(2).ext`, ... is claimed with an
/// exclusive create, so a name taken in the meantime is skipped. Returns the
/// open file and the path actually used.
pub fn create_destination(path: &Path, overwrite: bool) -> DownloadResult<(File, PathBuf)> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| DownloadError::io(parent, e))?;
        }
    }

    if overwrite {
        let file = open_rw(path, true).map_err(|e| DownloadError::io(path, e))?;
        return Ok((file, path.to_path_buf()));
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DownloadError::InvalidFileName(path.display().to_string()))?;

    let mut candidate = path.to_path_buf();
    let mut index = 0u32;
    loop {
        match open_rw(&candidate, false) {
            Ok(file) => {
                if index > 0 {
                    debug!(
                        requested = %path.display(),
                        used = %candidate.display(),
                        "Destination existed, using next free name"
                    );
                }
                return Ok((file, candidate));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                index = index
                    .checked_add(1)
                    .ok_or_else(|| DownloadError::io(path, e))?;
                candidate = path.with_file_name(indexed_name(file_name, index));
            }
            Err(e) => return Err(DownloadError::io(&candidate, e)),
        }
    }
}

fn open_rw(path: &Path, truncate: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    if truncate {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_target_path() {
        assert_eq!(
            target_path(Path::new("/data"), "x-", "a.bin"),
            PathBuf::from("/data/x-a.bin")
        );
        assert_eq!(
            target_path(Path::new("/data"), "x-", "/elsewhere/a.bin"),
            PathBuf::from("/elsewhere/a.bin")
        );
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("a.bin").is_ok());
        assert!(validate_file_name("/tmp/dir/a.tar.gz").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name("README").is_err());
        assert!(validate_file_name("/tmp/v1.2/README").is_err());
    }

    #[test]
    fn test_indexed_name() {
        assert_eq!(indexed_name("a.bin", 1), "a(1).bin");
        assert_eq!(indexed_name("a.tar.gz", 2), "a.tar(2).gz");
        assert_eq!(indexed_name("noext", 3), "noext(3)");
    }

    #[test]
    fn test_create_fresh() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sub").join("a.bin");
        let (_file, used) = create_destination(&path, false).unwrap();
        assert_eq!(used, path);
        assert!(path.exists());
    }

    #[test]
    fn test_collision_picks_first_free_index() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        std::fs::write(&path, b"old").unwrap();
        std::fs::write(temp.path().join("a(1).bin"), b"old").unwrap();

        let (_file, used) = create_destination(&path, false).unwrap();
        assert_eq!(used, temp.path().join("a(2).bin"));
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
    }

    #[test]
    fn test_overwrite_truncates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.bin");
        std::fs::write(&path, b"old contents").unwrap();

        let (_file, used) = create_destination(&path, true).unwrap();
        assert_eq!(used, path);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_closure_chooser() {
        let chooser = |p: &Path| Choice::Accepted(p.with_extension("iso"));
        assert_eq!(
            chooser.choose(Path::new("/d/a.bin")),
            Choice::Accepted(PathBuf::from("/d/a.iso"))
        );
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn collisions_never_reuse_an_index(
                taken in proptest::collection::btree_set(1u32..8, 0..6),
            ) {
                let temp = TempDir::new().unwrap();
                let path = temp.path().join("file.dat");
                std::fs::write(&path, b"x").unwrap();
                for i in &taken {
                    std::fs::write(temp.path().join(indexed_name("file.dat", *i)), b"x").unwrap();
                }

                let (_file, used) = create_destination(&path, false).unwrap();
                let expected = (1u32..).find(|i| !taken.contains(i)).unwrap();
                prop_assert_eq!(used, temp.path().join(indexed_name("file.dat", expected)));
            }
        }
    }
}
