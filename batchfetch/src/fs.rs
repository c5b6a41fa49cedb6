//! Filesystem collaborator.
//!
//! The downloader only needs a handful of operations on the local disk. They
//! are gathered behind [`FileSystem`] so tests and embedders can substitute
//! their own layout rules (sandboxed roots, virtual prefixes, ...).

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Filesystem operations used by the downloader.
pub trait FileSystem: Send + Sync {
    /// Whether a regular file exists at `path`.
    fn file_exists(&self, path: &Path) -> bool;

    /// Whether a directory exists at `path`.
    fn dir_exists(&self, path: &Path) -> bool;

    /// Create `path` and all missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Move `from` to `to`, replacing `to` if it exists.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Delete the file at `path`.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Size of the file at `path` in bytes.
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Open `path` for writing; appends when `append` is set, truncates otherwise.
    fn open_write(&self, path: &Path, append: bool) -> io::Result<File>;

    /// Normalize `path` into the form handed to the OS when opening.
    fn suitable_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Create a new local filesystem.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        // Windows refuses to rename over an existing file.
        #[cfg(windows)]
        if to.is_file() {
            fs::remove_file(to)?;
        }
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|m| m.len())
    }

    fn open_write(&self, path: &Path, append: bool) -> io::Result<File> {
        let path = self.suitable_path(path);
        if append {
            OpenOptions::new().create(true).append(true).open(path)
        } else {
            File::create(path)
        }
    }

    fn suitable_path(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            if let Ok(cwd) = std::env::current_dir() {
                return cwd.join(path);
            }
        }
        path.to_path_buf()
    }
}
