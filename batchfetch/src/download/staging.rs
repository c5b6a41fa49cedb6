//! Temporary-file lifecycle for file destinations.
//!
//! A file destination `<dir>/<name>` is written to `<dir>/<name>.temp`. The
//! temporary file is renamed over the final name only once the transfer is
//! known to be complete and, when requested, its SHA-256 matches.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::tracker::ProgressTracker;
use crate::error::DownloadError;
use crate::fs::FileSystem;

/// Suffix of in-progress files.
pub const TEMP_EXT: &str = ".temp";

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Path of the temporary file for `final_path`.
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut raw = final_path.as_os_str().to_owned();
    raw.push(TEMP_EXT);
    PathBuf::from(raw)
}

/// Split a storage path into directory and file name.
///
/// Fails with [`DownloadError::InvalidUrl`] when the path ends in a separator
/// or has no file name.
pub fn split_storage_path(url: &str, storage_path: &Path) -> Result<(PathBuf, String), DownloadError> {
    let raw = storage_path.to_string_lossy();
    let invalid = || DownloadError::InvalidUrl {
        url: url.to_string(),
    };

    if raw.ends_with('/') || raw.ends_with('\\') {
        return Err(invalid());
    }

    let name = storage_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(invalid)?;
    let directory = storage_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    Ok((directory, name))
}

/// An opened temporary file.
#[derive(Debug)]
pub struct StagedFile {
    /// Write handle.
    pub file: File,
    /// Bytes already present when opened for append; 0 otherwise.
    pub resume_from: u64,
}

/// Create the destination directory and open the temporary file.
///
/// Appends to an existing temporary file when `resume` is set, truncates
/// otherwise.
pub fn open_temp(
    fs: &dyn FileSystem,
    tracker: &ProgressTracker,
    resume: bool,
) -> Result<StagedFile, DownloadError> {
    let dir = &tracker.directory;
    if !dir.as_os_str().is_empty() && !fs.dir_exists(dir) {
        // A failure here surfaces as CreateFileFailed below.
        if let Err(e) = fs.create_dir_all(dir) {
            debug!(directory = %dir.display(), error = %e, "Failed to create directory");
        }
    }

    let temp = temp_path(&tracker.final_path());
    let resume_from = if resume && fs.file_exists(&temp) {
        fs.file_size(&temp).unwrap_or(0)
    } else {
        0
    };

    let file = fs
        .open_write(&temp, resume_from > 0)
        .map_err(|e| DownloadError::create_file(temp.clone(), &e))?;

    debug!(
        correlation_id = %tracker.correlation_id,
        path = %temp.display(),
        resume_from,
        "Opened temporary file"
    );

    Ok(StagedFile { file, resume_from })
}

/// Verify and move a finished temporary file into place.
///
/// On checksum mismatch the temporary file is deleted.
pub fn commit(
    fs: &dyn FileSystem,
    tracker: &ProgressTracker,
    expected_sha256: Option<&str>,
) -> Result<PathBuf, DownloadError> {
    let final_path = tracker.final_path();
    let temp = temp_path(&final_path);

    if let Some(expected) = expected_sha256 {
        if let Err(e) = verify_checksum(&fs.suitable_path(&temp), expected) {
            discard(fs, &temp);
            return Err(e);
        }
    }

    fs.rename(&temp, &final_path)
        .map_err(|e| DownloadError::rename(temp, final_path.clone(), &e))?;
    Ok(final_path)
}

/// Delete a temporary file, logging failures.
pub fn discard(fs: &dyn FileSystem, temp: &Path) {
    if fs.file_exists(temp) {
        if let Err(e) = fs.remove_file(temp) {
            warn!(path = %temp.display(), error = %e, "Failed to remove temporary file");
        }
    }
}

/// Calculate the lowercase hex SHA-256 of a file.
pub fn calculate_file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify that a file matches an expected checksum.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), DownloadError> {
    let filename = path
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .trim_end_matches(TEMP_EXT)
        .to_string();

    let actual = calculate_file_checksum(path).map_err(|e| DownloadError::ChecksumMismatch {
        filename: filename.clone(),
        expected: expected.to_string(),
        actual: format!("<unreadable: {}>", e),
    })?;

    if !actual.eq_ignore_ascii_case(expected) {
        return Err(DownloadError::ChecksumMismatch {
            filename,
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileSystem;
    use std::io::Write;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn tracker_in(dir: &Path, name: &str) -> ProgressTracker {
        ProgressTracker::new("a", "http://x/a", dir.to_path_buf(), name)
    }

    #[test]
    fn test_temp_path() {
        assert_eq!(
            temp_path(Path::new("/tmp/a.bin")),
            PathBuf::from("/tmp/a.bin.temp")
        );
    }

    #[test]
    fn test_split_storage_path() {
        let (dir, name) = split_storage_path("http://x/a", Path::new("/tmp/sub/a.bin")).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/sub"));
        assert_eq!(name, "a.bin");
    }

    #[test]
    fn test_split_storage_path_rejects_directory() {
        let err = split_storage_path("http://x/a", Path::new("/tmp/sub/")).unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { ref url } if url == "http://x/a"));

        assert!(split_storage_path("http://x/a", Path::new("")).is_err());
        assert!(split_storage_path("http://x/a", Path::new("/")).is_err());
    }

    #[test]
    fn test_open_temp_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested").join("deeper");
        let tracker = tracker_in(&dir, "a.bin");

        let staged = open_temp(&LocalFileSystem, &tracker, false).unwrap();
        assert_eq!(staged.resume_from, 0);
        assert!(dir.join("a.bin.temp").is_file());
    }

    #[test]
    fn test_open_temp_resumes_existing() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.bin.temp"), b"hello").unwrap();
        let tracker = tracker_in(temp.path(), "a.bin");

        let mut staged = open_temp(&LocalFileSystem, &tracker, true).unwrap();
        assert_eq!(staged.resume_from, 5);
        staged.file.write_all(b" world").unwrap();
        drop(staged);

        assert_eq!(
            std::fs::read(temp.path().join("a.bin.temp")).unwrap(),
            b"hello world"
        );
    }

    #[test]
    fn test_open_temp_truncates_without_resume() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.bin.temp"), b"stale").unwrap();
        let tracker = tracker_in(temp.path(), "a.bin");

        let staged = open_temp(&LocalFileSystem, &tracker, false).unwrap();
        assert_eq!(staged.resume_from, 0);
        assert_eq!(std::fs::metadata(temp.path().join("a.bin.temp")).unwrap().len(), 0);
    }

    #[test]
    fn test_open_temp_failure_is_create_file() {
        let temp = TempDir::new().unwrap();
        // A regular file where the directory should be.
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let tracker = tracker_in(&blocker, "a.bin");

        let err = open_temp(&LocalFileSystem, &tracker, false).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::CreateFileFailed);
    }

    #[test]
    fn test_commit_renames() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.bin.temp"), b"hello world").unwrap();
        let tracker = tracker_in(temp.path(), "a.bin");

        let path = commit(&LocalFileSystem, &tracker, Some(HELLO_SHA256)).unwrap();
        assert_eq!(path, temp.path().join("a.bin"));
        assert!(!temp.path().join("a.bin.temp").exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn test_commit_checksum_mismatch_discards() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.bin.temp"), b"hello world").unwrap();
        let tracker = tracker_in(temp.path(), "a.bin");

        let err = commit(&LocalFileSystem, &tracker, Some("00ff")).unwrap_err();
        match err {
            DownloadError::ChecksumMismatch { filename, actual, .. } => {
                assert_eq!(filename, "a.bin");
                assert_eq!(actual, HELLO_SHA256);
            }
            other => panic!("expected ChecksumMismatch, got {:?}", other),
        }
        assert!(!temp.path().join("a.bin").exists());
        assert!(!temp.path().join("a.bin.temp").exists());
    }

    #[test]
    fn test_commit_missing_temp_is_rename_error() {
        let temp = TempDir::new().unwrap();
        let tracker = tracker_in(temp.path(), "a.bin");

        let err = commit(&LocalFileSystem, &tracker, None).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::RenameFailed);
    }

    #[test]
    fn test_calculate_empty_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty");
        File::create(&path).unwrap();

        assert_eq!(
            calculate_file_checksum(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
