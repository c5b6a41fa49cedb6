//! Batch manifest parsing.
//!
//! One unit per line:
//!
//! ```text
//! # id    url                               destination        options
//! tiles   https://example.com/tiles.zip     data/tiles.zip     resume
//! index   https://example.com/index.json    data/index.json    sha256=9f86d0...
//! ```
//!
//! Relative destinations are resolved against the manifest's directory.
//! Blank lines and lines starting with `#` are ignored.

use std::fmt;
use std::path::Path;

use batchfetch::{DownloadUnit, DownloadUnits};

use crate::error::CliError;

/// A malformed manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestError {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ManifestError {}

/// Read and parse a manifest file.
pub fn load(path: &Path) -> Result<DownloadUnits, CliError> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(parse(&content, base)?)
}

/// Parse manifest text.
pub fn parse(content: &str, base_dir: &Path) -> Result<DownloadUnits, ManifestError> {
    let mut units = DownloadUnits::new();

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let error = |message: String| ManifestError { line, message };
        let mut fields = trimmed.split_whitespace();
        let (Some(id), Some(url), Some(dest)) = (fields.next(), fields.next(), fields.next()) else {
            return Err(error("expected: <id> <url> <destination> [resume] [sha256=HEX]".to_string()));
        };

        let mut unit = DownloadUnit::to_file(url, base_dir.join(dest), id);
        for option in fields {
            if option == "resume" {
                unit = unit.with_resume(true);
            } else if let Some(digest) = option.strip_prefix("sha256=") {
                if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(error(format!("invalid sha256 digest '{}'", digest)));
                }
                unit = unit.with_sha256(digest);
            } else {
                return Err(error(format!("unknown option '{}'", option)));
            }
        }

        units.push(unit).map_err(|e| error(e.to_string()))?;
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const DIGEST: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_parse_manifest() {
        let content = format!(
            "# assets\n\
             \n\
             a  http://host/a.bin  a.bin\n\
             b  http://host/b.bin  /abs/b.bin  resume\n\
             c  http://host/c.bin  sub/c.bin   resume sha256={}\n",
            DIGEST
        );

        let units = parse(&content, Path::new("/data")).unwrap();
        let units: Vec<_> = units.iter().collect();
        assert_eq!(units.len(), 3);

        assert_eq!(units[0].correlation_id, "a");
        assert_eq!(units[0].destination.path(), Some(&PathBuf::from("/data/a.bin")));
        assert!(!units[0].resume_requested);

        assert_eq!(units[1].destination.path(), Some(&PathBuf::from("/abs/b.bin")));
        assert!(units[1].resume_requested);

        assert_eq!(units[2].expected_sha256.as_deref(), Some(DIGEST));
        assert_eq!(units[2].source_url, "http://host/c.bin");
    }

    #[test]
    fn test_missing_fields() {
        let err = parse("a http://host/a.bin\n", Path::new("/data")).unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_unknown_option() {
        let err = parse("# x\na http://host/a a.bin fast\n", Path::new("/data")).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("fast"));
    }

    #[test]
    fn test_bad_digest() {
        let err = parse("a http://host/a a.bin sha256=xyz\n", Path::new("/data")).unwrap_err();
        assert!(err.message.contains("sha256"));
    }

    #[test]
    fn test_duplicate_id() {
        let content = "a http://host/a a.bin\na http://host/b b.bin\n";
        let err = parse(content, Path::new("/data")).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn test_load_resolves_against_manifest_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("assets.txt");
        std::fs::write(&path, "a http://host/a.bin out/a.bin\n").unwrap();

        let units = load(&path).unwrap();
        assert_eq!(
            units.first().unwrap().destination.path(),
            Some(&temp.path().join("out/a.bin"))
        );
    }

    #[test]
    fn test_load_missing_file() {
        let result = load(Path::new("/nonexistent/manifest.txt"));
        assert!(matches!(result, Err(CliError::ManifestRead { .. })));
    }
}
