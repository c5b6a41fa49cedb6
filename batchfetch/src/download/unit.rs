//! Download requests.

use std::collections::HashSet;
use std::path::PathBuf;

use super::buffer::SharedBuffer;
use crate::error::{DownloaderError, DownloaderResult};

/// Where the bytes of a unit go.
#[derive(Debug, Clone)]
pub enum Destination {
    /// A file path; written to `<path>.temp` first.
    File(PathBuf),
    /// A caller-owned memory buffer.
    Buffer(SharedBuffer),
}

impl Destination {
    /// The file path, if this is a file destination.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::File(path) => Some(path),
            Self::Buffer(_) => None,
        }
    }
}

/// One requested transfer.
#[derive(Debug, Clone)]
pub struct DownloadUnit {
    /// Source URL.
    pub source_url: String,
    /// Destination of the bytes.
    pub destination: Destination,
    /// Caller correlation id.
    pub correlation_id: String,
    /// Continue an existing `.temp` file when the server allows it.
    pub resume_requested: bool,
    /// Expected SHA-256 of the content (lowercase hex).
    pub expected_sha256: Option<String>,
}

impl DownloadUnit {
    /// Create a unit writing to a file.
    pub fn to_file(
        source_url: impl Into<String>,
        storage_path: impl Into<PathBuf>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            destination: Destination::File(storage_path.into()),
            correlation_id: correlation_id.into(),
            resume_requested: false,
            expected_sha256: None,
        }
    }

    /// Create a unit writing to a memory buffer.
    pub fn to_buffer(
        source_url: impl Into<String>,
        buffer: SharedBuffer,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            destination: Destination::Buffer(buffer),
            correlation_id: correlation_id.into(),
            resume_requested: false,
            expected_sha256: None,
        }
    }

    /// Request resuming from an existing temporary file.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume_requested = resume;
        self
    }

    /// Verify the content against a SHA-256 digest before renaming.
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }
}

/// Ordered batch of units with unique correlation ids.
#[derive(Debug, Clone, Default)]
pub struct DownloadUnits {
    units: Vec<DownloadUnit>,
    ids: HashSet<String>,
}

impl DownloadUnits {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a batch from units in order.
    pub fn try_from_units(units: impl IntoIterator<Item = DownloadUnit>) -> DownloaderResult<Self> {
        let mut batch = Self::new();
        for unit in units {
            batch.push(unit)?;
        }
        Ok(batch)
    }

    /// Append a unit.
    ///
    /// Fails with [`DownloaderError::DuplicateCorrelationId`] when the id is
    /// already present, and [`DownloaderError::BufferInBatch`] for buffer
    /// destinations.
    pub fn push(&mut self, unit: DownloadUnit) -> DownloaderResult<()> {
        if let Destination::Buffer(_) = unit.destination {
            return Err(DownloaderError::BufferInBatch(unit.correlation_id));
        }
        if !self.ids.insert(unit.correlation_id.clone()) {
            return Err(DownloaderError::DuplicateCorrelationId(unit.correlation_id));
        }
        self.units.push(unit);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn first(&self) -> Option<&DownloadUnit> {
        self.units.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DownloadUnit> {
        self.units.iter()
    }

    pub(crate) fn as_slice(&self) -> &[DownloadUnit] {
        &self.units
    }
}

impl<'a> IntoIterator for &'a DownloadUnits {
    type Item = &'a DownloadUnit;
    type IntoIter = std::slice::Iter<'a, DownloadUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_builders() {
        let unit = DownloadUnit::to_file("http://x/a.bin", "/tmp/a.bin", "a")
            .with_resume(true)
            .with_sha256("ABCDEF");

        assert!(unit.resume_requested);
        assert_eq!(unit.expected_sha256.as_deref(), Some("abcdef"));
        assert_eq!(unit.destination.path(), Some(&PathBuf::from("/tmp/a.bin")));
    }

    #[test]
    fn test_units_keep_order() {
        let units = DownloadUnits::try_from_units(vec![
            DownloadUnit::to_file("http://x/c", "/tmp/c", "c"),
            DownloadUnit::to_file("http://x/a", "/tmp/a", "a"),
            DownloadUnit::to_file("http://x/b", "/tmp/b", "b"),
        ])
        .unwrap();

        let ids: Vec<_> = units.iter().map(|u| u.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(units.first().unwrap().correlation_id, "c");
        assert_eq!(units.len(), 3);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = DownloadUnits::try_from_units(vec![
            DownloadUnit::to_file("http://x/a", "/tmp/a", "a"),
            DownloadUnit::to_file("http://x/b", "/tmp/b", "a"),
        ]);

        match result {
            Err(DownloaderError::DuplicateCorrelationId(id)) => assert_eq!(id, "a"),
            other => panic!("expected DuplicateCorrelationId, got {:?}", other),
        }
    }

    #[test]
    fn test_buffer_destination_rejected() {
        let mut units = DownloadUnits::new();
        let result = units.push(DownloadUnit::to_buffer(
            "http://x/a",
            SharedBuffer::with_capacity(16),
            "a",
        ));

        assert!(matches!(result, Err(DownloaderError::BufferInBatch(_))));
        assert!(units.is_empty());
    }
}
