// src/error.rs
use std::fmt;
use std::io;
use thiserror::Error;

/// What was wrong with a record that failed structural validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// The guard word directly after the generic header did not match.
    LeadingGuard,
    /// The guard word closing the record did not match.
    TrailingGuard,
    /// Bearing/range counts or payload length are negative or absurd.
    Geometry,
    /// Decoded values fall outside physically plausible bounds.
    Implausible,
    /// A record type/version pair the format does not define.
    UnknownType,
}

impl fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CorruptionKind::LeadingGuard => "leading guard",
            CorruptionKind::TrailingGuard => "trailing guard",
            CorruptionKind::Geometry => "geometry",
            CorruptionKind::Implausible => "implausible values",
            CorruptionKind::UnknownType => "unknown record type",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum SonarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Container structure error at offset {offset}: {reason}")]
    ContainerStructure { offset: u64, reason: String },

    #[error("Unsupported chunk compression scheme {scheme} at offset {offset}")]
    UnsupportedCompression { scheme: u8, offset: u64 },

    #[error("Corrupt record at position {position} ({kind}): {detail}")]
    RecordCorruption {
        position: u64,
        kind: CorruptionKind,
        detail: String,
    },

    #[error("Stale index for {path}: {reason}")]
    StaleIndex { path: String, reason: String },

    #[error("Sidecar format error: {0}")]
    Sidecar(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Unsupported archive type: {0}")]
    UnsupportedArchive(String),

    #[error("Record index {index} out of range ({count} records)")]
    RecordOutOfRange { index: usize, count: usize },

    #[error("Payload decompression failed: {0}")]
    Decompression(String),

    #[error("Background catalog task failed: {0}")]
    TaskFailed(String),
}

impl SonarError {
    pub(crate) fn structure(offset: u64, reason: impl Into<String>) -> Self {
        SonarError::ContainerStructure {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(position: u64, kind: CorruptionKind, detail: impl Into<String>) -> Self {
        SonarError::RecordCorruption {
            position,
            kind,
            detail: detail.into(),
        }
    }

    /// True when this error, or an `io::Error` wrapping it, reports an index
    /// that no longer matches the file on disk.
    pub fn is_stale_index(&self) -> bool {
        match self {
            SonarError::StaleIndex { .. } => true,
            SonarError::Io(e) => e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<SonarError>())
                .map_or(false, SonarError::is_stale_index),
            _ => false,
        }
    }

    /// True for errors that mean the container cannot be indexed for fast
    /// access, so readers should fall back to sequential extraction.
    pub fn is_container_structure(&self) -> bool {
        matches!(
            self,
            SonarError::ContainerStructure { .. } | SonarError::UnsupportedCompression { .. }
        )
    }

    /// Corruption details, when this is a record corruption error.
    pub fn corruption_kind(&self) -> Option<CorruptionKind> {
        match self {
            SonarError::RecordCorruption { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<SonarError> for io::Error {
    fn from(err: SonarError) -> Self {
        match err {
            SonarError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SonarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_index_survives_io_wrapping() {
        let stale = SonarError::StaleIndex {
            path: "a.glf".into(),
            reason: "chunk length".into(),
        };
        let wrapped: io::Error = stale.into();
        let back = SonarError::from(wrapped);
        assert!(back.is_stale_index());

        let plain = SonarError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(!plain.is_stale_index());
    }

    #[test]
    fn test_structure_classification() {
        assert!(SonarError::structure(4, "bad sig").is_container_structure());
        assert!(SonarError::UnsupportedCompression { scheme: 1, offset: 0 }.is_container_structure());
        assert!(!SonarError::Sidecar("x".into()).is_container_structure());
    }

    #[test]
    fn test_corruption_kind() {
        let err = SonarError::corrupt(10, CorruptionKind::TrailingGuard, "0x1234");
        assert_eq!(err.corruption_kind(), Some(CorruptionKind::TrailingGuard));
        assert!(err.to_string().contains("trailing guard"));
    }
}
