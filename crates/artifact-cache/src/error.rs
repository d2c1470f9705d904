//! Error types for artifact production and caching.
//!
//! A failed decode is handed to every caller waiting on the same fingerprint,
//! so [`ArtifactError`] is `Clone` and carries I/O failures as kind + message.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Coarse classification recorded in job results and used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    UnsupportedFormat,
    DecodeError,
    CapacityExceeded,
    ModelUnavailable,
    WriteError,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::UnsupportedFormat => "unsupported format",
            ErrorKind::DecodeError => "decode error",
            ErrorKind::CapacityExceeded => "capacity exceeded",
            ErrorKind::ModelUnavailable => "model unavailable",
            ErrorKind::WriteError => "write error",
            ErrorKind::Io => "i/o error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone)]
pub enum ArtifactError {
    /// Source file missing when it was fingerprinted or decoded
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported format for {}: {format}", .path.display())]
    UnsupportedFormat { path: PathBuf, format: String },

    /// Corrupt or unreadable content
    #[error("Decode error for {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },

    /// Payload larger than the whole cache; the artifact is still usable
    #[error("Payload of {size} bytes exceeds cache capacity of {capacity} bytes")]
    CapacityExceeded { size: u64, capacity: u64 },

    /// Writing ratings, labels or orientation into a source file failed
    #[error("Write error for {}: {message}", .path.display())]
    Write { path: PathBuf, message: String },

    #[error("Cache I/O error ({kind:?}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },

    #[error("Cache index error: {0}")]
    Index(String),
}

impl ArtifactError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArtifactError::NotFound(_) => ErrorKind::NotFound,
            ArtifactError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ArtifactError::Decode { .. } => ErrorKind::DecodeError,
            ArtifactError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            ArtifactError::Write { .. } => ErrorKind::WriteError,
            ArtifactError::Io { .. } | ArtifactError::Index(_) => ErrorKind::Io,
        }
    }

    pub fn decode(path: &Path, message: impl Into<String>) -> Self {
        ArtifactError::Decode {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn write(path: &Path, message: impl Into<String>) -> Self {
        ArtifactError::Write {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Map an I/O failure while reading a source file, keeping `NotFound` distinct.
    pub fn from_source_io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ArtifactError::NotFound(path.to_path_buf())
        } else {
            ArtifactError::decode(path, err.to_string())
        }
    }
}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(err: serde_json::Error) -> Self {
        ArtifactError::Index(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_io_not_found_maps_to_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let mapped = ArtifactError::from_source_io(Path::new("/photos/a.jpg"), err);
        assert_eq!(mapped.kind(), ErrorKind::NotFound);

        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
        let mapped = ArtifactError::from_source_io(Path::new("/photos/a.jpg"), err);
        assert_eq!(mapped.kind(), ErrorKind::DecodeError);
    }

    #[test]
    fn test_error_messages_include_path() {
        let err = ArtifactError::decode(Path::new("/photos/a.nef"), "truncated");
        assert_eq!(err.to_string(), "Decode error for /photos/a.nef: truncated");
    }
}
