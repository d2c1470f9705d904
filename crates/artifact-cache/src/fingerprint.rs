//! Stable identities for "this file, these parameters, at this point in time".
//!
//! A fingerprint is derived from `stat` alone: absolute path, size and
//! modification time stand in for file content, which is never read.

use crate::{ArtifactKind, DecodeParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Size and mtime of a source file as observed when fingerprinting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStamp {
    pub file_size: u64,
    /// Nanoseconds since the Unix epoch
    pub modified_ns: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    path: PathBuf,
    kind: ArtifactKind,
    params_hash: u64,
    /// `None` when the file could not be stat'ed
    stamp: Option<FileStamp>,
}

/// Compact cache key: 32 hex chars of a SHA-256 over the fingerprint fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintKey(String);

impl FingerprintKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild a key read back from a persisted index; rejects anything that
    /// could not have come from [`Fingerprint::key`].
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == 32 && raw.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| FingerprintKey(raw.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Fingerprint {
    /// Fingerprint `path` for an artifact of `kind` built with `params`.
    ///
    /// Never fails: a file that cannot be stat'ed yields a fingerprint without
    /// a [`key`](Self::key), which matches no cache entry.
    pub fn compute(path: &Path, kind: ArtifactKind, params: &DecodeParams) -> Self {
        let path = absolutize(path);
        let stamp = fs::metadata(&path).ok().filter(|m| m.is_file()).map(|metadata| {
            let modified_ns = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            FileStamp {
                file_size: metadata.len(),
                modified_ns,
            }
        });

        Self {
            path,
            kind,
            params_hash: params.params_hash(),
            stamp,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn params_hash(&self) -> u64 {
        self.params_hash
    }

    pub fn stamp(&self) -> Option<FileStamp> {
        self.stamp
    }

    /// Whether the source could be stat'ed; unresolved fingerprints always decode fresh.
    pub fn is_resolved(&self) -> bool {
        self.stamp.is_some()
    }

    pub fn key(&self) -> Option<FingerprintKey> {
        let stamp = self.stamp?;

        let mut hasher = Sha256::new();
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(stamp.file_size.to_le_bytes());
        hasher.update(stamp.modified_ns.to_le_bytes());
        hasher.update([self.kind.tag()]);
        hasher.update(self.params_hash.to_le_bytes());

        let result = hasher.finalize();
        Some(FingerprintKey(hex::encode(&result[..16])))
    }
}

/// Absolute, symlink-resolved form of `path` when it exists; otherwise the
/// path joined onto the working directory.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn test_fingerprint_is_deterministic() -> Result<()> {
        let temp_dir = tempdir()?;
        let file_path = temp_dir.path().join("test.jpg");
        fs::write(&file_path, b"test content")?;

        let params = DecodeParams::thumbnail();
        let a = Fingerprint::compute(&file_path, ArtifactKind::Thumbnail, &params);
        let b = Fingerprint::compute(&file_path, ArtifactKind::Thumbnail, &params);

        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().unwrap().as_str().len(), 32);
        assert!(a.path().is_absolute());
        Ok(())
    }

    #[test]
    fn test_key_changes_with_kind_and_params() -> Result<()> {
        let temp_dir = tempdir()?;
        let file_path = temp_dir.path().join("test.jpg");
        fs::write(&file_path, b"test content")?;

        let thumb = Fingerprint::compute(&file_path, ArtifactKind::Thumbnail, &DecodeParams::thumbnail());
        let preview = Fingerprint::compute(&file_path, ArtifactKind::Preview, &DecodeParams::thumbnail());
        let bigger = Fingerprint::compute(
            &file_path,
            ArtifactKind::Thumbnail,
            &DecodeParams::thumbnail().with_max_dimension(512),
        );

        assert_ne!(thumb.key(), preview.key());
        assert_ne!(thumb.key(), bigger.key());
        Ok(())
    }

    #[test]
    fn test_key_changes_with_modification_time() -> Result<()> {
        let temp_dir = tempdir()?;
        let file_path = temp_dir.path().join("test.jpg");
        fs::write(&file_path, b"test content")?;

        let params = DecodeParams::preview();
        let before = Fingerprint::compute(&file_path, ArtifactKind::Preview, &params);

        let file = fs::File::options().write(true).open(&file_path)?;
        file.set_modified(SystemTime::now() + Duration::from_secs(60))?;
        drop(file);

        let after = Fingerprint::compute(&file_path, ArtifactKind::Preview, &params);
        assert_ne!(before.key(), after.key());
        Ok(())
    }

    #[test]
    fn test_missing_file_has_no_key() {
        let fingerprint = Fingerprint::compute(
            Path::new("/definitely/not/here.nef"),
            ArtifactKind::Thumbnail,
            &DecodeParams::thumbnail(),
        );
        assert!(!fingerprint.is_resolved());
        assert!(fingerprint.key().is_none());
    }

    #[test]
    fn test_key_parse_rejects_garbage() {
        assert!(FingerprintKey::parse("0123456789abcdef0123456789abcdef").is_some());
        assert!(FingerprintKey::parse("../../etc/passwd").is_none());
        assert!(FingerprintKey::parse("abc").is_none());
    }
}
