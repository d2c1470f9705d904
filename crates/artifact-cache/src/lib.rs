//! Fingerprinted artifact caching for photosift
//!
//! This crate turns "give me the thumbnail / preview / metadata record for this
//! file" into a cheap operation for libraries with thousands of RAW and JPEG
//! files. Artifacts are decoded once, stored in a size-bounded LRU cache per
//! artifact kind that survives restarts, and shared between concurrent callers.
//!
//! # Features
//!
//! - **Fingerprints**: path + size + mtime + kind + parameter hash, never file content
//! - **Per-kind caches**: byte-budgeted LRU with a persisted index and blob directory
//! - **Single-flight decode**: concurrent requests for one fingerprint share one decode
//! - **Format dispatch**: standard raster, RAW (embedded preview) and metadata-only files
//! - **Write-back**: ratings, labels and orientation written into the source, stale artifacts dropped

pub mod decode;
pub mod error;
pub mod fingerprint;
mod inflight;
pub mod lru;
pub mod pipeline;
pub mod store;
pub mod writeback;

pub use decode::{Decoder, ImageDecoder, MetadataRecord, SourceFormat};
pub use error::{ArtifactError, ErrorKind};
pub use fingerprint::{Fingerprint, FingerprintKey};
pub use pipeline::ArtifactPipeline;
pub use store::{ArtifactCache, ArtifactCaches, CacheStats};
pub use writeback::{rotate_orientation, ExiftoolWriter, MetadataWriter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

/// Cached artifact bytes, shared between the cache and every waiter.
pub type Payload = Arc<[u8]>;

/// The kinds of derived artifacts, one cache instance each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Small grid thumbnail (256px long edge by default)
    Thumbnail,
    /// Display-sized preview (1920px long edge by default)
    Preview,
    /// JSON-encoded [`MetadataRecord`]
    Metadata,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Thumbnail,
        ArtifactKind::Preview,
        ArtifactKind::Metadata,
    ];

    /// Parameters used when a caller does not ask for anything specific.
    pub fn default_params(&self) -> DecodeParams {
        match self {
            ArtifactKind::Thumbnail => DecodeParams::thumbnail(),
            ArtifactKind::Preview => DecodeParams::preview(),
            ArtifactKind::Metadata => DecodeParams::metadata(),
        }
    }

    fn tag(&self) -> u8 {
        match self {
            ArtifactKind::Thumbnail => 1,
            ArtifactKind::Preview => 2,
            ArtifactKind::Metadata => 3,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Thumbnail => write!(f, "thumbnail"),
            ArtifactKind::Preview => write!(f, "preview"),
            ArtifactKind::Metadata => write!(f, "metadata"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid artifact kind: {0}. Valid options: thumbnail, preview, metadata")]
pub struct ParseKindError(String);

impl std::str::FromStr for ArtifactKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "thumbnail" => Ok(ArtifactKind::Thumbnail),
            "preview" => Ok(ArtifactKind::Preview),
            "metadata" => Ok(ArtifactKind::Metadata),
            _ => Err(ParseKindError(s.to_string())),
        }
    }
}

/// Processing parameters forwarded to the decoder and folded into the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecodeParams {
    /// Long-edge limit; `None` keeps the native resolution
    pub max_dimension: Option<u32>,
    pub apply_auto_edits: bool,
    pub jpeg_quality: u8,
}

impl DecodeParams {
    pub fn thumbnail() -> Self {
        Self {
            max_dimension: Some(256),
            apply_auto_edits: false,
            jpeg_quality: 80,
        }
    }

    pub fn preview() -> Self {
        Self {
            max_dimension: Some(1920),
            apply_auto_edits: false,
            jpeg_quality: 85,
        }
    }

    pub fn metadata() -> Self {
        Self {
            max_dimension: None,
            apply_auto_edits: false,
            jpeg_quality: 0,
        }
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = Some(max_dimension);
        self
    }

    pub fn with_auto_edits(mut self, apply_auto_edits: bool) -> Self {
        self.apply_auto_edits = apply_auto_edits;
        self
    }

    /// Stable 64-bit digest of these parameters.
    pub fn params_hash(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.max_dimension.unwrap_or(0).to_le_bytes());
        hasher.update([self.max_dimension.is_some() as u8]);
        hasher.update([self.apply_auto_edits as u8, self.jpeg_quality]);
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(head)
    }
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self::preview()
    }
}

/// Cache sizing and placement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub thumbnail_capacity_bytes: u64,
    pub preview_capacity_bytes: u64,
    pub metadata_capacity_bytes: u64,
    /// Purge every cache when it is opened
    pub clear_on_start: bool,
    /// Persist the index after this many mutations
    pub flush_every: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            thumbnail_capacity_bytes: 512 * 1024 * 1024,   // 512MB
            preview_capacity_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            metadata_capacity_bytes: 256 * 1024 * 1024,     // 256MB
            clear_on_start: false,
            flush_every: 64,
        }
    }
}

impl CacheConfig {
    /// Config rooted at `cache_dir` with default capacities
    pub fn at(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn capacity_for(&self, kind: ArtifactKind) -> u64 {
        match kind {
            ArtifactKind::Thumbnail => self.thumbnail_capacity_bytes,
            ArtifactKind::Preview => self.preview_capacity_bytes,
            ArtifactKind::Metadata => self.metadata_capacity_bytes,
        }
    }

    pub fn dir_for(&self, kind: ArtifactKind) -> PathBuf {
        self.cache_dir.join(kind.to_string())
    }
}

/// `~/.cache/photosift` (or the platform equivalent)
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photosift")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_kind_parsing() {
        assert_eq!("thumbnail".parse::<ArtifactKind>().unwrap(), ArtifactKind::Thumbnail);
        assert_eq!("Preview".parse::<ArtifactKind>().unwrap(), ArtifactKind::Preview);
        assert_eq!("METADATA".parse::<ArtifactKind>().unwrap(), ArtifactKind::Metadata);
        assert!("loupe".parse::<ArtifactKind>().is_err());
    }

    #[test]
    fn test_kind_display_round_trips_through_dir_name() {
        let config = CacheConfig::at("/tmp/cache");
        for kind in ArtifactKind::ALL {
            let dir = config.dir_for(kind);
            let name = dir.file_name().unwrap().to_str().unwrap();
            assert_eq!(name.parse::<ArtifactKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_params_hash_distinguishes_parameters() {
        let base = DecodeParams::preview();
        assert_eq!(base.params_hash(), DecodeParams::preview().params_hash());
        assert_ne!(base.params_hash(), base.with_max_dimension(640).params_hash());
        assert_ne!(base.params_hash(), base.with_auto_edits(true).params_hash());
        assert_ne!(
            DecodeParams::metadata().params_hash(),
            DecodeParams { max_dimension: Some(0), ..DecodeParams::metadata() }.params_hash()
        );
    }

    #[test]
    fn test_default_capacities() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity_for(ArtifactKind::Thumbnail), 512 * 1024 * 1024);
        assert_eq!(config.capacity_for(ArtifactKind::Preview), 2 * 1024 * 1024 * 1024);
        assert!(!config.clear_on_start);
    }
}
