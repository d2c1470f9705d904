//! Request path for artifacts: fingerprint, cache lookup, deduplicated decode

use crate::decode::{Decoder, ImageDecoder, MetadataRecord};
use crate::error::ArtifactError;
use crate::fingerprint::Fingerprint;
use crate::inflight::Claim;
use crate::store::{ArtifactCache, ArtifactCaches, CacheStats};
use crate::writeback::{rotate_orientation, MetadataWriter};
use crate::{ArtifactKind, CacheConfig, DecodeParams, Payload};
use std::path::Path;
use std::sync::Arc;

/// Shared entry point for thumbnails, previews and metadata records.
///
/// Cheap to clone; clones share the same caches and decoder.
#[derive(Clone)]
pub struct ArtifactPipeline {
    caches: ArtifactCaches,
    decoder: Arc<dyn Decoder>,
}

impl ArtifactPipeline {
    pub fn new(caches: ArtifactCaches, decoder: Arc<dyn Decoder>) -> Self {
        Self { caches, decoder }
    }

    /// Open all caches described by `config` and decode through `decoder`.
    pub fn open(config: &CacheConfig, decoder: Arc<dyn Decoder>) -> Result<Self, ArtifactError> {
        Ok(Self::new(ArtifactCaches::open(config)?, decoder))
    }

    /// Open all caches with the default [`ImageDecoder`].
    pub fn with_default_decoder(config: &CacheConfig) -> Result<Self, ArtifactError> {
        Self::open(config, Arc::new(ImageDecoder::new()))
    }

    pub fn cache(&self, kind: ArtifactKind) -> &Arc<ArtifactCache> {
        self.caches.get(kind)
    }

    pub fn caches(&self) -> &ArtifactCaches {
        &self.caches
    }

    /// Produce the artifact of `kind` for `path`, decoding only on a miss.
    ///
    /// Concurrent requests for the same fingerprint share one decode and all
    /// receive its result. Failures are never cached.
    pub fn request(
        &self,
        path: &Path,
        kind: ArtifactKind,
        params: &DecodeParams,
    ) -> Result<Payload, ArtifactError> {
        let fingerprint = Fingerprint::compute(path, kind, params);
        let cache = self.caches.get(kind);

        let Some(key) = fingerprint.key() else {
            // Could not stat the source; nothing can match, so go straight to
            // the decoder, which reports the precise failure.
            return self.decode(&fingerprint, params);
        };

        if let Some(payload) = cache.get(&fingerprint) {
            return Ok(payload);
        }

        match cache.in_flight().claim(&key) {
            Claim::Follower(call) => {
                tracing::trace!("Joining in-flight {} decode for {:?}", kind, fingerprint.path());
                call.wait()
            }
            Claim::Leader(leader) => {
                // Another leader may have finished between our miss and our claim.
                if let Some(payload) = cache.get(&fingerprint) {
                    return leader.complete(Ok(payload));
                }

                let result = self.decode(&fingerprint, params);
                if let Ok(payload) = &result {
                    self.store(cache, &fingerprint, payload);
                }
                leader.complete(result)
            }
        }
    }

    /// [`request`](Self::request) with the kind's default parameters.
    pub fn request_default(&self, path: &Path, kind: ArtifactKind) -> Result<Payload, ArtifactError> {
        self.request(path, kind, &kind.default_params())
    }

    /// Metadata artifact for `path`, parsed.
    pub fn metadata(&self, path: &Path) -> Result<MetadataRecord, ArtifactError> {
        let bytes = self.request(path, ArtifactKind::Metadata, &DecodeParams::metadata())?;
        MetadataRecord::from_json(&bytes)
    }

    /// Drop every cached artifact derived from `path`, in all caches.
    pub fn invalidate(&self, path: &Path) -> usize {
        self.caches.iter().map(|cache| cache.remove_path(path)).sum()
    }

    /// Write `rating` into the source file and drop its cached artifacts.
    ///
    /// Returns the number of cache entries invalidated.
    pub fn write_rating(
        &self,
        writer: &dyn MetadataWriter,
        path: &Path,
        rating: Option<u8>,
    ) -> Result<usize, ArtifactError> {
        writer.write_rating(path, rating)?;
        Ok(self.invalidate(path))
    }

    /// Write `label` into the source file and drop its cached artifacts.
    pub fn write_label(
        &self,
        writer: &dyn MetadataWriter,
        path: &Path,
        label: Option<&str>,
    ) -> Result<usize, ArtifactError> {
        writer.write_label(path, label)?;
        Ok(self.invalidate(path))
    }

    /// Turn `path` by `degrees` clockwise by rewriting its EXIF orientation.
    ///
    /// The current orientation comes from the metadata artifact (1 when
    /// absent). Returns the orientation written.
    pub fn apply_rotation(
        &self,
        writer: &dyn MetadataWriter,
        path: &Path,
        degrees: i32,
    ) -> Result<u16, ArtifactError> {
        let current = self.metadata(path)?.orientation.unwrap_or(1);
        let next = rotate_orientation(current, degrees).ok_or_else(|| {
            ArtifactError::write(
                path,
                format!("cannot rotate orientation {} by {} degrees", current, degrees),
            )
        })?;

        writer.write_orientation(path, next)?;
        let dropped = self.invalidate(path);
        tracing::debug!(
            "Rotated {:?} by {} degrees (orientation {} -> {}, {} artifacts dropped)",
            path,
            degrees,
            current,
            next,
            dropped
        );
        Ok(next)
    }

    /// Purge every cache. Returns the number of entries removed.
    pub fn clear_all(&self) -> Result<usize, ArtifactError> {
        let mut removed = 0;
        for cache in self.caches.iter() {
            removed += cache.purge()?;
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        self.caches.iter().map(|cache| cache.stats()).collect()
    }

    /// Persist every cache index.
    pub fn flush(&self) -> Result<(), ArtifactError> {
        for cache in self.caches.iter() {
            cache.flush()?;
        }
        Ok(())
    }

    fn decode(&self, fingerprint: &Fingerprint, params: &DecodeParams) -> Result<Payload, ArtifactError> {
        self.decoder
            .decode(fingerprint.path(), fingerprint.kind(), params)
            .map(Payload::from)
            .map_err(|e| {
                tracing::debug!("Decode failed for {:?}: {}", fingerprint.path(), e);
                e
            })
    }

    fn store(&self, cache: &ArtifactCache, fingerprint: &Fingerprint, payload: &Payload) {
        match cache.put(fingerprint, payload) {
            Ok(()) => {}
            Err(ArtifactError::CapacityExceeded { size, capacity }) => {
                tracing::debug!(
                    "Not caching {} for {:?}: {} bytes exceeds capacity {}",
                    fingerprint.kind(),
                    fingerprint.path(),
                    size,
                    capacity
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to cache {} for {:?}: {}",
                    fingerprint.kind(),
                    fingerprint.path(),
                    e
                );
            }
        }
    }
}
