//! Disk-backed artifact cache, one instance per artifact kind
//!
//! Layout under `<cache_dir>/<kind>/`:
//!
//! - `blobs/<key>.bin`: one file per cached payload
//! - `index.json`: key, source path, size and access order of every entry
//!
//! The in-memory index is the source of truth while the process runs and is
//! flushed every `flush_every` mutations, on [`ArtifactCache::flush`] and on
//! drop. Blob files are written to a temporary file and renamed into place, so
//! a crash leaves at worst an orphan blob, which is swept on the next open.

use crate::error::ArtifactError;
use crate::fingerprint::{absolutize, Fingerprint, FingerprintKey};
use crate::inflight::InFlightMap;
use crate::lru::{Admission, ByteLru};
use crate::{ArtifactKind, CacheConfig, Payload};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

const INDEX_VERSION: u32 = 1;
const BLOB_EXTENSION: &str = "bin";

#[derive(Debug, Clone)]
struct Entry {
    source: PathBuf,
    size: u64,
}

struct CacheState {
    lru: ByteLru<FingerprintKey, Entry>,
    dirty_ops: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    kind: ArtifactKind,
    entries: Vec<IndexRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRow {
    key: String,
    source: PathBuf,
    size: u64,
    last_access: u64,
}

/// Occupancy snapshot of one cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub kind: ArtifactKind,
    pub entry_count: usize,
    pub size_bytes: u64,
    pub capacity_bytes: u64,
}

impl CacheStats {
    pub fn usage_percent(&self) -> f64 {
        if self.capacity_bytes == 0 {
            0.0
        } else {
            (self.size_bytes as f64 / self.capacity_bytes as f64) * 100.0
        }
    }
}

pub struct ArtifactCache {
    kind: ArtifactKind,
    root: PathBuf,
    blob_dir: PathBuf,
    index_path: PathBuf,
    capacity: u64,
    flush_every: usize,
    state: Mutex<CacheState>,
    /// Serialises index writers so an older snapshot never lands last
    flush_lock: Mutex<()>,
    in_flight: InFlightMap,
}

impl ArtifactCache {
    /// Open (or create) the cache for `kind` under `config.cache_dir`.
    ///
    /// A missing index starts an empty cache. A corrupt one is logged, its
    /// blobs are discarded and the cache starts empty.
    pub fn open(kind: ArtifactKind, config: &CacheConfig) -> Result<Self, ArtifactError> {
        let root = config.dir_for(kind);
        let blob_dir = root.join("blobs");
        let index_path = root.join("index.json");
        let capacity = config.capacity_for(kind);

        if config.clear_on_start && root.exists() {
            tracing::info!("Clearing {} cache at {:?}", kind, root);
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&blob_dir)?;

        let mut lru = ByteLru::new(capacity);
        for row in load_index(&index_path, kind) {
            let Some(key) = FingerprintKey::parse(&row.key) else {
                tracing::debug!("Skipping malformed index key {:?}", row.key);
                continue;
            };
            lru.restore(
                key,
                Entry {
                    source: row.source,
                    size: row.size,
                },
                row.size,
                row.last_access,
            );
        }

        let cache = Self {
            kind,
            root,
            blob_dir,
            index_path,
            capacity,
            flush_every: config.flush_every.max(1),
            state: Mutex::new(CacheState { lru, dirty_ops: 0 }),
            flush_lock: Mutex::new(()),
            in_flight: InFlightMap::default(),
        };

        let over_budget = {
            let mut state = cache.state.lock();
            let evicted = state.lru.evict_to_budget();
            if !evicted.is_empty() {
                state.dirty_ops += evicted.len();
            }
            evicted
        };
        for (key, _) in &over_budget {
            cache.remove_blob(key);
        }
        if !over_budget.is_empty() {
            tracing::info!(
                "Evicted {} {} entries over the {} byte budget",
                over_budget.len(),
                kind,
                capacity
            );
            cache.flush()?;
        }

        cache.sweep_orphans();

        let stats = cache.stats();
        tracing::info!(
            "Opened {} cache at {:?}: {} entries, {} bytes of {}",
            kind,
            cache.root,
            stats.entry_count,
            stats.size_bytes,
            stats.capacity_bytes
        );

        Ok(cache)
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Cached payload for `fingerprint`, promoting it to most recently used.
    ///
    /// A row whose blob has gone missing or changed size is dropped and
    /// reported as a miss.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Payload> {
        let key = fingerprint.key()?;

        let expected = {
            let mut state = self.state.lock();
            let size = state.lru.get(&key)?.size;
            state.dirty_ops += 1;
            size
        };

        match fs::read(self.blob_path(&key)) {
            Ok(bytes) if bytes.len() as u64 == expected => {
                tracing::trace!("Cache hit {} {}", self.kind, key);
                Some(Payload::from(bytes))
            }
            Ok(bytes) => {
                tracing::warn!(
                    "Dropping {} entry {}: blob is {} bytes, index says {}",
                    self.kind,
                    key,
                    bytes.len(),
                    expected
                );
                self.forget(&key);
                None
            }
            Err(e) => {
                tracing::warn!("Dropping {} entry {}: blob unreadable: {}", self.kind, key, e);
                self.forget(&key);
                None
            }
        }
    }

    /// Whether an entry for `fingerprint` is indexed, without touching recency.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        fingerprint
            .key()
            .is_some_and(|key| self.state.lock().lru.peek(&key).is_some())
    }

    /// Store `bytes` for `fingerprint`, evicting least-recently-used entries
    /// until the cache fits its budget again.
    pub fn put(&self, fingerprint: &Fingerprint, bytes: &[u8]) -> Result<(), ArtifactError> {
        let key = fingerprint
            .key()
            .ok_or_else(|| ArtifactError::NotFound(fingerprint.path().to_path_buf()))?;
        let size = bytes.len() as u64;
        if size > self.capacity {
            return Err(ArtifactError::CapacityExceeded {
                size,
                capacity: self.capacity,
            });
        }

        let mut staged = NamedTempFile::new_in(&self.blob_dir)?;
        staged.write_all(bytes)?;
        staged.as_file().sync_data()?;
        // Blob lands before its index row; evicted blobs are unlinked after
        // the lock is released.
        staged
            .persist(self.blob_path(&key))
            .map_err(|e| ArtifactError::from(e.error))?;

        let admission = {
            let mut state = self.state.lock();
            let admission = state.lru.insert(
                key.clone(),
                Entry {
                    source: fingerprint.path().to_path_buf(),
                    size,
                },
                size,
            );
            if let Admission::Admitted { evicted, .. } = &admission {
                state.dirty_ops += 1 + evicted.len();
            }
            admission
        };

        let evicted = match admission {
            Admission::Admitted { evicted, .. } => evicted,
            Admission::Rejected(_) => {
                self.remove_blob(&key);
                return Err(ArtifactError::CapacityExceeded {
                    size,
                    capacity: self.capacity,
                });
            }
        };
        for (old_key, _) in &evicted {
            self.remove_blob(old_key);
        }

        if !evicted.is_empty() {
            tracing::debug!(
                "Evicted {} {} entries to admit {} ({} bytes)",
                evicted.len(),
                self.kind,
                key,
                size
            );
        }

        self.flush_if_due()
    }

    /// Drop every entry derived from `path`, whatever its fingerprint.
    pub fn remove_path(&self, path: &Path) -> usize {
        let path = absolutize(path);
        let removed = {
            let mut state = self.state.lock();
            let removed = state.lru.remove_where(|entry| entry.source == path);
            state.dirty_ops += removed.len();
            removed
        };
        for (key, _) in &removed {
            self.remove_blob(key);
        }
        let removed = removed.len();

        if removed > 0 {
            tracing::debug!("Removed {} {} entries for {:?}", removed, self.kind, path);
            if let Err(e) = self.flush_if_due() {
                tracing::warn!("Failed to persist {} index: {}", self.kind, e);
            }
        }
        removed
    }

    /// Remove every entry and blob. Returns the number of entries dropped.
    pub fn purge(&self) -> Result<usize, ArtifactError> {
        let _flush_guard = self.flush_lock.lock();
        let count = {
            let mut state = self.state.lock();
            let count = state.lru.clear();
            state.dirty_ops = 0;
            count
        };

        if self.blob_dir.exists() {
            fs::remove_dir_all(&self.blob_dir)?;
        }
        fs::create_dir_all(&self.blob_dir)?;
        self.write_index(Vec::new())?;

        tracing::info!("Purged {} {} entries", count, self.kind);
        Ok(count)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            kind: self.kind,
            entry_count: state.lru.len(),
            size_bytes: state.lru.total_bytes(),
            capacity_bytes: self.capacity,
        }
    }

    /// Persist the index now.
    pub fn flush(&self) -> Result<(), ArtifactError> {
        let _flush_guard = self.flush_lock.lock();
        let rows = {
            let mut state = self.state.lock();
            state.dirty_ops = 0;
            state
                .lru
                .iter_lru_first()
                .map(|(key, entry, size, last_access)| IndexRow {
                    key: key.as_str().to_string(),
                    source: entry.source.clone(),
                    size,
                    last_access,
                })
                .collect::<Vec<_>>()
        };
        self.write_index(rows)
    }

    pub(crate) fn in_flight(&self) -> &InFlightMap {
        &self.in_flight
    }

    fn flush_if_due(&self) -> Result<(), ArtifactError> {
        let due = self.state.lock().dirty_ops >= self.flush_every;
        if due {
            self.flush()?;
        }
        Ok(())
    }

    fn forget(&self, key: &FingerprintKey) {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.lru.remove(key).is_some();
            if removed {
                state.dirty_ops += 1;
            }
            removed
        };
        if removed {
            self.remove_blob(key);
        }
    }

    fn write_index(&self, entries: Vec<IndexRow>) -> Result<(), ArtifactError> {
        let index = IndexFile {
            version: INDEX_VERSION,
            kind: self.kind,
            entries,
        };
        let mut staged = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer(&mut staged, &index)?;
        staged.as_file().sync_data()?;
        staged
            .persist(&self.index_path)
            .map_err(|e| ArtifactError::from(e.error))?;
        tracing::trace!("Wrote {} index with {} entries", self.kind, index.entries.len());
        Ok(())
    }

    fn blob_path(&self, key: &FingerprintKey) -> PathBuf {
        self.blob_dir
            .join(format!("{}.{}", key.as_str(), BLOB_EXTENSION))
    }

    fn remove_blob(&self, key: &FingerprintKey) {
        let path = self.blob_path(key);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Failed to remove blob {:?}: {}", path, e);
            }
        }
    }

    /// Delete blob files (and abandoned temp files) the index does not know.
    fn sweep_orphans(&self) {
        let known: HashSet<String> = {
            let state = self.state.lock();
            state
                .lru
                .iter_lru_first()
                .map(|(key, _, _, _)| format!("{}.{}", key.as_str(), BLOB_EXTENSION))
                .collect()
        };

        let Ok(read_dir) = fs::read_dir(&self.blob_dir) else {
            return;
        };
        let mut swept = 0usize;
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !known.contains(&name) && fs::remove_file(entry.path()).is_ok() {
                swept += 1;
            }
        }
        if swept > 0 {
            tracing::debug!("Swept {} orphan {} blobs", swept, self.kind);
        }
    }
}

impl Drop for ArtifactCache {
    fn drop(&mut self) {
        if self.state.lock().dirty_ops == 0 {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to persist {} index on shutdown: {}", self.kind, e);
        }
    }
}

fn load_index(index_path: &Path, kind: ArtifactKind) -> Vec<IndexRow> {
    let raw = match fs::read(index_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!("Cannot read {} index {:?}, starting empty: {}", kind, index_path, e);
            return Vec::new();
        }
    };

    match serde_json::from_slice::<IndexFile>(&raw) {
        Ok(index) if index.version == INDEX_VERSION && index.kind == kind => {
            let mut rows = index.entries;
            rows.sort_by_key(|row| row.last_access);
            rows
        }
        Ok(index) => {
            tracing::warn!(
                "Ignoring {} index {:?} (version {}, kind {})",
                kind,
                index_path,
                index.version,
                index.kind
            );
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Corrupt {} index {:?}, starting empty: {}", kind, index_path, e);
            Vec::new()
        }
    }
}

/// The three per-kind caches opened from one [`CacheConfig`].
#[derive(Clone)]
pub struct ArtifactCaches {
    thumbnail: Arc<ArtifactCache>,
    preview: Arc<ArtifactCache>,
    metadata: Arc<ArtifactCache>,
}

impl ArtifactCaches {
    pub fn open(config: &CacheConfig) -> Result<Self, ArtifactError> {
        Ok(Self {
            thumbnail: Arc::new(ArtifactCache::open(ArtifactKind::Thumbnail, config)?),
            preview: Arc::new(ArtifactCache::open(ArtifactKind::Preview, config)?),
            metadata: Arc::new(ArtifactCache::open(ArtifactKind::Metadata, config)?),
        })
    }

    pub fn get(&self, kind: ArtifactKind) -> &Arc<ArtifactCache> {
        match kind {
            ArtifactKind::Thumbnail => &self.thumbnail,
            ArtifactKind::Preview => &self.preview,
            ArtifactKind::Metadata => &self.metadata,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ArtifactCache>> {
        [&self.thumbnail, &self.preview, &self.metadata].into_iter()
    }
}
