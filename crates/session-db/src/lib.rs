//! SQLite persistence for per-library annotations.
//!
//! Each library folder gets a database at:
//!   {cache_dir}/photosift/sessions/{folder-hash}/annotations.db
//!
//! Stores what batch jobs and the user decide about each file: rating and
//! colour label, pick/reject flag, blur score, suggested rotation and
//! similarity cluster. Every `record_*` call is an upsert that only touches
//! its own columns, so results from different jobs accumulate on one row.
//!
//! Uses WAL mode so readers never block the writer.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Pick/reject decision for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    #[default]
    None,
    Pick,
    Reject,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::None => "none",
            Flag::Pick => "pick",
            Flag::Reject => "reject",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Flag::None),
            "pick" => Ok(Flag::Pick),
            "reject" => Ok(Flag::Reject),
            _ => anyhow::bail!("Invalid flag: {}. Valid options: none, pick, reject", s),
        }
    }
}

/// Everything known about one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub file_path: String,
    pub rating: Option<u8>,
    pub color_label: Option<String>,
    pub flag: Flag,
    pub blur_variance: Option<f64>,
    pub is_blurred: Option<bool>,
    pub suggested_rotation: Option<i32>,
    pub cluster_id: Option<i64>,
    /// RFC 3339 timestamp of the last write
    pub updated_at: String,
}

/// Annotation database handle.
pub struct SessionDb {
    conn: Connection,
    db_path: PathBuf,
}

impl SessionDb {
    /// Open or create the annotation database for a library folder.
    /// Creates the session directory and database file if needed.
    pub fn open(library_root: &Path) -> Result<Self> {
        let session_dir = Self::session_dir(library_root);
        std::fs::create_dir_all(&session_dir)
            .with_context(|| format!("Failed to create session dir: {}", session_dir.display()))?;
        Self::open_at(&session_dir.join("annotations.db"))
    }

    /// Open a database at a specific path.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL mode for concurrent read/write
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn,
            db_path: db_path.to_path_buf(),
        };
        db.create_tables()?;
        tracing::debug!("Opened annotation store {:?}", db.db_path);
        Ok(db)
    }

    /// Check if an annotation database already exists for this folder.
    pub fn exists(library_root: &Path) -> bool {
        Self::session_dir(library_root).join("annotations.db").exists()
    }

    /// Get the database file path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn session_dir(library_root: &Path) -> PathBuf {
        let root = library_root
            .canonicalize()
            .unwrap_or_else(|_| library_root.to_path_buf());
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photosift")
            .join("sessions")
            .join(Self::hash_path(&root.to_string_lossy()))
    }

    // -- Schema --

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS annotations (
                file_path TEXT PRIMARY KEY,
                rating INTEGER,
                color_label TEXT,
                flag TEXT NOT NULL DEFAULT 'none',
                blur_variance REAL,
                is_blurred INTEGER,
                suggested_rotation INTEGER,
                cluster_id INTEGER,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_annotations_flag ON annotations(flag);
            CREATE INDEX IF NOT EXISTS idx_annotations_cluster ON annotations(cluster_id);
            ",
        )?;
        Ok(())
    }

    // -- Session metadata --

    /// Store a session metadata key-value pair.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO session_meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get a session metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM session_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    // -- Job results --

    /// Record XMP ratings and labels from a rate-fetch job.
    pub fn record_rating(&self, entries: &[(PathBuf, Option<u8>, Option<String>)]) -> Result<usize> {
        let now = Self::now();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO annotations (file_path, rating, color_label, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(file_path) DO UPDATE SET
                    rating = excluded.rating,
                    color_label = excluded.color_label,
                    updated_at = excluded.updated_at",
            )?;
            for (path, rating, label) in entries {
                stmt.execute(params![Self::key(path), rating, label, now])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    /// Record blur scores from a blur-detect job.
    pub fn record_blur(&self, entries: &[(PathBuf, f64, bool)]) -> Result<usize> {
        let now = Self::now();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO annotations (file_path, blur_variance, is_blurred, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(file_path) DO UPDATE SET
                    blur_variance = excluded.blur_variance,
                    is_blurred = excluded.is_blurred,
                    updated_at = excluded.updated_at",
            )?;
            for (path, variance, is_blurred) in entries {
                stmt.execute(params![Self::key(path), variance, is_blurred, now])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    /// Record suggested rotations (degrees clockwise) from a rotation job.
    pub fn record_rotation(&self, entries: &[(PathBuf, i32)]) -> Result<usize> {
        let now = Self::now();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO annotations (file_path, suggested_rotation, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(file_path) DO UPDATE SET
                    suggested_rotation = excluded.suggested_rotation,
                    updated_at = excluded.updated_at",
            )?;
            for (path, degrees) in entries {
                stmt.execute(params![Self::key(path), degrees, now])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    /// Record similarity cluster ids.
    pub fn record_cluster(&self, clusters: &BTreeMap<PathBuf, usize>) -> Result<usize> {
        let now = Self::now();
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO annotations (file_path, cluster_id, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(file_path) DO UPDATE SET
                    cluster_id = excluded.cluster_id,
                    updated_at = excluded.updated_at",
            )?;
            for (path, cluster) in clusters {
                stmt.execute(params![Self::key(path), *cluster as i64, now])?;
            }
        }
        tx.commit()?;
        Ok(clusters.len())
    }

    /// Set the pick/reject flag for a file (write-through from the caller).
    pub fn update_flag(&self, path: &Path, flag: Flag) -> Result<()> {
        self.conn.execute(
            "INSERT INTO annotations (file_path, flag, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(file_path) DO UPDATE SET
                flag = excluded.flag,
                updated_at = excluded.updated_at",
            params![Self::key(path), flag.as_str(), Self::now()],
        )?;
        Ok(())
    }

    /// Set the star rating after it was written into the file.
    pub fn update_rating(&self, path: &Path, rating: Option<u8>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO annotations (file_path, rating, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(file_path) DO UPDATE SET
                rating = excluded.rating,
                updated_at = excluded.updated_at",
            params![Self::key(path), rating, Self::now()],
        )?;
        Ok(())
    }

    /// Set the colour label after it was written into the file.
    pub fn update_label(&self, path: &Path, label: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO annotations (file_path, color_label, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(file_path) DO UPDATE SET
                color_label = excluded.color_label,
                updated_at = excluded.updated_at",
            params![Self::key(path), label, Self::now()],
        )?;
        Ok(())
    }

    // -- Queries --

    /// Load all annotations, ordered by path.
    pub fn load_annotations(&self) -> Result<Vec<Annotation>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                file_path, rating, color_label, flag,
                blur_variance, is_blurred, suggested_rotation, cluster_id, updated_at
            FROM annotations ORDER BY file_path",
        )?;

        let rows = stmt.query_map([], Self::row_to_annotation)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// The annotation for one file, if any job or the user has touched it.
    pub fn annotation(&self, path: &Path) -> Result<Option<Annotation>> {
        let result = self
            .conn
            .query_row(
                "SELECT
                    file_path, rating, color_label, flag,
                    blur_variance, is_blurred, suggested_rotation, cluster_id, updated_at
                FROM annotations WHERE file_path = ?1",
                params![Self::key(path)],
                Self::row_to_annotation,
            )
            .optional()?;
        Ok(result)
    }

    /// Forget files that were deleted or moved out of the library.
    pub fn remove(&self, paths: &[PathBuf]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM annotations WHERE file_path = ?1")?;
            for path in paths {
                removed += stmt.execute(params![Self::key(path)])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    // -- Statistics --

    /// Get annotated file count.
    pub fn annotation_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM annotations", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get flag counts.
    pub fn flag_counts(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT flag, COUNT(*) FROM annotations GROUP BY flag")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = HashMap::new();
        for row in rows {
            let (flag, count) = row?;
            counts.insert(flag, count);
        }
        Ok(counts)
    }

    // -- Utility --

    fn row_to_annotation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Annotation> {
        let flag: String = row.get(3)?;
        Ok(Annotation {
            file_path: row.get(0)?,
            rating: row.get(1)?,
            color_label: row.get(2)?,
            flag: flag.parse().unwrap_or_default(),
            blur_variance: row.get(4)?,
            is_blurred: row.get(5)?,
            suggested_rotation: row.get(6)?,
            cluster_id: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn now() -> String {
        Utc::now().to_rfc3339()
    }

    /// Generate a deterministic hash from a folder path for directory naming.
    fn hash_path(path: &str) -> String {
        // FNV-1a; only needs to be deterministic, not cryptographic
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in path.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        format!("{:016x}", hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (SessionDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = SessionDb::open_at(&db_path).unwrap();
        (db, dir)
    }

    fn photo(name: &str) -> PathBuf {
        PathBuf::from(format!("/photos/{}", name))
    }

    #[test]
    fn test_create_and_load_empty() {
        let (db, _dir) = test_db();
        assert!(db.load_annotations().unwrap().is_empty());
        assert_eq!(db.annotation_count().unwrap(), 0);
    }

    #[test]
    fn test_record_rating_and_load() {
        let (db, _dir) = test_db();
        db.record_rating(&[
            (photo("a.NEF"), Some(4), Some("Red".to_string())),
            (photo("b.NEF"), None, None),
        ])
        .unwrap();

        let loaded = db.load_annotations().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].file_path, "/photos/a.NEF");
        assert_eq!(loaded[0].rating, Some(4));
        assert_eq!(loaded[0].color_label.as_deref(), Some("Red"));
        assert_eq!(loaded[1].rating, None);
        assert_eq!(loaded[1].flag, Flag::None);
    }

    #[test]
    fn test_job_results_accumulate_on_one_row() {
        let (db, _dir) = test_db();
        let path = photo("a.NEF");

        db.record_rating(&[(path.clone(), Some(3), None)]).unwrap();
        db.record_blur(&[(path.clone(), 42.5, true)]).unwrap();
        db.record_rotation(&[(path.clone(), -90)]).unwrap();
        let clusters: BTreeMap<_, _> = [(path.clone(), 7usize)].into_iter().collect();
        db.record_cluster(&clusters).unwrap();
        db.update_flag(&path, Flag::Reject).unwrap();

        let annotation = db.annotation(&path).unwrap().unwrap();
        assert_eq!(annotation.rating, Some(3));
        assert_eq!(annotation.blur_variance, Some(42.5));
        assert_eq!(annotation.is_blurred, Some(true));
        assert_eq!(annotation.suggested_rotation, Some(-90));
        assert_eq!(annotation.cluster_id, Some(7));
        assert_eq!(annotation.flag, Flag::Reject);
        assert_eq!(db.annotation_count().unwrap(), 1);
    }

    #[test]
    fn test_update_rating_and_label() {
        let (db, _dir) = test_db();
        let path = photo("a.NEF");

        db.record_rating(&[(path.clone(), Some(2), Some("Blue".to_string()))]).unwrap();
        db.record_blur(&[(path.clone(), 80.0, true)]).unwrap();
        db.update_rating(&path, Some(5)).unwrap();

        let annotation = db.annotation(&path).unwrap().unwrap();
        assert_eq!(annotation.rating, Some(5));
        assert_eq!(annotation.color_label.as_deref(), Some("Blue"));
        assert_eq!(annotation.blur_variance, Some(80.0));

        db.update_label(&path, None).unwrap();
        db.update_rating(&photo("new.NEF"), Some(1)).unwrap();

        let annotation = db.annotation(&path).unwrap().unwrap();
        assert_eq!(annotation.color_label, None);
        assert_eq!(annotation.rating, Some(5));
        assert_eq!(db.annotation(&photo("new.NEF")).unwrap().unwrap().rating, Some(1));
    }

    #[test]
    fn test_rerun_overwrites_only_its_columns() {
        let (db, _dir) = test_db();
        let path = photo("a.NEF");

        db.update_flag(&path, Flag::Pick).unwrap();
        db.record_blur(&[(path.clone(), 10.0, true)]).unwrap();
        db.record_blur(&[(path.clone(), 300.0, false)]).unwrap();

        let annotation = db.annotation(&path).unwrap().unwrap();
        assert_eq!(annotation.blur_variance, Some(300.0));
        assert_eq!(annotation.is_blurred, Some(false));
        // Flag survives the blur re-run
        assert_eq!(annotation.flag, Flag::Pick);
    }

    #[test]
    fn test_remove() {
        let (db, _dir) = test_db();
        db.record_rotation(&[(photo("a.NEF"), 0), (photo("b.NEF"), 90), (photo("c.NEF"), 180)])
            .unwrap();

        let removed = db.remove(&[photo("a.NEF"), photo("missing.NEF")]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.annotation_count().unwrap(), 2);
        assert!(db.annotation(&photo("a.NEF")).unwrap().is_none());
    }

    #[test]
    fn test_session_meta() {
        let (db, _dir) = test_db();
        db.set_meta("root_folder", "/photos/wedding").unwrap();
        db.set_meta("last_job", "blur_detect").unwrap();

        assert_eq!(
            db.get_meta("root_folder").unwrap(),
            Some("/photos/wedding".to_string())
        );
        assert_eq!(db.get_meta("last_job").unwrap(), Some("blur_detect".to_string()));
        assert_eq!(db.get_meta("nonexistent").unwrap(), None);
    }

    #[test]
    fn test_flag_counts() {
        let (db, _dir) = test_db();
        let paths: Vec<_> = (0..10).map(|i| photo(&format!("img_{}.NEF", i))).collect();
        let entries: Vec<_> = paths.iter().map(|p| (p.clone(), 0)).collect();
        db.record_rotation(&entries).unwrap();

        db.update_flag(&paths[0], Flag::Pick).unwrap();
        db.update_flag(&paths[1], Flag::Pick).unwrap();
        db.update_flag(&paths[2], Flag::Reject).unwrap();

        let counts = db.flag_counts().unwrap();
        assert_eq!(counts.get("pick"), Some(&2));
        assert_eq!(counts.get("reject"), Some(&1));
        assert_eq!(counts.get("none"), Some(&7));
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!("PICK".parse::<Flag>().unwrap(), Flag::Pick);
        assert_eq!("reject".parse::<Flag>().unwrap(), Flag::Reject);
        assert!("maybe".parse::<Flag>().is_err());
    }

    #[test]
    fn test_batch_record_is_fast_enough_for_large_folders() {
        let (db, _dir) = test_db();
        let entries: Vec<_> = (0..1000)
            .map(|i| (photo(&format!("img_{:04}.NEF", i)), i as f64, i % 2 == 0))
            .collect();
        assert_eq!(db.record_blur(&entries).unwrap(), 1000);
        assert_eq!(db.annotation_count().unwrap(), 1000);
    }
}
