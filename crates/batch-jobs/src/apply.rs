//! Applying accepted edits (ratings, labels, rotations) to source files
//!
//! Runs in order on the calling thread. A file that fails is recorded and the
//! rest still get written.

use crate::models::Rotation;
use artifact_cache::{ArtifactPipeline, ErrorKind, MetadataWriter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// What happened to each file of an apply pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Written files; for rotations the orientation now stored, otherwise 0
    pub applied: BTreeMap<PathBuf, u16>,
    pub failed: BTreeMap<PathBuf, ErrorKind>,
    /// Rotations of zero degrees, left untouched
    pub unchanged: Vec<PathBuf>,
}

impl ApplyOutcome {
    /// Paths whose files changed; feeds `SelectionQuery::removed` when the
    /// view hides handled files.
    pub fn applied_paths(&self) -> HashSet<PathBuf> {
        self.applied.keys().cloned().collect()
    }

    fn record(&mut self, path: &Path, result: Result<u16, artifact_cache::ArtifactError>) {
        match result {
            Ok(value) => {
                self.applied.insert(path.to_path_buf(), value);
            }
            Err(e) => {
                tracing::warn!("Failed to update {:?}: {}", path, e);
                self.failed.insert(path.to_path_buf(), e.kind());
            }
        }
    }
}

/// Write star ratings into each file. `None` clears the rating.
pub fn write_ratings(
    pipeline: &ArtifactPipeline,
    writer: &dyn MetadataWriter,
    ratings: &[(PathBuf, Option<u8>)],
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();
    for (path, rating) in ratings {
        outcome.record(path, pipeline.write_rating(writer, path, *rating).map(|_| 0));
    }
    tracing::info!(
        "Wrote ratings: {} applied, {} failed",
        outcome.applied.len(),
        outcome.failed.len()
    );
    outcome
}

/// Write colour labels into each file. `None` clears the label.
pub fn write_labels(
    pipeline: &ArtifactPipeline,
    writer: &dyn MetadataWriter,
    labels: &[(PathBuf, Option<String>)],
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();
    for (path, label) in labels {
        let result = pipeline.write_label(writer, path, label.as_deref());
        outcome.record(path, result.map(|_| 0));
    }
    tracing::info!(
        "Wrote labels: {} applied, {} failed",
        outcome.applied.len(),
        outcome.failed.len()
    );
    outcome
}

/// Turn each file by its accepted rotation through the EXIF orientation tag.
pub fn apply_rotations(
    pipeline: &ArtifactPipeline,
    writer: &dyn MetadataWriter,
    rotations: &[(PathBuf, Rotation)],
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();
    for (path, rotation) in rotations {
        if *rotation == Rotation::None {
            outcome.unchanged.push(path.clone());
            continue;
        }
        outcome.record(path, pipeline.apply_rotation(writer, path, rotation.degrees()));
    }
    tracing::info!(
        "Applied rotations: {} applied, {} failed, {} unchanged",
        outcome.applied.len(),
        outcome.failed.len(),
        outcome.unchanged.len()
    );
    outcome
}
