//! Background batch processing for photosift
//!
//! Runs per-file work (thumbnail scans, rating fetches, blur, rotation and
//! similarity analysis) across whole folders on a bounded worker pool, with
//! cooperative cancellation and per-file failure isolation.
//!
//! # Features
//!
//! - **Bounded pool**: at most `min(available_parallelism, 8)` workers unless overridden
//! - **Cancellation**: polled between units; running units always finish
//! - **Partial failure**: every path ends up succeeded, failed (with an error kind) or skipped
//! - **Lazy models**: heavyweight analyzers load once and stay disabled after a failed load
//! - **Apply**: accepted ratings, labels and rotations written back to the files

pub mod analyze;
pub mod apply;
pub mod coordinator;
pub mod job;
pub mod models;
pub mod scan;
pub mod similarity;

pub use analyze::{laplacian_variance, AnalyzeError, Analyzers};
pub use apply::{apply_rotations, write_labels, write_ratings, ApplyOutcome};
pub use coordinator::{CoordinatorError, JobCoordinator, JobHandle};
pub use job::{JobId, JobKind, JobOptions, JobOutput, JobResult, JobSummary};
pub use models::{
    EdgeBrightnessOrientation, EmbeddingModel, HistogramEmbedder, LazyModel, OrientationModel,
    Rotation,
};
pub use scan::discover_images;
pub use similarity::{cosine_similarity, embeddings_from, Clusterer, ThresholdClusterer};

use serde::{Deserialize, Serialize};

/// Hard ceiling on the default worker count
pub const MAX_DEFAULT_WORKERS: usize = 8;

/// Batch processing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Worker pool size override; `None` means `min(available_parallelism, 8)`
    pub workers: Option<usize>,
    /// Laplacian variance below which an image counts as blurred
    pub blur_threshold: f64,
    /// Long edge of the preview used for blur analysis
    pub blur_max_dimension: u32,
    /// Long edge of the preview used for rotation and similarity analysis
    pub preview_max_dimension: u32,
    pub thumbnail_max_dimension: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: None,
            blur_threshold: 100.0,
            blur_max_dimension: 640,
            preview_max_dimension: 1920,
            thumbnail_max_dimension: 256,
        }
    }
}

impl JobConfig {
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(workers) => workers.max(1),
            None => default_worker_count(),
        }
    }
}

/// `min(available_parallelism, 8)`, never less than one.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_DEFAULT_WORKERS)
}
