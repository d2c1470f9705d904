//! Per-file units of work and the analyzers they call

use crate::job::{JobKind, JobOptions, JobOutput};
use crate::models::{EdgeBrightnessOrientation, EmbeddingModel, HistogramEmbedder, LazyModel, OrientationModel};
use crate::JobConfig;
use artifact_cache::{ArtifactError, ArtifactKind, ArtifactPipeline, DecodeParams, ErrorKind};
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AnalyzeError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Image error: {0}")]
    Image(String),
}

impl AnalyzeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyzeError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            AnalyzeError::Artifact(e) => e.kind(),
            AnalyzeError::Image(_) => ErrorKind::DecodeError,
        }
    }
}

/// The model handles shared by every job of a coordinator.
pub struct Analyzers {
    pub orientation: LazyModel<dyn OrientationModel>,
    pub embedding: LazyModel<dyn EmbeddingModel>,
}

impl Default for Analyzers {
    fn default() -> Self {
        Self {
            orientation: LazyModel::new("orientation", || {
                Ok(Arc::new(EdgeBrightnessOrientation::default()) as Arc<dyn OrientationModel>)
            }),
            embedding: LazyModel::new("embedding", || {
                Ok(Arc::new(HistogramEmbedder) as Arc<dyn EmbeddingModel>)
            }),
        }
    }
}

impl Analyzers {
    pub fn with_orientation(mut self, model: LazyModel<dyn OrientationModel>) -> Self {
        self.orientation = model;
        self
    }

    pub fn with_embedding(mut self, model: LazyModel<dyn EmbeddingModel>) -> Self {
        self.embedding = model;
        self
    }
}

/// Everything a unit of work needs, borrowed from the coordinator.
pub(crate) struct UnitContext<'a> {
    pub pipeline: &'a ArtifactPipeline,
    pub analyzers: &'a Analyzers,
    pub config: &'a JobConfig,
    pub options: &'a JobOptions,
}

impl UnitContext<'_> {
    fn params(&self, default: DecodeParams) -> DecodeParams {
        self.options.params.unwrap_or(default)
    }

    fn preview(&self, path: &Path, max_dimension: u32) -> Result<DynamicImage, AnalyzeError> {
        let params = self.params(DecodeParams::preview().with_max_dimension(max_dimension));
        let bytes = self.pipeline.request(path, ArtifactKind::Preview, &params)?;
        image::load_from_memory(&bytes).map_err(|e| AnalyzeError::Image(e.to_string()))
    }
}

/// Run one unit of `kind` for `path`.
pub(crate) fn run_unit(ctx: &UnitContext<'_>, kind: JobKind, path: &Path) -> Result<JobOutput, AnalyzeError> {
    match kind {
        JobKind::Scan => {
            let params = ctx.params(
                DecodeParams::thumbnail().with_max_dimension(ctx.config.thumbnail_max_dimension),
            );
            let bytes = ctx.pipeline.request(path, ArtifactKind::Thumbnail, &params)?;
            Ok(JobOutput::Scanned { bytes: bytes.len() })
        }
        JobKind::RateFetch => {
            let record = ctx.pipeline.metadata(path)?;
            Ok(JobOutput::Rating {
                rating: record.rating,
                label: record.label,
            })
        }
        JobKind::BlurDetect => {
            let image = ctx.preview(path, ctx.config.blur_max_dimension)?;
            let threshold = ctx.options.blur_threshold.unwrap_or(ctx.config.blur_threshold);
            let variance = laplacian_variance(&image);
            Ok(JobOutput::Blur {
                variance,
                is_blurred: variance < threshold,
            })
        }
        JobKind::RotationDetect => {
            let Some(model) = ctx.analyzers.orientation.get() else {
                // No model: leave the image as it is
                return Ok(JobOutput::Rotation { degrees: 0 });
            };
            let image = ctx.preview(path, ctx.config.preview_max_dimension)?;
            match model.detect(&image) {
                Ok(rotation) => Ok(JobOutput::Rotation {
                    degrees: rotation.degrees(),
                }),
                Err(AnalyzeError::ModelUnavailable(reason)) => {
                    tracing::debug!("Orientation model declined {:?}: {}", path, reason);
                    Ok(JobOutput::Rotation { degrees: 0 })
                }
                Err(e) => Err(e),
            }
        }
        JobKind::SimilarityEmbed => {
            let Some(model) = ctx.analyzers.embedding.get() else {
                return Ok(JobOutput::Embedding(None));
            };
            let image = ctx.preview(path, ctx.config.preview_max_dimension)?;
            match model.embed(&image) {
                Ok(vector) => Ok(JobOutput::Embedding(Some(vector))),
                Err(AnalyzeError::ModelUnavailable(_)) => Ok(JobOutput::Embedding(None)),
                Err(e) => Err(e),
            }
        }
    }
}

/// Variance of the 3x3 Laplacian over the grayscale image. Sharp images
/// have strong edges and therefore a high variance.
pub fn laplacian_variance(image: &DynamicImage) -> f64 {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0.0;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let response = px(x, y - 1) + px(x - 1, y) + px(x + 1, y) + px(x, y + 1) - 4.0 * px(x, y);
            sum += response;
            sum_sq += response * response;
            count += 1.0;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}
