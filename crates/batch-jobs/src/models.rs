//! Analyzer models and their lazy, load-once handles
//!
//! Models are black boxes: a decoded preview goes in, a rotation or a vector
//! comes out. [`LazyModel`] defers loading until first use and, if loading
//! fails, stays disabled for the rest of the process instead of retrying on
//! every call.

use crate::analyze::AnalyzeError;
use image::{DynamicImage, GenericImageView};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Clockwise rotation that makes an image upright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    None,
    Clockwise90,
    Half,
    CounterClockwise90,
}

impl Rotation {
    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Half => 180,
            Rotation::CounterClockwise90 => -90,
        }
    }

    /// Parse a stored angle; 270 is the same turn as -90.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Clockwise90),
            180 => Some(Rotation::Half),
            270 => Some(Rotation::CounterClockwise90),
            _ => None,
        }
    }

    /// Map a classifier output index (0, 90, 180, 270 degrees) to a rotation.
    pub fn from_class(class: usize) -> Option<Self> {
        match class {
            0 => Some(Rotation::None),
            1 => Some(Rotation::Clockwise90),
            2 => Some(Rotation::Half),
            3 => Some(Rotation::CounterClockwise90),
            _ => None,
        }
    }
}

pub trait OrientationModel: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Rotation, AnalyzeError>;
}

pub trait EmbeddingModel: Send + Sync {
    /// L2-normalised feature vector
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, AnalyzeError>;
}

/// A model loaded on first use. A failed load is logged once and remembered.
pub struct LazyModel<M: ?Sized> {
    name: &'static str,
    #[allow(clippy::type_complexity)]
    loader: Mutex<Option<Box<dyn FnOnce() -> Result<Arc<M>, AnalyzeError> + Send>>>,
    model: OnceLock<Option<Arc<M>>>,
}

impl<M: ?Sized + Send + Sync> LazyModel<M> {
    pub fn new<F>(name: &'static str, loader: F) -> Self
    where
        F: FnOnce() -> Result<Arc<M>, AnalyzeError> + Send + 'static,
    {
        Self {
            name,
            loader: Mutex::new(Some(Box::new(loader))),
            model: OnceLock::new(),
        }
    }

    /// A handle around an already-loaded model.
    pub fn ready(name: &'static str, model: Arc<M>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Some(model));
        Self {
            name,
            loader: Mutex::new(None),
            model: cell,
        }
    }

    /// A handle that never yields a model.
    pub fn unavailable(name: &'static str) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(None);
        Self {
            name,
            loader: Mutex::new(None),
            model: cell,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The model, loading it on the first call. Concurrent first callers
    /// block until the single load attempt finishes.
    pub fn get(&self) -> Option<Arc<M>> {
        self.model
            .get_or_init(|| {
                let loader = self.loader.lock().take()?;
                match loader() {
                    Ok(model) => {
                        tracing::info!("Loaded {} model", self.name);
                        Some(model)
                    }
                    Err(e) => {
                        tracing::warn!("{} model disabled for this session: {}", self.name, e);
                        None
                    }
                }
            })
            .clone()
    }

    /// True once a load attempt has failed (or the handle was built unavailable).
    pub fn is_disabled(&self) -> bool {
        matches!(self.model.get(), Some(None))
    }
}

/// Lightweight orientation heuristic: assumes the brightest border of the
/// frame is the sky and suggests the rotation that brings it to the top.
///
/// Only answers when one border is clearly brighter than the current top;
/// otherwise the image is left as is.
#[derive(Debug, Clone)]
pub struct EdgeBrightnessOrientation {
    /// Fraction of the short edge sampled along each border
    pub band: f32,
    /// Required brightness ratio over the top band before suggesting a rotation
    pub margin: f32,
}

impl Default for EdgeBrightnessOrientation {
    fn default() -> Self {
        Self {
            band: 0.1,
            margin: 1.25,
        }
    }
}

impl OrientationModel for EdgeBrightnessOrientation {
    fn detect(&self, image: &DynamicImage) -> Result<Rotation, AnalyzeError> {
        let (width, height) = image.dimensions();
        if width < 4 || height < 4 {
            return Ok(Rotation::None);
        }
        let luma = image.to_luma8();
        let band = ((width.min(height) as f32 * self.band).round() as u32).max(1);

        let mean = |x0: u32, y0: u32, w: u32, h: u32| -> f32 {
            let mut sum = 0u64;
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    sum += luma.get_pixel(x, y)[0] as u64;
                }
            }
            sum as f32 / (w as u64 * h as u64).max(1) as f32
        };

        let top = mean(0, 0, width, band);
        let bottom = mean(0, height - band, width, band);
        let left = mean(0, 0, band, height);
        let right = mean(width - band, 0, band, height);

        let (brightest, rotation) = [
            (bottom, Rotation::Half),
            (left, Rotation::Clockwise90),
            (right, Rotation::CounterClockwise90),
        ]
        .into_iter()
        .fold((top, Rotation::None), |best, candidate| {
            if candidate.0 > best.0 {
                candidate
            } else {
                best
            }
        });

        if rotation != Rotation::None && brightest > top * self.margin + 1.0 {
            Ok(rotation)
        } else {
            Ok(Rotation::None)
        }
    }
}

/// Per-channel colour histogram, 16 bins per channel (48 dimensions).
#[derive(Debug, Clone, Default)]
pub struct HistogramEmbedder;

impl HistogramEmbedder {
    pub const BINS: usize = 16;
}

impl EmbeddingModel for HistogramEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, AnalyzeError> {
        let rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(AnalyzeError::Image("empty image".to_string()));
        }

        let mut histogram = vec![0f32; Self::BINS * 3];
        for pixel in rgb.pixels() {
            for (channel, value) in pixel.0.iter().enumerate() {
                let bin = *value as usize * Self::BINS / 256;
                histogram[channel * Self::BINS + bin] += 1.0;
            }
        }

        l2_normalize(&mut histogram);
        Ok(histogram)
    }
}

/// Scale `v` to unit length in place; zero vectors are left untouched.
pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Fixed(Rotation);

    impl OrientationModel for Fixed {
        fn detect(&self, _image: &DynamicImage) -> Result<Rotation, AnalyzeError> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_lazy_model_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let model: LazyModel<dyn OrientationModel> = LazyModel::new("fixed", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Fixed(Rotation::Half)) as Arc<dyn OrientationModel>)
        });

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| assert!(model.get().is_some()));
            }
        });

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(!model.is_disabled());
    }

    #[test]
    fn test_failed_load_is_permanent() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let model: LazyModel<dyn OrientationModel> = LazyModel::new("broken", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AnalyzeError::ModelUnavailable("weights missing".to_string()))
        });

        assert!(model.get().is_none());
        assert!(model.get().is_none());
        assert!(model.is_disabled());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ready_and_unavailable_handles() {
        let ready: LazyModel<dyn EmbeddingModel> =
            LazyModel::ready("histogram", Arc::new(HistogramEmbedder));
        assert!(ready.get().is_some());

        let missing: LazyModel<dyn EmbeddingModel> = LazyModel::unavailable("none");
        assert!(missing.get().is_none());
        assert!(missing.is_disabled());
    }

    #[test]
    fn test_histogram_embedding_is_normalized() {
        let img: RgbImage = ImageBuffer::from_fn(32, 32, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
        let vector = HistogramEmbedder.embed(&DynamicImage::ImageRgb8(img)).unwrap();

        assert_eq!(vector.len(), 48);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_edge_brightness_orientation() {
        let model = EdgeBrightnessOrientation::default();

        // Bright band on the left: the sky is on the left, rotate clockwise
        let sideways = ImageBuffer::from_fn(100, 60, |x, _| Luma([if x < 10 { 240u8 } else { 40 }]));
        let rotation = model.detect(&DynamicImage::ImageLuma8(sideways)).unwrap();
        assert_eq!(rotation, Rotation::Clockwise90);
        assert_eq!(rotation.degrees(), 90);

        // Bright top already upright
        let upright = ImageBuffer::from_fn(100, 60, |_, y| Luma([if y < 6 { 240u8 } else { 40 }]));
        assert_eq!(model.detect(&DynamicImage::ImageLuma8(upright)).unwrap(), Rotation::None);

        // Flat image gives no suggestion
        let flat = ImageBuffer::from_pixel(50, 50, Luma([128u8]));
        assert_eq!(model.detect(&DynamicImage::ImageLuma8(flat)).unwrap(), Rotation::None);
    }

    #[test]
    fn test_rotation_classes() {
        let degrees: Vec<_> = (0..4)
            .filter_map(Rotation::from_class)
            .map(|r| r.degrees())
            .collect();
        assert_eq!(degrees, vec![0, 90, 180, -90]);
        assert_eq!(Rotation::from_class(4), None);
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::CounterClockwise90));
        assert_eq!(Rotation::from_degrees(270), Some(Rotation::CounterClockwise90));
        assert_eq!(Rotation::from_degrees(180), Some(Rotation::Half));
        assert_eq!(Rotation::from_degrees(0), Some(Rotation::None));
        assert_eq!(Rotation::from_degrees(45), None);
    }
}
