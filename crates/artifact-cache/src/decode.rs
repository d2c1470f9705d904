//! Format dispatch and the default artifact decoder
//!
//! Each source file is classified once from its extension into a
//! [`SourceFormat`]; the [`ImageDecoder`] then has one handler per variant:
//!
//! - **Standard** rasters are decoded with the `image` crate
//! - **RAW** files give up their embedded JPEG via `exiftool`
//! - **Metadata-only** formats (HEIC/HEIF) only produce metadata records

use crate::error::ArtifactError;
use crate::{ArtifactKind, DecodeParams};
use chrono::{DateTime, NaiveDateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageReader};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

const STANDARD_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "webp", "bmp"];
const RAW_EXTENSIONS: &[&str] = &[
    "arw", "cr2", "cr3", "nef", "dng", "orf", "raf", "rw2", "pef", "srw", "raw",
];
const METADATA_ONLY_EXTENSIONS: &[&str] = &["heic", "heif"];

/// How a source file is handled, chosen from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Standard,
    Raw,
    MetadataOnly,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let ext = ext.as_str();
        if STANDARD_EXTENSIONS.contains(&ext) {
            Some(SourceFormat::Standard)
        } else if RAW_EXTENSIONS.contains(&ext) {
            Some(SourceFormat::Raw)
        } else if METADATA_ONLY_EXTENSIONS.contains(&ext) {
            Some(SourceFormat::MetadataOnly)
        } else {
            None
        }
    }

    /// Every extension the decoder accepts, lowercase.
    pub fn supported_extensions() -> impl Iterator<Item = &'static str> {
        STANDARD_EXTENSIONS
            .iter()
            .chain(RAW_EXTENSIONS)
            .chain(METADATA_ONLY_EXTENSIONS)
            .copied()
    }

    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_some()
    }
}

/// Turns a source file into artifact bytes. Must be safe to call from many
/// threads at once.
pub trait Decoder: Send + Sync {
    fn decode(
        &self,
        path: &Path,
        kind: ArtifactKind,
        params: &DecodeParams,
    ) -> Result<Vec<u8>, ArtifactError>;
}

impl<F> Decoder for F
where
    F: Fn(&Path, ArtifactKind, &DecodeParams) -> Result<Vec<u8>, ArtifactError> + Send + Sync,
{
    fn decode(
        &self,
        path: &Path,
        kind: ArtifactKind,
        params: &DecodeParams,
    ) -> Result<Vec<u8>, ArtifactError> {
        self(path, kind, params)
    }
}

/// The metadata artifact, stored as JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub file_size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub format: Option<SourceFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub capture_time: Option<NaiveDateTime>,
    /// EXIF orientation tag (1-8)
    pub orientation: Option<u16>,
    /// XMP rating, 0-5
    pub rating: Option<u8>,
    /// XMP colour label, e.g. "Red"
    pub label: Option<String>,
}

impl MetadataRecord {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ArtifactError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ArtifactError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Default decoder backed by `image` and `exiftool`.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    exiftool: PathBuf,
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self {
            exiftool: PathBuf::from("exiftool"),
        }
    }
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `exiftool` binary instead of the one on `PATH`.
    pub fn with_exiftool(mut self, exiftool: impl Into<PathBuf>) -> Self {
        self.exiftool = exiftool.into();
        self
    }

    fn render(&self, path: &Path, format: SourceFormat, params: &DecodeParams) -> Result<Vec<u8>, ArtifactError> {
        let img = match format {
            SourceFormat::Standard => {
                let bytes = fs::read(path).map_err(|e| ArtifactError::from_source_io(path, e))?;
                let img = decode_bytes(path, &bytes)?;
                apply_orientation(img, read_exif(&bytes).orientation)
            }
            SourceFormat::Raw => {
                let jpeg = self.extract_embedded_jpeg(path)?;
                let img = decode_bytes(path, &jpeg)?;
                apply_orientation(img, read_exif(&jpeg).orientation)
            }
            SourceFormat::MetadataOnly => {
                return Err(ArtifactError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    format: "metadata-only".to_string(),
                });
            }
        };

        let img = match params.max_dimension {
            Some(max_dim) => resize_image(img, max_dim),
            None => img,
        };
        let img = if params.apply_auto_edits { auto_edit(img) } else { img };
        encode_jpeg(path, &img, params.jpeg_quality)
    }

    /// Extract the embedded JPEG from a RAW file, trying the display-sized
    /// preview first and the full-size JPEG second.
    fn extract_embedded_jpeg(&self, path: &Path) -> Result<Vec<u8>, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::NotFound(path.to_path_buf()));
        }

        let mut last_error = String::new();
        for tag in ["PreviewImage", "JpgFromRaw"] {
            let output = Command::new(&self.exiftool)
                .arg("-b")
                .arg(format!("-{}", tag))
                .arg(path)
                .output()
                .map_err(|e| {
                    ArtifactError::decode(path, format!("failed to run {:?}: {}", self.exiftool, e))
                })?;

            if !output.status.success() {
                last_error = String::from_utf8_lossy(&output.stderr).trim().to_string();
                continue;
            }
            if !output.stdout.is_empty() {
                return Ok(output.stdout);
            }
            last_error = format!("no embedded {}", tag);
        }

        Err(ArtifactError::decode(path, format!("exiftool: {}", last_error)))
    }

    fn metadata(&self, path: &Path, format: SourceFormat) -> Result<Vec<u8>, ArtifactError> {
        let stat = fs::metadata(path).map_err(|e| ArtifactError::from_source_io(path, e))?;
        let bytes = fs::read(path).map_err(|e| ArtifactError::from_source_io(path, e))?;

        let exif = read_exif(&bytes);
        let (width, height) = match format {
            SourceFormat::Standard => image::image_dimensions(path)
                .map(|(w, h)| (Some(w), Some(h)))
                .unwrap_or((None, None)),
            _ => (None, None),
        };

        let sidecar = read_sidecar(path);
        let embedded = find_xmp_packet(&bytes);
        let xmp_value = |name: &str| {
            sidecar
                .as_deref()
                .and_then(|xmp| xmp_field(xmp, name))
                .or_else(|| embedded.as_deref().and_then(|xmp| xmp_field(xmp, name)))
        };

        let record = MetadataRecord {
            file_size: stat.len(),
            modified: stat.modified().ok().map(DateTime::<Utc>::from),
            format: Some(format),
            width,
            height,
            camera_make: exif.make,
            camera_model: exif.model,
            capture_time: exif.capture_time,
            orientation: exif.orientation,
            rating: xmp_value("Rating").and_then(|raw| parse_rating(&raw)),
            label: xmp_value("Label").filter(|label| !label.is_empty()),
        };
        record.to_json()
    }
}

impl Decoder for ImageDecoder {
    fn decode(
        &self,
        path: &Path,
        kind: ArtifactKind,
        params: &DecodeParams,
    ) -> Result<Vec<u8>, ArtifactError> {
        let format = SourceFormat::from_path(path).ok_or_else(|| ArtifactError::UnsupportedFormat {
            path: path.to_path_buf(),
            format: path
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_else(|| "no extension".to_string()),
        })?;

        match kind {
            ArtifactKind::Thumbnail | ArtifactKind::Preview => self.render(path, format, params),
            ArtifactKind::Metadata => self.metadata(path, format),
        }
    }
}

fn decode_bytes(path: &Path, bytes: &[u8]) -> Result<DynamicImage, ArtifactError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ArtifactError::decode(path, e.to_string()))?
        .decode()
        .map_err(|e| ArtifactError::decode(path, e.to_string()))
}

/// Resize to fit within `max_dim` on the long edge, preserving aspect ratio
fn resize_image(img: DynamicImage, max_dim: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let max_existing = width.max(height);

    // Never upscale
    if max_existing <= max_dim || max_dim == 0 {
        return img;
    }

    let ratio = max_dim as f64 / max_existing as f64;
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);

    img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

/// Rotate pixels upright according to the EXIF orientation tag.
fn apply_orientation(img: DynamicImage, orientation: Option<u16>) -> DynamicImage {
    match orientation {
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        Some(5) => img.rotate90().fliph(),
        Some(6) => img.rotate90(),
        Some(7) => img.rotate270().fliph(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

/// Per-channel contrast stretch followed by a 10% brightness lift.
fn auto_edit(img: DynamicImage) -> DynamicImage {
    let mut rgb = img.to_rgb8();

    let mut low = [u8::MAX; 3];
    let mut high = [u8::MIN; 3];
    for pixel in rgb.pixels() {
        for c in 0..3 {
            low[c] = low[c].min(pixel[c]);
            high[c] = high[c].max(pixel[c]);
        }
    }

    for pixel in rgb.pixels_mut() {
        for c in 0..3 {
            let span = high[c].saturating_sub(low[c]);
            let stretched = if span == 0 {
                pixel[c] as f32
            } else {
                (pixel[c] - low[c]) as f32 * 255.0 / span as f32
            };
            pixel[c] = (stretched * 1.1).round().clamp(0.0, 255.0) as u8;
        }
    }

    DynamicImage::ImageRgb8(rgb)
}

fn encode_jpeg(path: &Path, img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ArtifactError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&img.to_rgb8())
        .map_err(|e| ArtifactError::decode(path, format!("JPEG encode failed: {}", e)))?;
    Ok(buffer)
}

#[derive(Debug, Default)]
struct ExifFields {
    make: Option<String>,
    model: Option<String>,
    capture_time: Option<NaiveDateTime>,
    orientation: Option<u16>,
}

/// Best-effort EXIF read; files without EXIF yield empty fields.
fn read_exif(bytes: &[u8]) -> ExifFields {
    let mut fields = ExifFields::default();
    let Ok(exif) = rexif::parse_buffer(bytes) else {
        return fields;
    };

    for entry in &exif.entries {
        match (&entry.tag, &entry.value) {
            (rexif::ExifTag::Make, rexif::TagValue::Ascii(value)) => {
                fields.make = non_empty(value);
            }
            (rexif::ExifTag::Model, rexif::TagValue::Ascii(value)) => {
                fields.model = non_empty(value);
            }
            (rexif::ExifTag::DateTimeOriginal, rexif::TagValue::Ascii(value)) => {
                fields.capture_time =
                    NaiveDateTime::parse_from_str(value.trim(), "%Y:%m:%d %H:%M:%S").ok();
            }
            (rexif::ExifTag::Orientation, rexif::TagValue::U16(values)) => {
                fields.orientation = values.first().copied().filter(|o| (1..=8).contains(o));
            }
            _ => {}
        }
    }
    fields
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `IMG_0001.xmp` or `IMG_0001.CR2.xmp`, whichever exists first.
fn read_sidecar(path: &Path) -> Option<String> {
    let mut with_suffix = path.as_os_str().to_owned();
    with_suffix.push(".xmp");
    [path.with_extension("xmp"), PathBuf::from(with_suffix)]
        .iter()
        .find_map(|candidate| fs::read_to_string(candidate).ok())
}

fn find_xmp_packet(bytes: &[u8]) -> Option<String> {
    const OPEN: &[u8] = b"<x:xmpmeta";
    const CLOSE: &[u8] = b"</x:xmpmeta>";

    let start = find_subslice(bytes, OPEN)?;
    let len = find_subslice(&bytes[start..], CLOSE)?;
    Some(String::from_utf8_lossy(&bytes[start..start + len + CLOSE.len()]).into_owned())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Value of `xmp:<name>` in either attribute (`xmp:Rating="3"`) or element
/// (`<xmp:Rating>3</xmp:Rating>`) form.
fn xmp_field(xmp: &str, name: &str) -> Option<String> {
    let attribute = format!("xmp:{}=\"", name);
    if let Some(start) = xmp.find(&attribute) {
        let rest = &xmp[start + attribute.len()..];
        let end = rest.find('"')?;
        return Some(rest[..end].trim().to_string());
    }

    let open = format!("<xmp:{}>", name);
    let close = format!("</xmp:{}>", name);
    let start = xmp.find(&open)? + open.len();
    let end = xmp[start..].find(&close)?;
    Some(xmp[start..start + end].trim().to_string())
}

/// XMP allows -1 for "rejected"; anything outside 0-5 is clamped.
fn parse_rating(raw: &str) -> Option<u8> {
    let value: f64 = raw.trim().parse().ok()?;
    Some(value.round().clamp(0.0, 5.0) as u8)
}
