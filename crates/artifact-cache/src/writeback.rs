//! Writing ratings, labels and orientation back into source files
//!
//! Changes go into the file itself (XMP rating and label, EXIF orientation)
//! so other photo tools see them. Rotation is metadata-only and never
//! re-encodes pixels.

use crate::error::ArtifactError;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Highest XMP star rating
pub const MAX_RATING: u8 = 5;

/// Writes annotations into source files. Must be safe to call from many
/// threads at once.
pub trait MetadataWriter: Send + Sync {
    /// Set the XMP rating (0-5); `None` removes it.
    fn write_rating(&self, path: &Path, rating: Option<u8>) -> Result<(), ArtifactError>;

    /// Set the XMP colour label; `None` removes it.
    fn write_label(&self, path: &Path, label: Option<&str>) -> Result<(), ArtifactError>;

    /// Set the EXIF orientation tag (1-8).
    fn write_orientation(&self, path: &Path, orientation: u16) -> Result<(), ArtifactError>;
}

/// Default writer, editing files in place with `exiftool`.
#[derive(Debug, Clone)]
pub struct ExiftoolWriter {
    exiftool: PathBuf,
}

impl Default for ExiftoolWriter {
    fn default() -> Self {
        Self {
            exiftool: PathBuf::from("exiftool"),
        }
    }
}

impl ExiftoolWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific `exiftool` binary instead of the one on `PATH`.
    pub fn with_exiftool(mut self, exiftool: impl Into<PathBuf>) -> Self {
        self.exiftool = exiftool.into();
        self
    }

    fn set_tag(&self, path: &Path, assignment: String) -> Result<(), ArtifactError> {
        if !path.is_file() {
            return Err(ArtifactError::NotFound(path.to_path_buf()));
        }

        let output = Command::new(&self.exiftool)
            .arg(&assignment)
            .arg("-overwrite_original")
            .arg(path)
            .output()
            .map_err(|e| {
                ArtifactError::write(path, format!("failed to run {:?}: {}", self.exiftool, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ArtifactError::write(path, format!("exiftool: {}", stderr)));
        }
        tracing::debug!("Wrote {} to {:?}", assignment, path);
        Ok(())
    }
}

impl MetadataWriter for ExiftoolWriter {
    fn write_rating(&self, path: &Path, rating: Option<u8>) -> Result<(), ArtifactError> {
        match rating {
            Some(stars) if stars > MAX_RATING => Err(ArtifactError::write(
                path,
                format!("rating {} is outside 0-{}", stars, MAX_RATING),
            )),
            Some(stars) => self.set_tag(path, format!("-XMP:Rating={}", stars)),
            None => self.set_tag(path, "-XMP:Rating=".to_string()),
        }
    }

    fn write_label(&self, path: &Path, label: Option<&str>) -> Result<(), ArtifactError> {
        let label = label.map(str::trim).unwrap_or_default();
        self.set_tag(path, format!("-XMP:Label={}", label))
    }

    fn write_orientation(&self, path: &Path, orientation: u16) -> Result<(), ArtifactError> {
        if !(1..=8).contains(&orientation) {
            return Err(ArtifactError::write(
                path,
                format!("orientation {} is outside 1-8", orientation),
            ));
        }
        self.set_tag(path, format!("-EXIF:Orientation#={}", orientation))
    }
}

/// EXIF orientation after turning an image `degrees` clockwise (90, 180 or
/// -90; 270 is accepted as -90). Mirrored orientations stay mirrored.
///
/// `None` for any other angle or an orientation outside 1-8.
pub fn rotate_orientation(current: u16, degrees: i32) -> Option<u16> {
    // Clockwise quarter-turn cycles for plain and mirrored orientations
    const PLAIN: [u16; 4] = [1, 6, 3, 8];
    const MIRRORED: [u16; 4] = [2, 5, 4, 7];

    let steps = match degrees.rem_euclid(360) {
        0 => 0,
        90 => 1,
        180 => 2,
        270 => 3,
        _ => return None,
    };
    let cycle = if PLAIN.contains(&current) {
        PLAIN
    } else if MIRRORED.contains(&current) {
        MIRRORED
    } else {
        return None;
    };
    let position = cycle.iter().position(|&o| o == current)?;
    Some(cycle[(position + steps) % 4])
}
