//! Job descriptions and results

use artifact_cache::{DecodeParams, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Make sure a thumbnail is cached for every file
    Scan,
    /// Read XMP rating and colour label from the metadata artifact
    RateFetch,
    BlurDetect,
    RotationDetect,
    SimilarityEmbed,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Scan => "scan",
            JobKind::RateFetch => "rate_fetch",
            JobKind::BlurDetect => "blur_detect",
            JobKind::RotationDetect => "rotation_detect",
            JobKind::SimilarityEmbed => "similarity_embed",
        };
        f.write_str(name)
    }
}

/// Per-job overrides; unset fields fall back to the coordinator's [`crate::JobConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOptions {
    /// Decode parameters forwarded to the artifact pipeline
    pub params: Option<DecodeParams>,
    pub blur_threshold: Option<f64>,
}

impl JobOptions {
    pub fn with_params(mut self, params: DecodeParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_blur_threshold(mut self, threshold: f64) -> Self {
        self.blur_threshold = Some(threshold);
        self
    }
}

/// Successful output of one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutput {
    Scanned {
        bytes: usize,
    },
    Rating {
        rating: Option<u8>,
        label: Option<String>,
    },
    Blur {
        variance: f64,
        is_blurred: bool,
    },
    Rotation {
        /// Clockwise rotation that would make the image upright: 0, 90, 180 or -90
        degrees: i32,
    },
    /// `None` when no embedding model is available
    Embedding(Option<Vec<f32>>),
}

/// Aggregated outcome of a job, keyed by path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub kind: JobKind,
    pub succeeded: BTreeMap<PathBuf, JobOutput>,
    pub failed: BTreeMap<PathBuf, ErrorKind>,
    /// Units never started because the job was cancelled first
    pub skipped: BTreeSet<PathBuf>,
    pub cancelled: bool,
}

impl JobResult {
    pub(crate) fn new(job_id: JobId, kind: JobKind) -> Self {
        Self {
            job_id,
            kind,
            succeeded: BTreeMap::new(),
            failed: BTreeMap::new(),
            skipped: BTreeSet::new(),
            cancelled: false,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            cancelled: self.cancelled,
        }
    }

    /// Failure counts per error kind, for diagnostics.
    pub fn failures_by_kind(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.failed.values() {
            *counts.entry(kind.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded, self.failed)?;
        if self.cancelled {
            write!(f, " (cancelled, {} skipped)", self.skipped)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_display() {
        let mut result = JobResult::new(JobId(7), JobKind::BlurDetect);
        result.succeeded.insert(
            PathBuf::from("/a.jpg"),
            JobOutput::Blur {
                variance: 12.0,
                is_blurred: true,
            },
        );
        result.failed.insert(PathBuf::from("/b.jpg"), ErrorKind::DecodeError);
        result.failed.insert(PathBuf::from("/c.jpg"), ErrorKind::DecodeError);

        assert_eq!(result.summary().to_string(), "1 succeeded, 2 failed");
        assert_eq!(result.total(), 3);
        assert_eq!(result.failures_by_kind().get("decode error"), Some(&2));

        result.skipped.insert(PathBuf::from("/d.jpg"));
        result.cancelled = true;
        assert_eq!(
            result.summary().to_string(),
            "1 succeeded, 2 failed (cancelled, 1 skipped)"
        );
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId(3).to_string(), "job-3");
        assert_eq!(JobKind::RotationDetect.to_string(), "rotation_detect");
    }
}
