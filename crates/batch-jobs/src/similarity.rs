//! Grouping of embedding vectors into similarity clusters

use crate::job::{JobOutput, JobResult};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Maps a set of embeddings to cluster ids. Ids are dense and start at 0.
pub trait Clusterer: Send + Sync {
    fn cluster(&self, embeddings: &[(PathBuf, Vec<f32>)]) -> BTreeMap<PathBuf, usize>;
}

/// Greedy single pass: each vector joins the first cluster whose founding
/// member is at least `threshold` cosine-similar, otherwise founds a new one.
#[derive(Debug, Clone)]
pub struct ThresholdClusterer {
    pub threshold: f32,
}

impl Default for ThresholdClusterer {
    fn default() -> Self {
        Self { threshold: 0.92 }
    }
}

impl Clusterer for ThresholdClusterer {
    fn cluster(&self, embeddings: &[(PathBuf, Vec<f32>)]) -> BTreeMap<PathBuf, usize> {
        let mut founders: Vec<&[f32]> = Vec::new();
        let mut assignments = BTreeMap::new();

        for (path, vector) in embeddings {
            let existing = founders
                .iter()
                .position(|founder| cosine_similarity(founder, vector) >= self.threshold);
            let cluster = match existing {
                Some(index) => index,
                None => {
                    founders.push(vector);
                    founders.len() - 1
                }
            };
            assignments.insert(path.clone(), cluster);
        }

        tracing::debug!(
            "Clustered {} embeddings into {} groups",
            embeddings.len(),
            founders.len()
        );
        assignments
    }
}

/// Cosine similarity; 0.0 when either vector is zero or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Embeddings produced by a similarity job, in path order.
pub fn embeddings_from(result: &JobResult) -> Vec<(PathBuf, Vec<f32>)> {
    result
        .succeeded
        .iter()
        .filter_map(|(path, output)| match output {
            JobOutput::Embedding(Some(vector)) => Some((path.clone(), vector.clone())),
            _ => None,
        })
        .collect()
}
