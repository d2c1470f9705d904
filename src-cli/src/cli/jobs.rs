//! Batch analysis commands: `scan`, `ratings`, `blur`, `rotation`, `similar`,
//! plus the `rate` and `label` edits.
//!
//! Each command discovers the images under a folder, runs one job over them,
//! persists the outputs to the folder's annotation store and prints a summary.
//! Edits are written into the files first and recorded only once they stick.

use crate::config::Config;
use anyhow::Context;
use artifact_cache::{ArtifactPipeline, ExiftoolWriter};
use batch_jobs::{
    apply_rotations, discover_images, embeddings_from, write_labels, write_ratings, ApplyOutcome,
    Clusterer, JobCoordinator, JobKind, JobOptions, JobOutput, JobResult, Rotation,
    ThresholdClusterer,
};
use clap::{ArgGroup, Args};
use selection::{resolve, SelectionQuery};
use session_db::SessionDb;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct FolderArgs {
    /// Folder to process (searched recursively)
    #[arg(required = true)]
    pub dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct BlurArgs {
    #[command(flatten)]
    pub folder: FolderArgs,

    /// Laplacian variance below which an image counts as blurred
    #[arg(short, long)]
    pub threshold: Option<f64>,

    /// Currently focused image; prints where focus lands once blurry images are hidden
    #[arg(long)]
    pub anchor: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SimilarArgs {
    #[command(flatten)]
    pub folder: FolderArgs,

    /// Minimum cosine similarity for two images to share a group
    #[arg(short, long, default_value = "0.92")]
    pub threshold: f32,
}

#[derive(Args, Debug)]
pub struct RotationArgs {
    #[command(flatten)]
    pub folder: FolderArgs,

    /// Write the suggested rotations into the files (EXIF orientation)
    #[arg(long)]
    pub apply: bool,

    /// Currently focused image; prints where focus lands once rotated images are hidden
    #[arg(long, requires = "apply")]
    pub anchor: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("value").required(true).args(["stars", "clear"])))]
pub struct RateArgs {
    #[command(flatten)]
    pub folder: FolderArgs,

    /// Star rating to write
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=5))]
    pub stars: Option<u8>,

    /// Remove the rating instead
    #[arg(long)]
    pub clear: bool,

    /// Files to rate
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("value").required(true).args(["label", "clear"])))]
pub struct LabelArgs {
    #[command(flatten)]
    pub folder: FolderArgs,

    /// Colour label to write, e.g. Red
    #[arg(short, long)]
    pub label: Option<String>,

    /// Remove the label instead
    #[arg(long)]
    pub clear: bool,

    /// Files to label
    #[arg(required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,
}

/// A folder's images plus everything needed to run jobs over them.
struct Session {
    dir: PathBuf,
    paths: Vec<PathBuf>,
    coordinator: JobCoordinator,
}

impl Session {
    fn open(config: &Config, dir: &Path) -> anyhow::Result<Self> {
        let dir = dir
            .canonicalize()
            .with_context(|| format!("Folder not found: {}", dir.display()))?;
        let paths = discover_images(&dir)
            .with_context(|| format!("Failed to read folder: {}", dir.display()))?;
        tracing::info!("Found {} images in {}", paths.len(), dir.display());

        let pipeline = ArtifactPipeline::with_default_decoder(&config.cache)
            .context("Failed to open artifact caches")?;
        let coordinator = JobCoordinator::new(pipeline, config.jobs.clone())?;

        Ok(Self {
            dir,
            paths,
            coordinator,
        })
    }

    fn run(&self, kind: JobKind, options: JobOptions) -> anyhow::Result<JobResult> {
        let handle = self.coordinator.submit_with_progress(
            kind,
            self.paths.clone(),
            options,
            |completed, total| tracing::debug!("{}/{} done", completed, total),
        )?;
        let result = handle.wait();

        println!("{}: {}", kind, result.summary());
        for (error, count) in result.failures_by_kind() {
            println!("  {}: {}", error, count);
        }
        for (path, error) in &result.failed {
            tracing::debug!("{} failed: {}", path.display(), error);
        }

        self.coordinator.pipeline().flush()?;
        Ok(result)
    }

    fn annotations(&self, activity: impl Display) -> anyhow::Result<SessionDb> {
        let db = SessionDb::open(&self.dir)?;
        db.set_meta("root_folder", &self.dir.to_string_lossy())?;
        db.set_meta(&format!("last_{}", activity), &chrono::Utc::now().to_rfc3339())?;
        Ok(db)
    }

    fn pipeline(&self) -> &ArtifactPipeline {
        self.coordinator.pipeline()
    }

    /// Resolve edit targets (relative ones against the folder), keeping only
    /// files the folder contains.
    fn targets(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        let known: HashSet<&PathBuf> = self.paths.iter().collect();
        let mut targets = Vec::new();
        for file in files {
            let joined = self.dir.join(file);
            let resolved = joined.canonicalize().unwrap_or(joined);
            if known.contains(&resolved) {
                targets.push(resolved);
            } else {
                println!("  skipped (not in folder): {}", file.display());
            }
        }
        targets
    }
}

fn report(action: &str, outcome: &ApplyOutcome) {
    println!(
        "{}: {} applied, {} failed",
        action,
        outcome.applied.len(),
        outcome.failed.len()
    );
    for (path, error) in &outcome.failed {
        println!("  {}: {}", error, path.display());
    }
}

pub fn scan(config: &Config, args: FolderArgs) -> anyhow::Result<()> {
    let session = Session::open(config, &args.dir)?;
    session.run(JobKind::Scan, JobOptions::default())?;
    session.annotations(JobKind::Scan)?;
    Ok(())
}

pub fn ratings(config: &Config, args: FolderArgs) -> anyhow::Result<()> {
    let session = Session::open(config, &args.dir)?;
    let result = session.run(JobKind::RateFetch, JobOptions::default())?;

    let entries = rating_entries(&result);
    let rated = entries.iter().filter(|(_, rating, _)| rating.is_some()).count();
    session.annotations(JobKind::RateFetch)?.record_rating(&entries)?;
    println!("{} of {} images carry a rating", rated, entries.len());
    Ok(())
}

pub fn blur(config: &Config, args: BlurArgs) -> anyhow::Result<()> {
    let session = Session::open(config, &args.folder.dir)?;
    let options = match args.threshold {
        Some(threshold) => JobOptions::default().with_blur_threshold(threshold),
        None => JobOptions::default(),
    };
    let result = session.run(JobKind::BlurDetect, options)?;

    let entries = blur_entries(&result);
    session.annotations(JobKind::BlurDetect)?.record_blur(&entries)?;

    let blurred: HashSet<PathBuf> = entries
        .into_iter()
        .filter(|(_, _, is_blurred)| *is_blurred)
        .map(|(path, _, _)| path)
        .collect();
    println!("{} blurred", blurred.len());
    let mut listed: Vec<_> = blurred.iter().collect();
    listed.sort();
    for path in listed {
        println!("  {}", path.display());
    }

    if let Some(anchor) = args.anchor {
        let anchor = anchor.canonicalize().unwrap_or(anchor);
        let query = SelectionQuery::from_removal(session.paths.clone(), Some(anchor), blurred);
        match resolve(query) {
            Some(next) => println!("Next: {}", next.display()),
            None => println!("Next: (nothing left)"),
        }
    }
    Ok(())
}

pub fn rotation(config: &Config, args: RotationArgs) -> anyhow::Result<()> {
    let session = Session::open(config, &args.folder.dir)?;
    let result = session.run(JobKind::RotationDetect, JobOptions::default())?;

    let entries = rotation_entries(&result);
    let db = session.annotations(JobKind::RotationDetect)?;
    db.record_rotation(&entries)?;
    for (path, degrees) in entries.iter().filter(|(_, degrees)| *degrees != 0) {
        println!("  {:>4}  {}", degrees, path.display());
    }
    if !args.apply {
        return Ok(());
    }

    let outcome = apply_rotations(session.pipeline(), &ExiftoolWriter::new(), &accepted_rotations(&entries));
    report("rotate", &outcome);
    // Applied files are upright now; nothing left to suggest
    let settled: Vec<_> = outcome.applied.keys().map(|path| (path.clone(), 0)).collect();
    db.record_rotation(&settled)?;

    if let Some(anchor) = args.anchor {
        let anchor = anchor.canonicalize().unwrap_or(anchor);
        let query =
            SelectionQuery::from_removal(session.paths.clone(), Some(anchor), outcome.applied_paths());
        match resolve(query) {
            Some(next) => println!("Next: {}", next.display()),
            None => println!("Next: (nothing left)"),
        }
    }
    Ok(())
}

pub fn rate(config: &Config, args: RateArgs) -> anyhow::Result<()> {
    let session = Session::open(config, &args.folder.dir)?;
    let rating = if args.clear { None } else { args.stars };
    let entries: Vec<_> = session
        .targets(&args.files)
        .into_iter()
        .map(|path| (path, rating))
        .collect();

    let outcome = write_ratings(session.pipeline(), &ExiftoolWriter::new(), &entries);
    report("rate", &outcome);

    let db = session.annotations("rate")?;
    for path in outcome.applied.keys() {
        db.update_rating(path, rating)?;
    }
    session.pipeline().flush()?;
    Ok(())
}

pub fn label(config: &Config, args: LabelArgs) -> anyhow::Result<()> {
    let session = Session::open(config, &args.folder.dir)?;
    let label = if args.clear { None } else { args.label };
    let entries: Vec<_> = session
        .targets(&args.files)
        .into_iter()
        .map(|path| (path, label.clone()))
        .collect();

    let outcome = write_labels(session.pipeline(), &ExiftoolWriter::new(), &entries);
    report("label", &outcome);

    let db = session.annotations("label")?;
    for path in outcome.applied.keys() {
        db.update_label(path, label.as_deref())?;
    }
    session.pipeline().flush()?;
    Ok(())
}

pub fn similar(config: &Config, args: SimilarArgs) -> anyhow::Result<()> {
    let session = Session::open(config, &args.folder.dir)?;
    let result = session.run(JobKind::SimilarityEmbed, JobOptions::default())?;

    let embeddings = embeddings_from(&result);
    if embeddings.len() < result.succeeded.len() {
        tracing::warn!(
            "{} images have no embedding",
            result.succeeded.len() - embeddings.len()
        );
    }
    let clusters = ThresholdClusterer {
        threshold: args.threshold,
    }
    .cluster(&embeddings);
    session.annotations(JobKind::SimilarityEmbed)?.record_cluster(&clusters)?;

    let groups = group_members(&clusters);
    println!("{} similar groups", groups.len());
    for (cluster, members) in groups {
        println!("  group {} ({} images)", cluster, members.len());
        for path in members {
            println!("    {}", path.display());
        }
    }
    Ok(())
}

fn rating_entries(result: &JobResult) -> Vec<(PathBuf, Option<u8>, Option<String>)> {
    result
        .succeeded
        .iter()
        .filter_map(|(path, output)| match output {
            JobOutput::Rating { rating, label } => Some((path.clone(), *rating, label.clone())),
            _ => None,
        })
        .collect()
}

fn blur_entries(result: &JobResult) -> Vec<(PathBuf, f64, bool)> {
    result
        .succeeded
        .iter()
        .filter_map(|(path, output)| match output {
            JobOutput::Blur {
                variance,
                is_blurred,
            } => Some((path.clone(), *variance, *is_blurred)),
            _ => None,
        })
        .collect()
}

fn rotation_entries(result: &JobResult) -> Vec<(PathBuf, i32)> {
    result
        .succeeded
        .iter()
        .filter_map(|(path, output)| match output {
            JobOutput::Rotation { degrees } => Some((path.clone(), *degrees)),
            _ => None,
        })
        .collect()
}

/// Non-zero suggestions as rotations to write.
fn accepted_rotations(entries: &[(PathBuf, i32)]) -> Vec<(PathBuf, Rotation)> {
    entries
        .iter()
        .filter_map(|(path, degrees)| match Rotation::from_degrees(*degrees) {
            Some(Rotation::None) => None,
            Some(rotation) => Some((path.clone(), rotation)),
            None => {
                tracing::warn!("Ignoring unexpected rotation {} for {:?}", degrees, path);
                None
            }
        })
        .collect()
}

/// Clusters with more than one member, keyed by cluster id.
fn group_members(clusters: &BTreeMap<PathBuf, usize>) -> BTreeMap<usize, Vec<&PathBuf>> {
    let mut groups: BTreeMap<usize, Vec<&PathBuf>> = BTreeMap::new();
    for (path, cluster) in clusters {
        groups.entry(*cluster).or_default().push(path);
    }
    groups.retain(|_, members| members.len() > 1);
    groups
}
