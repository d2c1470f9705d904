//! Bounded worker pool for batch jobs
//!
//! `submit` returns immediately with a [`JobHandle`]; a driver thread feeds
//! the job's paths through a shared rayon pool. Every unit checks the job's
//! cancellation flag before it starts. Units already running when `cancel` is
//! called finish normally, so no artifact is ever half written.

use crate::analyze::{run_unit, Analyzers, UnitContext};
use crate::job::{JobId, JobKind, JobOptions, JobOutput, JobResult};
use crate::JobConfig;
use artifact_cache::{ArtifactPipeline, ErrorKind};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Failed to spawn job driver: {0}")]
    Spawn(#[from] std::io::Error),
}

enum UnitOutcome {
    Succeeded(JobOutput),
    Failed(ErrorKind),
    Skipped,
}

struct JobState {
    cancel: AtomicBool,
    completed: AtomicUsize,
    finished: AtomicBool,
}

/// Caller's view of a running job.
pub struct JobHandle {
    id: JobId,
    kind: JobKind,
    total: usize,
    paths: Arc<Vec<PathBuf>>,
    state: Arc<JobState>,
    driver: Mutex<Option<JoinHandle<JobResult>>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Ask the job to stop. Units not yet started are skipped.
    pub fn cancel(&self) {
        if !self.state.cancel.swap(true, Ordering::SeqCst) {
            tracing::info!("Cancelling {} ({})", self.id, self.kind);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancel.load(Ordering::SeqCst)
    }

    /// `(completed, total)`; `completed` counts every unit that has been
    /// processed or skipped and never decreases.
    pub fn progress(&self) -> (usize, usize) {
        (self.state.completed.load(Ordering::SeqCst), self.total)
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// Block until the job finishes and take its result.
    pub fn wait(self) -> JobResult {
        let driver = self.driver.lock().take();
        let joined = driver.map(|handle| handle.join());
        match joined {
            Some(Ok(result)) => result,
            _ => {
                tracing::error!("{} driver terminated abnormally", self.id);
                let mut result = JobResult::new(self.id, self.kind);
                result.failed = self
                    .paths
                    .iter()
                    .map(|path| (path.clone(), ErrorKind::DecodeError))
                    .collect();
                result.cancelled = self.is_cancelled();
                result
            }
        }
    }
}

type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Runs batch jobs against one artifact pipeline on a shared bounded pool.
pub struct JobCoordinator {
    pipeline: ArtifactPipeline,
    analyzers: Arc<Analyzers>,
    config: Arc<JobConfig>,
    pool: Arc<ThreadPool>,
    next_id: AtomicU64,
}

impl JobCoordinator {
    pub fn new(pipeline: ArtifactPipeline, config: JobConfig) -> Result<Self, CoordinatorError> {
        Self::with_analyzers(pipeline, config, Analyzers::default())
    }

    pub fn with_analyzers(
        pipeline: ArtifactPipeline,
        config: JobConfig,
        analyzers: Analyzers,
    ) -> Result<Self, CoordinatorError> {
        let workers = config.worker_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("photosift-worker-{}", i))
            .build()?;
        tracing::debug!("Job coordinator using {} workers", workers);

        Ok(Self {
            pipeline,
            analyzers: Arc::new(analyzers),
            config: Arc::new(config),
            pool: Arc::new(pool),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn pipeline(&self) -> &ArtifactPipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn analyzers(&self) -> &Analyzers {
        &self.analyzers
    }

    /// Start a job over `paths` and return without waiting for it.
    ///
    /// Duplicate paths are processed once.
    pub fn submit(
        &self,
        kind: JobKind,
        paths: Vec<PathBuf>,
        options: JobOptions,
    ) -> Result<JobHandle, CoordinatorError> {
        self.spawn_job(kind, paths, options, None)
    }

    /// Like [`submit`](Self::submit), calling `progress(completed, total)`
    /// from the worker threads after every unit.
    pub fn submit_with_progress<F>(
        &self,
        kind: JobKind,
        paths: Vec<PathBuf>,
        options: JobOptions,
        progress: F,
    ) -> Result<JobHandle, CoordinatorError>
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.spawn_job(kind, paths, options, Some(Arc::new(progress)))
    }

    /// Submit and block until the result is ready.
    pub fn run(
        &self,
        kind: JobKind,
        paths: Vec<PathBuf>,
        options: JobOptions,
    ) -> Result<JobResult, CoordinatorError> {
        Ok(self.submit(kind, paths, options)?.wait())
    }

    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }

    pub fn progress(&self, handle: &JobHandle) -> (usize, usize) {
        handle.progress()
    }

    fn spawn_job(
        &self,
        kind: JobKind,
        paths: Vec<PathBuf>,
        options: JobOptions,
        on_progress: Option<Arc<ProgressFn>>,
    ) -> Result<JobHandle, CoordinatorError> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut seen = HashSet::new();
        let paths: Arc<Vec<PathBuf>> = Arc::new(
            paths
                .into_iter()
                .filter(|path| seen.insert(path.clone()))
                .collect(),
        );
        let total = paths.len();

        let state = Arc::new(JobState {
            cancel: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        });

        let driver = {
            let pipeline = self.pipeline.clone();
            let analyzers = Arc::clone(&self.analyzers);
            let config = Arc::clone(&self.config);
            let pool = Arc::clone(&self.pool);
            let paths = Arc::clone(&paths);
            let state = Arc::clone(&state);

            thread::Builder::new()
                .name(format!("photosift-{}", id))
                .spawn(move || {
                    let ctx = UnitContext {
                        pipeline: &pipeline,
                        analyzers: &analyzers,
                        config: &config,
                        options: &options,
                    };
                    let result = execute(id, kind, &ctx, &pool, &paths, &state, on_progress.as_deref());
                    state.finished.store(true, Ordering::SeqCst);
                    result
                })?
        };

        tracing::info!("Started {} ({}) over {} files", id, kind, total);

        Ok(JobHandle {
            id,
            kind,
            total,
            paths,
            state,
            driver: Mutex::new(Some(driver)),
        })
    }
}

fn execute(
    id: JobId,
    kind: JobKind,
    ctx: &UnitContext<'_>,
    pool: &ThreadPool,
    paths: &[PathBuf],
    state: &JobState,
    on_progress: Option<&ProgressFn>,
) -> JobResult {
    let total = paths.len();

    let outcomes: Vec<(PathBuf, UnitOutcome)> = pool.install(|| {
        paths
            .par_iter()
            .with_max_len(1)
            .map(|path| {
                let outcome = if state.cancel.load(Ordering::SeqCst) {
                    UnitOutcome::Skipped
                } else {
                    process(ctx, kind, path)
                };

                let completed = state.completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = on_progress {
                    callback(completed, total);
                }
                (path.clone(), outcome)
            })
            .collect()
    });

    let mut result = JobResult::new(id, kind);
    for (path, outcome) in outcomes {
        match outcome {
            UnitOutcome::Succeeded(output) => {
                result.succeeded.insert(path, output);
            }
            UnitOutcome::Failed(error) => {
                result.failed.insert(path, error);
            }
            UnitOutcome::Skipped => {
                result.skipped.insert(path);
            }
        }
    }
    result.cancelled = state.cancel.load(Ordering::SeqCst);

    if result.cancelled {
        tracing::info!("{} ({}) cancelled: {}", id, kind, result.summary());
    } else {
        tracing::info!("{} ({}) finished: {}", id, kind, result.summary());
    }
    result
}

/// Run one unit, turning errors and panics into a per-path failure.
fn process(ctx: &UnitContext<'_>, kind: JobKind, path: &Path) -> UnitOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| run_unit(ctx, kind, path))) {
        Ok(Ok(output)) => UnitOutcome::Succeeded(output),
        Ok(Err(e)) => {
            tracing::warn!("{} failed for {:?}: {}", kind, path, e);
            UnitOutcome::Failed(e.kind())
        }
        Err(_) => {
            tracing::error!("{} panicked for {:?}", kind, path);
            UnitOutcome::Failed(ErrorKind::DecodeError)
        }
    }
}
