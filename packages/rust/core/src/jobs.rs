//! Generation job manager.
//!
//! Owns the job table and drives each job through
//! `pending → processing → completed | failed` on a background task.
//! Callers only ever see snapshots; the background task is the single writer
//! of a job once it has been scheduled.
//!
//! Progress while processing:
//! - set to 10 when the job starts
//! - engine-reported progress (0–100) is mapped onto 10..=99
//! - while the engine reports nothing, a fixed tick adds 8 up to 90
//! - exactly 100 on completion, reset to 0 on failure

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use cadmesh_engine::{EngineAdapter, ProgressSink};
use cadmesh_shared::{
    GenerationOptions, GenerationResult, JobConfig, JobError, JobId, JobStatus,
    NormalizedArtifact,
};

/// Progress assigned when a job enters `processing`.
pub const START_PROGRESS: u8 = 10;
/// Step added per fixed tick.
pub const TICK_STEP: u8 = 8;
/// Fixed ticks never push progress past this.
pub const TICK_CEILING: u8 = 90;
/// Highest progress a job can show before it completes.
pub const PROCESSING_CEILING: u8 = 99;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One generation job. Values handed out by [`JobManager`] are snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub model_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub inputs: Vec<NormalizedArtifact>,
    pub options: GenerationOptions,
    pub result: Option<GenerationResult>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh `pending` job. Does not register or schedule anything.
    pub fn new(
        model_id: impl Into<String>,
        inputs: Vec<NormalizedArtifact>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            id: JobId::new(),
            model_id: model_id.into(),
            status: JobStatus::Pending,
            progress: 0,
            inputs,
            options,
            result: None,
            error_detail: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// `pending → processing`. Returns false if the job was not pending.
    pub(crate) fn begin(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Processing;
        self.progress = START_PROGRESS;
        self.started_at = Some(Utc::now());
        true
    }

    /// Raise progress to `to` (clamped to 99). Never lowers it.
    pub(crate) fn advance(&mut self, to: u8) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        let to = to.min(PROCESSING_CEILING);
        if to <= self.progress {
            return false;
        }
        self.progress = to;
        true
    }

    /// `processing → completed`, attaching the result.
    pub(crate) fn complete(&mut self, result: GenerationResult) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Any non-terminal state `→ failed`.
    pub(crate) fn fail(&mut self, detail: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.progress = 0;
        self.result = None;
        self.error_detail = Some(detail.into());
        self.completed_at = Some(Utc::now());
        true
    }
}

/// Map engine progress (0–100) onto the processing band 10..=99.
fn scale_engine_progress(percent: u8) -> u8 {
    let span = u32::from(PROCESSING_CEILING - START_PROGRESS);
    let scaled = u32::from(START_PROGRESS) + u32::from(percent.min(100)) * span / 100;
    scaled as u8
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Outcome of [`JobManager::result`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResultLookup {
    Ready(GenerationResult),
    /// The job exists but has no result (still running, or failed).
    NotReady(JobStatus),
    NotFound,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

type Slot = Arc<RwLock<Job>>;

fn read(slot: &RwLock<Job>) -> RwLockReadGuard<'_, Job> {
    slot.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(slot: &RwLock<Job>) -> RwLockWriteGuard<'_, Job> {
    slot.write().unwrap_or_else(PoisonError::into_inner)
}

/// The background task's handle on its job. Also the engine's progress sink.
struct JobWriter {
    id: JobId,
    slot: Slot,
    engine_reported: AtomicBool,
}

impl JobWriter {
    fn new(slot: Slot) -> Self {
        let id = read(&slot).id.clone();
        Self {
            id,
            slot,
            engine_reported: AtomicBool::new(false),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut Job) -> R) -> R {
        f(&mut write(&self.slot))
    }

    /// Start the job and hand back what the engine call needs.
    fn begin(&self) -> Option<(String, Vec<NormalizedArtifact>, GenerationOptions)> {
        self.update(|job| {
            job.begin()
                .then(|| (job.model_id.clone(), job.inputs.clone(), job.options))
        })
    }

    fn tick(&self) {
        if self.engine_reported.load(Ordering::Acquire) {
            return;
        }
        self.update(|job| {
            let next = job.progress.saturating_add(TICK_STEP).min(TICK_CEILING);
            job.advance(next)
        });
    }

    fn complete(&self, result: GenerationResult) {
        if self.update(|job| job.complete(result)) {
            info!(job_id = %self.id, "job completed");
        }
    }

    fn fail(&self, detail: String) {
        if self.update(|job| job.fail(detail.clone())) {
            warn!(job_id = %self.id, error = %detail, "job failed");
        }
    }
}

impl ProgressSink for JobWriter {
    fn report(&self, percent: u8) {
        self.engine_reported.store(true, Ordering::Release);
        let to = scale_engine_progress(percent);
        if self.update(|job| job.advance(to)) {
            debug!(job_id = %self.id, progress = to, "engine progress");
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Process-lifetime registry of generation jobs.
pub struct JobManager {
    jobs: RwLock<HashMap<JobId, Slot>>,
    engine: EngineAdapter,
    config: JobConfig,
    permits: Option<Arc<Semaphore>>,
}

impl JobManager {
    pub fn new(engine: EngineAdapter, config: JobConfig) -> Self {
        let permits = (config.max_concurrent_jobs > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_jobs)));
        Self {
            jobs: RwLock::new(HashMap::new()),
            engine,
            config,
            permits,
        }
    }

    /// Register a new job and start it in the background.
    ///
    /// Returns as soon as the job is registered; the job is still `pending`.
    #[instrument(skip_all, fields(model_id = %model_id, inputs = inputs.len()))]
    pub fn create(
        &self,
        model_id: &str,
        inputs: Vec<NormalizedArtifact>,
        options: GenerationOptions,
    ) -> Result<JobId, JobError> {
        if inputs.is_empty() {
            return Err(JobError::NoInputFiles);
        }
        let runtime = Handle::try_current().map_err(|_| JobError::NoRuntime)?;

        let job = Job::new(model_id, inputs, options);
        let id = job.id.clone();
        let slot = self.insert(job);
        self.schedule(&runtime, slot);

        info!(job_id = %id, "job created");
        Ok(id)
    }

    fn insert(&self, job: Job) -> Slot {
        let id = job.id.clone();
        let slot = Arc::new(RwLock::new(job));
        self.table_mut().insert(id, slot.clone());
        slot
    }

    fn schedule(&self, runtime: &Handle, slot: Slot) {
        let writer = Arc::new(JobWriter::new(slot));
        runtime.spawn(run_job(
            writer,
            self.engine.clone(),
            self.permits.clone(),
            self.config.clone(),
        ));
    }

    /// Snapshot of one job.
    pub fn status(&self, id: &JobId) -> Option<Job> {
        let slot = self.table().get(id).cloned()?;
        let job = read(&slot).clone();
        Some(job)
    }

    /// The job's result, present only once it has completed.
    pub fn result(&self, id: &JobId) -> ResultLookup {
        match self.status(id) {
            None => ResultLookup::NotFound,
            Some(Job {
                result: Some(result),
                ..
            }) => ResultLookup::Ready(result),
            Some(job) => ResultLookup::NotReady(job.status),
        }
    }

    /// Snapshots of every job, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let slots: Vec<Slot> = self.table().values().cloned().collect();
        let mut jobs: Vec<Job> = slots.iter().map(|s| read(s).clone()).collect();
        jobs.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> RwLockReadGuard<'_, HashMap<JobId, Slot>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Slot>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background unit of work for one job.
async fn run_job(
    writer: Arc<JobWriter>,
    engine: EngineAdapter,
    permits: Option<Arc<Semaphore>>,
    config: JobConfig,
) {
    let _permit = match permits {
        Some(pool) => match pool.acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                writer.fail("worker pool closed".into());
                return;
            }
        },
        None => None,
    };

    let Some((model_id, inputs, options)) = writer.begin() else {
        return;
    };
    info!(job_id = %writer.id, engine = engine.engine_name(), "job processing");

    let sink: Arc<dyn ProgressSink> = writer.clone();
    let deadline = config.processing_timeout;
    let mut generation = tokio::spawn(async move {
        engine
            .generate(&model_id, &inputs, &options, deadline, sink)
            .await
    });

    let tick = config.progress_tick.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    let joined = loop {
        tokio::select! {
            joined = &mut generation => break joined,
            _ = ticker.tick() => writer.tick(),
        }
    };

    match joined {
        Ok(Ok(result)) => writer.complete(result),
        Ok(Err(e)) => writer.fail(e.to_string()),
        Err(e) if e.is_panic() => writer.fail("generation task panicked".into()),
        Err(_) => writer.fail("generation task cancelled".into()),
    }
}
