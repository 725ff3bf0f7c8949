//! Request-level surface of the pipeline.
//!
//! Each operation returns a [`Reply`] that carries the HTTP-style status a
//! front end should answer with, so any transport can sit on top.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use cadmesh_artifacts::ArtifactStore;
use cadmesh_intake::{Classifier, FileOutcome, Normalizer};
use cadmesh_shared::{
    CadMeshError, FileClassification, FormatKind, GenerationOptions, GenerationResult, JobError,
    JobId, JobStatus, OutputFormat, Quality,
};

use crate::estimate::estimate;
use crate::jobs::{Job, JobManager};

const SERVICE_NAME: &str = "cadmesh";

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Either a success body or an error body with its status.
#[derive(Debug)]
pub enum Reply<T> {
    Ok(T),
    Err { status: u16, body: ErrorBody },
}

impl<T: Serialize> Reply<T> {
    fn error(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self::Err {
            status,
            body: ErrorBody {
                success: false,
                code: code.to_string(),
                error: message.into(),
                details: Vec::new(),
            },
        }
    }

    /// Error reply carrying the error's own code and message.
    fn rejected(status: u16, err: impl Into<CadMeshError>) -> Self {
        let err = err.into();
        Self::error(status, err.code(), err.to_string())
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::error(404, "not_found", message)
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Ok(_) => 200,
            Self::Err { status, .. } => *status,
        }
    }

    pub fn into_result(self) -> Result<T, ErrorBody> {
        match self {
            Self::Ok(body) => Ok(body),
            Self::Err { body, .. } => Err(body),
        }
    }

    /// JSON body as a front end would send it.
    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            Self::Ok(body) => serde_json::to_value(body),
            Self::Err { body, .. } => serde_json::to_value(body),
        };
        value.unwrap_or_else(|e| serde_json::json!({ "success": false, "error": e.to_string() }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: String,
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<RejectedFile>,
}

/// A file left out of a batch, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedFile {
    pub file: String,
    pub code: String,
    pub reason: String,
}

impl RejectedFile {
    fn new(file: &Path, err: impl Into<CadMeshError>) -> Self {
        let err = err.into();
        Self {
            file: file.display().to_string(),
            code: err.code().to_string(),
            reason: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub input_files: Vec<PathBuf>,
    #[serde(default)]
    pub model_id: Option<String>,
    /// Overrides `options.output_format`.
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
    /// Overrides `options.quality`.
    #[serde(default)]
    pub quality: Option<Quality>,
    /// Raw options object; validated against [`GenerationOptions`].
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: JobId,
    pub model_id: String,
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub job_id: JobId,
    pub model_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for StatusResponse {
    fn from(job: Job) -> Self {
        Self {
            success: true,
            job_id: job.id,
            model_id: job.model_id,
            status: job.status,
            progress: job.progress,
            result: job.result,
            error: job.error_detail,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EstimateRequest {
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateResponse {
    pub success: bool,
    pub estimated_time: u64,
    pub total_files: usize,
    pub file_types: Vec<String>,
    pub recommendations: Vec<String>,
    pub per_format_multiplier: std::collections::BTreeMap<FormatKind, f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub path: PathBuf,
    pub format: FormatKind,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactResponse {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub engine: String,
    pub jobs: usize,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Classifier, normalizer, job manager and artifact store behind one facade.
pub struct PipelineService {
    classifier: Classifier,
    normalizer: Normalizer,
    jobs: JobManager,
    store: ArtifactStore,
    engine_name: String,
}

impl PipelineService {
    pub fn new(
        classifier: Classifier,
        normalizer: Normalizer,
        jobs: JobManager,
        store: ArtifactStore,
        engine_name: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            normalizer,
            jobs,
            store,
            engine_name: engine_name.into(),
        }
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Classify an uploaded file by name and size, then keep it in the upload root.
    ///
    /// Rejected uploads are never written. The returned path is what `submit`
    /// takes as an input file.
    #[instrument(skip_all, fields(filename = original_name, size = bytes.len()))]
    pub fn upload(&self, original_name: &str, bytes: &[u8]) -> Reply<UploadResponse> {
        let size = bytes.len() as u64;
        let classification = match self.classifier.classify_name(original_name, size) {
            Ok(c) => c,
            Err(e) => {
                debug!(code = e.code(), "upload rejected");
                return Reply::rejected(400, e);
            }
        };

        match self.store.store_upload(original_name, bytes) {
            Ok(path) => Reply::Ok(UploadResponse {
                success: true,
                filename: original_name.to_string(),
                path,
                format: classification.format,
                size_bytes: classification.size_bytes,
            }),
            Err(e) => Reply::rejected(500, e),
        }
    }

    /// Normalize the inputs and start a generation job.
    #[instrument(skip_all, fields(files = request.input_files.len()))]
    pub async fn submit(&self, request: SubmitRequest) -> Reply<SubmitResponse> {
        if request.input_files.is_empty() {
            return no_input_files(Vec::new());
        }

        let mut options = match request.options {
            None => GenerationOptions::default(),
            Some(raw) => match serde_json::from_value::<GenerationOptions>(raw) {
                Ok(options) => options,
                Err(e) => {
                    debug!(error = %e, "rejected generation options");
                    return Reply::rejected(400, JobError::InvalidOptions(e.to_string()));
                }
            },
        };
        if let Some(format) = request.output_format {
            options.output_format = format;
        }
        if let Some(quality) = request.quality {
            options.quality = quality;
        }

        let batch = self
            .normalizer
            .normalize_batch(&self.classifier, &request.input_files)
            .await;
        let rejected: Vec<RejectedFile> = batch
            .outcomes
            .iter()
            .filter_map(|o| match o {
                FileOutcome::Rejected { file, failure } => Some(RejectedFile {
                    file: file.display().to_string(),
                    code: failure.code.clone(),
                    reason: failure.reason.clone(),
                }),
                FileOutcome::Normalized { .. } => None,
            })
            .collect();

        let artifacts = batch.artifacts();
        if artifacts.is_empty() {
            return no_input_files(rejected);
        }

        let model_id = request
            .model_id
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        match self.jobs.create(&model_id, artifacts, options) {
            Ok(job_id) => {
                info!(%job_id, %model_id, rejected = rejected.len(), "generation submitted");
                Reply::Ok(SubmitResponse {
                    success: true,
                    job_id,
                    model_id,
                    status: "started",
                    message: "3D generation started".into(),
                    rejected,
                })
            }
            Err(e @ JobError::NoInputFiles) => Reply::rejected(400, e),
            Err(e) => Reply::rejected(500, e),
        }
    }

    /// Snapshot of a job. Unknown or malformed ids answer 404.
    pub fn status(&self, job_id: &str) -> Reply<StatusResponse> {
        let Ok(id) = job_id.trim().parse::<JobId>() else {
            debug!(job_id, "malformed job id");
            return Reply::not_found("job not found");
        };
        match self.jobs.status(&id) {
            Some(job) => Reply::Ok(job.into()),
            None => Reply::not_found("job not found"),
        }
    }

    /// Locate a generated model by bare filename.
    pub fn fetch_artifact(&self, filename: &str) -> Reply<ArtifactResponse> {
        match self.store.open_model(filename) {
            Some(path) => Reply::Ok(ArtifactResponse {
                filename: filename.to_string(),
                path,
            }),
            None => Reply::not_found("file not found"),
        }
    }

    /// Estimate processing time for a batch without running it.
    ///
    /// Files that exist locally are classified with their real size; others
    /// by name only. Unsupported files are reported and left out of the total.
    #[instrument(skip_all, fields(files = request.files.len()))]
    pub fn estimate_batch(&self, request: EstimateRequest) -> Reply<EstimateResponse> {
        let mut accepted: Vec<FileClassification> = Vec::new();
        let mut rejected = Vec::new();

        for file in &request.files {
            let classified = if file.is_file() {
                self.classifier.classify(file)
            } else {
                let name = file.to_string_lossy();
                self.classifier.classify_name(&name, 0)
            };
            match classified {
                Ok(c) => accepted.push(c),
                Err(e) => rejected.push(RejectedFile::new(file, e)),
            }
        }

        let est = estimate(&accepted);
        let file_types: BTreeSet<&str> = accepted.iter().map(|c| c.format.extension()).collect();

        Reply::Ok(EstimateResponse {
            success: true,
            estimated_time: est.total_seconds,
            total_files: request.files.len(),
            file_types: file_types.into_iter().map(String::from).collect(),
            recommendations: est.advisories,
            per_format_multiplier: est.per_format_multiplier,
            rejected,
        })
    }

    pub fn health(&self) -> Reply<HealthResponse> {
        Reply::Ok(HealthResponse {
            status: "healthy",
            service: SERVICE_NAME,
            engine: self.engine_name.clone(),
            jobs: self.jobs.len(),
        })
    }
}

fn no_input_files<T: Serialize>(details: Vec<RejectedFile>) -> Reply<T> {
    let err = JobError::NoInputFiles;
    Reply::Err {
        status: 400,
        body: ErrorBody {
            success: false,
            code: err.code().to_string(),
            error: err.to_string(),
            details,
        },
    }
}
