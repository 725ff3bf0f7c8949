//! Core orchestration for CadMesh.
//!
//! This crate ties together intake, the job manager, and the mesh engine into
//! request-level workflows (see [`service::PipelineService`]).

pub mod estimate;
pub mod jobs;
pub mod service;

pub use estimate::{Estimate, estimate};
pub use jobs::{Job, JobManager, ResultLookup};
pub use service::{PipelineService, Reply, UploadResponse};
