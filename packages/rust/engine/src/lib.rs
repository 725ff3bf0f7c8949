//! Boundary to the external mesh generation engine.
//!
//! The engine itself is a black box behind [`MeshEngine`]. The [`EngineAdapter`]
//! owns our side of the boundary. It builds the engine's request shape, bounds
//! generation and model retrieval by the deadline, and records the locally
//! stored model in a [`GenerationResult`](cadmesh_shared::GenerationResult).
//!
//! Implementations:
//! - [`HttpMeshEngine`] — remote engine service (submit, then poll status)
//! - [`FakeMeshEngine`] — in-memory stand-in for tests and offline dry runs

mod adapter;
pub mod fake;
pub mod http;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cadmesh_shared::{
    CoordinateSystem, EngineError, OutputFormat, Quality, TextureDimensions, UnitScale,
};

pub use adapter::EngineAdapter;
pub use fake::{FakeBehavior, FakeMeshEngine};
pub use http::HttpMeshEngine;

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Request in the shape the engine expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineRequest {
    pub model_id: String,
    pub input_files: Vec<String>,
    pub output_format: OutputFormat,
    pub quality: Quality,
    pub options: EngineRequestOptions,
}

/// Nested `options` object of an [`EngineRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineRequestOptions {
    pub mesh_resolution: Quality,
    pub texture_quality: Quality,
    pub coordinate_system: CoordinateSystem,
    pub unit_scale: UnitScale,
}

/// What the engine reports for a finished generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub model_url: String,
    pub vertices: u64,
    pub faces: u64,
    #[serde(default)]
    pub texture_size: Option<TextureDimensions>,
    /// Engine-measured duration in seconds, when it reports one.
    #[serde(default)]
    pub processing_time: Option<f64>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Receives incremental progress (0–100) from a running generation.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

/// Sink that discards everything.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn report(&self, _percent: u8) {}
}

/// The external mesh generation capability.
///
/// Implementations are not trusted to terminate; the adapter bounds every call.
#[async_trait]
pub trait MeshEngine: Send + Sync {
    async fn generate(
        &self,
        request: &EngineRequest,
        progress: &dyn ProgressSink,
    ) -> Result<EngineOutput, EngineError>;

    /// Copy the finished model named by `output.model_url` to `dest`.
    async fn retrieve(&self, output: &EngineOutput, dest: &Path) -> Result<(), EngineError>;

    /// Human-readable engine name for tracing.
    fn name(&self) -> &str;
}
