//! In-memory mesh engine used by tests and offline dry runs.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use cadmesh_shared::{EngineError, TextureDimensions};

use crate::{EngineOutput, EngineRequest, MeshEngine, ProgressSink};

/// Scheme of the model locations a fake generation reports.
const MODEL_URL_ROOT: &str = "fake://models";

/// Vertex/face yield per input file for successful fake generations.
const VERTICES_PER_INPUT: u64 = 5000;
const FACES_PER_INPUT: u64 = 2500;

/// How a [`FakeMeshEngine`] ends each call.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    Succeed,
    Fail {
        message: String,
        partial_output: Option<String>,
    },
    RejectOptions(String),
    /// Never returns; exercises deadline enforcement.
    Hang,
}

/// Deterministic engine stand-in.
///
/// Reports each configured progress step, spread evenly over `delay`, then
/// finishes according to its [`FakeBehavior`]. Retrieval writes a small
/// placeholder file in place of a real mesh.
#[derive(Debug)]
pub struct FakeMeshEngine {
    behavior: FakeBehavior,
    delay: Duration,
    progress_steps: Vec<u8>,
}

impl FakeMeshEngine {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            progress_steps: Vec::new(),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(FakeBehavior::Succeed)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(FakeBehavior::Fail {
            message: message.into(),
            partial_output: None,
        })
    }

    pub fn hanging() -> Self {
        Self::new(FakeBehavior::Hang)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_progress(mut self, steps: impl Into<Vec<u8>>) -> Self {
        self.progress_steps = steps.into();
        self
    }
}

#[async_trait]
impl MeshEngine for FakeMeshEngine {
    async fn generate(
        &self,
        request: &EngineRequest,
        progress: &dyn ProgressSink,
    ) -> Result<EngineOutput, EngineError> {
        let pause = self.delay / (self.progress_steps.len() as u32 + 1);
        for step in &self.progress_steps {
            tokio::time::sleep(pause).await;
            progress.report(*step);
        }
        tokio::time::sleep(pause).await;

        match &self.behavior {
            FakeBehavior::Succeed => {
                let inputs = request.input_files.len() as u64;
                Ok(EngineOutput {
                    model_url: format!(
                        "{MODEL_URL_ROOT}/{}.{}",
                        request.model_id,
                        request.output_format.extension()
                    ),
                    vertices: VERTICES_PER_INPUT * inputs,
                    faces: FACES_PER_INPUT * inputs,
                    texture_size: Some(TextureDimensions {
                        width: 1024,
                        height: 1024,
                    }),
                    processing_time: None,
                })
            }
            FakeBehavior::Fail {
                message,
                partial_output,
            } => Err(EngineError::Generation {
                message: message.clone(),
                partial_output: partial_output.clone(),
            }),
            FakeBehavior::RejectOptions(message) => {
                Err(EngineError::InvalidOptions(message.clone()))
            }
            FakeBehavior::Hang => std::future::pending().await,
        }
    }

    async fn retrieve(&self, output: &EngineOutput, dest: &Path) -> Result<(), EngineError> {
        let placeholder = format!(
            "cadmesh placeholder mesh\nsource: {}\nvertices: {}\nfaces: {}\n",
            output.model_url, output.vertices, output.faces
        );
        tokio::fs::write(dest, placeholder)
            .await
            .map_err(|e| EngineError::Store(format!("{}: {e}", dest.display())))
    }

    fn name(&self) -> &str {
        "fake"
    }
}
