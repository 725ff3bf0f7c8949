//! Deadline-enforcing adapter around a [`MeshEngine`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use cadmesh_artifacts::ArtifactStore;
use cadmesh_shared::{EngineError, GenerationOptions, GenerationResult, NormalizedArtifact};

use crate::{EngineOutput, EngineRequest, EngineRequestOptions, MeshEngine, ProgressSink};

/// Translates pipeline types to engine requests, bounds each call by a deadline,
/// and lands the finished model in the artifact store.
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn MeshEngine>,
    store: ArtifactStore,
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn MeshEngine>, store: ArtifactStore) -> Self {
        Self { engine, store }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Build the engine's request shape from normalized inputs and options.
    pub fn request_for(
        model_id: &str,
        inputs: &[NormalizedArtifact],
        options: &GenerationOptions,
    ) -> EngineRequest {
        EngineRequest {
            model_id: model_id.to_string(),
            input_files: inputs
                .iter()
                .map(|a| a.location.to_string_lossy().into_owned())
                .collect(),
            output_format: options.output_format,
            quality: options.quality,
            options: EngineRequestOptions {
                mesh_resolution: options.mesh_resolution,
                texture_quality: options.texture_quality,
                coordinate_system: options.coordinate_system,
                unit_scale: options.unit_scale,
            },
        }
    }

    /// Run one generation and store its model locally, giving up with
    /// [`EngineError::Timeout`] at `deadline`.
    ///
    /// The deadline covers retrieval too. Progress reported after the call
    /// returns or times out is dropped.
    #[instrument(skip_all, fields(engine = self.engine.name(), model_id = %model_id, inputs = inputs.len()))]
    pub async fn generate(
        &self,
        model_id: &str,
        inputs: &[NormalizedArtifact],
        options: &GenerationOptions,
        deadline: Duration,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<GenerationResult, EngineError> {
        let request = Self::request_for(model_id, inputs, options);
        let extension = options.output_format.extension();
        let gate = GatedProgress::new(progress);
        let started = Instant::now();

        let outcome =
            tokio::time::timeout(deadline, self.produce(&request, extension, &gate)).await;
        gate.close();

        let (output, local) = match outcome {
            Ok(Ok(produced)) => produced,
            Ok(Err(e)) => {
                warn!(code = e.code(), error = %e, "engine reported failure");
                return Err(e);
            }
            Err(_) => {
                warn!(deadline_secs = deadline.as_secs(), "engine missed deadline");
                return Err(EngineError::Timeout { after: deadline });
            }
        };

        let result = into_result(output, &local, started.elapsed());
        info!(
            vertices = result.vertex_count,
            faces = result.face_count,
            artifact = %result.artifact_location,
            "engine generation complete"
        );
        Ok(result)
    }

    async fn produce(
        &self,
        request: &EngineRequest,
        extension: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(EngineOutput, PathBuf), EngineError> {
        let output = self.engine.generate(request, progress).await?;
        check_output(&output)?;

        let dest = self
            .store
            .model_path(&request.model_id, extension)
            .map_err(|e| {
                EngineError::Store(format!("{}: {e}", self.store.models_dir().display()))
            })?;
        self.engine.retrieve(&output, &dest).await?;
        debug!(remote = %output.model_url, local = %dest.display(), "model stored");
        Ok((output, dest))
    }
}

fn check_output(output: &EngineOutput) -> Result<(), EngineError> {
    if output.model_url.trim().is_empty() {
        return Err(EngineError::Protocol(
            "engine reported success without an artifact location".into(),
        ));
    }
    Ok(())
}

fn into_result(output: EngineOutput, local: &Path, elapsed: Duration) -> GenerationResult {
    GenerationResult {
        artifact_location: local.to_string_lossy().into_owned(),
        vertex_count: output.vertices,
        face_count: output.faces,
        texture_dimensions: output.texture_size,
        processing_duration_seconds: output.processing_time.unwrap_or(elapsed.as_secs_f64()),
    }
}

/// Forwards progress until closed; afterwards every report is ignored.
struct GatedProgress {
    inner: Arc<dyn ProgressSink>,
    open: AtomicBool,
}

impl GatedProgress {
    fn new(inner: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            open: AtomicBool::new(true),
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl ProgressSink for GatedProgress {
    fn report(&self, percent: u8) {
        if self.open.load(Ordering::Acquire) {
            self.inner.report(percent.min(100));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use cadmesh_shared::{ArtifactKind, FormatKind, InputFile, OutputFormat, Quality};
    use uuid::Uuid;

    use super::*;
    use crate::fake::FakeMeshEngine;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u8>>);

    impl ProgressSink for Recorder {
        fn report(&self, percent: u8) {
            self.0.lock().unwrap().push(percent);
        }
    }

    /// Artifact store under a unique temp root, removed on drop.
    struct Scratch {
        root: PathBuf,
        store: ArtifactStore,
    }

    impl Scratch {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("cadmesh-adapter-{}", Uuid::now_v7()));
            let store = ArtifactStore::under(&root);
            store.ensure_dirs().unwrap();
            Self { root, store }
        }

        fn adapter(&self, engine: FakeMeshEngine) -> EngineAdapter {
            EngineAdapter::new(Arc::new(engine), self.store.clone())
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn step_input(path: &str) -> NormalizedArtifact {
        let input = InputFile {
            location: path.into(),
            format: FormatKind::Step,
            size_bytes: 10,
        };
        NormalizedArtifact::passthrough(&input)
    }

    fn engine_output(model_url: &str) -> EngineOutput {
        EngineOutput {
            model_url: model_url.into(),
            vertices: 10,
            faces: 5,
            texture_size: None,
            processing_time: None,
        }
    }

    #[test]
    fn request_translation_carries_every_option() {
        let options = GenerationOptions {
            output_format: OutputFormat::Obj,
            mesh_resolution: Quality::Low,
            ..Default::default()
        };
        let mut page = step_input("processed/doc/page_0.png");
        page.kind = ArtifactKind::RasterPage { page: 0 };

        let req = EngineAdapter::request_for("m1", &[step_input("a.step"), page], &options);
        assert_eq!(req.input_files, ["a.step", "processed/doc/page_0.png"]);
        assert_eq!(req.output_format, OutputFormat::Obj);
        assert_eq!(req.options.mesh_resolution, Quality::Low);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["options"]["coordinate_system"], "right_handed");
        assert_eq!(json["options"]["unit_scale"], "millimeters");
        assert_eq!(json["output_format"], "obj");
    }

    #[tokio::test]
    async fn success_stores_model_in_models_dir() {
        let scratch = Scratch::new();
        let result = scratch
            .adapter(FakeMeshEngine::succeeding())
            .generate(
                "t1",
                &[step_input("sample.step")],
                &GenerationOptions::default(),
                Duration::from_secs(5),
                Arc::new(crate::SilentProgress),
            )
            .await
            .unwrap();

        assert!(result.vertex_count > 0);
        let stored = scratch.store.open_model("t1.glb").expect("model stored");
        assert_eq!(result.artifact_location, stored.to_string_lossy());
        assert!(!std::fs::read(&stored).unwrap().is_empty());
    }

    #[tokio::test]
    async fn output_format_picks_the_model_extension() {
        let scratch = Scratch::new();
        let options = GenerationOptions {
            output_format: OutputFormat::Stl,
            ..Default::default()
        };
        let result = scratch
            .adapter(FakeMeshEngine::succeeding())
            .generate(
                "part",
                &[step_input("part.step")],
                &options,
                Duration::from_secs(5),
                Arc::new(crate::SilentProgress),
            )
            .await
            .unwrap();

        assert!(result.artifact_location.ends_with("part.stl"));
        assert!(scratch.store.open_model("part.stl").is_some());
    }

    #[tokio::test]
    async fn unwritable_models_dir_is_a_store_error() {
        let scratch = Scratch::new();
        std::fs::remove_dir_all(scratch.store.models_dir()).unwrap();
        std::fs::write(scratch.store.models_dir(), b"not a directory").unwrap();

        let err = scratch
            .adapter(FakeMeshEngine::succeeding())
            .generate(
                "t4",
                &[step_input("sample.step")],
                &GenerationOptions::default(),
                Duration::from_secs(5),
                Arc::new(crate::SilentProgress),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "artifact_store");
    }

    #[tokio::test]
    async fn hanging_engine_times_out_and_late_progress_is_dropped() {
        let scratch = Scratch::new();
        let recorder = Arc::new(Recorder::default());
        let adapter = scratch.adapter(FakeMeshEngine::hanging().with_progress([20, 40]));

        let err = adapter
            .generate(
                "t2",
                &[step_input("slow.step")],
                &GenerationOptions::default(),
                Duration::from_millis(50),
                recorder.clone(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Timeout { .. }));
        let seen = recorder.0.lock().unwrap().clone();
        assert!(seen.iter().all(|p| *p <= 40));
        assert!(scratch.store.open_model("t2.glb").is_none());
    }

    #[tokio::test]
    async fn engine_failure_is_passed_through() {
        let scratch = Scratch::new();
        let err = scratch
            .adapter(FakeMeshEngine::failing("out of GPU memory"))
            .generate(
                "t3",
                &[step_input("big.step")],
                &GenerationOptions::default(),
                Duration::from_secs(5),
                Arc::new(crate::SilentProgress),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "generation_failed");
        assert!(err.to_string().contains("out of GPU memory"));
        assert!(scratch.store.open_model("t3.glb").is_none());
    }

    #[test]
    fn empty_artifact_location_is_protocol_error() {
        let err = check_output(&engine_output("  ")).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));
    }

    #[test]
    fn measured_duration_used_when_engine_reports_none() {
        let result = into_result(
            engine_output("http://engine/models/x.glb"),
            Path::new("/srv/models/x.glb"),
            Duration::from_millis(1500),
        );
        assert!((result.processing_duration_seconds - 1.5).abs() < 1e-9);
        assert_eq!(result.artifact_location, "/srv/models/x.glb");
    }
}
