//! Stage router: dispatches each classified input to its normalization strategy.
//!
//! | family            | strategy                                   |
//! |-------------------|--------------------------------------------|
//! | raster document   | one raster image per page                  |
//! | vector drawing    | geometry-kernel conversion to solid format |
//! | parametric solid  | passthrough                                |
//! | polygon mesh      | passthrough                                |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use cadmesh_artifacts::ArtifactStore;
use cadmesh_shared::{
    ArtifactKind, CadMeshError, FileClassification, FormatFamily, InputFile, NormalizationError,
    NormalizedArtifact, ToolsConfig,
};

use crate::classify::Classifier;
use crate::tools::{DrawExeKernel, GeometryKernel, PageRasterizer, PdftoppmRasterizer};

/// Extension of the neutral solid-exchange format the kernel writes.
const SOLID_EXCHANGE_EXT: &str = "step";

// ---------------------------------------------------------------------------
// Batch outcomes
// ---------------------------------------------------------------------------

/// Why one file in a batch produced nothing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub code: String,
    pub reason: String,
}

impl From<CadMeshError> for FileFailure {
    fn from(err: CadMeshError) -> Self {
        Self {
            code: err.code().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Per-file result of batch normalization.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Normalized {
        file: PathBuf,
        artifacts: Vec<NormalizedArtifact>,
    },
    Rejected {
        file: PathBuf,
        #[serde(flatten)]
        failure: FileFailure,
    },
}

impl FileOutcome {
    pub fn file(&self) -> &Path {
        match self {
            Self::Normalized { file, .. } | Self::Rejected { file, .. } => file,
        }
    }
}

/// One outcome per input, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchOutcome {
    /// All artifacts produced by successful files, in input order.
    pub fn artifacts(&self) -> Vec<NormalizedArtifact> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                FileOutcome::Normalized { artifacts, .. } => Some(artifacts.iter().cloned()),
                FileOutcome::Rejected { .. } => None,
            })
            .flatten()
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &FileFailure)> {
        self.outcomes.iter().filter_map(|o| match o {
            FileOutcome::Rejected { file, failure } => Some((file.as_path(), failure)),
            FileOutcome::Normalized { .. } => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Turns accepted inputs into artifacts the generation engine can consume.
pub struct Normalizer {
    store: ArtifactStore,
    kernel: Arc<dyn GeometryKernel>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl Normalizer {
    pub fn new(
        store: ArtifactStore,
        kernel: Arc<dyn GeometryKernel>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self {
            store,
            kernel,
            rasterizer,
        }
    }

    /// Wire the subprocess-backed tools named in `[tools]`.
    pub fn from_config(store: ArtifactStore, tools: &ToolsConfig) -> Self {
        Self::new(
            store,
            Arc::new(DrawExeKernel::new(&tools.kernel_cmd)),
            Arc::new(PdftoppmRasterizer::new(&tools.rasterizer_cmd)),
        )
    }

    /// Normalize one classified input.
    ///
    /// Documents yield one artifact per page; every other family yields exactly one.
    #[instrument(skip_all, fields(file = %file.display(), format = %classification.format))]
    pub async fn normalize(
        &self,
        classification: &FileClassification,
        file: &Path,
    ) -> Result<Vec<NormalizedArtifact>, NormalizationError> {
        let input = InputFile::new(file, classification);

        match classification.family {
            FormatFamily::RasterDocument => self.rasterize(&input).await,
            FormatFamily::VectorDrawing => self.convert(&input).await.map(|a| vec![a]),
            FormatFamily::ParametricSolid | FormatFamily::PolygonMesh => {
                Ok(vec![NormalizedArtifact::passthrough(&input)])
            }
        }
    }

    /// Classify and normalize every file independently.
    ///
    /// A failing file is recorded and never aborts its siblings.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn normalize_batch(
        &self,
        classifier: &Classifier,
        files: &[PathBuf],
    ) -> BatchOutcome {
        let mut outcomes = Vec::with_capacity(files.len());

        for file in files {
            let result = match classifier.classify(file) {
                Ok(classification) => self
                    .normalize(&classification, file)
                    .await
                    .map_err(CadMeshError::from),
                Err(e) => Err(CadMeshError::from(e)),
            };

            outcomes.push(match result {
                Ok(artifacts) => FileOutcome::Normalized {
                    file: file.clone(),
                    artifacts,
                },
                Err(e) => {
                    warn!(
                        file = %file.display(),
                        code = e.code(),
                        error = %e,
                        "file not normalized"
                    );
                    FileOutcome::Rejected {
                        file: file.clone(),
                        failure: e.into(),
                    }
                }
            });
        }

        let batch = BatchOutcome { outcomes };
        info!(
            artifacts = batch.artifacts().len(),
            failed = batch.failures().count(),
            "batch normalization complete"
        );
        batch
    }

    async fn rasterize(
        &self,
        input: &InputFile,
    ) -> Result<Vec<NormalizedArtifact>, NormalizationError> {
        let out_dir = self.store.page_dir().map_err(|source| NormalizationError::Store {
            path: self.store.processed_dir().to_path_buf(),
            source,
        })?;

        let pages = self
            .rasterizer
            .rasterize(&input.location, &out_dir)
            .await
            .map_err(NormalizationError::DocumentDecode)?;

        if pages.is_empty() {
            return Err(NormalizationError::DocumentDecode(format!(
                "{} produced no pages for {}",
                self.rasterizer.name(),
                input.location.display()
            )));
        }

        Ok(pages
            .iter()
            .enumerate()
            .map(|(page, path)| {
                NormalizedArtifact::derived(path, ArtifactKind::RasterPage { page }, input)
            })
            .collect())
    }

    async fn convert(&self, input: &InputFile) -> Result<NormalizedArtifact, NormalizationError> {
        let output = self
            .store
            .processed_path(SOLID_EXCHANGE_EXT)
            .map_err(|source| NormalizationError::Store {
                path: self.store.processed_dir().to_path_buf(),
                source,
            })?;

        self.kernel
            .convert(&input.location, &output)
            .await
            .map_err(|diagnostic| NormalizationError::KernelConversion { diagnostic })?;

        Ok(NormalizedArtifact::derived(
            &output,
            ArtifactKind::SolidExchange,
            input,
        ))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use cadmesh_shared::FormatKind;
    use uuid::Uuid;

    use super::*;

    /// Kernel that writes a stub solid file, or fails with a fixed diagnostic.
    struct StubKernel {
        fail_with: Option<String>,
    }

    #[async_trait]
    impl GeometryKernel for StubKernel {
        async fn convert(&self, _input: &Path, output: &Path) -> Result<(), String> {
            match &self.fail_with {
                Some(diag) => Err(diag.clone()),
                None => std::fs::write(output, b"ISO-10303-21;").map_err(|e| e.to_string()),
            }
        }

        fn name(&self) -> &str {
            "stub-kernel"
        }
    }

    /// Rasterizer that writes `pages` placeholder images, or fails.
    struct StubRasterizer {
        pages: usize,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl PageRasterizer for StubRasterizer {
        async fn rasterize(&self, _doc: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, String> {
            if let Some(diag) = &self.fail_with {
                return Err(diag.clone());
            }
            (0..self.pages)
                .map(|i| {
                    let p = out_dir.join(format!("page_{i}.png"));
                    std::fs::write(&p, b"\x89PNG").map_err(|e| e.to_string())?;
                    Ok(p)
                })
                .collect()
        }

        fn name(&self) -> &str {
            "stub-rasterizer"
        }
    }

    struct Fixture {
        root: PathBuf,
        normalizer: Normalizer,
    }

    impl Fixture {
        fn new(kernel: impl GeometryKernel + 'static, rasterizer: StubRasterizer) -> Self {
            let root = std::env::temp_dir().join(format!("cadmesh-router-{}", Uuid::now_v7()));
            let store = ArtifactStore::under(&root);
            store.ensure_dirs().unwrap();
            Self {
                normalizer: Normalizer::new(store, Arc::new(kernel), Arc::new(rasterizer)),
                root,
            }
        }

        fn ok() -> Self {
            Self::new(
                StubKernel { fail_with: None },
                StubRasterizer {
                    pages: 3,
                    fail_with: None,
                },
            )
        }

        fn input(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.root.join("uploads").join(name);
            std::fs::write(&path, bytes).unwrap();
            path
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[tokio::test]
    async fn solids_and_meshes_pass_through_without_copy() {
        let fx = Fixture::ok();
        for (name, format) in [("bracket.step", FormatKind::Step), ("hull.stl", FormatKind::Stl)] {
            let file = fx.input(name, b"data");
            let class = FileClassification::new(format, 4);
            let artifacts = fx.normalizer.normalize(&class, &file).await.unwrap();

            assert_eq!(artifacts.len(), 1);
            assert_eq!(artifacts[0].location, file);
            assert_eq!(artifacts[0].kind, ArtifactKind::Passthrough);
            assert_eq!(artifacts[0].produced_from.location, file);
        }
    }

    #[tokio::test]
    async fn drawings_go_through_the_kernel() {
        let fx = Fixture::ok();
        let file = fx.input("floor.dwg", b"AC1032");
        let class = FileClassification::new(FormatKind::Dwg, 6);

        let artifacts = fx.normalizer.normalize(&class, &file).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, ArtifactKind::SolidExchange);
        assert_eq!(artifacts[0].source_format, FormatKind::Dwg);
        assert!(artifacts[0].location.starts_with(fx.root.join("processed")));
        assert!(artifacts[0].location.exists());
    }

    #[tokio::test]
    async fn kernel_diagnostic_is_kept_verbatim() {
        let diag = "Error: DXF entity 42 has no geometry\n  at layer WALLS\n";
        let fx = Fixture::new(
            StubKernel {
                fail_with: Some(diag.into()),
            },
            StubRasterizer {
                pages: 1,
                fail_with: None,
            },
        );
        let file = fx.input("walls.dxf", b"0\nSECTION");
        let class = FileClassification::new(FormatKind::Dxf, 9);

        let err = fx.normalizer.normalize(&class, &file).await.unwrap_err();
        match err {
            NormalizationError::KernelConversion { diagnostic } => assert_eq!(diagnostic, diag),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unquotable_drawing_path_is_a_kernel_conversion_error() {
        let fx = Fixture::new(
            DrawExeKernel::new("cadmesh-no-such-kernel"),
            StubRasterizer {
                pages: 1,
                fail_with: None,
            },
        );
        let file = fx.input("plan[rev$2].dwg", b"AC1032");
        let class = FileClassification::new(FormatKind::Dwg, 6);

        let err = fx.normalizer.normalize(&class, &file).await.unwrap_err();
        assert_eq!(err.code(), "kernel_conversion");
        assert!(err.to_string().contains("cannot quote"), "{err}");
    }

    #[tokio::test]
    async fn documents_yield_one_artifact_per_page() {
        let fx = Fixture::ok();
        let file = fx.input("sheet.pdf", b"%PDF-1.7");
        let class = FileClassification::new(FormatKind::Pdf, 8);

        let artifacts = fx.normalizer.normalize(&class, &file).await.unwrap();
        assert_eq!(artifacts.len(), 3);
        for (i, a) in artifacts.iter().enumerate() {
            assert_eq!(a.kind, ArtifactKind::RasterPage { page: i });
            assert_eq!(a.produced_from.location, file);
        }
    }

    #[tokio::test]
    async fn undecodable_document_fails() {
        let fx = Fixture::new(
            StubKernel { fail_with: None },
            StubRasterizer {
                pages: 0,
                fail_with: Some("Syntax Error: Couldn't find trailer dictionary".into()),
            },
        );
        let file = fx.input("broken.pdf", b"not a pdf");
        let class = FileClassification::new(FormatKind::Pdf, 9);

        let err = fx.normalizer.normalize(&class, &file).await.unwrap_err();
        assert_eq!(err.code(), "document_decode");
        assert!(err.to_string().contains("trailer dictionary"));
    }

    #[tokio::test]
    async fn empty_document_fails() {
        let fx = Fixture::new(
            StubKernel { fail_with: None },
            StubRasterizer {
                pages: 0,
                fail_with: None,
            },
        );
        let file = fx.input("blank.pdf", b"%PDF-1.7");
        let class = FileClassification::new(FormatKind::Pdf, 8);

        let err = fx.normalizer.normalize(&class, &file).await.unwrap_err();
        assert!(matches!(err, NormalizationError::DocumentDecode(_)));
    }

    #[tokio::test]
    async fn batch_failure_does_not_abort_siblings() {
        let fx = Fixture::new(
            StubKernel {
                fail_with: Some("kernel crashed".into()),
            },
            StubRasterizer {
                pages: 2,
                fail_with: None,
            },
        );
        let files = vec![
            fx.input("a.step", b"solid"),
            fx.input("b.dwg", b"drawing"),
            fx.input("c.png", b"image"),
            fx.input("d.pdf", b"%PDF"),
        ];

        let batch = fx
            .normalizer
            .normalize_batch(&Classifier::default(), &files)
            .await;

        assert_eq!(batch.outcomes.len(), 4);
        for (outcome, file) in batch.outcomes.iter().zip(&files) {
            assert_eq!(outcome.file(), file.as_path());
        }

        let codes: Vec<_> = batch.failures().map(|(_, f)| f.code.as_str()).collect();
        assert_eq!(codes, ["kernel_conversion", "unsupported_format"]);
        // step passthrough + two pdf pages
        assert_eq!(batch.artifacts().len(), 3);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = FileOutcome::Rejected {
            file: "x.png".into(),
            failure: FileFailure {
                code: "unsupported_format".into(),
                reason: "unsupported file format: png".into(),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["code"], "unsupported_format");
    }
}
