//! Error types for CadMesh.
//!
//! Library crates use [`CadMeshError`] and the per-stage enums via `thiserror`.
//! The CLI wraps these with `color-eyre` for rich diagnostics.
//!
//! Every error carries a stable snake_case [`code`](CadMeshError::code) so the
//! service layer can return structured bodies without leaking internals.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all CadMesh operations.
#[derive(Debug, thiserror::Error)]
pub enum CadMeshError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input rejected by the format classifier.
    #[error(transparent)]
    Classification(#[from] ClassificationError),

    /// Input could not be normalized.
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    /// Mesh generation engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Job creation failure.
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CadMeshError>;

impl CadMeshError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
            Self::Classification(e) => e.code(),
            Self::Normalization(e) => e.code(),
            Self::Engine(e) => e.code(),
            Self::Job(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage errors
// ---------------------------------------------------------------------------

/// Rejections produced by the format classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    /// Extension missing or not on the allow-list.
    #[error("unsupported file format: {}", extension.as_deref().unwrap_or("<none>"))]
    UnsupportedFormat { extension: Option<String> },

    /// File exceeds the configured size ceiling.
    #[error("file too large: {size_bytes} bytes (max {limit_bytes} bytes)")]
    FileTooLarge { size_bytes: u64, limit_bytes: u64 },

    /// File metadata could not be read.
    #[error("cannot read metadata for {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ClassificationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::Metadata { .. } => "file_unreadable",
        }
    }
}

/// Failures produced by the stage router.
#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    /// The raster document could not be opened or had no pages.
    #[error("document decode error: {0}")]
    DocumentDecode(String),

    /// The geometry kernel failed; carries its diagnostic verbatim.
    #[error("kernel conversion error: {diagnostic}")]
    KernelConversion { diagnostic: String },

    /// The artifact store could not allocate an output location.
    #[error("artifact store error at {path:?}: {source}")]
    Store {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl NormalizationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DocumentDecode(_) => "document_decode",
            Self::KernelConversion { .. } => "kernel_conversion",
            Self::Store { .. } => "artifact_store",
        }
    }
}

/// Failures surfaced by the mesh generation engine adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The engine rejected the request options.
    #[error("engine rejected options: {0}")]
    InvalidOptions(String),

    /// Generation ran and failed, possibly leaving partial output behind.
    #[error("generation failed: {message}{}", partial_output.as_deref().map(|p| format!(" (partial output at {p})")).unwrap_or_default())]
    Generation {
        message: String,
        partial_output: Option<String>,
    },

    /// The engine did not finish before the deadline.
    #[error("engine timed out after {}s", after.as_secs())]
    Timeout { after: Duration },

    /// The engine could not be reached.
    #[error("engine transport error: {0}")]
    Transport(String),

    /// The engine answered with something we could not interpret.
    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// The finished model could not be written to the local artifact store.
    #[error("model store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOptions(_) => "invalid_options",
            Self::Generation { .. } => "generation_failed",
            Self::Timeout { .. } => "engine_timeout",
            Self::Transport(_) => "engine_unreachable",
            Self::Protocol(_) => "engine_protocol",
            Self::Store(_) => "artifact_store",
        }
    }
}

/// Failures that prevent a generation job from being created.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The request carried no usable input files; no job was created.
    #[error("no input files provided")]
    NoInputFiles,

    /// The options object did not describe a valid [`GenerationOptions`](crate::GenerationOptions).
    #[error("invalid generation options: {0}")]
    InvalidOptions(String),

    /// `create` was called outside an async runtime.
    #[error("no async runtime available to schedule the job")]
    NoRuntime,
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoInputFiles => "no_input_files",
            Self::InvalidOptions(_) => "invalid_options",
            Self::NoRuntime => "no_runtime",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = CadMeshError::config("bad timeout");
        assert_eq!(err.to_string(), "config error: bad timeout");

        let err = CadMeshError::from(ClassificationError::FileTooLarge {
            size_bytes: 53_477_376,
            limit_bytes: 52_428_800,
        });
        assert!(err.to_string().contains("53477376"));
        assert_eq!(err.code(), "file_too_large");
    }

    #[test]
    fn unsupported_format_without_extension() {
        let err = ClassificationError::UnsupportedFormat { extension: None };
        assert_eq!(err.to_string(), "unsupported file format: <none>");
    }

    #[test]
    fn generation_error_mentions_partial_output() {
        let err = EngineError::Generation {
            message: "texture bake failed".into(),
            partial_output: Some("models/abc.partial.glb".into()),
        };
        let text = err.to_string();
        assert!(text.contains("texture bake failed"));
        assert!(text.contains("models/abc.partial.glb"));
        assert_eq!(err.code(), "generation_failed");
    }

    #[test]
    fn timeout_code_and_message() {
        let err = CadMeshError::from(EngineError::Timeout {
            after: Duration::from_secs(3600),
        });
        assert_eq!(err.code(), "engine_timeout");
        assert_eq!(err.to_string(), "engine timed out after 3600s");
    }

    #[test]
    fn invalid_options_share_a_code_across_stages() {
        let local = CadMeshError::from(JobError::InvalidOptions("unknown field `x`".into()));
        let remote = CadMeshError::from(EngineError::InvalidOptions("unit_scale".into()));
        assert_eq!(local.code(), "invalid_options");
        assert_eq!(remote.code(), local.code());
        assert_eq!(local.to_string(), "invalid generation options: unknown field `x`");
    }
}
