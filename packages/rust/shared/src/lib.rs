//! Shared types, error model, and configuration for CadMesh.
//!
//! This crate is the foundation depended on by all other CadMesh crates.
//! It provides:
//! - [`CadMeshError`] — the unified error type, plus per-stage error enums
//! - Domain types ([`JobId`], [`InputFile`], [`NormalizedArtifact`], [`GenerationOptions`], ...)
//! - Configuration ([`AppConfig`], [`JobConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_MAX_FILE_SIZE, EngineConfig, EngineKind, JobConfig, LimitsConfig,
    StorageConfig, ToolsConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from,
};
pub use error::{
    CadMeshError, ClassificationError, EngineError, JobError, NormalizationError, Result,
};
pub use types::{
    ArtifactKind, CoordinateSystem, FileClassification, FormatFamily, FormatKind,
    GenerationOptions, GenerationResult, InputFile, JobId, JobStatus, NormalizedArtifact,
    OutputFormat, Quality, TextureDimensions, UnitScale,
};
