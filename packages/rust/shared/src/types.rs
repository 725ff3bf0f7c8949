//! Core domain types for the CAD-to-mesh conversion pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for generation job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// Coarse format family; decides which normalization strategy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    VectorDrawing,
    ParametricSolid,
    RasterDocument,
    PolygonMesh,
}

/// An accepted input file format, one variant per allow-listed extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Pdf,
    Dwg,
    Dxf,
    Step,
    Stp,
    Iges,
    Igs,
    Stl,
    Obj,
}

impl FormatKind {
    /// Every accepted format, in allow-list order.
    pub const ALL: [FormatKind; 9] = [
        Self::Pdf,
        Self::Dwg,
        Self::Dxf,
        Self::Step,
        Self::Stp,
        Self::Iges,
        Self::Igs,
        Self::Stl,
        Self::Obj,
    ];

    /// Match a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.extension() == ext)
    }

    /// Canonical lowercase extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Dwg => "dwg",
            Self::Dxf => "dxf",
            Self::Step => "step",
            Self::Stp => "stp",
            Self::Iges => "iges",
            Self::Igs => "igs",
            Self::Stl => "stl",
            Self::Obj => "obj",
        }
    }

    pub fn family(&self) -> FormatFamily {
        match self {
            Self::Pdf => FormatFamily::RasterDocument,
            Self::Dwg | Self::Dxf => FormatFamily::VectorDrawing,
            Self::Step | Self::Stp | Self::Iges | Self::Igs => FormatFamily::ParametricSolid,
            Self::Stl | Self::Obj => FormatFamily::PolygonMesh,
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ---------------------------------------------------------------------------
// Classification and inputs
// ---------------------------------------------------------------------------

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Accepted classification of a candidate input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileClassification {
    pub format: FormatKind,
    pub family: FormatFamily,
    pub size_bytes: u64,
    pub size_mb: f64,
}

impl FileClassification {
    pub fn new(format: FormatKind, size_bytes: u64) -> Self {
        Self {
            format,
            family: format.family(),
            size_bytes,
            size_mb: size_bytes as f64 / BYTES_PER_MB,
        }
    }
}

/// Immutable reference to source bytes, created at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    pub location: PathBuf,
    pub format: FormatKind,
    pub size_bytes: u64,
}

impl InputFile {
    pub fn new(location: impl Into<PathBuf>, classification: &FileClassification) -> Self {
        Self {
            location: location.into(),
            format: classification.format,
            size_bytes: classification.size_bytes,
        }
    }
}

/// What the stage router produced for an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ArtifactKind {
    /// One rasterized page of a document (0-based).
    RasterPage { page: usize },
    /// Neutral solid-exchange output of the geometry kernel.
    SolidExchange,
    /// The input itself, already consumable by the engine.
    Passthrough,
}

/// Write-once output of the stage router. Traces to exactly one [`InputFile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedArtifact {
    pub location: PathBuf,
    pub source_format: FormatKind,
    pub kind: ArtifactKind,
    pub produced_from: InputFile,
}

impl NormalizedArtifact {
    /// Passthrough artifact: same location as the input, nothing copied.
    pub fn passthrough(input: &InputFile) -> Self {
        Self {
            location: input.location.clone(),
            source_format: input.format,
            kind: ArtifactKind::Passthrough,
            produced_from: input.clone(),
        }
    }

    pub fn derived(location: &Path, kind: ArtifactKind, input: &InputFile) -> Self {
        Self {
            location: location.to_path_buf(),
            source_format: input.format,
            kind,
            produced_from: input.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// GenerationOptions
// ---------------------------------------------------------------------------

/// Output container format of the generated mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Glb,
    Gltf,
    Obj,
    Stl,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Glb => "glb",
            Self::Gltf => "gltf",
            Self::Obj => "obj",
            Self::Stl => "stl",
        }
    }
}

/// Three-step quality scale used for mesh resolution, textures, and overall quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    #[default]
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSystem {
    #[default]
    RightHanded,
    LeftHanded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitScale {
    #[default]
    Millimeters,
    Centimeters,
    Meters,
    Inches,
}

/// Closed set of generation options. Unknown keys are rejected on deserialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationOptions {
    pub output_format: OutputFormat,
    pub quality: Quality,
    pub mesh_resolution: Quality,
    pub texture_quality: Quality,
    pub coordinate_system: CoordinateSystem,
    pub unit_scale: UnitScale,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Texture size in pixels, written `WIDTHxHEIGHT` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TextureDimensions {
    pub width: u32,
    pub height: u32,
}

impl FromStr for TextureDimensions {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("invalid texture size '{s}', expected WIDTHxHEIGHT"))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| format!("invalid texture size '{s}': {e}"))
        };
        Ok(Self {
            width: parse(w)?,
            height: parse(h)?,
        })
    }
}

impl TryFrom<String> for TextureDimensions {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TextureDimensions> for String {
    fn from(value: TextureDimensions) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TextureDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Descriptor of a generated mesh, attached to a job exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub artifact_location: String,
    pub vertex_count: u64,
    pub face_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture_dimensions: Option<TextureDimensions>,
    pub processing_duration_seconds: f64,
}

/// Lifecycle state of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(FormatKind::from_extension("STEP"), Some(FormatKind::Step));
        assert_eq!(FormatKind::from_extension("Dxf"), Some(FormatKind::Dxf));
        assert_eq!(FormatKind::from_extension("png"), None);
        assert_eq!(FormatKind::from_extension(""), None);
    }

    #[test]
    fn every_format_has_exactly_one_family() {
        assert_eq!(FormatKind::Pdf.family(), FormatFamily::RasterDocument);
        assert_eq!(FormatKind::Dwg.family(), FormatFamily::VectorDrawing);
        assert_eq!(FormatKind::Igs.family(), FormatFamily::ParametricSolid);
        assert_eq!(FormatKind::Obj.family(), FormatFamily::PolygonMesh);
    }

    #[test]
    fn options_defaults() {
        let opts: GenerationOptions = serde_json::from_str("{}").expect("empty options");
        assert_eq!(opts.output_format, OutputFormat::Glb);
        assert_eq!(opts.mesh_resolution, Quality::High);
        assert_eq!(opts.texture_quality, Quality::High);
        assert_eq!(opts.coordinate_system, CoordinateSystem::RightHanded);
        assert_eq!(opts.unit_scale, UnitScale::Millimeters);
    }

    #[test]
    fn options_reject_unknown_keys() {
        let err = serde_json::from_str::<GenerationOptions>(r#"{"polygon_budget": 5}"#)
            .expect_err("unknown key must be rejected");
        assert!(err.to_string().contains("polygon_budget"));
    }

    #[test]
    fn options_parse_partial_override() {
        let opts: GenerationOptions =
            serde_json::from_str(r#"{"mesh_resolution":"low","unit_scale":"inches"}"#).unwrap();
        assert_eq!(opts.mesh_resolution, Quality::Low);
        assert_eq!(opts.unit_scale, UnitScale::Inches);
        assert_eq!(opts.texture_quality, Quality::High);
    }

    #[test]
    fn texture_dimensions_wire_format() {
        let dims: TextureDimensions = "1024x2048".parse().unwrap();
        assert_eq!(dims.width, 1024);
        assert_eq!(dims.height, 2048);
        assert_eq!(serde_json::to_string(&dims).unwrap(), r#""1024x2048""#);
        assert!("1024".parse::<TextureDimensions>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
