//! Processing-time estimate and hygiene advisories for a batch of inputs.
//!
//! Pure and deterministic: no I/O, and the output does not depend on input order.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use cadmesh_shared::{FileClassification, FormatFamily, FormatKind};

/// Seconds charged per unit of complexity.
pub const BASE_SECONDS: f64 = 30.0;

/// Floor on any estimate, covering fixed engine warm-up.
pub const MIN_TOTAL_SECONDS: u64 = 30;

/// Result of [`estimate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    pub total_seconds: u64,
    /// Multiplier applied to each format present in the batch.
    pub per_format_multiplier: BTreeMap<FormatKind, f64>,
    pub advisories: Vec<String>,
}

/// Complexity multiplier of one format.
pub fn multiplier(format: FormatKind) -> f64 {
    match format {
        FormatKind::Pdf => 2.0,
        FormatKind::Dwg => 3.0,
        FormatKind::Dxf => 2.5,
        FormatKind::Step => 1.5,
        FormatKind::Iges => 1.8,
        FormatKind::Stl => 1.0,
        FormatKind::Stp | FormatKind::Igs | FormatKind::Obj => 2.0,
    }
}

fn advisory(family: FormatFamily) -> Option<&'static str> {
    match family {
        FormatFamily::RasterDocument => {
            Some("Ensure PDF contains vector graphics, not raster images")
        }
        FormatFamily::VectorDrawing => {
            Some("Check for proper layer organization and clean geometry")
        }
        FormatFamily::ParametricSolid => Some("Verify file integrity and surface quality"),
        FormatFamily::PolygonMesh => None,
    }
}

/// Estimate total processing time for a batch.
///
/// `total = max(30, round(30 × Σ multiplier))`.
pub fn estimate(classifications: &[FileClassification]) -> Estimate {
    let weight: f64 = classifications.iter().map(|c| multiplier(c.format)).sum();
    let total_seconds = ((BASE_SECONDS * weight).round() as u64).max(MIN_TOTAL_SECONDS);

    let per_format_multiplier = classifications
        .iter()
        .map(|c| (c.format, multiplier(c.format)))
        .collect();

    let families: BTreeSet<FormatFamily> = classifications.iter().map(|c| c.family).collect();
    let advisories = families
        .into_iter()
        .filter_map(advisory)
        .map(String::from)
        .collect();

    Estimate {
        total_seconds,
        per_format_multiplier,
        advisories,
    }
}
