//! Input intake for CadMesh: format classification and normalization.
//!
//! Candidate files are first checked by the [`Classifier`] (extension allow-list,
//! size ceiling) and then handed to the [`Normalizer`], which turns each accepted
//! input into one or more [`NormalizedArtifact`](cadmesh_shared::NormalizedArtifact)s.

pub mod classify;
pub mod router;
pub mod tools;

pub use classify::{Classifier, format_of};
pub use router::{BatchOutcome, FileFailure, FileOutcome, Normalizer};
pub use tools::{DrawExeKernel, GeometryKernel, PageRasterizer, PdftoppmRasterizer};
