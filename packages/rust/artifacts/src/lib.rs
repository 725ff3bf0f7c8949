//! Filesystem artifact store.
//!
//! Holds three roots: uploaded inputs (content-addressed by SHA-256), normalized
//! intermediates (UUID-keyed), and generated models (keyed by model id).
//! Uploads and intermediates are write-once. Regenerating a model id replaces
//! its model file.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use cadmesh_shared::{CadMeshError, Result, StorageConfig};

/// Handle to the on-disk artifact roots.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    upload_dir: PathBuf,
    processed_dir: PathBuf,
    models_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            processed_dir: config.processed_dir.clone(),
            models_dir: config.models_dir.clone(),
        }
    }

    /// Store rooted at a single directory with the default sub-layout.
    pub fn under(root: &Path) -> Self {
        Self {
            upload_dir: root.join("uploads"),
            processed_dir: root.join("processed"),
            models_dir: root.join("models"),
        }
    }

    /// Create all roots if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.upload_dir, &self.processed_dir, &self.models_dir] {
            std::fs::create_dir_all(dir).map_err(|e| CadMeshError::io(dir, e))?;
        }
        Ok(())
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Write uploaded bytes under their content hash, keeping the extension.
    ///
    /// Identical content maps to the same path; an existing file is reused.
    pub fn store_upload(&self, original_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let digest = content_hash(bytes);
        let file_name = match Path::new(original_name).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{digest}.{}", ext.to_ascii_lowercase()),
            None => digest,
        };
        let path = self.upload_dir.join(file_name);

        if path.exists() {
            debug!(?path, "upload already stored");
            return Ok(path);
        }

        std::fs::create_dir_all(&self.upload_dir)
            .map_err(|e| CadMeshError::io(&self.upload_dir, e))?;
        std::fs::write(&path, bytes).map_err(|e| CadMeshError::io(&path, e))?;
        info!(?path, size = bytes.len(), "stored upload");
        Ok(path)
    }

    /// Allocate a fresh location for a normalized file with the given extension.
    /// The file itself is written by whoever produces it.
    pub fn processed_path(&self, extension: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.processed_dir)?;
        Ok(self
            .processed_dir
            .join(format!("{}.{extension}", Uuid::now_v7())))
    }

    /// Create a fresh directory for multi-file output (e.g. document pages).
    pub fn page_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.processed_dir.join(Uuid::now_v7().to_string());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Local destination for the generated model of `model_id`.
    ///
    /// The id is reduced to a single plain file-name component, so the returned
    /// path is always reachable through [`open_model`](Self::open_model).
    pub fn model_path(&self, model_id: &str, extension: &str) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.models_dir)?;
        Ok(self
            .models_dir
            .join(format!("{}.{extension}", model_file_stem(model_id))))
    }

    /// Resolve a generated model by bare file name.
    ///
    /// Returns `None` for names that are not a single plain path component or
    /// that do not exist. A missing artifact is a routine outcome.
    pub fn open_model(&self, filename: &str) -> Option<PathBuf> {
        let candidate = Path::new(filename);
        let mut components = candidate.components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !plain {
            debug!(filename, "rejected non-plain artifact name");
            return None;
        }

        let path = self.models_dir.join(candidate);
        if path.is_file() {
            Some(path)
        } else {
            debug!(?path, "artifact not found");
            None
        }
    }
}

fn model_file_stem(model_id: &str) -> String {
    let stem: String = model_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "model".into()
    } else {
        stem
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
