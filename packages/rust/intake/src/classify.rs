//! Format classifier: extension allow-list plus size ceiling.
//!
//! Only file metadata is read; contents are never opened.

use std::path::Path;

use cadmesh_shared::{ClassificationError, DEFAULT_MAX_FILE_SIZE, FileClassification, FormatKind};

/// Classifies candidate inputs against the allow-list and a size ceiling.
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    max_size_bytes: u64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_FILE_SIZE)
    }
}

impl Classifier {
    pub fn with_limit(max_size_bytes: u64) -> Self {
        Self { max_size_bytes }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Classify a file on disk, reading only its size.
    pub fn classify(&self, file: &Path) -> Result<FileClassification, ClassificationError> {
        let format = format_of(file)?;
        let metadata = std::fs::metadata(file).map_err(|source| ClassificationError::Metadata {
            path: file.to_path_buf(),
            source,
        })?;
        self.check_size(format, metadata.len())
    }

    /// Classify a reference by name and a known size, without touching the filesystem.
    pub fn classify_name(
        &self,
        name: &str,
        size_bytes: u64,
    ) -> Result<FileClassification, ClassificationError> {
        let format = format_of(Path::new(name))?;
        self.check_size(format, size_bytes)
    }

    fn check_size(
        &self,
        format: FormatKind,
        size_bytes: u64,
    ) -> Result<FileClassification, ClassificationError> {
        if size_bytes > self.max_size_bytes {
            return Err(ClassificationError::FileTooLarge {
                size_bytes,
                limit_bytes: self.max_size_bytes,
            });
        }
        Ok(FileClassification::new(format, size_bytes))
    }
}

/// Determine the format from the file extension alone.
pub fn format_of(file: &Path) -> Result<FormatKind, ClassificationError> {
    let ext = file.extension().and_then(|e| e.to_str());
    ext.and_then(FormatKind::from_extension)
        .ok_or_else(|| ClassificationError::UnsupportedFormat {
            extension: ext.map(str::to_ascii_lowercase),
        })
}

#[cfg(test)]
mod tests {
    use cadmesh_shared::FormatFamily;
    use uuid::Uuid;

    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn accepts_every_allow_listed_extension() {
        let classifier = Classifier::default();
        for ext in ["pdf", "dwg", "dxf", "step", "stp", "iges", "igs", "stl", "obj"] {
            let name = format!("part.{ext}");
            let c = classifier.classify_name(&name, 10 * MB).expect(&name);
            assert_eq!(c.format.extension(), ext);
        }
    }

    #[test]
    fn rejects_other_extensions() {
        let classifier = Classifier::default();
        for name in ["drawing.png", "model.fbx", "notes.txt", "archive.zip"] {
            let err = classifier.classify_name(name, 1).expect_err(name);
            assert!(matches!(err, ClassificationError::UnsupportedFormat { .. }), "{name}");
        }
    }

    #[test]
    fn rejects_missing_extension() {
        let err = Classifier::default()
            .classify_name("Makefile", 1)
            .expect_err("no extension");
        match err {
            ClassificationError::UnsupportedFormat { extension } => assert!(extension.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn uppercase_extension_is_accepted() {
        let c = Classifier::default().classify_name("BRACKET.STP", 0).unwrap();
        assert_eq!(c.format, FormatKind::Stp);
        assert_eq!(c.family, FormatFamily::ParametricSolid);
    }

    #[test]
    fn exactly_fifty_megabytes_is_valid() {
        let c = Classifier::default().classify_name("a.step", 50 * MB).unwrap();
        assert!((c.size_mb - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fifty_one_megabyte_step_is_too_large() {
        let err = Classifier::default()
            .classify_name("a.step", 51 * MB)
            .expect_err("too large");
        match err {
            ClassificationError::FileTooLarge {
                size_bytes,
                limit_bytes,
            } => {
                assert_eq!(size_bytes, 51 * MB);
                assert_eq!(limit_bytes, 50 * MB);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn classify_reads_size_from_disk() {
        let dir = std::env::temp_dir().join(format!("cadmesh-classify-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("plate.dxf");
        std::fs::write(&file, vec![0u8; 4096]).unwrap();

        let c = Classifier::with_limit(8192).classify(&file).unwrap();
        assert_eq!(c.size_bytes, 4096);
        assert_eq!(c.family, FormatFamily::VectorDrawing);

        let err = Classifier::with_limit(1024).classify(&file).unwrap_err();
        assert!(matches!(err, ClassificationError::FileTooLarge { size_bytes: 4096, .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unsupported_extension_checked_before_metadata() {
        let err = Classifier::default()
            .classify(Path::new("/definitely/not/here.png"))
            .unwrap_err();
        assert!(matches!(err, ClassificationError::UnsupportedFormat { .. }));
    }

    #[test]
    fn missing_supported_file_reports_metadata_error() {
        let err = Classifier::default()
            .classify(Path::new("/definitely/not/here.step"))
            .unwrap_err();
        assert_eq!(err.code(), "file_unreadable");
    }
}
