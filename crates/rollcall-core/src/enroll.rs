//! Enrolling a new student from a single camera frame.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::imaging;
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("No face detected. Please try again.")]
    NoFace,
    #[error("Multiple faces detected ({0}). Please ensure only one face is visible.")]
    MultipleFaces(usize),
    #[error("student name cannot be empty")]
    EmptyName,
    #[error("student name {0:?} cannot contain path separators")]
    InvalidName(String),
    #[error("detected face lies outside the frame")]
    FaceOutOfFrame,
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("cannot create gallery directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Trimmed student name, usable as a file stem.
pub fn validate_student_name(raw: &str) -> Result<String, EnrollError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(EnrollError::EmptyName);
    }
    if name.contains(['/', '\\', '\0']) || name.starts_with('.') {
        return Err(EnrollError::InvalidName(name.to_string()));
    }
    Ok(name.to_string())
}

/// Save the single face in `pixels` as `<gallery_dir>/<name>.jpg`.
///
/// The frame must hold exactly one face; otherwise nothing is written.
/// An existing image for the same name is replaced.
pub fn enroll_from_frame<A: FaceAnalyzer + ?Sized>(
    analyzer: &mut A,
    pixels: &[u8],
    width: u32,
    height: u32,
    name: &str,
    gallery_dir: &Path,
) -> Result<PathBuf, EnrollError> {
    let name = validate_student_name(name)?;

    let faces = analyzer.detect(pixels, width, height)?;
    let face = match faces.as_slice() {
        [] => return Err(EnrollError::NoFace),
        [face] => face,
        many => return Err(EnrollError::MultipleFaces(many.len())),
    };

    let rect = face.pixel_rect(width, height).ok_or(EnrollError::FaceOutOfFrame)?;
    let crop = imaging::crop(pixels, width, rect);
    let img = GrayImage::from_raw(rect.2, rect.3, crop).ok_or(EnrollError::FaceOutOfFrame)?;

    std::fs::create_dir_all(gallery_dir).map_err(|source| EnrollError::Io {
        path: gallery_dir.to_path_buf(),
        source,
    })?;
    let path = gallery_dir.join(format!("{name}.jpg"));
    if path.exists() {
        tracing::warn!(path = %path.display(), "replacing existing enrollment image");
    }
    img.save(&path).map_err(|source| EnrollError::Save {
        path: path.clone(),
        source,
    })?;

    tracing::info!(name = %name, path = %path.display(), confidence = face.confidence, "student enrolled");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::Gallery;
    use crate::testing::StubAnalyzer;

    const ONE: u8 = 11;
    const TWO: u8 = 22;

    fn analyzer() -> StubAnalyzer {
        StubAnalyzer::default()
            .with_faces(ONE, vec![vec![1.0, 0.0]])
            .with_faces(TWO, vec![vec![1.0, 0.0], vec![0.0, 1.0]])
    }

    #[test]
    fn test_single_face_saved_as_crop() {
        let dir = tempfile::tempdir().unwrap();
        let frame = vec![ONE; 64 * 48];
        let path = enroll_from_frame(&mut analyzer(), &frame, 64, 48, " Erin ", dir.path()).unwrap();

        assert_eq!(path, dir.path().join("Erin.jpg"));
        let saved = image::open(&path).unwrap();
        // Stub face box is 8x8.
        assert_eq!((saved.width(), saved.height()), (8, 8));
    }

    #[test]
    fn test_two_faces_rejected_and_nothing_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = analyzer();
        let before = Gallery::build(dir.path(), &mut a).unwrap();

        let frame = vec![TWO; 64 * 48];
        let err = enroll_from_frame(&mut a, &frame, 64, 48, "Frank", dir.path()).unwrap_err();
        assert!(matches!(err, EnrollError::MultipleFaces(2)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let after = Gallery::build(dir.path(), &mut a).unwrap();
        assert_eq!(before.len(), after.len());
    }

    #[test]
    fn test_no_face_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let frame = vec![0u8; 64 * 48];
        let err = enroll_from_frame(&mut analyzer(), &frame, 64, 48, "Gina", dir.path()).unwrap_err();
        assert!(matches!(err, EnrollError::NoFace));
        assert!(!dir.path().join("Gina.jpg").exists());
    }

    #[test]
    fn test_name_validation() {
        assert!(matches!(validate_student_name("   "), Err(EnrollError::EmptyName)));
        assert!(matches!(validate_student_name("a/b"), Err(EnrollError::InvalidName(_))));
        assert!(matches!(validate_student_name(".hidden"), Err(EnrollError::InvalidName(_))));
        assert_eq!(validate_student_name("Mary Jane").unwrap(), "Mary Jane");
    }
}
