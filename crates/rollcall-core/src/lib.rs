//! rollcall-core: face matching and attendance bookkeeping.
//!
//! Face detection (SCRFD) and embedding (ArcFace) run through ONNX Runtime
//! behind the [`FaceAnalyzer`] trait. On top of it sit the gallery builder,
//! the per-frame matcher, per-session deduplication and the CSV sheet.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod enroll;
pub mod gallery;
pub mod imaging;
pub mod matcher;
pub mod recognizer;
pub mod recorder;
pub mod session;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use gallery::{Gallery, GalleryError, SkipReason};
pub use matcher::{FaceMatch, FrameMatcher, DEFAULT_DETECT_SCALE, DEFAULT_MATCH_THRESHOLD};
pub use recorder::{AttendanceRecord, AttendanceSheet, RecorderError};
pub use session::{ClassName, ClassNameError, Session};
pub use types::{BoundingBox, Embedding, Enrollment};

use std::path::PathBuf;

/// Directory searched for `det_10g.onnx` and `w600k_r50.onnx` when no
/// model directory is configured.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .map(|data| data.join("rollcall/models"))
        .unwrap_or_else(|_| PathBuf::from("models"))
}

#[cfg(test)]
pub(crate) mod testing;
