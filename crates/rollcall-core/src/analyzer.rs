//! The face primitive seam: find faces, then embed them.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face detection and embedding over grayscale buffers.
///
/// Everything above this trait (gallery, matcher, enrollment, engine) is
/// written against it, so it can run on canned detections in tests.
pub trait FaceAnalyzer {
    /// Face regions in the image, most confident first.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, AnalyzerError>;

    /// One embedding per face, in the same order as `faces`.
    fn encode(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError>;
}

/// SCRFD detection plus ArcFace embedding.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join("det_10g.onnx"))?;
        let recognizer = FaceRecognizer::load(&model_dir.join("w600k_r50.onnx"))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, AnalyzerError> {
        Ok(self.detector.detect(pixels, width, height)?)
    }

    fn encode(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        faces
            .iter()
            .map(|face| Ok(self.recognizer.extract(pixels, width, height, face)?))
            .collect()
    }
}
