//! Canned face analyzer for unit tests.
//!
//! Images are identified by their first pixel: each marker value maps to
//! the list of embeddings "found" in that image. Unknown markers hold no
//! faces.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{BoundingBox, Embedding};
use std::collections::HashMap;

#[derive(Default)]
pub(crate) struct StubAnalyzer {
    faces: HashMap<u8, Vec<Embedding>>,
    pub(crate) last_dims: Option<(u32, u32)>,
    pub(crate) detect_calls: usize,
}

impl StubAnalyzer {
    pub(crate) fn with_faces(mut self, marker: u8, embeddings: Vec<Vec<f32>>) -> Self {
        self.faces
            .insert(marker, embeddings.into_iter().map(Embedding::new).collect());
        self
    }
}

impl FaceAnalyzer for StubAnalyzer {
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, AnalyzerError> {
        self.detect_calls += 1;
        self.last_dims = Some((width, height));
        let count = pixels
            .first()
            .and_then(|m| self.faces.get(m))
            .map_or(0, Vec::len);
        Ok((0..count)
            .map(|i| BoundingBox {
                x: 10.0 * i as f32,
                y: 5.0,
                width: 8.0,
                height: 8.0,
                confidence: 0.9 - 0.1 * i as f32,
                landmarks: None,
            })
            .collect())
    }

    fn encode(
        &mut self,
        pixels: &[u8],
        _width: u32,
        _height: u32,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        let known = pixels.first().and_then(|m| self.faces.get(m)).cloned().unwrap_or_default();
        Ok(known.into_iter().take(faces.len()).collect())
    }
}

