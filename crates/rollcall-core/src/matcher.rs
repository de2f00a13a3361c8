//! Frame matcher: camera frame in, recognised names out.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::gallery::Gallery;
use crate::imaging;
use crate::types::{BoundingBox, Embedding, Enrollment};

/// Maximum (exclusive) embedding distance accepted as the same person.
///
/// Embeddings are unit length, so distance d and cosine similarity c are
/// related by d = sqrt(2 - 2c). 1.1 corresponds to c ≈ 0.40, the usual
/// ArcFace acceptance point.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.1;

/// Frames are shrunk by this factor before detection.
pub const DEFAULT_DETECT_SCALE: f32 = 0.25;

/// A face in the frame that matched an enrolled person.
#[derive(Debug, Clone)]
pub struct FaceMatch {
    /// Upper-cased display name of the enrollment.
    pub name: String,
    pub distance: f32,
    /// Face region in full-resolution frame coordinates.
    pub region: BoundingBox,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameMatcher {
    threshold: f32,
    scale: f32,
}

impl Default for FrameMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD, DEFAULT_DETECT_SCALE)
    }
}

impl FrameMatcher {
    /// `threshold` must be positive and finite, `scale` in (0, 1]. With a
    /// warning, a bad threshold becomes the default and a bad scale
    /// disables downscaling.
    pub fn new(threshold: f32, scale: f32) -> Self {
        let threshold = if threshold.is_finite() && threshold > 0.0 {
            threshold
        } else {
            tracing::warn!(threshold, fallback = DEFAULT_MATCH_THRESHOLD, "invalid match threshold; using default");
            DEFAULT_MATCH_THRESHOLD
        };
        let scale = if scale.is_finite() && scale > 0.0 && scale <= 1.0 {
            scale
        } else {
            tracing::warn!(scale, "invalid detect scale; detecting at full resolution");
            1.0
        };
        Self { threshold, scale }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Nearest enrollment, if it is strictly closer than the threshold.
    pub fn best_match<'g>(&self, probe: &Embedding, gallery: &'g Gallery) -> Option<(&'g Enrollment, f32)> {
        gallery
            .nearest(probe)
            .filter(|&(_, distance)| distance < self.threshold)
    }

    /// Detect, embed and identify every face in a grayscale frame.
    ///
    /// Detection runs on a downscaled copy; returned regions are mapped
    /// back to the full-resolution frame. Faces with no enrollment under the
    /// threshold are dropped.
    pub fn match_frame<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
        pixels: &[u8],
        width: u32,
        height: u32,
        gallery: &Gallery,
    ) -> Result<Vec<FaceMatch>, AnalyzerError> {
        if gallery.is_empty() {
            return Ok(Vec::new());
        }

        let small = imaging::downscale(pixels, width, height, self.scale);
        let faces = analyzer.detect(&small.data, small.width, small.height)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = analyzer.encode(&small.data, small.width, small.height, &faces)?;

        let back = width as f32 / small.width as f32;
        let mut matches = Vec::new();
        for (face, embedding) in faces.iter().zip(embeddings.iter()) {
            if let Some((entry, distance)) = self.best_match(embedding, gallery) {
                matches.push(FaceMatch {
                    name: entry.display_name(),
                    distance,
                    region: face.scaled(back),
                });
            }
        }

        let unknown = faces.len() - matches.len();
        if unknown > 0 {
            tracing::debug!(unknown, matched = matches.len(), "unrecognised faces in frame");
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubAnalyzer;
    use std::path::PathBuf;

    const MARKER: u8 = 7;

    fn gallery() -> Gallery {
        let entry = |name: &str, v: Vec<f32>| Enrollment {
            name: name.into(),
            embedding: Embedding::new(v),
            source: PathBuf::new(),
        };
        Gallery::from_entries(vec![
            entry("Alice", vec![1.0, 0.0, 0.0]),
            entry("Bob", vec![0.0, 1.0, 0.0]),
        ])
    }

    fn frame() -> Vec<u8> {
        vec![MARKER; 640 * 480]
    }

    /// The classroom scenarios are written against a 0.6 threshold.
    fn strict() -> FrameMatcher {
        FrameMatcher::new(0.6, DEFAULT_DETECT_SCALE)
    }

    /// Unit vectors whose cosine similarity is `cos`.
    fn unit_pair(cos: f32) -> (Embedding, Embedding) {
        (
            Embedding::new(vec![1.0, 0.0, 0.0]),
            Embedding::new(vec![cos, (1.0 - cos * cos).sqrt(), 0.0]),
        )
    }

    #[test]
    fn test_close_face_matches_once() {
        // 0.3 from Alice, ~1.45 from Bob.
        let mut analyzer = StubAnalyzer::default().with_faces(MARKER, vec![vec![1.0, 0.0, 0.3]]);
        let matches = strict()
            .match_frame(&mut analyzer, &frame(), 640, 480, &gallery())
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "ALICE");
        assert!((matches[0].distance - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_distant_face_ignored() {
        // 0.9 from both enrollments.
        let c = (0.81f32 - 0.5).sqrt();
        let mut analyzer = StubAnalyzer::default().with_faces(MARKER, vec![vec![0.5, 0.5, c]]);
        let matches = strict()
            .match_frame(&mut analyzer, &frame(), 640, 480, &gallery())
            .unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_distance_equal_to_threshold_rejected() {
        let matcher = FrameMatcher::new(0.5, 1.0);
        let probe = Embedding::new(vec![1.0, 0.0, 0.5]);
        assert!(matcher.best_match(&probe, &gallery()).is_none());
        let probe = Embedding::new(vec![1.0, 0.0, 0.49]);
        assert!(matcher.best_match(&probe, &gallery()).is_some());
    }

    #[test]
    fn test_best_of_several_candidates_wins() {
        // Both under a loose threshold; Bob is closer.
        let matcher = FrameMatcher::new(1.5, 1.0);
        let probe = Embedding::new(vec![0.4, 0.6, 0.0]);
        let gallery = gallery();
        let (entry, _) = matcher.best_match(&probe, &gallery).unwrap();
        assert_eq!(entry.name, "Bob");
    }

    #[test]
    fn test_detects_on_downscaled_frame_and_maps_regions_back() {
        let mut analyzer = StubAnalyzer::default().with_faces(MARKER, vec![vec![0.0, 1.0, 0.0]]);
        let matches = FrameMatcher::new(0.6, 0.25)
            .match_frame(&mut analyzer, &frame(), 640, 480, &gallery())
            .unwrap();

        assert_eq!(analyzer.last_dims, Some((160, 120)));
        let r = &matches[0].region;
        // Stub box is (0, 5, 8, 8) in detection space.
        assert_eq!((r.x, r.y, r.width, r.height), (0.0, 20.0, 32.0, 32.0));
    }

    #[test]
    fn test_mixed_frame_reports_only_known_faces() {
        let mut analyzer = StubAnalyzer::default().with_faces(
            MARKER,
            vec![vec![0.0, 0.0, 1.0], vec![0.0, 0.95, 0.0]],
        );
        let matches = strict()
            .match_frame(&mut analyzer, &frame(), 640, 480, &gallery())
            .unwrap();
        let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["BOB"]);
    }

    #[test]
    fn test_empty_gallery_short_circuits() {
        let mut analyzer = StubAnalyzer::default().with_faces(MARKER, vec![vec![1.0, 0.0, 0.0]]);
        let matches = FrameMatcher::default()
            .match_frame(&mut analyzer, &frame(), 640, 480, &Gallery::default())
            .unwrap();
        assert!(matches.is_empty());
        assert_eq!(analyzer.detect_calls, 0);
    }

    #[test]
    fn test_default_threshold_on_unit_embedding_scale() {
        let matcher = FrameMatcher::default();
        let single = |e: Embedding| {
            Gallery::from_entries(vec![Enrollment {
                name: "erin".into(),
                embedding: e,
                source: PathBuf::new(),
            }])
        };

        // Typical same-person ArcFace pair.
        let (enrolled, probe) = unit_pair(0.7);
        assert!(matcher.best_match(&probe, &single(enrolled)).is_some());

        // Different people sit well below cosine 0.4.
        let (enrolled, probe) = unit_pair(0.3);
        assert!(matcher.best_match(&probe, &single(enrolled)).is_none());
    }

    #[test]
    fn test_invalid_threshold_falls_back_to_default() {
        for bad in [f32::NAN, -0.5, 0.0, f32::INFINITY] {
            assert_eq!(FrameMatcher::new(bad, 1.0).threshold(), DEFAULT_MATCH_THRESHOLD);
        }
        assert_eq!(FrameMatcher::new(0.8, 1.0).threshold(), 0.8);
    }

    #[test]
    fn test_invalid_scale_falls_back_to_full_resolution() {
        assert_eq!(FrameMatcher::new(0.6, 0.0).scale(), 1.0);
        assert_eq!(FrameMatcher::new(0.6, 2.0).scale(), 1.0);
        assert_eq!(FrameMatcher::new(0.6, f32::NAN).scale(), 1.0);
    }
}
