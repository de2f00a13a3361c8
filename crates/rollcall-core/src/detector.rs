//! SCRFD face detector via ONNX Runtime.
//!
//! Runs `det_10g.onnx` on a letterboxed 640×640 input, decodes the three
//! anchor-free stride levels and suppresses overlapping boxes.

use crate::imaging;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// How the frame was fitted into the square network input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    inner_w: usize,
    inner_h: usize,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let inner_w = ((width as f32 * scale).round() as usize).clamp(1, INPUT_SIZE);
        let inner_h = ((height as f32 * scale).round() as usize).clamp(1, INPUT_SIZE);
        Self {
            scale,
            pad_x: ((INPUT_SIZE - inner_w) / 2) as f32,
            pad_y: ((INPUT_SIZE - inner_h) / 2) as f32,
            inner_w,
            inner_h,
        }
    }

    /// Network-input coordinates back to frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    levels: [LevelOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps per stride), model has {}",
                names.len()
            )));
        }

        let levels = map_outputs(&names);
        tracing::info!(path = %model_path.display(), outputs = ?names, ?levels, "loaded SCRFD model");

        Ok(Self {
            session,
            levels,
        })
    }

    /// Detect faces in a grayscale frame, most confident first.
    pub fn detect(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        if width == 0 || height == 0 || frame.len() < (width * height) as usize {
            return Err(DetectorError::InferenceFailed(format!(
                "frame buffer of {} bytes does not hold {width}x{height}",
                frame.len()
            )));
        }

        let letterbox = Letterbox::fit(width as usize, height as usize);
        let input = to_tensor(frame, width as usize, height as usize, &letterbox);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in self.levels.iter().zip(STRIDES.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(level.score, "scores")?;
            let boxes = extract(level.bbox, "boxes")?;
            let kps = extract(level.kps, "landmarks")?;

            candidates.extend(decode_level(scores, boxes, kps, stride, &letterbox, DEFAULT_CONFIDENCE));
        }

        let faces = suppress_overlaps(candidates, NMS_IOU);
        tracing::trace!(count = faces.len(), "detected faces");
        Ok(faces)
    }
}

/// Letterbox the frame into a normalized 1×3×640×640 tensor, replicating
/// the gray channel. Padding uses the mean so it normalizes to zero.
fn to_tensor(frame: &[u8], width: usize, height: usize, lb: &Letterbox) -> Array4<f32> {
    let resized = imaging::resize_bilinear(frame, width, height, lb.inner_w, lb.inner_h);
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    let (px, py) = (lb.pad_x as usize, lb.pad_y as usize);

    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let inside = y >= py && y < py + lb.inner_h && x >= px && x < px + lb.inner_w;
            let pixel = if inside {
                resized[(y - py) * lb.inner_w + (x - px)] as f32
            } else {
                PIXEL_MEAN
            };
            let v = (pixel - PIXEL_MEAN) / PIXEL_STD;
            for c in 0..3 {
                tensor[[0, c, y, x]] = v;
            }
        }
    }

    tensor
}

/// Work out which output tensor is which.
///
/// Exports name them `score_8`, `bbox_16`, `kps_32`, ... or use opaque
/// numeric names, in which case the conventional order (three score
/// tensors, three bbox tensors, three kps tensors) is assumed.
fn map_outputs(names: &[String]) -> [LevelOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut named = [LevelOutputs { score: 0, bbox: 0, kps: 0 }; 3];
    for (slot, &stride) in named.iter_mut().zip(STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(score), Some(bbox), Some(kps)) => *slot = LevelOutputs { score, bbox, kps },
            _ => {
                tracing::debug!(?names, "SCRFD outputs unnamed, using positional layout");
                return std::array::from_fn(|i| LevelOutputs {
                    score: i,
                    bbox: i + 3,
                    kps: i + 6,
                });
            }
        }
    }
    named
}

/// Decode one stride level into frame-space boxes above `threshold`.
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    lb: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid_w = INPUT_SIZE / stride;
    let anchors = (INPUT_SIZE / stride) * grid_w * ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > threshold)
        .filter_map(|i| {
            let cell = i / ANCHORS_PER_CELL;
            let (ax, ay) = ((cell % grid_w) as f32 * s, (cell / grid_w) as f32 * s);

            let d = boxes.get(i * 4..i * 4 + 4)?;
            let (x1, y1) = lb.unmap(ax - d[0] * s, ay - d[1] * s);
            let (x2, y2) = lb.unmap(ax + d[2] * s, ay + d[3] * s);

            let landmarks: Option<[(f32, f32); 5]> = kps.get(i * 10..i * 10 + 10).map(|k| {
                std::array::from_fn(|p| lb.unmap(ax + k[p * 2] * s, ay + k[p * 2 + 1] * s))
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: scores[i],
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; result is sorted by confidence.
fn suppress_overlaps(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for cand in candidates {
        if kept.iter().all(|k| iou(k, &cand) <= iou_threshold) {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou_partial() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert!(iou(&a, &bbox(20.0, 20.0, 5.0, 5.0, 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_suppression_keeps_best_of_cluster() {
        let result = suppress_overlaps(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            NMS_IOU,
        );
        let confs: Vec<f32> = result.iter().map(|b| b.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_640x480() {
        let lb = Letterbox::fit(640, 480);
        assert!((lb.scale - 1.0).abs() < 1e-6);
        assert_eq!((lb.inner_w, lb.inner_h), (640, 480));
        assert_eq!(lb.pad_y, 80.0);
        assert_eq!(lb.unmap(100.0, 180.0), (100.0, 100.0));
    }

    #[test]
    fn test_letterbox_small_frame_scales_up() {
        let lb = Letterbox::fit(160, 120);
        assert!((lb.scale - 4.0).abs() < 1e-6);
        let (x, y) = lb.unmap(40.0 * 4.0 + lb.pad_x, 30.0 * 4.0 + lb.pad_y);
        assert!((x - 40.0).abs() < 1e-4 && (y - 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_map_outputs_named_shuffled() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let levels = map_outputs(&names);
        assert_eq!(levels[0], LevelOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(levels[2], LevelOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_map_outputs_positional() {
        let names: Vec<String> = (0..9).map(|i| (440 + i).to_string()).collect();
        let levels = map_outputs(&names);
        assert_eq!(levels[1], LevelOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_decode_single_anchor() {
        let stride = 32;
        let cells = (INPUT_SIZE / stride) * (INPUT_SIZE / stride) * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; cells];
        let boxes = vec![1.0f32; cells * 4];
        let kps = vec![0.0f32; cells * 10];
        // Second anchor of cell (x=1, y=0).
        scores[3] = 0.95;

        let lb = Letterbox::fit(640, 640);
        let dets = decode_level(&scores, &boxes, &kps, stride, &lb, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (0.0, -32.0, 64.0, 64.0));
        assert_eq!(d.landmarks.unwrap()[0], (32.0, 0.0));
    }
}
