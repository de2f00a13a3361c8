//! Face alignment to the canonical 112×112 ArcFace crop.
//!
//! With landmarks, a least-squares similarity transform (scale, rotation,
//! translation) maps all five detected points onto the InsightFace
//! reference layout. Without landmarks the bounding box is cropped and
//! stretched instead.

use crate::imaging;
use crate::types::BoundingBox;

pub const ALIGNED_SIZE: usize = 112;

/// InsightFace reference landmarks for a 112×112 output: eyes, nose tip,
/// mouth corners.
const REFERENCE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `dst = [a -b; b a] * src + t`
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit taking `src` onto [`REFERENCE`].
    ///
    /// Solved in closed form about the centroids. `None` when the source
    /// points are (nearly) coincident.
    fn fit(src: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (mx, my) = centroid(src);
        let (rx, ry) = centroid(&REFERENCE);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(x, y), &(u, v)) in src.iter().zip(REFERENCE.iter()) {
            let (sx, sy) = (x - mx, y - my);
            let (dx, dy) = (u - rx, v - ry);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm < 1e-6 {
            return None;
        }

        let (a, b) = (dot / norm, cross / norm);
        Some(Self {
            a,
            b,
            tx: rx - (a * mx - b * my),
            ty: ry - (b * mx + a * my),
        })
    }

    #[cfg(test)]
    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Map an output pixel back into source coordinates.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (u, v) = (x - self.tx, y - self.ty);
        ((self.a * u + self.b * v) / det, (-self.b * u + self.a * v) / det)
    }
}

fn warp(frame: &[u8], width: usize, height: usize, m: &Similarity) -> Vec<u8> {
    let sample = |x: i64, y: i64| -> f32 {
        if x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height {
            frame[y as usize * width + x as usize] as f32
        } else {
            0.0
        }
    };

    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    for (i, px) in out.iter_mut().enumerate() {
        let (ox, oy) = ((i % ALIGNED_SIZE) as f32, (i / ALIGNED_SIZE) as f32);
        let (sx, sy) = m.to_source(ox, oy);
        let (x0, y0) = (sx.floor() as i64, sy.floor() as i64);
        let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);

        let top = sample(x0, y0) * (1.0 - fx) + sample(x0 + 1, y0) * fx;
        let bottom = sample(x0, y0 + 1) * (1.0 - fx) + sample(x0 + 1, y0 + 1) * fx;
        *px = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn crop_and_stretch(frame: &[u8], width: u32, height: u32, face: &BoundingBox) -> Vec<u8> {
    match face.pixel_rect(width, height) {
        Some(rect) => {
            let patch = imaging::crop(frame, width, rect);
            imaging::resize_bilinear(&patch, rect.2 as usize, rect.3 as usize, ALIGNED_SIZE, ALIGNED_SIZE)
        }
        None => vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE],
    }
}

/// Produce a 112×112 grayscale crop of `face` ready for embedding.
pub fn align_face(frame: &[u8], width: u32, height: u32, face: &BoundingBox) -> Vec<u8> {
    let transform = face
        .landmarks
        .and_then(|lms| Similarity::fit(&lms));

    match transform {
        Some(m) => warp(frame, width as usize, height as usize, &m),
        None => {
            tracing::debug!("no usable landmarks; falling back to box crop");
            crop_and_stretch(frame, width, height, face)
        }
    }
}
