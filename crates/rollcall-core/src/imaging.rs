//! Grayscale resampling and cropping on raw `width * height` buffers.

/// A grayscale image owned as a flat row-major buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayBuf {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Resize with bilinear interpolation (pixel-center aligned).
pub fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 || src.len() < src_w * src_h {
        return vec![0u8; dst_w * dst_h];
    }

    let sx = src_w as f32 / dst_w as f32;
    let sy = src_h as f32 / dst_h as f32;
    let mut out = Vec::with_capacity(dst_w * dst_h);

    for y in 0..dst_h {
        let fy = ((y as f32 + 0.5) * sy - 0.5).max(0.0);
        let y0 = (fy as usize).min(src_h - 1);
        let y1 = (y0 + 1).min(src_h - 1);
        let wy = fy - y0 as f32;
        let row0 = &src[y0 * src_w..(y0 + 1) * src_w];
        let row1 = &src[y1 * src_w..(y1 + 1) * src_w];

        for x in 0..dst_w {
            let fx = ((x as f32 + 0.5) * sx - 0.5).max(0.0);
            let x0 = (fx as usize).min(src_w - 1);
            let x1 = (x0 + 1).min(src_w - 1);
            let wx = fx - x0 as f32;

            let top = row0[x0] as f32 + (row0[x1] as f32 - row0[x0] as f32) * wx;
            let bottom = row1[x0] as f32 + (row1[x1] as f32 - row1[x0] as f32) * wx;
            let val = top + (bottom - top) * wy;
            out.push(val.round().clamp(0.0, 255.0) as u8);
        }
    }

    out
}

/// Shrink (or enlarge) an image by a uniform factor. Output dimensions are
/// rounded and never smaller than 1×1.
pub fn downscale(src: &[u8], width: u32, height: u32, factor: f32) -> GrayBuf {
    let new_w = ((width as f32 * factor).round() as u32).max(1);
    let new_h = ((height as f32 * factor).round() as u32).max(1);
    if new_w == width && new_h == height {
        return GrayBuf {
            data: src.to_vec(),
            width,
            height,
        };
    }
    GrayBuf {
        data: resize_bilinear(src, width as usize, height as usize, new_w as usize, new_h as usize),
        width: new_w,
        height: new_h,
    }
}

/// Copy the `(x, y, w, h)` rectangle out of an image. The rectangle must
/// lie inside the image (see `BoundingBox::pixel_rect`).
pub fn crop(src: &[u8], width: u32, rect: (u32, u32, u32, u32)) -> Vec<u8> {
    let (x, y, w, h) = rect;
    let stride = width as usize;
    let mut out = Vec::with_capacity((w * h) as usize);
    for row in y as usize..(y + h) as usize {
        let start = row * stride + x as usize;
        out.extend_from_slice(&src[start..start + w as usize]);
    }
    out
}
