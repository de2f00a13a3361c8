//! Frame type and raw-buffer conversion to 8-bit grayscale.

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver sequence number.
    pub sequence: u32,
}

impl Frame {
    /// Wrap an already-converted grayscale buffer.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert 16-bit little-endian luma to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if y16.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: y16.len(),
        });
    }
    Ok(y16[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

/// Copy an 8-bit luma plane, dropping any driver padding past the image.
pub fn grey_plane(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].to_vec())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0x12_34 and 0xAB_CD little-endian
        let y16 = vec![0x34, 0x12, 0xCD, 0xAB];
        let gray = y16_to_grayscale(&y16, 2, 1).unwrap();
        assert_eq!(gray, vec![0x12, 0xAB]);
    }

    #[test]
    fn test_grey_plane_drops_padding() {
        let grey = vec![1, 2, 3, 4, 0, 0];
        assert_eq!(grey_plane(&grey, 2, 2).unwrap(), vec![1, 2, 3, 4]);
        assert!(grey_plane(&grey[..3], 2, 2).is_err());
    }

    #[test]
    fn test_from_gray_checks_dimensions() {
        assert!(Frame::from_gray(vec![0; 12], 4, 3, 0).is_ok());
        assert!(Frame::from_gray(vec![0; 11], 4, 3, 0).is_err());
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame::from_gray(vec![0, 100, 200, 100], 2, 2, 7).unwrap();
        assert!((frame.avg_brightness() - 100.0).abs() < 1e-6);
        assert_eq!(frame.sequence, 7);
    }
}
