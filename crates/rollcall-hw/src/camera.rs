//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::FrameSource;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Requested capture resolution.
pub const CAPTURE_WIDTH: u32 = 640;
pub const CAPTURE_HEIGHT: u32 = 480;

const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    CaptureNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y channel extracted).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    fn to_gray(self, raw: &[u8], width: u32, height: u32) -> Result<Vec<u8>, frame::FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_grayscale(raw, width, height),
            Self::Grey => frame::grey_plane(raw, width, height),
            Self::Y16 => frame::y16_to_grayscale(raw, width, height),
        }
    }
}

/// An open webcam. The mmap stream is started on the first read and
/// stopped when the camera is dropped.
pub struct Camera {
    device: Device,
    stream: Option<MmapStream<'static>>,
    path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera by path (e.g. "/dev/video0") and ask for 640x480.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.raw_os_error() {
            Some(16) => CameraError::DeviceBusy,
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("querying capabilities: {e}")))?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::CaptureNotSupported);
        }

        let (width, height, pixel_format) = negotiate(&device)?;
        tracing::info!(
            device = device_path,
            card = %caps.card,
            width,
            height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            device,
            stream: None,
            path: device_path.to_string(),
            width,
            height,
            pixel_format,
        })
    }

    /// Dequeue one buffer and convert it to 8-bit gray.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("starting stream: {e}")))?,
        };
        let stream = self.stream.insert(stream);

        let (raw, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;
        let gray = self
            .pixel_format
            .to_gray(raw, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("{:?}: {e}", self.pixel_format)))?;

        Frame::from_gray(gray, self.width, self.height, meta.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    /// Capture-capable devices among `/dev/video0` to `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(probe)
            .collect()
    }
}

/// Ask for YUYV at the capture size; accept whatever supported format and
/// size the driver settles on.
fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut wanted = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(e.to_string()))?;
    wanted.width = CAPTURE_WIDTH;
    wanted.height = CAPTURE_HEIGHT;
    wanted.fourcc = FourCC::new(b"YUYV");

    let got = device
        .set_format(&wanted)
        .map_err(|e| CameraError::FormatNegotiationFailed(e.to_string()))?;
    let pixel_format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!("driver offers {}, need YUYV, GREY or Y16", got.fourcc))
    })?;

    if (got.width, got.height) != (CAPTURE_WIDTH, CAPTURE_HEIGHT) {
        tracing::warn!(width = got.width, height = got.height, "driver changed the capture size");
    }
    Ok((got.width, got.height, pixel_format))
}

fn probe(path: String) -> Option<DeviceInfo> {
    let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return None;
    }
    Some(DeviceInfo {
        path,
        name: caps.card,
        driver: caps.driver,
        bus: caps.bus,
    })
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        // Stream first; it borrows the device's buffers.
        self.stream = None;
        tracing::debug!(device = %self.path, "camera released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/does-not-exist-rollcall").err();
        assert!(matches!(err, Some(CameraError::DeviceNotFound(_))));
    }
}
