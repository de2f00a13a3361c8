//! rollcall-hw: hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access and a `FrameSource` seam so the
//! attendance loop can run against scripted frames in tests.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::{Frame, FrameError};

/// Anything that yields grayscale frames one at a time.
///
/// The attendance loop pulls from a source synchronously, so a slow
/// consumer simply reads less often.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Read and throw away `count` frames (auto-exposure settling).
    fn discard(&mut self, count: usize) {
        for _ in 0..count {
            if let Err(e) = self.next_frame() {
                tracing::debug!(error = %e, "warmup frame read failed");
            }
        }
    }
}
