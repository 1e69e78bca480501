//! Camera seams for the session loop.

use rollcall_hw::{Camera, CameraError, Frame};

/// An open camera. Dropping it releases the device.
pub trait FrameSource {
    fn capture(&mut self) -> Result<Frame, CameraError>;
}

/// Opens a fresh [`FrameSource`] each time a session starts.
pub trait CameraProvider {
    type Source: FrameSource;

    fn open(&mut self) -> Result<Self::Source, CameraError>;
}

impl FrameSource for Camera {
    fn capture(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// Opens a V4L2 device and discards warmup frames.
#[derive(Debug, Clone)]
pub struct V4l2CameraProvider {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub warmup_frames: usize,
}

impl CameraProvider for V4l2CameraProvider {
    type Source = Camera;

    fn open(&mut self) -> Result<Camera, CameraError> {
        let mut camera = Camera::open(&self.device, self.width, self.height)?;
        if self.warmup_frames > 0 {
            tracing::debug!(count = self.warmup_frames, "discarding warmup frames");
            camera.discard_frames(self.warmup_frames);
        }
        Ok(camera)
    }
}
