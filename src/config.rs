//! Capture run configuration.

use std::path::PathBuf;

use crate::capture::FrameCount;
use crate::error::{CaptureError, ErrorKind, Result};
use crate::format::{DEFAULT_PIXEL_FORMAT, PIXEL_FORMAT_COUNT};

/// Default device node.
pub const DEFAULT_DEVICE: &str = "/dev/video0";
/// Default frame width in pixels.
pub const DEFAULT_WIDTH: u32 = 640;
/// Default frame height in pixels.
pub const DEFAULT_HEIGHT: u32 = 480;
/// Default output file prefix.
pub const DEFAULT_PREFIX: &str = "video.cap";

/// Everything one capture run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Device node to open.
    pub device: PathBuf,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Index into the pixel format table.
    pub format_index: usize,
    /// Frames to capture.
    pub count: FrameCount,
    /// Output file prefix; frame `n` is written to `<prefix>.<n>`.
    pub prefix: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            format_index: DEFAULT_PIXEL_FORMAT,
            count: FrameCount::default(),
            prefix: DEFAULT_PREFIX.to_owned(),
        }
    }
}

impl CaptureConfig {
    /// Reject settings that cannot work before any device is touched.
    pub fn validate(&self) -> Result<()> {
        if self.device.as_os_str().is_empty() {
            return Err(invalid("device path is empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(invalid(format!(
                "frame size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.format_index >= PIXEL_FORMAT_COUNT {
            return Err(invalid(format!(
                "pixel format index {} is out of range 0..{PIXEL_FORMAT_COUNT}",
                self.format_index
            )));
        }
        Ok(())
    }
}

fn invalid<M: Into<String>>(message: M) -> CaptureError {
    CaptureError::new(ErrorKind::InvalidArguments, message)
}
