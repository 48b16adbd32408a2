//! UVC-Capture: streaming frame capture from V4L2 video devices.
//!
//! The library opens a capture device, negotiates crop and pixel format,
//! maps a small pool of kernel buffers and runs a wait/dequeue/deliver/requeue
//! loop that hands each frame to a [`FrameConsumer`]. Driver access goes
//! through the [`CaptureDevice`] trait, so everything above the raw ioctl
//! layer can be exercised against a mock device.

pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod pool;
pub mod retry;
pub mod session;
pub mod sink;
mod sys;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use capture::{CaptureLoop, CaptureStats, FrameCount};
pub use config::CaptureConfig;
pub use device::V4L2Device;
pub use error::{CaptureError, ErrorKind, Result};
pub use format::{FormatRequest, FourCC, PixelFormat, PIXEL_FORMATS};
pub use session::{Session, SessionState};
pub use sink::FileSink;
pub use traits::{CaptureDevice, DeviceCapabilities, FrameConsumer};

/// Capture `config.count` frames from `config.device` into `consumer`.
///
/// Returns the number of frames delivered. The device is stopped, unmapped
/// and closed on every exit path.
pub fn run<C: FrameConsumer + ?Sized>(config: &CaptureConfig, consumer: &mut C) -> Result<u64> {
    config.validate()?;
    let session = Session::open(&config.device)?;
    capture_with(session, config, consumer)
}

/// Like [`run`], over an already opened device.
pub fn run_with_device<D, C>(device: D, config: &CaptureConfig, consumer: &mut C) -> Result<u64>
where
    D: CaptureDevice,
    C: FrameConsumer + ?Sized,
{
    config.validate()?;
    let session = Session::from_device(device)?;
    capture_with(session, config, consumer)
}

fn capture_with<D, C>(session: Session<D>, config: &CaptureConfig, consumer: &mut C) -> Result<u64>
where
    D: CaptureDevice,
    C: FrameConsumer + ?Sized,
{
    let mut session = session
        .configure(config.width, config.height, config.format_index)?
        .start()?;

    let outcome = CaptureLoop::default().run(&mut session, config.count, consumer);
    session.stop();
    session.close();
    outcome.map(|stats| stats.delivered)
}
