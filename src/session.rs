//! Device session lifecycle.
//!
//! A [`Session`] owns the device, its capability snapshot, the negotiated
//! format and the buffer pool. It moves through
//! `Opened -> Configured -> Streaming -> Stopped -> Closed`; dropping it at
//! any point runs stop, unmap and close, so every error path releases what
//! was built so far.

use std::io;
use std::path::Path;
use std::time::Duration;

use crate::device::V4L2Device;
use crate::error::{is_errno, CaptureError, ErrorKind, Result};
use crate::format::FormatRequest;
use crate::pool::BufferPool;
use crate::retry::{RetryPolicy, Verdict};
use crate::traits::{AppliedFormat, CaptureDevice, CropCapabilities, DeviceCapabilities};

/// Close attempts before a failing descriptor is abandoned.
const CLOSE_ATTEMPTS: u32 = 8;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Device open, capabilities checked.
    Opened,
    /// Format negotiated and buffers mapped.
    Configured,
    /// Buffers queued and stream-on in effect.
    Streaming,
    /// Stream-off issued.
    Stopped,
    /// Buffers unmapped and device closed.
    Closed,
}

/// One open capture device and everything negotiated on it.
pub struct Session<D: CaptureDevice> {
    device: D,
    state: SessionState,
    capabilities: DeviceCapabilities,
    crop: CropCapabilities,
    request: Option<FormatRequest>,
    applied: Option<AppliedFormat>,
    pool: BufferPool<D::Region>,
    queue_policy: RetryPolicy,
}

impl Session<V4L2Device> {
    /// Open the device node at `path` and check it can capture.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let device = V4L2Device::open(path).map_err(|err| open_error(path, err))?;
        log::info!("opened video device {}", path.display());
        Self::from_device(device)
    }
}

impl<D: CaptureDevice> Session<D> {
    /// Take ownership of an open device and run the capability checks.
    ///
    /// If a check fails the device is closed before the error is returned.
    pub fn from_device(device: D) -> Result<Self> {
        let mut session = Self {
            device,
            state: SessionState::Opened,
            capabilities: DeviceCapabilities::default(),
            crop: CropCapabilities::default(),
            request: None,
            applied: None,
            pool: BufferPool::empty(),
            queue_policy: RetryPolicy::QUEUE,
        };

        session.capabilities = session.device.query_capabilities().map_err(|err| {
            log::error!("capability query failed: {err}");
            CaptureError::with_source(ErrorKind::NoCapabilities, "cannot query capabilities", err)
        })?;
        log_capabilities(&session.capabilities);

        if !session.capabilities.can_capture() {
            log::error!("{} does not support video capture", session.capabilities.card);
            return Err(CaptureError::new(
                ErrorKind::CaptureNotSupported,
                format!("{} does not support video capture", session.capabilities.card),
            ));
        }

        session.crop = session.device.crop_capabilities().map_err(|err| {
            log::error!("crop capability query failed: {err}");
            CaptureError::with_source(
                ErrorKind::NoCropCapabilities,
                "cannot query crop capabilities",
                err,
            )
        })?;

        session.log_supported_formats();
        Ok(session)
    }

    /// Override the retry policy used when queueing buffers at stream start.
    #[must_use]
    pub fn with_queue_policy(mut self, policy: RetryPolicy) -> Self {
        self.queue_policy = policy;
        self
    }

    fn log_supported_formats(&mut self) {
        for index in 0u32.. {
            match self.device.enum_format(index) {
                Ok(Some(desc)) => log::debug!(
                    "format {}: {} ({}){}",
                    desc.index,
                    desc.fourcc,
                    desc.description,
                    if desc.compressed { ", compressed" } else { "" }
                ),
                Ok(None) => break,
                Err(err) => {
                    log::warn!("format enumeration stopped at {index}: {err}");
                    break;
                }
            }
        }
    }

    /// Negotiate crop, format and buffers.
    ///
    /// An out-of-range `format_index` is rejected before the driver is asked
    /// anything.
    pub fn configure(mut self, width: u32, height: u32, format_index: usize) -> Result<Self> {
        let request = FormatRequest::from_index(width, height, format_index)?;
        self.expect_state(SessionState::Opened, "configure")?;

        self.apply_crop()?;
        self.apply_format(&request)?;
        self.request = Some(request);

        self.pool = BufferPool::allocate(&mut self.device)?;
        self.state = SessionState::Configured;
        Ok(self)
    }

    fn apply_crop(&mut self) -> Result<()> {
        match self.device.set_crop(self.crop.default_rect) {
            Ok(()) => Ok(()),
            Err(err) if is_errno(&err, libc::EINVAL) || is_errno(&err, libc::ENOTTY) => {
                log::warn!("cropping is not supported: {err}");
                Ok(())
            }
            Err(err) => {
                log::error!("failed to set cropping area: {err}");
                Err(CaptureError::with_source(
                    ErrorKind::CroppingFailed,
                    "cannot set the default crop rectangle",
                    err,
                ))
            }
        }
    }

    fn apply_format(&mut self, request: &FormatRequest) -> Result<()> {
        self.device.set_format(request).map_err(|err| {
            log::error!("failed to set format: {err}");
            if is_errno(&err, libc::EBUSY) {
                CaptureError::with_source(
                    ErrorKind::Busy,
                    "format cannot be changed at this time",
                    err,
                )
            } else {
                CaptureError::with_source(
                    ErrorKind::InvalidFormatArguments,
                    format!(
                        "driver rejected {}x{} {}",
                        request.width, request.height, request.fourcc
                    ),
                    err,
                )
            }
        })?;

        match self.device.format() {
            Ok(applied) => {
                log::info!(
                    "pixel format {}x{} {}, {} bytes per line, {} bytes per frame, colorspace {}",
                    applied.width,
                    applied.height,
                    applied.fourcc,
                    applied.bytes_per_line,
                    applied.size_image,
                    applied.colorspace
                );
                self.applied = Some(applied);
            }
            Err(err) => log::warn!("cannot read back the applied format: {err}"),
        }
        Ok(())
    }

    /// Queue every buffer and turn streaming on.
    pub fn start(mut self) -> Result<Self> {
        self.expect_state(SessionState::Configured, "start")?;

        let policy = self.queue_policy;
        self.pool.queue_all(&mut self.device, policy)?;

        self.device.stream_on().map_err(|err| {
            log::error!("failed to start streaming: {err}");
            CaptureError::with_source(ErrorKind::StreamingFailed, "stream-on rejected", err)
        })?;
        self.state = SessionState::Streaming;
        log::info!("streaming started with {} buffers", self.pool.len());
        Ok(self)
    }

    /// Turn streaming off. Failures are logged, never returned.
    pub fn stop(&mut self) {
        if self.state != SessionState::Streaming {
            return;
        }
        if let Err(err) = self.device.stream_off() {
            log::warn!("failed to stop streaming: {err}");
        }
        self.pool.mark_all_free();
        self.state = SessionState::Stopped;
        log::info!("streaming stopped");
    }

    /// Unmap every buffer and close the device. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.stop();
        self.pool.release_all(&mut self.device);

        let device = &mut self.device;
        let closed = RetryPolicy::new(CLOSE_ATTEMPTS, Duration::ZERO).run(
            |attempt| {
                device.close().inspect_err(|err| {
                    log::warn!("close attempt {attempt} failed: {err}");
                })
            },
            |_| Verdict::Retry,
        );
        if let Err(err) = closed {
            log::error!("giving up on closing the device: {}", err.into_inner());
        }
        self.state = SessionState::Closed;
        log::debug!("session closed");
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Capability snapshot taken at open.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Crop limits reported at open.
    pub const fn crop_capabilities(&self) -> &CropCapabilities {
        &self.crop
    }

    /// Format requested by `configure`.
    pub const fn format_request(&self) -> Option<&FormatRequest> {
        self.request.as_ref()
    }

    /// Format the driver reported after `configure`, if it could be read.
    pub const fn applied_format(&self) -> Option<&AppliedFormat> {
        self.applied.as_ref()
    }

    /// Bytes per frame: the applied image size, else the mapped buffer size.
    pub fn frame_size(&self) -> Option<u32> {
        self.applied
            .map(|applied| applied.size_image)
            .or_else(|| self.pool.buffer(0).map(crate::pool::MappedBuffer::len))
    }

    /// Number of mapped buffers.
    pub fn buffer_count(&self) -> usize {
        self.pool.len()
    }

    pub(crate) fn streaming_parts(&mut self) -> Result<(&mut D, &mut BufferPool<D::Region>)> {
        self.expect_state(SessionState::Streaming, "capture")?;
        Ok((&mut self.device, &mut self.pool))
    }

    fn expect_state(&self, expected: SessionState, operation: &str) -> Result<()> {
        if self.state == expected {
            return Ok(());
        }
        Err(CaptureError::new(
            ErrorKind::InvalidState,
            format!("cannot {operation} while {:?}, expected {expected:?}", self.state),
        ))
    }
}

impl<D: CaptureDevice> Drop for Session<D> {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_error(path: &Path, err: io::Error) -> CaptureError {
    let path = path.display();
    if is_errno(&err, libc::EBUSY) {
        log::error!("video device {path} is busy");
        CaptureError::with_source(ErrorKind::Busy, format!("{path} is busy"), err)
    } else if is_errno(&err, libc::EPERM) || is_errno(&err, libc::EACCES) {
        log::error!("not permitted to open {path}");
        CaptureError::with_source(ErrorKind::NotPermitted, format!("cannot open {path}"), err)
    } else {
        log::error!("cannot open video device {path}: {err}");
        CaptureError::with_source(ErrorKind::OpenFailed, format!("cannot open {path}"), err)
    }
}

fn log_capabilities(caps: &DeviceCapabilities) {
    log::info!(
        "device: driver {}, card {}, bus {}, version {}.{}.{}",
        caps.driver,
        caps.card,
        caps.bus_info,
        caps.version.0,
        caps.version.1,
        caps.version.2
    );
    log::debug!("capabilities: {}", caps.flags);
}
