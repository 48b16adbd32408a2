//! V4L2 device implementation over a raw device node.

use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::format::FormatRequest;
use crate::sys::{self, MmapRegion};
use crate::traits::{
    AppliedFormat, BufferDescriptor, CaptureDevice, CropCapabilities, DequeuedBuffer,
    DeviceCapabilities, FormatDescription, Rect,
};

/// Close attempts made when a still-open handle is dropped.
const DROP_CLOSE_ATTEMPTS: u32 = 8;

/// Exclusive owner of one open device descriptor. `None` once closed.
#[derive(Debug)]
pub struct DeviceHandle {
    fd: Option<RawFd>,
}

impl DeviceHandle {
    /// Open `path` read-only.
    pub fn open(path: &Path) -> io::Result<Self> {
        let fd = sys::open_read_only(path)?;
        Ok(Self { fd: Some(fd) })
    }

    /// Whether the descriptor is still open.
    pub const fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    fn fd(&self) -> io::Result<RawFd> {
        self.fd
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    /// Close the descriptor. Closing an already closed handle is a no-op.
    ///
    /// On failure the descriptor is kept so the caller may retry, unless the
    /// kernel reports it as already invalid.
    pub fn close(&mut self) -> io::Result<()> {
        let Some(fd) = self.fd else {
            return Ok(());
        };
        match sys::close(fd) {
            Ok(()) => {
                self.fd = None;
                Ok(())
            }
            Err(err) => {
                if err.raw_os_error() == Some(libc::EBADF) {
                    self.fd = None;
                }
                Err(err)
            }
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        for attempt in 1..=DROP_CLOSE_ATTEMPTS {
            match self.close() {
                Ok(()) => return,
                Err(err) => log::warn!("close attempt {attempt} on drop failed: {err}"),
            }
        }
        // Leak the descriptor rather than loop forever.
        self.fd = None;
    }
}

/// V4L2 capture device opened from a node path such as `/dev/video0`.
#[derive(Debug)]
pub struct V4L2Device {
    path: PathBuf,
    handle: DeviceHandle,
}

impl V4L2Device {
    /// Open a V4L2 device node read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let handle = DeviceHandle::open(&path)?;
        log::debug!("opened {}", path.display());
        Ok(Self { path, handle })
    }

    /// Node path this device was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureDevice for V4L2Device {
    type Region = MmapRegion;

    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities> {
        sys::query_capabilities(self.handle.fd()?)
    }

    fn crop_capabilities(&mut self) -> io::Result<CropCapabilities> {
        sys::crop_capabilities(self.handle.fd()?)
    }

    fn enum_format(&mut self, index: u32) -> io::Result<Option<FormatDescription>> {
        sys::enum_format(self.handle.fd()?, index)
    }

    fn set_crop(&mut self, rect: Rect) -> io::Result<()> {
        sys::set_crop(self.handle.fd()?, rect)
    }

    fn set_format(&mut self, request: &FormatRequest) -> io::Result<()> {
        sys::set_format(self.handle.fd()?, request)
    }

    fn format(&mut self) -> io::Result<AppliedFormat> {
        sys::format(self.handle.fd()?)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        sys::request_buffers(self.handle.fd()?, count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor> {
        sys::query_buffer(self.handle.fd()?, index)
    }

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<MmapRegion> {
        MmapRegion::map(self.handle.fd()?, descriptor)
    }

    fn unmap_buffer(&mut self, region: MmapRegion) -> io::Result<()> {
        region.unmap()
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        sys::queue_buffer(self.handle.fd()?, index)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        sys::dequeue_buffer(self.handle.fd()?)
    }

    fn stream_on(&mut self) -> io::Result<()> {
        sys::stream_on(self.handle.fd()?)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        sys::stream_off(self.handle.fd()?)
    }

    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool> {
        sys::wait_readable(self.handle.fd()?, timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        self.handle.close()
    }
}
