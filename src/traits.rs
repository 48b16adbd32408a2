//! Core traits and types for the V4L2 capture abstraction.

use std::io;
use std::time::Duration;

use v4l::capability::{Capabilities, Flags};
use v4l::format::description::Flags as DescriptionFlags;
use v4l::format::Description;

use crate::error::Result;
use crate::format::{FormatRequest, FourCC};

/// Immutable snapshot of the capability query, taken once at open time.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Driver version as (major, minor, patch).
    pub version: (u8, u8, u8),
    /// Capability bits.
    pub flags: Flags,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            driver: String::new(),
            card: String::new(),
            bus_info: String::new(),
            version: (0, 0, 0),
            flags: Flags::empty(),
        }
    }
}

impl From<Capabilities> for DeviceCapabilities {
    fn from(caps: Capabilities) -> Self {
        Self {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            version: caps.version,
            flags: caps.capabilities,
        }
    }
}

impl DeviceCapabilities {
    /// Whether the device can capture video.
    pub fn can_capture(&self) -> bool {
        self.flags.contains(Flags::VIDEO_CAPTURE)
    }

    /// Whether the device supports streaming I/O.
    pub fn can_stream(&self) -> bool {
        self.flags.contains(Flags::STREAMING)
    }
}

/// Rectangle in sensor coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left edge.
    pub left: i32,
    /// Top edge.
    pub top: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Cropping limits reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropCapabilities {
    /// Outer limits of the capturable area.
    pub bounds: Rect,
    /// Driver default crop rectangle.
    pub default_rect: Rect,
}

/// One entry of the driver's supported-format enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    /// Enumeration index.
    pub index: u32,
    /// Compressed format flag.
    pub compressed: bool,
    /// Driver description.
    pub description: String,
    /// Pixel format.
    pub fourcc: FourCC,
}

impl From<Description> for FormatDescription {
    fn from(desc: Description) -> Self {
        Self {
            index: desc.index,
            compressed: desc.flags.contains(DescriptionFlags::COMPRESSED),
            description: desc.description,
            fourcc: FourCC::from(desc.fourcc),
        }
    }
}

/// Pixel format as applied by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub bytes_per_line: u32,
    /// Total frame size in bytes.
    pub size_image: u32,
    /// Colorspace code.
    pub colorspace: u32,
}

/// Kernel-side descriptor of one capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Position in the pool.
    pub index: u32,
    /// Offset to pass to mmap.
    pub offset: u32,
    /// Buffer length in bytes.
    pub length: u32,
}

/// A buffer returned by the driver, filled with frame data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Position in the pool.
    pub index: u32,
    /// Bytes the driver wrote.
    pub bytes_used: u32,
    /// Driver frame sequence number.
    pub sequence: u32,
}

/// Process-side view of a mapped kernel buffer.
pub trait MappedRegion {
    /// The mapped bytes.
    fn as_bytes(&self) -> &[u8];
}

/// Driver operations a capture session is built from.
///
/// Every method is one request to the driver and reports the raw OS error,
/// so the session can classify failures per operation.
pub trait CaptureDevice {
    /// Mapping handed out by `map_buffer`.
    type Region: MappedRegion;

    /// Query device capabilities.
    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities>;

    /// Query cropping limits.
    fn crop_capabilities(&mut self) -> io::Result<CropCapabilities>;

    /// Enumerate one supported format. `None` once `index` is past the end.
    fn enum_format(&mut self, index: u32) -> io::Result<Option<FormatDescription>>;

    /// Set the crop rectangle.
    fn set_crop(&mut self, rect: Rect) -> io::Result<()>;

    /// Set the capture format with interlaced field order.
    fn set_format(&mut self, request: &FormatRequest) -> io::Result<()>;

    /// Read back the applied format.
    fn format(&mut self) -> io::Result<AppliedFormat>;

    /// Request `count` memory-mapped buffers. Returns the number granted.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    /// Query the descriptor of buffer `index`.
    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor>;

    /// Map a buffer read-only into the process.
    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<Self::Region>;

    /// Release a mapping. The region is consumed whether or not this succeeds.
    fn unmap_buffer(&mut self, region: Self::Region) -> io::Result<()>;

    /// Hand buffer `index` to the driver.
    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    /// Take the next filled buffer from the driver.
    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    /// Start streaming.
    fn stream_on(&mut self) -> io::Result<()>;

    /// Stop streaming.
    fn stream_off(&mut self) -> io::Result<()>;

    /// Block until a filled buffer is ready. `Ok(false)` means the wait timed out.
    fn wait_ready(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Close the device handle.
    fn close(&mut self) -> io::Result<()>;
}

/// Receives captured frames.
///
/// `frame` is only valid for the duration of the call; copy anything that
/// must outlive it. `index` counts delivered frames from 0.
pub trait FrameConsumer {
    /// Consume one frame.
    fn on_frame(&mut self, frame: &[u8], index: u64) -> Result<()>;
}

impl<F> FrameConsumer for F
where
    F: FnMut(&[u8], u64) -> Result<()>,
{
    fn on_frame(&mut self, frame: &[u8], index: u64) -> Result<()> {
        self(frame, index)
    }
}
