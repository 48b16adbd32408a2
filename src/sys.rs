//! Raw V4L2 requests.
//!
//! This is the only module allowed to use `unsafe`. Each function issues one
//! ioctl, mmap or poll on a caller-owned descriptor and returns plain values.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::capability::Capabilities;
use v4l::format::{Description, FieldOrder};
use v4l::memory::Memory;
use v4l::v4l2;
use v4l::v4l2::vidioc;
use v4l::v4l_sys::{
    v4l2_buffer, v4l2_capability, v4l2_crop, v4l2_cropcap, v4l2_fmtdesc, v4l2_format,
    v4l2_rect, v4l2_requestbuffers,
};

use crate::format::{FormatRequest, FourCC};
use crate::traits::{
    AppliedFormat, BufferDescriptor, CropCapabilities, DequeuedBuffer, DeviceCapabilities,
    FormatDescription, MappedRegion, Rect,
};

const VIDEO_CAPTURE: u32 = Type::VideoCapture as u32;
const MEMORY_MMAP: u32 = Memory::Mmap as u32;
const FIELD_INTERLACED: u32 = FieldOrder::Interlaced as u32;

/// Issue a V4L2 ioctl with a pointer to `$arg`.
macro_rules! xioctl {
    ($fd:expr, $request:ident, $arg:expr) => {
        // SAFETY: `$arg` is a live, properly sized struct for `$request`.
        unsafe { v4l2::ioctl($fd, vidioc::$request, ptr::addr_of_mut!($arg).cast::<c_void>()) }
    };
}

const fn rect(raw: &v4l2_rect) -> Rect {
    Rect {
        left: raw.left,
        top: raw.top,
        width: raw.width,
        height: raw.height,
    }
}

/// Open a device node read-only.
pub fn open_read_only(path: &Path) -> io::Result<RawFd> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    // SAFETY: `c_path` is a valid NUL-terminated string.
    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Close a descriptor once.
pub fn close(fd: RawFd) -> io::Result<()> {
    // SAFETY: the caller gives up `fd` on success.
    unsafe { v4l2::close(fd) }
}

/// `VIDIOC_QUERYCAP`.
pub fn query_capabilities(fd: RawFd) -> io::Result<DeviceCapabilities> {
    // SAFETY: all-zero is a valid bit pattern for this C struct.
    let mut caps: v4l2_capability = unsafe { mem::zeroed() };
    xioctl!(fd, VIDIOC_QUERYCAP, caps)?;
    Ok(Capabilities::from(caps).into())
}

/// `VIDIOC_CROPCAP` for video capture.
pub fn crop_capabilities(fd: RawFd) -> io::Result<CropCapabilities> {
    // SAFETY: all-zero is a valid bit pattern for this C struct.
    let mut cropcap: v4l2_cropcap = unsafe { mem::zeroed() };
    cropcap.type_ = VIDEO_CAPTURE;
    xioctl!(fd, VIDIOC_CROPCAP, cropcap)?;

    Ok(CropCapabilities {
        bounds: rect(&cropcap.bounds),
        default_rect: rect(&cropcap.defrect),
    })
}

/// `VIDIOC_ENUM_FMT`. `EINVAL` marks the end of the list.
pub fn enum_format(fd: RawFd, index: u32) -> io::Result<Option<FormatDescription>> {
    // SAFETY: all-zero is a valid bit pattern for this C struct.
    let mut desc: v4l2_fmtdesc = unsafe { mem::zeroed() };
    desc.index = index;
    desc.type_ = VIDEO_CAPTURE;

    match xioctl!(fd, VIDIOC_ENUM_FMT, desc) {
        Ok(()) => Ok(Some(FormatDescription::from(Description::from(desc)))),
        Err(err) if err.raw_os_error() == Some(libc::EINVAL) => Ok(None),
        Err(err) => Err(err),
    }
}

/// `VIDIOC_S_CROP` for video capture.
pub fn set_crop(fd: RawFd, area: Rect) -> io::Result<()> {
    // SAFETY: all-zero is a valid bit pattern for this C struct.
    let mut crop: v4l2_crop = unsafe { mem::zeroed() };
    crop.type_ = VIDEO_CAPTURE;
    crop.c.left = area.left;
    crop.c.top = area.top;
    crop.c.width = area.width;
    crop.c.height = area.height;
    xioctl!(fd, VIDIOC_S_CROP, crop)
}

/// `VIDIOC_S_FMT` with interlaced field order.
pub fn set_format(fd: RawFd, request: &FormatRequest) -> io::Result<()> {
    // SAFETY: all-zero is a valid bit pattern for this C struct.
    let mut fmt: v4l2_format = unsafe { mem::zeroed() };
    fmt.type_ = VIDEO_CAPTURE;
    // SAFETY: `pix` is the active union member for video capture.
    unsafe {
        fmt.fmt.pix.width = request.width;
        fmt.fmt.pix.height = request.height;
        fmt.fmt.pix.pixelformat = request.fourcc.code();
        fmt.fmt.pix.field = FIELD_INTERLACED;
    }
    xioctl!(fd, VIDIOC_S_FMT, fmt)
}

/// `VIDIOC_G_FMT` for video capture.
pub fn format(fd: RawFd) -> io::Result<AppliedFormat> {
    // SAFETY: all-zero is a valid bit pattern for this C struct.
    let mut fmt: v4l2_format = unsafe { mem::zeroed() };
    fmt.type_ = VIDEO_CAPTURE;
    xioctl!(fd, VIDIOC_G_FMT, fmt)?;

    // SAFETY: the driver filled `pix` for a video capture request.
    let pix = unsafe { fmt.fmt.pix };
    Ok(AppliedFormat {
        width: pix.width,
        height: pix.height,
        fourcc: FourCC::from_code(pix.pixelformat),
        bytes_per_line: pix.bytesperline,
        size_image: pix.sizeimage,
        colorspace: pix.colorspace,
    })
}

/// `VIDIOC_REQBUFS` for memory-mapped capture buffers.
pub fn request_buffers(fd: RawFd, count: u32) -> io::Result<u32> {
    // SAFETY: all-zero is a valid bit pattern for this C struct.
    let mut req: v4l2_requestbuffers = unsafe { mem::zeroed() };
    req.count = count;
    req.type_ = VIDEO_CAPTURE;
    req.memory = MEMORY_MMAP;
    xioctl!(fd, VIDIOC_REQBUFS, req)?;
    Ok(req.count)
}

fn capture_buffer(index: u32) -> v4l2_buffer {
    // SAFETY: all-zero is a valid bit pattern for this C struct.
    let mut buf: v4l2_buffer = unsafe { mem::zeroed() };
    buf.index = index;
    buf.type_ = VIDEO_CAPTURE;
    buf.memory = MEMORY_MMAP;
    buf
}

/// `VIDIOC_QUERYBUF`.
pub fn query_buffer(fd: RawFd, index: u32) -> io::Result<BufferDescriptor> {
    let mut buf = capture_buffer(index);
    xioctl!(fd, VIDIOC_QUERYBUF, buf)?;

    Ok(BufferDescriptor {
        index: buf.index,
        // SAFETY: `offset` is the active member for MMAP buffers.
        offset: unsafe { buf.m.offset },
        length: buf.length,
    })
}

/// `VIDIOC_QBUF`.
pub fn queue_buffer(fd: RawFd, index: u32) -> io::Result<()> {
    let mut buf = capture_buffer(index);
    xioctl!(fd, VIDIOC_QBUF, buf)
}

/// `VIDIOC_DQBUF`.
pub fn dequeue_buffer(fd: RawFd) -> io::Result<DequeuedBuffer> {
    let mut buf = capture_buffer(0);
    xioctl!(fd, VIDIOC_DQBUF, buf)?;

    Ok(DequeuedBuffer {
        index: buf.index,
        bytes_used: buf.bytesused,
        sequence: buf.sequence,
    })
}

/// `VIDIOC_STREAMON` for video capture.
pub fn stream_on(fd: RawFd) -> io::Result<()> {
    let mut buf_type = VIDEO_CAPTURE;
    xioctl!(fd, VIDIOC_STREAMON, buf_type)
}

/// `VIDIOC_STREAMOFF` for video capture.
pub fn stream_off(fd: RawFd) -> io::Result<()> {
    let mut buf_type = VIDEO_CAPTURE;
    xioctl!(fd, VIDIOC_STREAMOFF, buf_type)
}

/// Wait until `fd` is readable. `Ok(false)` on timeout.
pub fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);

    // SAFETY: `pollfd` outlives the call and the count matches.
    let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ETIMEDOUT) {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ready > 0)
}

/// A read-only shared mapping of one kernel capture buffer.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MmapRegion {
    /// Map `descriptor` from `fd`.
    pub fn map(fd: RawFd, descriptor: &BufferDescriptor) -> io::Result<Self> {
        let len = descriptor.length as usize;
        let offset = libc::off_t::try_from(descriptor.offset)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        // SAFETY: a fresh mapping at a kernel-chosen address aliases nothing.
        let addr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                offset,
            )?
        };
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    /// Remove the mapping.
    pub fn unmap(self) -> io::Result<()> {
        // SAFETY: `ptr`/`len` came from a successful mmap and the region is
        // consumed, so no slice into it can outlive this call.
        unsafe { v4l2::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) }
    }
}

impl MappedRegion for MmapRegion {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: the mapping stays valid and readable until `unmap` consumes self.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}
