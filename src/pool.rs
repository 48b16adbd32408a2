//! Memory-mapped capture buffer pool.
//!
//! The pool requests a small fixed number of buffers, maps each one read-only
//! and tracks who currently owns it: the application, or the driver's queue.
//! A pool is either fully mapped or not returned at all.

use std::io;
use std::mem;

use crate::error::{is_errno, is_transient, CaptureError, ErrorKind, Result};
use crate::retry::{RetryError, RetryPolicy, Verdict};
use crate::traits::{CaptureDevice, DequeuedBuffer, MappedRegion};

/// Buffers requested from the driver.
pub const REQUESTED_BUFFERS: u32 = 2;

/// Fewest buffers that still allow one in flight while one is consumed.
pub const MIN_BUFFERS: usize = 2;

/// Who currently owns a mapped buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Held by the application, not queued.
    Free,
    /// Handed to the driver to be filled.
    Queued,
    /// Returned filled by the driver, being consumed.
    Dequeued,
}

/// One kernel buffer mapped into the process.
#[derive(Debug)]
pub struct MappedBuffer<R> {
    index: u32,
    length: u32,
    region: R,
    state: BufferState,
}

impl<R: MappedRegion> MappedBuffer<R> {
    /// Position in the pool.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Mapped length in bytes.
    pub const fn len(&self) -> u32 {
        self.length
    }

    /// Whether the mapping is zero-length.
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current owner.
    pub const fn state(&self) -> BufferState {
        self.state
    }

    /// Mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        self.region.as_bytes()
    }
}

#[derive(Debug)]
enum Slot<R> {
    Unmapped,
    Mapped(MappedBuffer<R>),
}

/// Fixed-size collection of mapped capture buffers, indexed like the driver's.
#[derive(Debug)]
pub struct BufferPool<R> {
    slots: Vec<Slot<R>>,
}

impl<R> Default for BufferPool<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R> BufferPool<R> {
    /// A pool with no buffers. Releasing it is a no-op.
    pub const fn empty() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<R: MappedRegion> BufferPool<R> {
    /// Request, query and map the driver's capture buffers.
    ///
    /// On any failure every buffer mapped so far is unmapped before the error
    /// is returned.
    pub fn allocate<D>(device: &mut D) -> Result<Self>
    where
        D: CaptureDevice<Region = R>,
    {
        let granted = device
            .request_buffers(REQUESTED_BUFFERS)
            .map_err(request_error)?;
        let granted = usize::try_from(granted).unwrap_or(usize::MAX);

        if granted < MIN_BUFFERS {
            log::error!("driver granted {granted} buffers, need at least {MIN_BUFFERS}");
            return Err(CaptureError::new(
                ErrorKind::InsufficientDriverMemory,
                format!("driver granted {granted} buffers, need at least {MIN_BUFFERS}"),
            ));
        }

        let mut pool = Self::empty();
        pool.slots.try_reserve_exact(granted).map_err(|err| {
            CaptureError::new(
                ErrorKind::InsufficientMemory,
                format!("cannot track {granted} buffers: {err}"),
            )
        })?;
        pool.slots.resize_with(granted, || Slot::Unmapped);

        if let Err(err) = pool.map_all(device) {
            pool.release_all(device);
            return Err(err);
        }

        let mapped = pool.len();
        if mapped < MIN_BUFFERS {
            pool.release_all(device);
            return Err(CaptureError::new(
                ErrorKind::InsufficientDriverMemory,
                format!("driver exposed {mapped} usable buffers, need at least {MIN_BUFFERS}"),
            ));
        }

        log::info!("mapped {mapped} capture buffers");
        Ok(pool)
    }

    fn map_all<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: CaptureDevice<Region = R>,
    {
        for (index, slot) in (0u32..).zip(self.slots.iter_mut()) {
            let descriptor = match device.query_buffer(index) {
                Ok(descriptor) => descriptor,
                Err(err) if is_errno(&err, libc::EINVAL) => {
                    log::debug!("driver has no buffer {index}, stopping enumeration");
                    break;
                }
                Err(err) => {
                    log::error!("failed to query buffer {index}: {err}");
                    return Err(CaptureError::with_source(
                        ErrorKind::QueryFailed,
                        format!("cannot query buffer {index}"),
                        err,
                    ));
                }
            };

            let region = device.map_buffer(&descriptor).map_err(|err| {
                log::error!("failed to map buffer {index}: {err}");
                CaptureError::with_source(
                    ErrorKind::MappingFailed,
                    format!("cannot map buffer {index} ({} bytes)", descriptor.length),
                    err,
                )
            })?;

            log::debug!(
                "buffer {index}: offset {:#x}, {} bytes",
                descriptor.offset,
                descriptor.length
            );
            *slot = Slot::Mapped(MappedBuffer {
                index,
                length: descriptor.length,
                region,
                state: BufferState::Free,
            });
        }
        Ok(())
    }

    /// Number of mapped buffers.
    pub fn len(&self) -> usize {
        self.mapped().count()
    }

    /// Whether no buffer is mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mapped buffer at `index`, if any.
    pub fn buffer(&self, index: u32) -> Option<&MappedBuffer<R>> {
        match self.slots.get(usize::try_from(index).ok()?)? {
            Slot::Mapped(buffer) => Some(buffer),
            Slot::Unmapped => None,
        }
    }

    fn buffer_mut(&mut self, index: u32) -> Option<&mut MappedBuffer<R>> {
        match self.slots.get_mut(usize::try_from(index).ok()?)? {
            Slot::Mapped(buffer) => Some(buffer),
            Slot::Unmapped => None,
        }
    }

    fn mapped(&self) -> impl Iterator<Item = &MappedBuffer<R>> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Mapped(buffer) => Some(buffer),
            Slot::Unmapped => None,
        })
    }

    /// Hand every free buffer to the driver, in index order.
    ///
    /// Transient exhaustion (`ENOMEM`, `EAGAIN`) is retried under `policy`.
    pub fn queue_all<D>(&mut self, device: &mut D, policy: RetryPolicy) -> Result<()>
    where
        D: CaptureDevice<Region = R>,
    {
        for slot in &mut self.slots {
            let Slot::Mapped(buffer) = slot else {
                continue;
            };
            if buffer.state != BufferState::Free {
                continue;
            }

            let index = buffer.index;
            policy
                .run(
                    |attempt| {
                        device.queue_buffer(index).inspect_err(|err| {
                            log::debug!("queue buffer {index} attempt {attempt} failed: {err}");
                        })
                    },
                    |err| {
                        if is_transient(err) {
                            Verdict::Retry
                        } else {
                            Verdict::Fail
                        }
                    },
                )
                .map_err(|err| start_queue_error(index, err))?;
            buffer.state = BufferState::Queued;
        }
        Ok(())
    }

    /// Hand one consumed buffer back to the driver.
    pub fn queue<D>(&mut self, device: &mut D, index: u32) -> Result<()>
    where
        D: CaptureDevice<Region = R>,
    {
        let buffer = self.buffer_mut(index).ok_or_else(|| {
            CaptureError::new(
                ErrorKind::QueueingFailed,
                format!("buffer {index} is not part of the pool"),
            )
        })?;

        device.queue_buffer(index).map_err(|err| {
            log::error!("failed to requeue buffer {index}: {err}");
            CaptureError::with_source(
                ErrorKind::QueueingFailed,
                format!("cannot requeue buffer {index}"),
                err,
            )
        })?;
        buffer.state = BufferState::Queued;
        Ok(())
    }

    /// Record that the driver returned `dequeued` and hand out its buffer.
    ///
    /// The index must name a mapped buffer the driver was holding.
    pub fn mark_dequeued(&mut self, dequeued: &DequeuedBuffer) -> Result<&MappedBuffer<R>> {
        let count = self.slots.len();
        let index = dequeued.index;
        let buffer = self.buffer_mut(index).ok_or_else(|| {
            CaptureError::new(
                ErrorKind::DequeueingFailed,
                format!("driver returned buffer {index} outside pool of {count}"),
            )
        })?;

        if buffer.state != BufferState::Queued {
            return Err(CaptureError::new(
                ErrorKind::DequeueingFailed,
                format!("driver returned buffer {index} that was {:?}", buffer.state),
            ));
        }
        buffer.state = BufferState::Dequeued;
        Ok(buffer)
    }

    /// Forget driver ownership after streaming stopped.
    pub fn mark_all_free(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Mapped(buffer) = slot {
                buffer.state = BufferState::Free;
            }
        }
    }

    /// Unmap every mapped buffer. Unmapped slots are skipped.
    ///
    /// Returns the number of buffers released. Calling it again is a no-op.
    pub fn release_all<D>(&mut self, device: &mut D) -> usize
    where
        D: CaptureDevice<Region = R>,
    {
        let mut released = 0;
        for slot in mem::take(&mut self.slots) {
            if let Slot::Mapped(buffer) = slot {
                let index = buffer.index;
                if let Err(err) = device.unmap_buffer(buffer.region) {
                    log::warn!("failed to unmap buffer {index}: {err}");
                }
                released += 1;
            }
        }
        if released > 0 {
            log::debug!("released {released} capture buffers");
        }
        released
    }
}

fn request_error(err: io::Error) -> CaptureError {
    if is_errno(&err, libc::EBUSY) {
        log::error!("buffers are already in use: {err}");
        CaptureError::with_source(ErrorKind::Busy, "capture buffers are already in use", err)
    } else if is_errno(&err, libc::EINVAL) {
        log::error!("memory-mapped streaming is not supported: {err}");
        CaptureError::with_source(
            ErrorKind::UnsupportedIOMethod,
            "memory-mapped streaming is not supported",
            err,
        )
    } else {
        log::error!("buffer request failed: {err}");
        CaptureError::with_source(ErrorKind::IOError, "buffer request failed", err)
    }
}

fn start_queue_error(index: u32, err: RetryError<io::Error>) -> CaptureError {
    match err {
        RetryError::Exhausted { attempts, last } => {
            log::error!("buffer {index} still rejected after {attempts} attempts: {last}");
            CaptureError::with_source(
                ErrorKind::QueueingFailed,
                format!("buffer {index} still rejected after {attempts} attempts"),
                last,
            )
        }
        RetryError::Fatal(err) if is_errno(&err, libc::EIO) => {
            log::error!("internal I/O error queueing buffer {index}: {err}");
            CaptureError::with_source(
                ErrorKind::IOError,
                format!("internal I/O error queueing buffer {index}"),
                err,
            )
        }
        RetryError::Fatal(err) => {
            log::error!("failed to queue buffer {index}: {err}");
            CaptureError::with_source(
                ErrorKind::QueueingFailed,
                format!("cannot queue buffer {index}"),
                err,
            )
        }
    }
}
