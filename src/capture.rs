//! Capture loop: wait, dequeue, deliver, requeue.

use std::time::Duration;

use crate::error::{CaptureError, ErrorKind, Result};
use crate::pool::BufferPool;
use crate::session::Session;
use crate::traits::{CaptureDevice, FrameConsumer};

/// Readiness wait before re-polling.
pub const READY_TIMEOUT: Duration = Duration::from_millis(40);

/// How many frames to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCount {
    /// Stop after this many delivered frames.
    Limited(u64),
    /// Run until a fatal error.
    Unbounded,
}

impl FrameCount {
    /// Map a signed command-line count: zero or negative means unbounded.
    pub fn from_signed(count: i64) -> Self {
        u64::try_from(count)
            .ok()
            .filter(|count| *count > 0)
            .map_or(Self::Unbounded, Self::Limited)
    }

    const fn is_reached(self, delivered: u64) -> bool {
        match self {
            Self::Limited(limit) => delivered >= limit,
            Self::Unbounded => false,
        }
    }
}

impl Default for FrameCount {
    fn default() -> Self {
        Self::Limited(1)
    }
}

/// Counters from a finished capture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames handed to the consumer.
    pub delivered: u64,
    /// Readiness waits that timed out.
    pub timeouts: u64,
}

/// Drives a streaming session until the frame count is reached.
#[derive(Debug, Clone, Copy)]
pub struct CaptureLoop {
    timeout: Duration,
}

impl Default for CaptureLoop {
    fn default() -> Self {
        Self::new(READY_TIMEOUT)
    }
}

impl CaptureLoop {
    /// Loop with a custom readiness timeout.
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Capture `count` frames from a streaming session into `consumer`.
    ///
    /// Frames are numbered from zero. The first fatal error ends the run;
    /// the session is left for the caller to stop and close.
    pub fn run<D, C>(
        &self,
        session: &mut Session<D>,
        count: FrameCount,
        consumer: &mut C,
    ) -> Result<CaptureStats>
    where
        D: CaptureDevice,
        C: FrameConsumer + ?Sized,
    {
        let (device, pool) = session.streaming_parts()?;
        let mut stats = CaptureStats::default();

        while !count.is_reached(stats.delivered) {
            let index = stats.delivered;
            let delivered = step(device, pool, self.timeout, |frame| {
                consumer.on_frame(frame, index)
            })?;
            if delivered {
                stats.delivered += 1;
            } else {
                stats.timeouts += 1;
                log::trace!("no frame within {:?}", self.timeout);
            }
        }

        log::info!(
            "captured {} frames ({} readiness timeouts)",
            stats.delivered,
            stats.timeouts
        );
        Ok(stats)
    }
}

impl<D: CaptureDevice> Session<D> {
    /// Capture one frame into `dest`, replacing its contents.
    pub fn grab(&mut self, dest: &mut Vec<u8>) -> Result<()> {
        let (device, pool) = self.streaming_parts()?;
        loop {
            let delivered = step(device, pool, READY_TIMEOUT, |frame| {
                dest.clear();
                dest.try_reserve(frame.len()).map_err(|err| {
                    CaptureError::new(
                        ErrorKind::InsufficientMemory,
                        format!("cannot hold a {} byte frame: {err}", frame.len()),
                    )
                })?;
                dest.extend_from_slice(frame);
                Ok(())
            })?;
            if delivered {
                return Ok(());
            }
        }
    }
}

/// One iteration. Returns `false` when the wait timed out.
///
/// Once a buffer is dequeued it is requeued even if delivery fails; the
/// delivery error wins over a requeue error.
fn step<D, F>(
    device: &mut D,
    pool: &mut BufferPool<D::Region>,
    timeout: Duration,
    deliver: F,
) -> Result<bool>
where
    D: CaptureDevice,
    F: FnOnce(&[u8]) -> Result<()>,
{
    let ready = device.wait_ready(timeout).map_err(|err| {
        log::error!("waiting for a frame failed: {err}");
        CaptureError::with_source(ErrorKind::IOError, "readiness wait failed", err)
    })?;
    if !ready {
        return Ok(false);
    }

    let dequeued = device.dequeue_buffer().map_err(|err| {
        log::error!("failed to dequeue buffer: {err}");
        CaptureError::with_source(ErrorKind::DequeueingFailed, "dequeue rejected", err)
    })?;
    log::trace!(
        "buffer {} ready, {} bytes, sequence {}",
        dequeued.index,
        dequeued.bytes_used,
        dequeued.sequence
    );

    let buffer = pool.mark_dequeued(&dequeued)?;
    let index = buffer.index();
    let delivery = deliver(buffer.bytes());
    if let Err(err) = &delivery {
        log::error!("frame delivery failed: {err}");
    }

    let requeue = pool.queue(device, index);
    delivery.and(requeue).map(|()| true)
}
