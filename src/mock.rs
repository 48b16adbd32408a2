//! Mock device implementation for testing without hardware.
//!
//! The mock keeps a driver-side buffer queue and a call journal in shared
//! state, so tests can inspect what happened after the device was moved into
//! a session (or dropped with it). Faults are injected per operation as errno
//! values.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use v4l::capability::Flags;

use crate::format::{FormatRequest, FourCC};
use crate::traits::{
    AppliedFormat, BufferDescriptor, CaptureDevice, CropCapabilities, DequeuedBuffer,
    DeviceCapabilities, FormatDescription, MappedRegion, Rect,
};

/// One driver request, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    QueryCapabilities,
    CropCapabilities,
    EnumFormat(u32),
    SetCrop(Rect),
    SetFormat(FormatRequest),
    Format,
    RequestBuffers(u32),
    QueryBuffer(u32),
    Map(u32),
    Unmap(u32),
    Queue(u32),
    Dequeue(u32),
    StreamOn,
    StreamOff,
    Wait,
    Close,
}

/// Scripted outcome of one readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStep {
    Ready,
    Timeout,
    Error(i32),
}

/// State shared between a mock device and the test that built it.
#[derive(Debug, Default)]
pub struct MockState {
    /// Every request in call order.
    pub calls: Vec<Call>,
    /// Mappings handed out and not yet released.
    pub live_mappings: usize,
    /// Buffers currently queued with the "driver", in fill order.
    pub driver_queue: VecDeque<u32>,
    /// Whether stream-on is in effect.
    pub streaming: bool,
    /// Whether a close succeeded.
    pub closed: bool,
}

impl MockState {
    /// Number of journal entries matching `predicate`.
    pub fn count<F: Fn(&Call) -> bool>(&self, predicate: F) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// Mapping handed out by [`MockDevice`].
#[derive(Debug)]
pub struct MockRegion {
    index: u32,
    data: Vec<u8>,
}

impl MappedRegion for MockRegion {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
    capabilities: DeviceCapabilities,
    formats: Vec<FourCC>,
    format: FormatRequest,
    pattern: TestPattern,
    sequence: u32,
    granted_buffers: u32,
    caps_error: Option<i32>,
    crop_caps_error: Option<i32>,
    set_crop_error: Option<i32>,
    set_format_error: Option<i32>,
    format_error: Option<i32>,
    request_error: Option<i32>,
    query_error_at: Option<(u32, i32)>,
    map_error_at: Option<u32>,
    queue_errors: VecDeque<i32>,
    requeue_error: Option<i32>,
    dequeue_error: Option<i32>,
    dequeue_index: Option<u32>,
    stream_on_error: Option<i32>,
    stream_off_error: Option<i32>,
    wait_script: VecDeque<WaitStep>,
    close_failures: u32,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn fail(errno: Option<i32>) -> io::Result<()> {
    errno.map_or(Ok(()), |errno| Err(io::Error::from_raw_os_error(errno)))
}

impl MockDevice {
    /// Create a capture-capable mock device with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::default())),
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                version: (6, 1, 0),
                flags: Flags::VIDEO_CAPTURE | Flags::STREAMING,
            },
            formats: vec![FourCC::YUYV, FourCC::UYVY],
            format: FormatRequest {
                width: 640,
                height: 480,
                fourcc: FourCC::YUYV,
            },
            pattern: TestPattern::ColorBars,
            sequence: 0,
            granted_buffers: 2,
            caps_error: None,
            crop_caps_error: None,
            set_crop_error: None,
            set_format_error: None,
            format_error: None,
            request_error: None,
            query_error_at: None,
            map_error_at: None,
            queue_errors: VecDeque::new(),
            requeue_error: None,
            dequeue_error: None,
            dequeue_index: None,
            stream_on_error: None,
            stream_off_error: None,
            wait_script: VecDeque::new(),
            close_failures: 0,
        }
    }

    /// Shared journal and queue state.
    pub fn state(&self) -> Rc<RefCell<MockState>> {
        Rc::clone(&self.state)
    }

    /// Set the capability bits.
    #[must_use]
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.capabilities.flags = flags;
        self
    }

    /// Set the frame fill pattern.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Number of buffers granted by the buffer request.
    #[must_use]
    pub const fn with_granted_buffers(mut self, count: u32) -> Self {
        self.granted_buffers = count;
        self
    }

    /// Fail the capability query.
    #[must_use]
    pub const fn with_caps_error(mut self, errno: i32) -> Self {
        self.caps_error = Some(errno);
        self
    }

    /// Fail the crop capability query.
    #[must_use]
    pub const fn with_crop_caps_error(mut self, errno: i32) -> Self {
        self.crop_caps_error = Some(errno);
        self
    }

    /// Fail setting the crop rectangle.
    #[must_use]
    pub const fn with_set_crop_error(mut self, errno: i32) -> Self {
        self.set_crop_error = Some(errno);
        self
    }

    /// Fail setting the format.
    #[must_use]
    pub const fn with_set_format_error(mut self, errno: i32) -> Self {
        self.set_format_error = Some(errno);
        self
    }

    /// Fail reading back the format.
    #[must_use]
    pub const fn with_format_error(mut self, errno: i32) -> Self {
        self.format_error = Some(errno);
        self
    }

    /// Fail the buffer request.
    #[must_use]
    pub const fn with_request_error(mut self, errno: i32) -> Self {
        self.request_error = Some(errno);
        self
    }

    /// Fail querying buffer `index`.
    #[must_use]
    pub const fn with_query_error_at(mut self, index: u32, errno: i32) -> Self {
        self.query_error_at = Some((index, errno));
        self
    }

    /// Fail mapping buffer `index` with `ENOMEM`.
    #[must_use]
    pub const fn with_map_error_at(mut self, index: u32) -> Self {
        self.map_error_at = Some(index);
        self
    }

    /// Fail the next queue requests, one errno per request.
    #[must_use]
    pub fn with_queue_errors(mut self, errnos: &[i32]) -> Self {
        self.queue_errors.extend(errnos.iter().copied());
        self
    }

    /// Fail every queue request made while streaming.
    #[must_use]
    pub const fn with_requeue_error(mut self, errno: i32) -> Self {
        self.requeue_error = Some(errno);
        self
    }

    /// Fail every dequeue request.
    #[must_use]
    pub const fn with_dequeue_error(mut self, errno: i32) -> Self {
        self.dequeue_error = Some(errno);
        self
    }

    /// Report `index` from every dequeue regardless of the queue.
    #[must_use]
    pub const fn with_dequeue_index(mut self, index: u32) -> Self {
        self.dequeue_index = Some(index);
        self
    }

    /// Fail stream-on.
    #[must_use]
    pub const fn with_stream_on_error(mut self, errno: i32) -> Self {
        self.stream_on_error = Some(errno);
        self
    }

    /// Fail stream-off.
    #[must_use]
    pub const fn with_stream_off_error(mut self, errno: i32) -> Self {
        self.stream_off_error = Some(errno);
        self
    }

    /// Script the next readiness waits. Unscripted waits report ready.
    #[must_use]
    pub fn with_wait_script(mut self, steps: &[WaitStep]) -> Self {
        self.wait_script.extend(steps.iter().copied());
        self
    }

    /// Fail the first `count` close attempts with `EINTR`.
    #[must_use]
    pub const fn with_close_failures(mut self, count: u32) -> Self {
        self.close_failures = count;
        self
    }

    /// Bytes in one frame at the current format (2 bytes per pixel).
    pub const fn frame_size(&self) -> u32 {
        self.format.width * self.format.height * 2
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl CaptureDevice for MockDevice {
    type Region = MockRegion;

    fn query_capabilities(&mut self) -> io::Result<DeviceCapabilities> {
        self.record(Call::QueryCapabilities);
        fail(self.caps_error)?;
        Ok(self.capabilities.clone())
    }

    fn crop_capabilities(&mut self) -> io::Result<CropCapabilities> {
        self.record(Call::CropCapabilities);
        fail(self.crop_caps_error)?;
        let full = Rect {
            left: 0,
            top: 0,
            width: 640,
            height: 480,
        };
        Ok(CropCapabilities {
            bounds: full,
            default_rect: full,
        })
    }

    fn enum_format(&mut self, index: u32) -> io::Result<Option<FormatDescription>> {
        self.record(Call::EnumFormat(index));
        Ok(self
            .formats
            .get(index as usize)
            .map(|fourcc| FormatDescription {
                index,
                compressed: false,
                description: format!("mock {fourcc}"),
                fourcc: *fourcc,
            }))
    }

    fn set_crop(&mut self, rect: Rect) -> io::Result<()> {
        self.record(Call::SetCrop(rect));
        fail(self.set_crop_error)
    }

    fn set_format(&mut self, request: &FormatRequest) -> io::Result<()> {
        self.record(Call::SetFormat(*request));
        fail(self.set_format_error)?;
        self.format = *request;
        Ok(())
    }

    fn format(&mut self) -> io::Result<AppliedFormat> {
        self.record(Call::Format);
        fail(self.format_error)?;
        Ok(AppliedFormat {
            width: self.format.width,
            height: self.format.height,
            fourcc: self.format.fourcc,
            bytes_per_line: self.format.width * 2,
            size_image: self.frame_size(),
            colorspace: 8,
        })
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.record(Call::RequestBuffers(count));
        fail(self.request_error)?;
        Ok(self.granted_buffers)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferDescriptor> {
        self.record(Call::QueryBuffer(index));
        if let Some((at, errno)) = self.query_error_at {
            if index >= at {
                return Err(io::Error::from_raw_os_error(errno));
            }
        }
        Ok(BufferDescriptor {
            index,
            offset: index * self.frame_size(),
            length: self.frame_size(),
        })
    }

    fn map_buffer(&mut self, descriptor: &BufferDescriptor) -> io::Result<MockRegion> {
        self.record(Call::Map(descriptor.index));
        if self.map_error_at == Some(descriptor.index) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        self.state.borrow_mut().live_mappings += 1;
        Ok(MockRegion {
            index: descriptor.index,
            data: generate_test_frame(&self.format, self.pattern),
        })
    }

    fn unmap_buffer(&mut self, region: MockRegion) -> io::Result<()> {
        self.record(Call::Unmap(region.index));
        self.state.borrow_mut().live_mappings -= 1;
        Ok(())
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.record(Call::Queue(index));
        if let Some(errno) = self.queue_errors.pop_front() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let mut state = self.state.borrow_mut();
        if state.streaming {
            fail(self.requeue_error)?;
        }
        if state.driver_queue.contains(&index) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        state.driver_queue.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        fail(self.dequeue_error)?;
        let mut state = self.state.borrow_mut();
        if !state.streaming {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let index = match self.dequeue_index {
            Some(index) => index,
            None => state
                .driver_queue
                .pop_front()
                .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?,
        };
        state.calls.push(Call::Dequeue(index));

        let sequence = self.sequence;
        self.sequence += 1;
        Ok(DequeuedBuffer {
            index,
            bytes_used: self.frame_size(),
            sequence,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.record(Call::StreamOn);
        fail(self.stream_on_error)?;
        self.state.borrow_mut().streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.record(Call::StreamOff);
        let mut state = self.state.borrow_mut();
        state.streaming = false;
        state.driver_queue.clear();
        fail(self.stream_off_error)
    }

    fn wait_ready(&mut self, _timeout: Duration) -> io::Result<bool> {
        self.record(Call::Wait);
        match self.wait_script.pop_front().unwrap_or(WaitStep::Ready) {
            WaitStep::Ready => Ok(true),
            WaitStep::Timeout => Ok(false),
            WaitStep::Error(errno) => Err(io::Error::from_raw_os_error(errno)),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.record(Call::Close);
        if self.close_failures > 0 {
            self.close_failures -= 1;
            return Err(io::Error::from_raw_os_error(libc::EINTR));
        }
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &FormatRequest, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut data, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut data, y, u, v);
        }
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let (y_val, u_val, v_val) = bars[bar_idx];

            let offset = ((y * width + x) * 2) as usize;
            if let Some(pixel) = data.get_mut(offset..offset + 4) {
                pixel.copy_from_slice(&[y_val, u_val, y_val, v_val]);
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for pixel in data.chunks_exact_mut(4) {
        pixel.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let mut device = MockDevice::new();
        let caps = device.query_capabilities().expect("query should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture());
        assert!(caps.can_stream());
    }

    #[test]
    fn test_mock_queue_rotation() {
        let mut device = MockDevice::new();
        device.queue_buffer(0).expect("queue 0");
        device.queue_buffer(1).expect("queue 1");
        assert!(device.queue_buffer(1).is_err(), "double queue is rejected");

        device.stream_on().expect("stream on");
        assert_eq!(device.dequeue_buffer().expect("dequeue").index, 0);
        assert_eq!(device.dequeue_buffer().expect("dequeue").index, 1);
        assert!(device.dequeue_buffer().is_err(), "nothing left queued");
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = FormatRequest {
            width: 640,
            height: 480,
            fourcc: FourCC::YUYV,
        };
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_solid_pattern() {
        let format = FormatRequest {
            width: 64,
            height: 64,
            fourcc: FourCC::YUYV,
        };
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));
        assert_eq!(&data[..4], &[128, 64, 128, 192]);
    }

    #[test]
    fn test_wait_script_then_ready() {
        let mut device = MockDevice::new().with_wait_script(&[WaitStep::Timeout]);
        assert!(!device.wait_ready(Duration::ZERO).expect("wait"));
        assert!(device.wait_ready(Duration::ZERO).expect("wait"));
    }
}
