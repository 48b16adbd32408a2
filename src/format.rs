//! Pixel format table and four-character codes.

use std::fmt;

use crate::error::{CaptureError, ErrorKind, Result};

/// Wire pixel format code (e.g., YUYV, RGBP, YU12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// Decode the little-endian 32-bit code the driver reports.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        Self(code.to_le_bytes())
    }

    /// The 32-bit code as the driver expects it.
    #[must_use]
    pub const fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Decode the four bytes to characters. Non-printable bytes become `.`.
    #[must_use]
    pub fn to_chars(self) -> [char; 4] {
        self.0.map(|byte| {
            if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            }
        })
    }

    /// RGB565 packed.
    pub const RGB565: Self = Self::new(b"RGBP");
    /// 32-bit RGB.
    pub const RGB32: Self = Self::new(b"RGB4");
    /// 32-bit BGR.
    pub const BGR32: Self = Self::new(b"BGR4");
    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// Planar YUV 4:2:0.
    pub const YUV420: Self = Self::new(b"YU12");
    /// Planar YUV 4:1:0.
    pub const YUV410: Self = Self::new(b"YUV9");
    /// Planar YUV 4:2:2.
    pub const YUV422P: Self = Self::new(b"422P");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_chars().iter().try_for_each(|c| write!(f, "{c}"))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// One entry of the supported pixel format table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// Display name used in usage text.
    pub name: &'static str,
    /// Code sent to the driver.
    pub fourcc: FourCC,
}

/// Number of selectable pixel formats.
pub const PIXEL_FORMAT_COUNT: usize = 8;

/// Index used when the caller does not choose a format (YUYV).
pub const DEFAULT_PIXEL_FORMAT: usize = 3;

/// Selectable pixel formats, in index order.
pub const PIXEL_FORMATS: [PixelFormat; PIXEL_FORMAT_COUNT] = [
    PixelFormat { name: "RGB565", fourcc: FourCC::RGB565 },
    PixelFormat { name: "RGB32", fourcc: FourCC::RGB32 },
    PixelFormat { name: "BGR32", fourcc: FourCC::BGR32 },
    PixelFormat { name: "YUYV", fourcc: FourCC::YUYV },
    PixelFormat { name: "UYVY", fourcc: FourCC::UYVY },
    PixelFormat { name: "YUV420", fourcc: FourCC::YUV420 },
    PixelFormat { name: "YUV410", fourcc: FourCC::YUV410 },
    PixelFormat { name: "YUV422P", fourcc: FourCC::YUV422P },
];

/// Look up a table entry, rejecting indices outside `0..PIXEL_FORMAT_COUNT`.
pub fn pixel_format(index: usize) -> Result<PixelFormat> {
    PIXEL_FORMATS.get(index).copied().ok_or_else(|| {
        CaptureError::new(
            ErrorKind::InvalidArguments,
            format!("pixel format {index} is not supported (expected 0..{PIXEL_FORMAT_COUNT})"),
        )
    })
}

/// Capture format chosen by the caller before streaming starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatRequest {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
}

impl FormatRequest {
    /// Build a request from a pixel format table index.
    pub fn from_index(width: u32, height: u32, format_index: usize) -> Result<Self> {
        let format = pixel_format(format_index)?;
        Ok(Self {
            width,
            height,
            fourcc: format.fourcc,
        })
    }
}
