//! Error taxonomy for capture sessions.
//!
//! Every fallible operation reports a [`CaptureError`] carrying an
//! [`ErrorKind`]. The kind decides the process exit status so scripts can
//! tell failure classes apart.

use std::fmt;
use std::io;

use thiserror::Error;

/// Failure class of a [`CaptureError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad caller input, rejected before any device interaction.
    InvalidArguments,
    /// The driver rejected the requested width, height or pixel format.
    InvalidFormatArguments,
    /// Device, format or buffers are held by someone else.
    Busy,
    /// Device could not be opened for a reason other than busy/permission.
    OpenFailed,
    /// Capability query failed.
    NoCapabilities,
    /// Crop capability query failed.
    NoCropCapabilities,
    /// Device does not advertise video capture.
    CaptureNotSupported,
    /// Setting the crop rectangle failed with something other than "unsupported".
    CroppingFailed,
    /// Querying a kernel buffer descriptor failed.
    QueryFailed,
    /// Stream-on was rejected.
    StreamingFailed,
    /// Memory-mapped streaming I/O is not supported by the driver.
    UnsupportedIOMethod,
    /// Driver-internal I/O error, or a failed readiness wait.
    IOError,
    /// A frame file could not be created.
    FileNotCreated,
    /// Mapping a kernel buffer into the process failed.
    MappingFailed,
    /// Handing a buffer to the driver failed.
    QueueingFailed,
    /// Taking a filled buffer back from the driver failed.
    DequeueingFailed,
    /// Process-side allocation failed.
    InsufficientMemory,
    /// Operation not permitted.
    NotPermitted,
    /// The driver granted fewer buffers than double buffering needs.
    InsufficientDriverMemory,
    /// Operation called in the wrong session state.
    InvalidState,
}

impl ErrorKind {
    /// Process exit status for this kind. Success is 0.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InvalidArguments => 100,
            Self::InvalidFormatArguments => 101,
            Self::Busy => 102,
            Self::OpenFailed => 103,
            Self::NoCapabilities => 104,
            Self::NoCropCapabilities => 105,
            Self::CaptureNotSupported => 106,
            Self::CroppingFailed => 107,
            Self::QueryFailed => 108,
            Self::StreamingFailed => 109,
            Self::UnsupportedIOMethod => 110,
            Self::IOError => 111,
            Self::FileNotCreated => 112,
            Self::MappingFailed => 113,
            Self::QueueingFailed => 114,
            Self::DequeueingFailed => 115,
            Self::InsufficientMemory => 116,
            Self::NotPermitted => 117,
            Self::InsufficientDriverMemory => 118,
            Self::InvalidState => 119,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArguments => "invalid arguments",
            Self::InvalidFormatArguments => "invalid format arguments",
            Self::Busy => "device busy",
            Self::OpenFailed => "open failed",
            Self::NoCapabilities => "no capabilities",
            Self::NoCropCapabilities => "no crop capabilities",
            Self::CaptureNotSupported => "capture not supported",
            Self::CroppingFailed => "cropping failed",
            Self::QueryFailed => "buffer query failed",
            Self::StreamingFailed => "streaming failed",
            Self::UnsupportedIOMethod => "unsupported I/O method",
            Self::IOError => "I/O error",
            Self::FileNotCreated => "file not created",
            Self::MappingFailed => "memory mapping failed",
            Self::QueueingFailed => "buffer queueing failed",
            Self::DequeueingFailed => "buffer dequeueing failed",
            Self::InsufficientMemory => "insufficient memory",
            Self::NotPermitted => "not permitted",
            Self::InsufficientDriverMemory => "insufficient driver memory",
            Self::InvalidState => "invalid session state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for capture operations.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct CaptureError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<io::Error>,
}

impl CaptureError {
    /// Create an error without an underlying OS error.
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create an error caused by an OS-level failure.
    pub fn with_source<M: Into<String>>(kind: ErrorKind, message: M, source: io::Error) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Failure class.
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable cause.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Process exit status for this error.
    pub const fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Returns true when `err` carries the given errno.
pub(crate) fn is_errno(err: &io::Error, errno: i32) -> bool {
    err.raw_os_error() == Some(errno)
}

/// Returns true for resource exhaustion the driver may recover from on its own.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOMEM | libc::EAGAIN))
}
