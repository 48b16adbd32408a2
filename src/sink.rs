//! Frame consumer that writes each frame to its own file.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{is_errno, CaptureError, ErrorKind, Result};
use crate::traits::FrameConsumer;

/// Writes frame `n` to `<prefix>.<n>`, truncating any existing file.
#[derive(Debug, Clone)]
pub struct FileSink {
    prefix: String,
    written: u64,
}

impl FileSink {
    /// Sink writing next to `prefix`.
    pub fn new<P: Into<String>>(prefix: P) -> Self {
        Self {
            prefix: prefix.into(),
            written: 0,
        }
    }

    /// File name used for frame `index`.
    pub fn path_for(&self, index: u64) -> PathBuf {
        PathBuf::from(format!("{}.{index}", self.prefix))
    }

    /// Frames written so far.
    pub const fn written(&self) -> u64 {
        self.written
    }
}

impl FrameConsumer for FileSink {
    fn on_frame(&mut self, frame: &[u8], index: u64) -> Result<()> {
        let path = self.path_for(index);
        let mut file = File::create(&path).map_err(|err| create_error(&path, err))?;

        file.write_all(frame).map_err(|err| {
            CaptureError::with_source(
                ErrorKind::IOError,
                format!("cannot write {}", path.display()),
                err,
            )
        })?;
        self.written += 1;
        log::debug!("wrote {} bytes to {}", frame.len(), path.display());
        Ok(())
    }
}

fn create_error(path: &Path, err: io::Error) -> CaptureError {
    let message = format!("cannot create {}", path.display());
    if is_errno(&err, libc::EPERM) || is_errno(&err, libc::EACCES) {
        CaptureError::with_source(ErrorKind::NotPermitted, message, err)
    } else {
        CaptureError::with_source(ErrorKind::FileNotCreated, message, err)
    }
}
