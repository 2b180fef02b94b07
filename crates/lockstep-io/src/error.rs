//! I/O error types.

use std::io::ErrorKind;

/// Errors from the master-side I/O primitives.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Underlying OS I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Invalid file handle.
    #[error("invalid file handle: {handle}")]
    InvalidHandle { handle: u64 },

    /// The sink accepted zero bytes, so nothing more can be written.
    #[error("sink stopped accepting data after {written} bytes")]
    SinkClosed { written: usize },
}

impl IoError {
    /// Native OS error code, if the error came from the OS.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            IoError::Io { source } => source.raw_os_error(),
            IoError::InvalidHandle { .. } | IoError::SinkClosed { .. } => None,
        }
    }

    /// True for conditions the local retry loop absorbs.
    pub fn is_transient(&self) -> bool {
        match self {
            IoError::Io { source } => is_transient_kind(source.kind()),
            IoError::InvalidHandle { .. } | IoError::SinkClosed { .. } => false,
        }
    }

    /// True if the error means the sink stopped accepting data (peer closed
    /// the pipe, disk full, zero-length write).
    pub fn is_truncation(&self) -> bool {
        match self {
            IoError::SinkClosed { .. } => true,
            IoError::Io { source } => matches!(
                source.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::WriteZero
                    | ErrorKind::StorageFull
                    | ErrorKind::ConnectionReset
            ),
            IoError::InvalidHandle { .. } => false,
        }
    }
}

pub(crate) fn is_transient_kind(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

/// A write loop that stopped before every byte was accepted.
#[derive(Debug, thiserror::Error)]
#[error("write stopped after {written} bytes: {error}")]
pub struct ShortWrite {
    /// Bytes accepted by the sink before it stopped.
    pub written: usize,
    /// The terminal error.
    pub error: IoError,
}
