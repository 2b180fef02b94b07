//! Error taxonomy for replicated operations.
//!
//! Terminal failures are classified into a [`Failure`] on the master,
//! replicated, and turned into a [`ReplicationError`] on every node from the
//! same value. Slaves never consult their own OS state.

use std::time::Duration;

use lockstep_group::GroupError;
use lockstep_io::IoError;
use lockstep_types::ChannelId;
pub use lockstep_types::MAX_DETAIL_LEN;

/// Kind of a replicated terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FailureKind {
    /// The master could not reposition the real file.
    Seek = 1,
    /// The sink stopped accepting data before every byte was written.
    WriteTruncated = 2,
    /// Any other unrecoverable OS error.
    FatalIo = 3,
    /// Byte-order handshake or open failed.
    Setup = 4,
}

impl FailureKind {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Seek),
            2 => Some(Self::WriteTruncated),
            3 => Some(Self::FatalIo),
            4 => Some(Self::Setup),
            _ => None,
        }
    }
}

/// A terminal failure as it travels inside an outcome record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    kind: FailureKind,
    code: Option<i32>,
    detail: String,
}

impl Failure {
    /// Creates a failure, clipping `detail` to [`MAX_DETAIL_LEN`] bytes so
    /// that the value the master keeps equals the value slaves decode.
    pub fn new(kind: FailureKind, code: Option<i32>, detail: impl Into<String>) -> Self {
        let mut detail = detail.into();
        if detail.len() > MAX_DETAIL_LEN {
            let mut end = MAX_DETAIL_LEN;
            while !detail.is_char_boundary(end) {
                end -= 1;
            }
            detail.truncate(end);
        }
        Self { kind, code, detail }
    }

    /// Classifies a master-side I/O error as `kind`, keeping its OS code.
    pub fn from_io(kind: FailureKind, error: &IoError) -> Self {
        Self::new(kind, error.os_code(), error.to_string())
    }

    /// Classifies a failed write: truncation if the sink stopped accepting
    /// data, fatal otherwise.
    pub fn from_write(error: &IoError) -> Self {
        let kind = if error.is_truncation() {
            FailureKind::WriteTruncated
        } else {
            FailureKind::FatalIo
        };
        Self::from_io(kind, error)
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The master's native OS error code, if the failure came from the OS.
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Errors raised by replicated channels and files.
///
/// Errors that come from a replicated [`Failure`] compare equal on every
/// node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicationError {
    /// The master could not reposition the real file.
    #[error("seek failed: {detail}")]
    Seek { code: Option<i32>, detail: String },

    /// The sink stopped accepting data.
    #[error("write truncated: {detail}")]
    WriteTruncated { code: Option<i32>, detail: String },

    /// Unrecoverable I/O error on the master.
    #[error("fatal I/O error: {detail}")]
    FatalIo { code: Option<i32>, detail: String },

    /// Handshake or open failed; the resource was released on every node.
    #[error("setup failed: {detail}")]
    Setup { code: Option<i32>, detail: String },

    /// A timed read saw no data in time.
    #[error("no data arrived within {timeout:?}")]
    Timeout { timeout: Duration },

    /// The group channel failed.
    #[error("group transport error: {0}")]
    Transport(#[from] GroupError),

    /// An outcome record could not be decoded or was not the one expected.
    #[error("malformed outcome: {0}")]
    Protocol(String),

    /// Operation on a released channel.
    #[error("{0} is closed")]
    Closed(ChannelId),
}

impl ReplicationError {
    /// The master's OS error code, for errors that carry one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Seek { code, .. }
            | Self::WriteTruncated { code, .. }
            | Self::FatalIo { code, .. }
            | Self::Setup { code, .. } => *code,
            Self::Timeout { .. } | Self::Transport(_) | Self::Protocol(_) | Self::Closed(_) => None,
        }
    }

    pub(crate) fn setup(detail: impl Into<String>) -> Self {
        Self::Setup {
            code: None,
            detail: detail.into(),
        }
    }
}

impl From<Failure> for ReplicationError {
    fn from(failure: Failure) -> Self {
        let Failure { kind, code, detail } = failure;
        match kind {
            FailureKind::Seek => Self::Seek { code, detail },
            FailureKind::WriteTruncated => Self::WriteTruncated { code, detail },
            FailureKind::FatalIo => Self::FatalIo { code, detail },
            FailureKind::Setup => Self::Setup { code, detail },
        }
    }
}

impl From<ReplicationError> for std::io::Error {
    fn from(err: ReplicationError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            ReplicationError::WriteTruncated { .. } => ErrorKind::WriteZero,
            ReplicationError::Timeout { .. } => ErrorKind::TimedOut,
            ReplicationError::Transport(_) => ErrorKind::ConnectionAborted,
            ReplicationError::Protocol(_) => ErrorKind::InvalidData,
            ReplicationError::Closed(_) => ErrorKind::NotConnected,
            ReplicationError::Seek { code, .. }
            | ReplicationError::FatalIo { code, .. }
            | ReplicationError::Setup { code, .. } => code
                .map_or(ErrorKind::Other, |c| std::io::Error::from_raw_os_error(c).kind()),
        };
        std::io::Error::new(kind, err)
    }
}

/// Result type for replicated operations.
pub type Result<T, E = ReplicationError> = std::result::Result<T, E>;
