//! Local retry loops for transient OS conditions.
//!
//! Transient errors never leave this crate: the master retries them here, and
//! only the terminal result is replicated to the rest of the cluster.

use crate::error::is_transient_kind;
use crate::{IoError, ShortWrite};

/// Upper bound on consecutive transient failures before giving up.
///
/// Reached only if the descriptor was switched to non-blocking mode behind our
/// back; blocking descriptors report `Interrupted` a handful of times at most.
pub const MAX_TRANSIENT_RETRIES: u32 = 1024;

/// Runs `op` until it returns something other than a transient error.
pub fn retry_transient<T>(mut op: impl FnMut() -> std::io::Result<T>) -> Result<T, IoError> {
    let mut attempts = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_transient_kind(e.kind()) && attempts < MAX_TRANSIENT_RETRIES => {
                attempts += 1;
                tracing::trace!(attempts, kind = ?e.kind(), "retrying transient I/O error");
            }
            Err(e) => return Err(IoError::from(e)),
        }
    }
}

/// Feeds `buf` to `write` until it is fully accepted or a terminal error
/// occurs.
///
/// A zero-length write is terminal and reported as [`IoError::SinkClosed`].
pub fn write_fully_with(
    buf: &[u8],
    mut write: impl FnMut(&[u8]) -> Result<usize, IoError>,
) -> Result<usize, ShortWrite> {
    let mut written = 0;
    while written < buf.len() {
        match write(&buf[written..]) {
            Ok(0) => {
                return Err(ShortWrite {
                    written,
                    error: IoError::SinkClosed { written },
                });
            }
            Ok(n) => written += n,
            Err(error) => return Err(ShortWrite { written, error }),
        }
    }
    Ok(written)
}
