//! Synchronous file backend using `std::fs`.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{FileHandle, IoBackend, OpenFlags};
use crate::{IoError, retry_transient};

/// Synchronous file backend using `std::fs::File`.
///
/// This is the default backend. All operations are blocking and use the OS
/// page cache.
#[derive(Debug)]
pub struct SyncBackend {
    /// Counter for generating unique file handle IDs.
    next_handle_id: AtomicU64,
}

impl SyncBackend {
    /// Creates a new synchronous file backend.
    pub fn new() -> Self {
        Self {
            next_handle_id: AtomicU64::new(1),
        }
    }

    /// Returns the next unique handle ID.
    fn next_id(&self) -> u64 {
        self.next_handle_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SyncBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBackend for SyncBackend {
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<FileHandle, IoError> {
        let mut opts = OpenOptions::new();
        opts.read(flags.read)
            .write(flags.write)
            .create(flags.create)
            .truncate(flags.truncate);

        let file = retry_transient(|| opts.open(path))?;
        let id = self.next_id();
        tracing::debug!(handle = id, path = %path.display(), "opened file");
        Ok(FileHandle::from_file(id, file))
    }

    fn seek(&self, handle: &mut FileHandle, offset: u64) -> Result<u64, IoError> {
        let file = handle.file_mut()?;
        retry_transient(|| file.seek(SeekFrom::Start(offset)))
    }

    fn read(&self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize, IoError> {
        let file = handle.file_mut()?;
        retry_transient(|| file.read(buf))
    }

    fn write(&self, handle: &mut FileHandle, buf: &[u8]) -> Result<usize, IoError> {
        let file = handle.file_mut()?;
        retry_transient(|| file.write(buf))
    }

    fn file_size(&self, handle: &FileHandle) -> Result<u64, IoError> {
        let metadata = handle.file()?.metadata()?;
        Ok(metadata.len())
    }

    fn close(&self, mut handle: FileHandle) -> Result<(), IoError> {
        // Dropping the file closes the descriptor
        handle.file = None;
        Ok(())
    }
}
