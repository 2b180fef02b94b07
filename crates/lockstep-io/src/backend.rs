//! File backend trait.
//!
//! The [`IoBackend`] trait abstracts the local filesystem operations a master
//! performs on behalf of a replicated file. Slaves never call it.
//!
//! This abstraction allows the replication layer to be tested with
//! fault-injecting backends without touching real disks.

use std::path::Path;

use crate::IoError;

/// Flags for opening files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create the file if it doesn't exist.
    pub create: bool,
    /// Truncate the file to zero length on open.
    pub truncate: bool,
}

impl OpenFlags {
    /// Flags for reading an existing file.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Flags for reading and writing an existing file.
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    /// Flags for creating (or truncating) a file for reading and writing.
    pub fn create_truncate() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
        }
    }
}

/// Opaque handle to an open file.
///
/// For [`SyncBackend`](crate::SyncBackend) it wraps a `std::fs::File`.
/// Backends without an OS descriptor (simulation, in-memory) create a
/// detached handle and key their own state by [`FileHandle::id`].
#[derive(Debug)]
pub struct FileHandle {
    id: u64,
    pub(crate) file: Option<std::fs::File>,
}

impl FileHandle {
    /// Creates a new file handle wrapping a `std::fs::File`.
    pub(crate) fn from_file(id: u64, file: std::fs::File) -> Self {
        Self {
            id,
            file: Some(file),
        }
    }

    /// Creates a handle with no OS descriptor behind it.
    pub fn detached(id: u64) -> Self {
        Self { id, file: None }
    }

    /// Backend-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the internal file reference.
    pub(crate) fn file(&self) -> Result<&std::fs::File, IoError> {
        self.file
            .as_ref()
            .ok_or(IoError::InvalidHandle { handle: self.id })
    }

    /// Returns the internal file reference mutably.
    pub(crate) fn file_mut(&mut self) -> Result<&mut std::fs::File, IoError> {
        self.file
            .as_mut()
            .ok_or(IoError::InvalidHandle { handle: self.id })
    }
}

/// Abstraction over the master's local file operations.
///
/// All methods are synchronous and block the calling thread. Implementations
/// retry transient conditions internally; every error they return is
/// terminal.
pub trait IoBackend: Send + Sync {
    /// Opens a file with the given flags.
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<FileHandle, IoError>;

    /// Moves the file position to `offset` bytes from the start.
    ///
    /// Returns the new position.
    fn seek(&self, handle: &mut FileHandle, offset: u64) -> Result<u64, IoError>;

    /// Reads at the current position.
    ///
    /// Returns the number of bytes read; zero means end of file.
    fn read(&self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize, IoError>;

    /// Writes at the current position.
    ///
    /// Returns the number of bytes accepted, which may be short.
    fn write(&self, handle: &mut FileHandle, buf: &[u8]) -> Result<usize, IoError>;

    /// Returns the file size in bytes.
    fn file_size(&self, handle: &FileHandle) -> Result<u64, IoError>;

    /// Closes a file handle.
    fn close(&self, handle: FileHandle) -> Result<(), IoError>;
}
