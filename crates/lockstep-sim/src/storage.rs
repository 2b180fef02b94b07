//! In-memory file backend with fault injection.

use std::collections::{HashMap, VecDeque};
use std::io::Error;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lockstep_io::{FileHandle, IoBackend, IoError, OpenFlags};

use crate::codes;

/// Backend operation a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Open,
    Seek,
    Read,
    Write,
    Size,
}

/// Counters for every call that reached the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub opens: u64,
    pub seeks: u64,
    pub reads: u64,
    pub writes: u64,
    pub sizes: u64,
    /// Calls that failed because of an injected fault.
    pub faults_fired: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[derive(Debug)]
struct OpenFile {
    path: PathBuf,
    pos: u64,
    flags: OpenFlags,
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<PathBuf, Vec<u8>>,
    open: HashMap<u64, OpenFile>,
    next_handle: u64,
    faults: VecDeque<(FaultOp, i32)>,
    capacity: Option<u64>,
    max_chunk: Option<usize>,
    stats: BackendStats,
}

impl State {
    /// Pops the first queued fault for `op`, if any.
    fn take_fault(&mut self, op: FaultOp) -> Option<IoError> {
        let at = self.faults.iter().position(|(o, _)| *o == op)?;
        let (_, code) = self.faults.remove(at)?;
        self.stats.faults_fired += 1;
        tracing::debug!(?op, code, "injected backend fault");
        Some(IoError::from(Error::from_raw_os_error(code)))
    }

    fn entry(&mut self, handle: &FileHandle) -> Result<&mut OpenFile, IoError> {
        self.open
            .get_mut(&handle.id())
            .ok_or(IoError::InvalidHandle {
                handle: handle.id(),
            })
    }

    fn used_bytes(&self) -> u64 {
        self.files.values().map(|f| f.len() as u64).sum()
    }
}

/// An [`IoBackend`] that keeps files in memory.
///
/// Faults are one-shot: each injected fault fails the next call of its
/// operation and is then discarded. Faults for different operations are
/// independent.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates or replaces a file.
    pub fn insert_file(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) {
        self.state()
            .files
            .insert(path.as_ref().to_path_buf(), contents.into());
    }

    /// Current contents of a file.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state().files.get(path.as_ref()).cloned()
    }

    /// Fails the next `op` with the raw OS error `code`.
    pub fn inject(&self, op: FaultOp, code: i32) {
        self.state().faults.push_back((op, code));
    }

    /// Limits the total bytes stored across all files.
    ///
    /// A write that would exceed the limit stores what fits, and the next
    /// attempt fails with `ENOSPC`.
    pub fn set_capacity(&self, bytes: u64) {
        self.state().capacity = Some(bytes);
    }

    /// Limits how many bytes a single write call accepts.
    pub fn set_max_chunk(&self, bytes: usize) {
        self.state().max_chunk = Some(bytes);
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state().open.len()
    }

    pub fn stats(&self) -> BackendStats {
        self.state().stats
    }
}

impl IoBackend for MemoryBackend {
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<FileHandle, IoError> {
        let mut state = self.state();
        state.stats.opens += 1;
        if let Some(err) = state.take_fault(FaultOp::Open) {
            return Err(err);
        }

        match state.files.get_mut(path) {
            Some(contents) => {
                if flags.truncate {
                    contents.clear();
                }
            }
            None if flags.create => {
                state.files.insert(path.to_path_buf(), Vec::new());
            }
            None => return Err(IoError::from(Error::from_raw_os_error(codes::ENOENT))),
        }

        state.next_handle += 1;
        let id = state.next_handle;
        state.open.insert(
            id,
            OpenFile {
                path: path.to_path_buf(),
                pos: 0,
                flags,
            },
        );
        Ok(FileHandle::detached(id))
    }

    fn seek(&self, handle: &mut FileHandle, offset: u64) -> Result<u64, IoError> {
        let mut state = self.state();
        state.stats.seeks += 1;
        if let Some(err) = state.take_fault(FaultOp::Seek) {
            return Err(err);
        }
        let file = state.entry(handle)?;
        file.pos = offset;
        Ok(offset)
    }

    fn read(&self, handle: &mut FileHandle, buf: &mut [u8]) -> Result<usize, IoError> {
        let mut state = self.state();
        state.stats.reads += 1;
        if let Some(err) = state.take_fault(FaultOp::Read) {
            return Err(err);
        }
        let (path, pos, readable) = {
            let file = state.entry(handle)?;
            (file.path.clone(), file.pos, file.flags.read)
        };
        if !readable {
            return Err(IoError::from(Error::from_raw_os_error(codes::EBADF)));
        }

        let n = match state.files.get(&path) {
            Some(contents) => {
                let start = usize::try_from(pos).unwrap_or(usize::MAX).min(contents.len());
                let n = buf.len().min(contents.len() - start);
                buf[..n].copy_from_slice(&contents[start..start + n]);
                n
            }
            None => 0,
        };
        state.entry(handle)?.pos += n as u64;
        state.stats.bytes_read += n as u64;
        Ok(n)
    }

    fn write(&self, handle: &mut FileHandle, buf: &[u8]) -> Result<usize, IoError> {
        let mut state = self.state();
        state.stats.writes += 1;
        if let Some(err) = state.take_fault(FaultOp::Write) {
            return Err(err);
        }
        let (path, pos, writable) = {
            let file = state.entry(handle)?;
            (file.path.clone(), file.pos, file.flags.write)
        };
        if !writable {
            return Err(IoError::from(Error::from_raw_os_error(codes::EBADF)));
        }

        let mut n = buf.len();
        if let Some(max) = state.max_chunk {
            n = n.min(max);
        }
        if let Some(capacity) = state.capacity {
            let current = state.files.get(&path).map_or(0, |c| c.len() as u64);
            let others = state.used_bytes() - current;
            let allowed_end = capacity.saturating_sub(others);
            let room = usize::try_from(allowed_end.saturating_sub(pos)).unwrap_or(usize::MAX);
            if room == 0 && n > 0 {
                return Err(IoError::from(Error::from_raw_os_error(codes::ENOSPC)));
            }
            n = n.min(room);
        }

        let contents = state.files.entry(path).or_default();
        let start = usize::try_from(pos).unwrap_or(usize::MAX);
        if contents.len() < start + n {
            contents.resize(start + n, 0);
        }
        contents[start..start + n].copy_from_slice(&buf[..n]);
        state.entry(handle)?.pos += n as u64;
        state.stats.bytes_written += n as u64;
        Ok(n)
    }

    fn file_size(&self, handle: &FileHandle) -> Result<u64, IoError> {
        let mut state = self.state();
        state.stats.sizes += 1;
        if let Some(err) = state.take_fault(FaultOp::Size) {
            return Err(err);
        }
        let path = state.entry(handle)?.path.clone();
        Ok(state.files.get(&path).map_or(0, |c| c.len() as u64))
    }

    fn close(&self, handle: FileHandle) -> Result<(), IoError> {
        self.state()
            .open
            .remove(&handle.id())
            .map(|_| ())
            .ok_or(IoError::InvalidHandle {
                handle: handle.id(),
            })
    }
}
