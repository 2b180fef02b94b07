//! Replicated file handle.
//!
//! Unlike the stream, a file is driven by discrete operations. Reads go
//! through a transfer buffer; writes, size queries and open each replicate a
//! single outcome; seeks are logical and replicate nothing.

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use lockstep_config::FileConfig;
use lockstep_group::GroupChannel;
use lockstep_io::{FileHandle, IoBackend, OpenFlags, write_fully_with};
use lockstep_types::{ChannelId, Role};

use crate::buffer::{ReadBuffer, check_capacity};
use crate::error::{Failure, FailureKind, Result};
use crate::outcome::Outcome;
use crate::replica::{Inbound, Replica, unexpected};

/// Where a [`ReplicatedFile`] gets its data from.
pub enum FileSource {
    /// This node is the master and opens `path` through `backend`.
    Local {
        backend: Arc<dyn IoBackend>,
        path: PathBuf,
        flags: OpenFlags,
    },
    /// Another node is the master.
    Remote,
}

impl FileSource {
    pub fn local(backend: Arc<dyn IoBackend>, path: impl Into<PathBuf>, flags: OpenFlags) -> Self {
        FileSource::Local {
            backend,
            path: path.into(),
            flags,
        }
    }
}

/// The master's real file and where its OS position is.
struct LocalFile {
    backend: Arc<dyn IoBackend>,
    handle: FileHandle,
    /// `None` after an error left the OS position unknown.
    device_pos: Option<u64>,
}

impl LocalFile {
    /// Seeks only if the OS position drifted from `pos`.
    fn reposition(&mut self, pos: u64) -> std::result::Result<(), Failure> {
        if self.device_pos == Some(pos) {
            return Ok(());
        }
        match self.backend.seek(&mut self.handle, pos) {
            Ok(_) => {
                self.device_pos = Some(pos);
                Ok(())
            }
            Err(error) => {
                self.device_pos = None;
                Err(Failure::from_io(FailureKind::Seek, &error))
            }
        }
    }

    /// Reads until `dst` is full or end of file.
    ///
    /// An error after some bytes arrived ends the extent early. A persistent
    /// error surfaces again on the next read.
    fn read_extent(&mut self, dst: &mut [u8]) -> std::result::Result<usize, Failure> {
        let mut filled = 0;
        while filled < dst.len() {
            match self.backend.read(&mut self.handle, &mut dst[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    self.device_pos = self.device_pos.map(|p| p + n as u64);
                }
                Err(error) => {
                    self.device_pos = None;
                    if filled > 0 {
                        tracing::debug!(%error, filled, "read stopped early");
                        break;
                    }
                    return Err(Failure::from_io(FailureKind::FatalIo, &error));
                }
            }
        }
        Ok(filled)
    }

    /// Writes all of `data`, returning the bytes accepted and the terminal
    /// failure if it stopped short.
    fn write_extent(&mut self, data: &[u8]) -> (u64, Option<Failure>) {
        let result = write_fully_with(data, |chunk| self.backend.write(&mut self.handle, chunk));
        match result {
            Ok(n) => {
                self.device_pos = self.device_pos.map(|p| p + n as u64);
                (n as u64, None)
            }
            Err(short) => {
                self.device_pos = None;
                (short.written as u64, Some(Failure::from_write(&short.error)))
            }
        }
    }
}

/// A seekable file whose every observable result is identical cluster-wide.
///
/// Only the master holds a real handle. Every node keeps its own logical
/// cursor and applies the same deltas from the same outcomes.
pub struct ReplicatedFile {
    replica: Replica,
    local: Option<LocalFile>,
    read_buf: ReadBuffer,
    pos: u64,
}

impl ReplicatedFile {
    /// Opens a file on every node.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Setup`](crate::ReplicationError::Setup) carrying
    /// the master's OS code on every node if the real open fails. The
    /// sub-channel is released before returning and no further outcomes
    /// are sent for it.
    pub fn open(
        group: Arc<dyn GroupChannel>,
        source: FileSource,
        config: &FileConfig,
    ) -> Result<Self> {
        check_capacity(config.buffer_size, group.packet_size())?;
        let role = match source {
            FileSource::Local { .. } => Role::Master,
            FileSource::Remote => Role::Slave,
        };
        let replica = Replica::open(group, role)?;

        let (outcome, local) = match source {
            FileSource::Local {
                backend,
                path,
                flags,
            } => match backend.open(&path, flags) {
                Ok(handle) => {
                    replica.publish(&Outcome::Opened)?;
                    let local = LocalFile {
                        backend,
                        handle,
                        device_pos: Some(0),
                    };
                    (Outcome::Opened, Some(local))
                }
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "open failed");
                    let failure = Failure::from_io(FailureKind::Setup, &error);
                    replica.publish(&Outcome::Failed(failure.clone()))?;
                    (Outcome::Failed(failure), None)
                }
            },
            FileSource::Remote => (replica.receive()?.outcome, None),
        };

        match outcome {
            Outcome::Opened => {
                tracing::info!(channel = %replica.channel(), %role, "replicated file open");
                Ok(Self {
                    replica,
                    local,
                    read_buf: ReadBuffer::new(config.buffer_size),
                    pos: 0,
                })
            }
            Outcome::Failed(failure) => Err(failure.into()),
            other => Err(unexpected(&other, "opened")),
        }
    }

    pub fn role(&self) -> Role {
        self.replica.role()
    }

    pub fn channel(&self) -> ChannelId {
        self.replica.channel()
    }

    /// The logical cursor.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads up to `buf.len()` bytes at the cursor.
    ///
    /// Replicates one outcome only when the read buffer is empty. Returns 0
    /// at end of file.
    pub fn read_extent(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.read_buf.is_empty() && self.fetch()? == 0 {
            return Ok(0);
        }
        let n = self.read_buf.consume(buf);
        self.pos += n as u64;
        Ok(n)
    }

    fn fetch(&mut self) -> Result<usize> {
        let outcome = match self.local.as_mut() {
            Some(local) => {
                let fetched = match local.reposition(self.pos) {
                    Ok(()) => self.read_buf.fill(|dst| local.read_extent(dst)),
                    Err(failure) => Err(failure),
                };
                match fetched {
                    Ok(n) => {
                        self.replica.publish_data(self.read_buf.unread())?;
                        Outcome::Data { len: n as u32 }
                    }
                    Err(failure) => {
                        tracing::warn!(
                            channel = %self.replica.channel(),
                            pos = self.pos,
                            detail = failure.detail(),
                            "file read failed"
                        );
                        self.replica.publish(&Outcome::Failed(failure.clone()))?;
                        Outcome::Failed(failure)
                    }
                }
            }
            None => {
                let Inbound {
                    outcome,
                    packet,
                    payload,
                } = self.replica.receive()?;
                if let Outcome::Data { .. } = outcome {
                    self.read_buf.adopt(packet, payload);
                }
                outcome
            }
        };
        match outcome {
            Outcome::Data { len } => Ok(len as usize),
            Outcome::Failed(failure) => Err(failure.into()),
            other => Err(unexpected(&other, "data")),
        }
    }

    /// Writes `data` at the cursor.
    ///
    /// Every node advances its cursor by the bytes the master actually
    /// wrote, then raises the master's failure if it stopped short.
    pub fn write_extent(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        // Read-ahead past the cursor may be stale after this write
        self.read_buf.clear();

        let outcome = match self.local.as_mut() {
            Some(local) => {
                let (count, failure) = match local.reposition(self.pos) {
                    Ok(()) => local.write_extent(data),
                    Err(failure) => (0, Some(failure)),
                };
                if let Some(failure) = &failure {
                    tracing::warn!(
                        channel = %self.replica.channel(),
                        written = count,
                        requested = data.len(),
                        detail = failure.detail(),
                        "file write stopped early"
                    );
                }
                let outcome = Outcome::Written { count, failure };
                self.replica.publish(&outcome)?;
                outcome
            }
            None => self.replica.receive()?.outcome,
        };
        match outcome {
            Outcome::Written { count, failure } => {
                self.pos += count;
                match failure {
                    None => Ok(count as usize),
                    Some(failure) => Err(failure.into()),
                }
            }
            Outcome::Failed(failure) => Err(failure.into()),
            other => Err(unexpected(&other, "written")),
        }
    }

    /// Moves the cursor. No outcome is replicated; the master repositions
    /// its real file lazily on the next read or write.
    pub fn seek_to(&mut self, pos: u64) {
        if pos != self.pos {
            self.read_buf.clear();
            self.pos = pos;
        }
    }

    /// Size of the file as the master sees it.
    pub fn stat_size(&mut self) -> Result<u64> {
        let outcome = match self.local.as_ref() {
            Some(local) => {
                let outcome = match local.backend.file_size(&local.handle) {
                    Ok(size) => Outcome::Size(size),
                    Err(error) => {
                        tracing::warn!(channel = %self.replica.channel(), %error, "size query failed");
                        Outcome::Failed(Failure::from_io(FailureKind::FatalIo, &error))
                    }
                };
                self.replica.publish(&outcome)?;
                outcome
            }
            None => self.replica.receive()?.outcome,
        };
        match outcome {
            Outcome::Size(size) => Ok(size),
            Outcome::Failed(failure) => Err(failure.into()),
            other => Err(unexpected(&other, "size")),
        }
    }

    /// Closes the real file on the master and releases the sub-channel.
    ///
    /// A failure to close the real handle is logged on the master and not
    /// replicated.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        self.read_buf.clear();
        if let Some(local) = self.local.take() {
            if let Err(error) = local.backend.close(local.handle) {
                tracing::warn!(channel = %self.replica.channel(), %error, "closing local file failed");
            }
        }
        self.replica.close()
    }
}

impl Drop for ReplicatedFile {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            tracing::warn!(channel = %self.replica.channel(), %error, "release on drop failed");
        }
    }
}

impl io::Read for ReplicatedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_extent(buf)?)
    }
}

impl io::Write for ReplicatedFile {
    /// A write the master cut short reports the bytes that landed; the
    /// failure is raised by the next call, which starts past them.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let start = self.pos;
        match self.write_extent(buf) {
            Ok(n) => Ok(n),
            Err(_) if self.pos > start => Ok((self.pos - start) as usize),
            Err(error) => Err(error.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for ReplicatedFile {
    /// `SeekFrom::End` replicates a size query; the other forms are local.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => self.stat_size()?.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.seek_to(target);
        Ok(target)
    }
}

impl fmt::Debug for ReplicatedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedFile")
            .field("channel", &self.replica.channel())
            .field("role", &self.replica.role())
            .field("pos", &self.pos)
            .field("buffered", &self.read_buf.remaining())
            .finish_non_exhaustive()
    }
}
