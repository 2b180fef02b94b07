//! Replicated byte stream.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use lockstep_config::ChannelConfig;
use lockstep_group::GroupChannel;
use lockstep_io::Socket;
use lockstep_types::{ChannelId, Role};

use crate::buffer::{ReadBuffer, WriteBuffer, check_capacity};
use crate::endian::{MAX_SCALAR_WIDTH, Scalar, SwapFlags, check_magic, derive_swap};
use crate::error::{Failure, FailureKind, ReplicationError, Result};
use crate::outcome::Outcome;
use crate::replica::{Inbound, Replica, unexpected};

/// Stream settings fixed once during setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Capacity of each transfer buffer.
    pub buffer_size: usize,
    /// Negotiated byte-order conversion.
    pub swap: SwapFlags,
    /// Whether write outcomes are replicated to slaves.
    pub replicate_writes: bool,
}

/// A buffered, typed byte stream whose reads are identical on every node.
///
/// The master owns a real [`Socket`] and replicates each chunk it reads;
/// slaves replay those chunks. Writes reach the peer from the master only.
/// Unless [`ChannelConfig::replicate_writes`] is set, a failed send is
/// reported on the master alone.
///
/// All members must construct and drop their channels in the same order.
pub struct ReplicatedChannel {
    replica: Replica,
    socket: Option<Box<dyn Socket>>,
    params: StreamParams,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
}

impl ReplicatedChannel {
    /// Sets up a channel. Passing a socket makes this node the master.
    ///
    /// If either direction uses automatic byte order, the master exchanges
    /// `handshake_magic` with the peer and replicates what it read back.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Setup`] on every node if the buffer does not fit a
    /// packet, the handshake magic is byte-symmetric, the handshake fails, or
    /// the peer's magic value is neither ours nor ours byte-swapped. The
    /// sub-channel is released before returning.
    pub fn new(
        group: Arc<dyn GroupChannel>,
        socket: Option<Box<dyn Socket>>,
        config: &ChannelConfig,
    ) -> Result<Self> {
        check_capacity(config.buffer_size, group.packet_size())?;
        if SwapFlags::needs_handshake(config) {
            check_magic(config.handshake_magic)?;
        }
        let role = if socket.is_some() {
            Role::Master
        } else {
            Role::Slave
        };
        let replica = Replica::open(group, role)?;

        let mut socket = socket;
        let peer_swapped = if SwapFlags::needs_handshake(config) {
            Some(handshake(&replica, socket.as_mut(), config.handshake_magic)?)
        } else {
            None
        };
        let params = StreamParams {
            buffer_size: config.buffer_size,
            swap: SwapFlags::resolve(config, peer_swapped),
            replicate_writes: config.replicate_writes,
        };
        tracing::info!(
            channel = %replica.channel(),
            %role,
            swap_read = params.swap.read,
            swap_write = params.swap.write,
            "replicated channel ready"
        );

        Ok(Self {
            replica,
            socket,
            params,
            read_buf: ReadBuffer::new(config.buffer_size),
            write_buf: WriteBuffer::new(config.buffer_size),
        })
    }

    /// Sets up the master side over `socket`.
    pub fn master(
        group: Arc<dyn GroupChannel>,
        socket: impl Socket + 'static,
        config: &ChannelConfig,
    ) -> Result<Self> {
        Self::new(group, Some(Box::new(socket)), config)
    }

    /// Sets up a slave side.
    pub fn slave(group: Arc<dyn GroupChannel>, config: &ChannelConfig) -> Result<Self> {
        Self::new(group, None, config)
    }

    pub fn role(&self) -> Role {
        self.replica.role()
    }

    pub fn channel(&self) -> ChannelId {
        self.replica.channel()
    }

    pub fn params(&self) -> StreamParams {
        self.params
    }

    /// Bytes buffered on the read side and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.read_buf.remaining()
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// Reads up to `buf.len()` bytes.
    ///
    /// Replicates one outcome only when the read buffer is empty. Returns 0
    /// at end of stream, on every node.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.read_buf.is_empty() && self.refill()? == 0 {
            return Ok(0);
        }
        Ok(self.read_buf.consume(buf))
    }

    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::FatalIo`] if the stream ends first.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_bytes(&mut buf[filled..])? {
                0 => {
                    return Err(ReplicationError::FatalIo {
                        code: None,
                        detail: format!(
                            "unexpected end of stream after {filled} of {} bytes",
                            buf.len()
                        ),
                    });
                }
                n => filled += n,
            }
        }
        Ok(())
    }

    /// Reads one value, converting from the peer's byte order.
    pub fn read_typed<T: Scalar>(&mut self) -> Result<T> {
        let mut raw = [0u8; MAX_SCALAR_WIDTH];
        self.read_exact(&mut raw[..T::WIDTH])?;
        Ok(T::decode(&raw[..T::WIDTH], self.params.swap.read))
    }

    /// Reads a string framed by a `u32` length prefix.
    ///
    /// The body is read in chunks of at most one buffer, so a bogus length
    /// cannot force a large allocation before the bytes actually arrive.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_typed::<u32>()? as usize;
        let mut chunk = vec![0u8; len.min(self.params.buffer_size)];
        let mut body = Vec::with_capacity(chunk.len());
        while body.len() < len {
            let want = (len - body.len()).min(chunk.len());
            self.read_exact(&mut chunk[..want])?;
            body.extend_from_slice(&chunk[..want]);
        }
        String::from_utf8(body).map_err(|e| ReplicationError::FatalIo {
            code: None,
            detail: format!("string is not valid UTF-8: {e}"),
        })
    }

    /// Replicated readiness poll.
    ///
    /// Returns `true` at once if bytes are buffered. Otherwise the master
    /// polls its socket and every node returns the master's answer. `None`
    /// waits forever.
    pub fn wait_for_data(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if !self.read_buf.is_empty() {
            return Ok(true);
        }
        let outcome = match self.socket.as_deref_mut() {
            Some(socket) => {
                let outcome = match socket.wait_for_data(timeout) {
                    Ok(ready) => Outcome::Ready(ready),
                    Err(error) => {
                        tracing::warn!(channel = %self.replica.channel(), %error, "readiness poll failed");
                        Outcome::Failed(Failure::from_io(FailureKind::FatalIo, &error))
                    }
                };
                self.replica.publish(&outcome)?;
                outcome
            }
            None => self.replica.receive()?.outcome,
        };
        match outcome {
            Outcome::Ready(ready) => Ok(ready),
            Outcome::Failed(failure) => Err(failure.into()),
            other => Err(unexpected(&other, "ready")),
        }
    }

    /// [`read_bytes`](Self::read_bytes) preceded by a replicated
    /// [`wait_for_data`](Self::wait_for_data).
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Timeout`] on every node if the master saw no data
    /// within `timeout`.
    pub fn read_bytes_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.wait_for_data(Some(timeout))? {
            return Err(ReplicationError::Timeout { timeout });
        }
        self.read_bytes(buf)
    }

    fn refill(&mut self) -> Result<usize> {
        let outcome = match self.socket.as_deref_mut() {
            Some(socket) => match self.read_buf.fill(|dst| socket.read(dst)) {
                Ok(n) => {
                    self.replica.publish_data(self.read_buf.unread())?;
                    Outcome::Data { len: n as u32 }
                }
                Err(error) => {
                    tracing::warn!(channel = %self.replica.channel(), %error, "socket read failed");
                    let failure = Failure::from_io(FailureKind::FatalIo, &error);
                    self.replica.publish(&Outcome::Failed(failure.clone()))?;
                    Outcome::Failed(failure)
                }
            },
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
            Outcome::Data { len } => {
                tracing::trace!(channel = %self.replica.channel(), bytes = len, "read buffer refilled");
                Ok(len as usize)
            }
            Outcome::Failed(failure) => Err(failure.into()),
            other => Err(unexpected(&other, "data")),
        }
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Buffers `data`, sending each time the write buffer fills.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let taken = self.write_buf.push(data);
            data = &data[taken..];
            if self.write_buf.is_full() {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Writes one value in the configured byte order.
    pub fn write_typed<T: Scalar>(&mut self, value: T) -> Result<()> {
        let mut raw = [0u8; MAX_SCALAR_WIDTH];
        value.encode(self.params.swap.write, &mut raw[..T::WIDTH]);
        self.write_bytes(&raw[..T::WIDTH])
    }

    /// Writes a string framed by a `u32` length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u32::try_from(value.len()).map_err(|_| ReplicationError::FatalIo {
            code: None,
            detail: format!("string of {} bytes overflows the length prefix", value.len()),
        })?;
        self.write_typed(len)?;
        self.write_bytes(value.as_bytes())
    }

    /// Sends whatever is buffered.
    ///
    /// Every node empties its buffer at the same call. The master performs
    /// the real send; with write replication on, slaves wait for its result.
    pub fn flush(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let pending = self.write_buf.len();
        let outcome = match self.socket.as_deref_mut() {
            Some(socket) => {
                let result = socket.write_fully(self.write_buf.as_slice());
                self.write_buf.clear();
                let outcome = match result {
                    Ok(count) => Outcome::Written {
                        count: count as u64,
                        failure: None,
                    },
                    Err(short) => {
                        tracing::warn!(
                            channel = %self.replica.channel(),
                            written = short.written,
                            pending,
                            error = %short.error,
                            "socket write stopped early"
                        );
                        Outcome::Written {
                            count: short.written as u64,
                            failure: Some(Failure::from_write(&short.error)),
                        }
                    }
                };
                if self.params.replicate_writes {
                    self.replica.publish(&outcome)?;
                }
                outcome
            }
            None => {
                self.write_buf.clear();
                if !self.params.replicate_writes {
                    return Ok(());
                }
                self.replica.receive()?.outcome
            }
        };
        match outcome {
            Outcome::Written { failure: None, .. } => Ok(()),
            Outcome::Written {
                failure: Some(failure),
                ..
            }
            | Outcome::Failed(failure) => Err(failure.into()),
            other => Err(unexpected(&other, "written")),
        }
    }

    /// Flushes and releases the sub-channel.
    pub fn close(mut self) -> Result<()> {
        let flushed = self.flush();
        let closed = self.replica.close();
        flushed.and(closed)
    }
}

/// Master side of the byte-order handshake; slaves replay its outcome.
fn handshake(
    replica: &Replica,
    socket: Option<&mut Box<dyn Socket>>,
    magic: u32,
) -> Result<bool> {
    let outcome = match socket {
        Some(socket) => {
            let outcome = match exchange_magic(&mut **socket, magic) {
                Ok(raw) => Outcome::Handshake(raw),
                Err(failure) => {
                    tracing::warn!(channel = %replica.channel(), detail = failure.detail(), "handshake failed");
                    Outcome::Failed(failure)
                }
            };
            replica.publish(&outcome)?;
            outcome
        }
        None => replica.receive()?.outcome,
    };
    match outcome {
        Outcome::Handshake(raw) => derive_swap(magic, raw),
        Outcome::Failed(failure) => Err(failure.into()),
        other => Err(unexpected(&other, "handshake")),
    }
}

fn exchange_magic(socket: &mut dyn Socket, magic: u32) -> std::result::Result<[u8; 4], Failure> {
    socket
        .write_fully(&magic.to_ne_bytes())
        .map_err(|short| Failure::from_io(FailureKind::Setup, &short.error))?;

    let mut raw = [0u8; 4];
    let mut filled = 0;
    while filled < raw.len() {
        match socket.read(&mut raw[filled..]) {
            Ok(0) => {
                return Err(Failure::new(
                    FailureKind::Setup,
                    None,
                    "peer closed the connection during the byte-order handshake",
                ));
            }
            Ok(n) => filled += n,
            Err(error) => return Err(Failure::from_io(FailureKind::Setup, &error)),
        }
    }
    Ok(raw)
}

impl Drop for ReplicatedChannel {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            tracing::warn!(channel = %self.replica.channel(), %error, "flush on drop failed");
        }
    }
}

impl std::io::Read for ReplicatedChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.read_bytes(buf)?)
    }
}

impl std::io::Write for ReplicatedChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(ReplicatedChannel::flush(self)?)
    }
}

impl fmt::Debug for ReplicatedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedChannel")
            .field("channel", &self.replica.channel())
            .field("role", &self.replica.role())
            .field("params", &self.params)
            .field("buffered", &self.read_buf.remaining())
            .field("pending_write", &self.write_buf.len())
            .finish()
    }
}
