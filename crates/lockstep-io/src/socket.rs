//! Point-to-point socket primitive.
//!
//! The master of a replicated channel owns exactly one [`Socket`]. Reads and
//! polls go through the local retry loop; writes are driven to completion by
//! [`Socket::write_fully`].

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::{IoError, ShortWrite, retry_transient, write_fully_with};

/// A blocking, byte-oriented, point-to-point connection.
pub trait Socket: Send {
    /// Reads up to `buf.len()` bytes, blocking until at least one byte or end
    /// of stream is available.
    ///
    /// Returns zero at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoError>;

    /// Writes some prefix of `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError>;

    /// Level-triggered readiness poll.
    ///
    /// Returns `true` if a read would not block (including end of stream),
    /// `false` if `timeout` elapsed first. `None` waits forever.
    fn wait_for_data(&mut self, timeout: Option<Duration>) -> Result<bool, IoError>;

    /// Writes all of `buf`, stopping only on completion or a terminal error.
    fn write_fully(&mut self, buf: &[u8]) -> Result<usize, ShortWrite> {
        write_fully_with(buf, |chunk| self.write(chunk))
    }
}

/// [`Socket`] over a blocking `std::net::TcpStream`.
#[derive(Debug)]
pub struct TcpSocket {
    stream: TcpStream,
}

impl TcpSocket {
    /// Connects to a remote peer.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, IoError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    /// Wraps an already-connected stream.
    ///
    /// Nagle's algorithm is disabled: the replication layer already batches
    /// writes in its transfer buffer.
    pub fn from_stream(stream: TcpStream) -> Result<Self, IoError> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(false)?;
        Ok(Self { stream })
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Result<SocketAddr, IoError> {
        Ok(self.stream.peer_addr()?)
    }

    fn peek_ready(&self) -> Result<bool, IoError> {
        let mut probe = [0u8; 1];
        loop {
            match self.stream.peek(&mut probe) {
                // A zero-length peek is end of stream, which is readable
                Ok(_) => return Ok(true),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(false);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(IoError::from(e)),
            }
        }
    }
}

impl Socket for TcpSocket {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        let stream = &mut self.stream;
        retry_transient(|| stream.read(buf))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        let stream = &mut self.stream;
        retry_transient(|| stream.write(buf))
    }

    fn wait_for_data(&mut self, timeout: Option<Duration>) -> Result<bool, IoError> {
        let ready = match timeout {
            Some(timeout) if timeout.is_zero() => {
                self.stream.set_nonblocking(true)?;
                let ready = self.peek_ready();
                self.stream.set_nonblocking(false)?;
                ready
            }
            Some(timeout) => {
                self.stream.set_read_timeout(Some(timeout))?;
                let ready = self.peek_ready();
                self.stream.set_read_timeout(None)?;
                ready
            }
            None => self.peek_ready(),
        }?;
        tracing::trace!(?timeout, ready, "socket readiness poll");
        Ok(ready)
    }
}
