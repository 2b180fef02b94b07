//! Scripted point-to-point socket.

use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lockstep_io::{IoError, Socket, retry_transient};

/// One scripted result of [`Socket::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Bytes delivered by the peer. Longer than the caller's buffer is fine;
    /// the remainder is delivered by the next read.
    Data(Vec<u8>),
    /// A transient interruption, absorbed by the retry loop.
    Interrupted,
    /// End of stream.
    Eof,
    /// A terminal OS error with the given raw code.
    Fail(i32),
}

/// Shared view of everything written to a [`ScriptedSocket`].
#[derive(Debug, Clone, Default)]
pub struct WriteSink(Arc<Mutex<Vec<u8>>>);

impl WriteSink {
    pub fn contents(&self) -> Vec<u8> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn accept(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(bytes);
    }
}

/// A [`Socket`] that replays a script.
///
/// Once the read script is exhausted every read reports end of stream.
#[derive(Debug, Default)]
pub struct ScriptedSocket {
    reads: VecDeque<ReadStep>,
    readiness: VecDeque<bool>,
    sink: WriteSink,
    write_budget: Option<usize>,
    write_error: Option<i32>,
    polls: Vec<Option<Duration>>,
}

impl ScriptedSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk the peer sends.
    pub fn with_data(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.reads.push_back(ReadStep::Data(bytes.into()));
        self
    }

    /// Appends an arbitrary read step.
    pub fn with_step(mut self, step: ReadStep) -> Self {
        self.reads.push_back(step);
        self
    }

    /// Appends an explicit end of stream.
    pub fn with_eof(self) -> Self {
        self.with_step(ReadStep::Eof)
    }

    /// Appends a terminal read error.
    pub fn with_read_error(self, code: i32) -> Self {
        self.with_step(ReadStep::Fail(code))
    }

    /// Queues the answer to the next unanswered readiness poll.
    ///
    /// Without a queued answer, a poll reports whether any read step remains.
    pub fn with_readiness(mut self, ready: bool) -> Self {
        self.readiness.push_back(ready);
        self
    }

    /// After `bytes` have been accepted, every write accepts zero bytes.
    pub fn with_write_limit(mut self, bytes: usize) -> Self {
        self.write_budget = Some(bytes);
        self
    }

    /// Once the write limit is reached, fail with `code` instead of
    /// accepting zero bytes.
    pub fn with_write_error(mut self, code: i32) -> Self {
        self.write_error = Some(code);
        self
    }

    /// Handle for inspecting what was written.
    pub fn sink(&self) -> WriteSink {
        self.sink.clone()
    }

    /// Timeouts passed to every readiness poll so far.
    pub fn polls(&self) -> &[Option<Duration>] {
        &self.polls
    }

    fn next_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.reads.pop_front() {
            None | Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Interrupted) => Err(Error::from(ErrorKind::Interrupted)),
            Some(ReadStep::Fail(code)) => Err(Error::from_raw_os_error(code)),
            Some(ReadStep::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.reads.push_front(ReadStep::Data(bytes.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

impl Socket for ScriptedSocket {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoError> {
        retry_transient(|| self.next_read(buf))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, IoError> {
        let n = match self.write_budget {
            Some(budget) => buf.len().min(budget),
            None => buf.len(),
        };
        if n == 0 && !buf.is_empty() {
            if let Some(code) = self.write_error {
                return Err(IoError::from(Error::from_raw_os_error(code)));
            }
        }
        if let Some(budget) = self.write_budget.as_mut() {
            *budget -= n;
        }
        self.sink.accept(&buf[..n]);
        Ok(n)
    }

    fn wait_for_data(&mut self, timeout: Option<Duration>) -> Result<bool, IoError> {
        self.polls.push(timeout);
        let ready = self
            .readiness
            .pop_front()
            .unwrap_or_else(|| !self.reads.is_empty());
        tracing::trace!(?timeout, ready, "scripted readiness poll");
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;

    #[test]
    fn data_longer_than_buffer_is_split() {
        let mut socket = ScriptedSocket::new().with_data(b"HELLOWORLD".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(socket.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"HELL");
        assert_eq!(socket.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"OWOR");
        assert_eq!(socket.read(&mut buf).unwrap(), 2);
        assert_eq!(socket.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn interrupts_are_absorbed() {
        let mut socket = ScriptedSocket::new()
            .with_step(ReadStep::Interrupted)
            .with_step(ReadStep::Interrupted)
            .with_data(b"ok".to_vec());
        let mut buf = [0u8; 8];
        assert_eq!(socket.read(&mut buf).unwrap(), 2);
    }

    #[test]
    fn read_errors_carry_raw_code() {
        let mut socket = ScriptedSocket::new().with_read_error(codes::ECONNRESET);
        let err = socket.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.os_code(), Some(codes::ECONNRESET));
    }

    #[test]
    fn write_limit_truncates() {
        let mut socket = ScriptedSocket::new().with_write_limit(3);
        let sink = socket.sink();
        let short = socket.write_fully(b"abcdef").unwrap_err();
        assert_eq!(short.written, 3);
        assert!(short.error.is_truncation());
        assert_eq!(sink.contents(), b"abc");
    }

    #[test]
    fn write_error_after_limit() {
        let mut socket = ScriptedSocket::new()
            .with_write_limit(2)
            .with_write_error(codes::EPIPE);
        let short = socket.write_fully(b"abcdef").unwrap_err();
        assert_eq!(short.written, 2);
        assert_eq!(short.error.os_code(), Some(codes::EPIPE));
    }

    #[test]
    fn readiness_script_then_fallback() {
        let mut socket = ScriptedSocket::new()
            .with_readiness(false)
            .with_data(b"x".to_vec());
        assert!(!socket.wait_for_data(Some(Duration::from_millis(5))).unwrap());
        assert!(socket.wait_for_data(None).unwrap());
        assert_eq!(
            socket.polls(),
            &[Some(Duration::from_millis(5)), None]
        );
    }
}
