//! Operation outcomes and their wire format.
//!
//! An [`Outcome`] is the unit of replication: the master produces exactly one
//! per replicated call and every slave consumes it in the same order.
//!
//! # Record Format
//!
//! All integers are little-endian. Data records carry their payload inline
//! after a fixed header; every other record is a single framed message.
//!
//! ```text
//! Data       [0x01][len:u32][payload:len]
//! Ready      [0x02][ready:u8]
//! Size       [0x03][size:u64]
//! Opened     [0x04]
//! Written    [0x05][count:u64][has_failure:u8][failure?]
//! Handshake  [0x06][raw:4B]
//! Failed     [0x07][failure]
//!
//! failure    [kind:u8][has_code:u8][code:i32][detail_len:u16][detail:utf8]
//! ```

use std::ops::Range;

use lockstep_types::DATA_HEADER_SIZE;

use crate::error::{Failure, FailureKind, ReplicationError, Result};

const TAG_DATA: u8 = 0x01;
const TAG_READY: u8 = 0x02;
const TAG_SIZE: u8 = 0x03;
const TAG_OPENED: u8 = 0x04;
const TAG_WRITTEN: u8 = 0x05;
const TAG_HANDSHAKE: u8 = 0x06;
const TAG_FAILED: u8 = 0x07;

// kind(1) + has_code(1) + code(4) + detail_len(2)
const FAILURE_HEADER_SIZE: usize = 8;

/// The replicated result of one master-side I/O call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `len` bytes follow in the same record. Zero means end of stream.
    Data { len: u32 },
    /// Answer to a readiness poll.
    Ready(bool),
    /// Answer to a size query.
    Size(u64),
    /// The master opened its real file.
    Opened,
    /// Result of a real write: bytes accepted and the terminal failure, if any.
    Written { count: u64, failure: Option<Failure> },
    /// The raw four bytes the peer echoed during the byte-order handshake.
    Handshake([u8; 4]),
    /// The call failed on the master.
    Failed(Failure),
}

impl Outcome {
    /// Short name used in logs and protocol errors.
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Data { .. } => "data",
            Outcome::Ready(_) => "ready",
            Outcome::Size(_) => "size",
            Outcome::Opened => "opened",
            Outcome::Written { .. } => "written",
            Outcome::Handshake(_) => "handshake",
            Outcome::Failed(_) => "failed",
        }
    }

    /// Appends the record header to `buf`.
    ///
    /// For [`Outcome::Data`] the caller appends the payload afterwards.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Outcome::Data { len } => {
                buf.push(TAG_DATA);
                buf.extend_from_slice(&len.to_le_bytes());
            }
            Outcome::Ready(ready) => {
                buf.push(TAG_READY);
                buf.push(u8::from(*ready));
            }
            Outcome::Size(size) => {
                buf.push(TAG_SIZE);
                buf.extend_from_slice(&size.to_le_bytes());
            }
            Outcome::Opened => buf.push(TAG_OPENED),
            Outcome::Written { count, failure } => {
                buf.push(TAG_WRITTEN);
                buf.extend_from_slice(&count.to_le_bytes());
                match failure {
                    Some(failure) => {
                        buf.push(1);
                        encode_failure(failure, buf);
                    }
                    None => buf.push(0),
                }
            }
            Outcome::Handshake(raw) => {
                buf.push(TAG_HANDSHAKE);
                buf.extend_from_slice(raw);
            }
            Outcome::Failed(failure) => {
                buf.push(TAG_FAILED);
                encode_failure(failure, buf);
            }
        }
    }

    /// Encodes a record that carries no payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DATA_HEADER_SIZE + FAILURE_HEADER_SIZE);
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes one complete record.
    ///
    /// Returns the outcome and the byte range of its payload within `record`
    /// (empty for everything but [`Outcome::Data`]). The payload is not
    /// copied.
    ///
    /// # Errors
    ///
    /// [`ReplicationError::Protocol`] if the tag is unknown, a field is
    /// truncated, or bytes are left over.
    pub fn decode(record: &[u8]) -> Result<(Self, Range<usize>)> {
        let mut reader = Reader::new(record);
        let tag = reader.u8()?;
        let outcome = match tag {
            TAG_DATA => {
                let len = reader.u32()?;
                let start = reader.pos;
                reader.skip(len as usize)?;
                reader.finish()?;
                return Ok((Outcome::Data { len }, start..reader.pos));
            }
            TAG_READY => match reader.u8()? {
                0 => Outcome::Ready(false),
                1 => Outcome::Ready(true),
                other => return Err(protocol(format!("ready flag {other:#04x}"))),
            },
            TAG_SIZE => Outcome::Size(reader.u64()?),
            TAG_OPENED => Outcome::Opened,
            TAG_WRITTEN => {
                let count = reader.u64()?;
                let failure = match reader.u8()? {
                    0 => None,
                    1 => Some(decode_failure(&mut reader)?),
                    other => return Err(protocol(format!("failure flag {other:#04x}"))),
                };
                Outcome::Written { count, failure }
            }
            TAG_HANDSHAKE => Outcome::Handshake(reader.array::<4>()?),
            TAG_FAILED => Outcome::Failed(decode_failure(&mut reader)?),
            other => return Err(protocol(format!("unknown tag {other:#04x}"))),
        };
        reader.finish()?;
        Ok((outcome, 0..0))
    }
}

fn encode_failure(failure: &Failure, buf: &mut Vec<u8>) {
    buf.push(failure.kind().as_byte());
    match failure.code() {
        Some(code) => {
            buf.push(1);
            buf.extend_from_slice(&code.to_le_bytes());
        }
        None => {
            buf.push(0);
            buf.extend_from_slice(&0i32.to_le_bytes());
        }
    }
    // Failure::new clips the detail well below u16::MAX
    let detail = failure.detail().as_bytes();
    buf.extend_from_slice(&(detail.len() as u16).to_le_bytes());
    buf.extend_from_slice(detail);
}

fn decode_failure(reader: &mut Reader<'_>) -> Result<Failure> {
    let byte = reader.u8()?;
    let kind =
        FailureKind::from_byte(byte).ok_or_else(|| protocol(format!("failure kind {byte:#04x}")))?;
    let has_code = reader.u8()?;
    let raw_code = i32::from_le_bytes(reader.array::<4>()?);
    let code = match has_code {
        0 => None,
        1 => Some(raw_code),
        other => return Err(protocol(format!("code flag {other:#04x}"))),
    };
    let len = u16::from_le_bytes(reader.array::<2>()?) as usize;
    let start = reader.pos;
    reader.skip(len)?;
    let detail = std::str::from_utf8(&reader.data[start..reader.pos])
        .map_err(|_| protocol("failure detail is not UTF-8".to_string()))?;
    Ok(Failure::new(kind, code, detail))
}

fn protocol(reason: String) -> ReplicationError {
    ReplicationError::Protocol(reason)
}

/// Bounds-checked cursor over a record.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        if self.data.len() - self.pos < len {
            return Err(protocol(format!(
                "record truncated at byte {}: need {len} more, have {}",
                self.pos,
                self.data.len() - self.pos
            )));
        }
        self.pos += len;
        Ok(())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let start = self.pos;
        self.skip(N)?;
        Ok(self.data[start..self.pos]
            .try_into()
            .expect("slice is exactly N bytes after bounds check"))
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array::<4>()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array::<8>()?))
    }

    fn finish(&self) -> Result<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(protocol(format!(
                "{} trailing bytes after record",
                self.data.len() - self.pos
            )))
        }
    }
}
