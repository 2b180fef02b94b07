//! Transfer buffers.
//!
//! A transfer buffer decouples the sizes callers ask for from the size of one
//! replicated outcome. The read side is refilled only when empty and the
//! write side is drained only when full (or on flush), so every node crosses
//! a buffer boundary at the same call.

use std::ops::Range;

use lockstep_group::Packet;
use lockstep_types::{DATA_HEADER_SIZE, MAX_CONTROL_SIZE};

use crate::error::{ReplicationError, Result};

/// Rejects packets too small for the largest control outcome and buffer
/// sizes whose data outcome would not fit into one packet.
pub(crate) fn check_capacity(buffer_size: usize, packet_size: usize) -> Result<()> {
    if packet_size < MAX_CONTROL_SIZE {
        return Err(ReplicationError::setup(format!(
            "{packet_size}-byte packets cannot carry a {MAX_CONTROL_SIZE}-byte failure outcome"
        )));
    }
    if buffer_size == 0 || buffer_size.saturating_add(DATA_HEADER_SIZE) > packet_size {
        return Err(ReplicationError::setup(format!(
            "buffer size {buffer_size} does not fit a {packet_size}-byte packet with its \
             {DATA_HEADER_SIZE}-byte header"
        )));
    }
    Ok(())
}

/// Read-side transfer buffer.
///
/// On the master the bytes live in a local array filled by the real read. On
/// a slave they stay in the received packet, so replay costs no extra copy.
pub(crate) struct ReadBuffer {
    capacity: usize,
    local: Vec<u8>,
    packet: Option<Packet>,
    start: usize,
    end: usize,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            local: Vec::new(),
            packet: None,
            start: 0,
            end: 0,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.end - self.start
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes not yet handed to the caller.
    pub(crate) fn unread(&self) -> &[u8] {
        match &self.packet {
            Some(packet) => &packet.as_slice()[self.start..self.end],
            None => &self.local[self.start..self.end],
        }
    }

    /// Copies up to `out.len()` unread bytes into `out`.
    ///
    /// A packet is returned to its pool as soon as it is fully consumed.
    pub(crate) fn consume(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.remaining());
        out[..n].copy_from_slice(&self.unread()[..n]);
        self.start += n;
        if self.is_empty() {
            self.clear();
        }
        n
    }

    /// Discards unread bytes.
    pub(crate) fn clear(&mut self) {
        self.packet = None;
        self.start = 0;
        self.end = 0;
    }

    /// Refills from a local source that writes into the buffer's storage.
    ///
    /// On error the buffer is left empty.
    pub(crate) fn fill<E>(
        &mut self,
        fill: impl FnOnce(&mut [u8]) -> std::result::Result<usize, E>,
    ) -> std::result::Result<usize, E> {
        debug_assert!(self.is_empty(), "refill with unread bytes");
        self.clear();
        self.local.resize(self.capacity, 0);
        let n = fill(&mut self.local)?.min(self.capacity);
        self.end = n;
        Ok(n)
    }

    /// Takes a received record as the new contents; `payload` is the data
    /// range within it.
    pub(crate) fn adopt(&mut self, packet: Packet, payload: Range<usize>) {
        debug_assert!(self.is_empty(), "adopt with unread bytes");
        self.clear();
        if payload.is_empty() {
            return;
        }
        self.start = payload.start;
        self.end = payload.end;
        self.packet = Some(packet);
    }
}

/// Write-side transfer buffer.
pub(crate) struct WriteBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl WriteBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends as much of `data` as fits, returning how many bytes were taken.
    pub(crate) fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.capacity - self.buf.len());
        self.buf.extend_from_slice(&data[..n]);
        n
    }

    pub(crate) fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
    }
}
