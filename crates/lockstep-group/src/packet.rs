//! Pooled, move-only packet buffers.
//!
//! A [`PacketPool`] is an arena of fixed-capacity `BytesMut` buffers, each
//! tagged with a stable slot index. [`PacketPool::allocate`] checks a slot
//! out; dropping the [`Packet`] checks it back in. There is no manual free
//! and no way to use a packet after it has been returned.
//!
//! Backed by `crossbeam_queue::ArrayQueue` for lock-free, bounded pooling.
//! When the pool is empty, `allocate()` creates a fresh slot. When the pool
//! is full, a returned buffer is dropped instead of recycled.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

use crate::GroupError;

/// Point-in-time counters for a [`PacketPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Slots ever created by this pool.
    pub created: u32,
    /// Slots waiting in the pool for reuse.
    pub idle: usize,
    /// Packets currently checked out.
    pub outstanding: usize,
}

struct PoolInner {
    idle: ArrayQueue<(u32, BytesMut)>,
    packet_size: usize,
    created: AtomicU32,
    outstanding: AtomicUsize,
}

impl PoolInner {
    fn check_in(&self, index: u32, mut buf: BytesMut) {
        buf.clear();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        // After a burst the pool sheds excess buffers rather than growing
        let _ = self.idle.push((index, buf));
    }
}

/// A bounded arena of fixed-capacity packet buffers.
///
/// Cloning a pool is cheap; clones share the same slots.
#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

impl PacketPool {
    /// Creates a new pool.
    ///
    /// # Arguments
    ///
    /// * `slots` - Maximum number of idle buffers kept for reuse.
    /// * `packet_size` - Capacity of every packet, in bytes.
    ///
    /// # Panics
    ///
    /// Panics if `slots` is 0 or `packet_size` is 0.
    pub fn new(slots: usize, packet_size: usize) -> Self {
        assert!(slots > 0, "slots must be positive");
        assert!(packet_size > 0, "packet_size must be positive");
        Self {
            inner: Arc::new(PoolInner {
                idle: ArrayQueue::new(slots),
                packet_size,
                created: AtomicU32::new(0),
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Capacity of every packet handed out by this pool.
    pub fn packet_size(&self) -> usize {
        self.inner.packet_size
    }

    /// Checks an empty packet out of the pool, creating a slot if none is idle.
    pub fn allocate(&self) -> Packet {
        let (index, buf) = self.inner.idle.pop().unwrap_or_else(|| {
            let index = self.inner.created.fetch_add(1, Ordering::Relaxed);
            (index, BytesMut::with_capacity(self.inner.packet_size))
        });
        self.inner.outstanding.fetch_add(1, Ordering::Relaxed);
        Packet {
            index,
            buf,
            home: Arc::clone(&self.inner),
        }
    }

    /// Checks out a packet holding a copy of `data`.
    pub fn allocate_with(&self, data: &[u8]) -> Result<Packet, GroupError> {
        let mut packet = self.allocate();
        packet.put(data)?;
        Ok(packet)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.inner.created.load(Ordering::Relaxed),
            idle: self.inner.idle.len(),
            outstanding: self.inner.outstanding.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("packet_size", &self.inner.packet_size)
            .field("stats", &self.stats())
            .finish()
    }
}

/// An owned buffer checked out of a [`PacketPool`].
///
/// Packets are move-only. Sending one transfers ownership to the transport;
/// dropping one returns its slot to the pool it came from.
pub struct Packet {
    index: u32,
    buf: BytesMut,
    home: Arc<PoolInner>,
}

impl Packet {
    /// Slot index within the owning pool.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Maximum number of bytes this packet can hold.
    pub fn capacity(&self) -> usize {
        self.home.packet_size
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes still available before the packet is full.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Appends `data`, failing if it would exceed the packet capacity.
    pub fn put(&mut self, data: &[u8]) -> Result<(), GroupError> {
        if data.len() > self.remaining() {
            return Err(GroupError::MessageTooLarge {
                size: self.buf.len() + data.len(),
                capacity: self.capacity(),
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.home.check_in(self.index, buf);
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("index", &self.index)
            .field("len", &self.buf.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
