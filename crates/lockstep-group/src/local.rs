//! In-process group transport.
//!
//! Every member of a [`LocalGroup`] is a [`GroupEndpoint`] living in the same
//! process, typically one per thread. Each channel owns one unbounded inbox
//! per member; a send copies the message once and pushes it into every other
//! member's inbox, which gives per-channel FIFO delivery for free.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use lockstep_types::{ChannelId, NodeId};

use crate::{GroupChannel, GroupError, Packet, PacketPool};

/// Tuning for an in-process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalGroupConfig {
    /// Capacity of every packet and framed message.
    pub packet_size: usize,
    /// Idle packets each member keeps for reuse.
    pub pool_slots: usize,
    /// How long `receive` waits before failing. `None` waits forever.
    pub receive_timeout: Option<Duration>,
}

impl Default for LocalGroupConfig {
    fn default() -> Self {
        Self {
            packet_size: 16 * 1024,
            pool_slots: 64,
            receive_timeout: None,
        }
    }
}

struct Route {
    inboxes: Vec<(Sender<Bytes>, Receiver<Bytes>)>,
    closed: Vec<bool>,
}

impl Route {
    fn new(members: usize) -> Self {
        Self {
            inboxes: (0..members)
                .map(|_| crossbeam_channel::unbounded())
                .collect(),
            closed: vec![false; members],
        }
    }
}

struct Hub {
    members: usize,
    routes: Mutex<HashMap<ChannelId, Route>>,
}

impl Hub {
    fn routes(&self) -> MutexGuard<'_, HashMap<ChannelId, Route>> {
        // A panic while holding the lock cannot leave a route half-updated
        self.routes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Constructor for a set of in-process group members.
#[derive(Debug)]
pub struct LocalGroup;

impl LocalGroup {
    /// Creates `members` connected endpoints. Endpoint 0 is node 0.
    ///
    /// # Panics
    ///
    /// Panics if `members` is 0.
    pub fn new(members: usize, config: LocalGroupConfig) -> Vec<GroupEndpoint> {
        assert!(members > 0, "a group needs at least one member");
        let hub = Arc::new(Hub {
            members,
            routes: Mutex::new(HashMap::new()),
        });
        (0..members)
            .map(|node| GroupEndpoint {
                node: NodeId::new(node as u32),
                hub: Arc::clone(&hub),
                config,
                pool: PacketPool::new(config.pool_slots, config.packet_size),
                next_channel: AtomicU64::new(1),
                open: Mutex::new(HashSet::new()),
                pending: Mutex::new(HashMap::new()),
            })
            .collect()
    }
}

/// One member's view of a [`LocalGroup`].
pub struct GroupEndpoint {
    node: NodeId,
    hub: Arc<Hub>,
    config: LocalGroupConfig,
    pool: PacketPool,
    next_channel: AtomicU64,
    open: Mutex<HashSet<ChannelId>>,
    pending: Mutex<HashMap<ChannelId, BytesMut>>,
}

impl GroupEndpoint {
    /// This member's packet pool.
    pub fn pool(&self) -> &PacketPool {
        &self.pool
    }

    /// Messages delivered to this member on `channel` and not yet received.
    ///
    /// Returns `None` once every member has closed the channel and its route
    /// is gone.
    pub fn queued(&self, channel: ChannelId) -> Option<usize> {
        self.hub
            .routes()
            .get(&channel)
            .map(|route| route.inboxes[self.node.as_index()].1.len())
    }

    fn ensure_open(&self, channel: ChannelId) -> Result<(), GroupError> {
        let open = self.open.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if open.contains(&channel) {
            Ok(())
        } else {
            Err(GroupError::ChannelNotOpen { channel })
        }
    }

    fn deliver(&self, channel: ChannelId, message: Bytes) -> Result<(), GroupError> {
        if message.len() > self.config.packet_size {
            return Err(GroupError::MessageTooLarge {
                size: message.len(),
                capacity: self.config.packet_size,
            });
        }
        let routes = self.hub.routes();
        let route = routes
            .get(&channel)
            .ok_or(GroupError::ChannelNotOpen { channel })?;
        for (member, (sender, _)) in route.inboxes.iter().enumerate() {
            if member == self.node.as_index() {
                continue;
            }
            sender
                .send(message.clone())
                .map_err(|_| GroupError::Disconnected { channel })?;
        }
        tracing::trace!(node = %self.node, %channel, bytes = message.len(), "delivered message");
        Ok(())
    }
}

impl GroupChannel for GroupEndpoint {
    fn node(&self) -> NodeId {
        self.node
    }

    fn member_count(&self) -> usize {
        self.hub.members
    }

    fn packet_size(&self) -> usize {
        self.config.packet_size
    }

    fn open_channel(&self) -> Result<ChannelId, GroupError> {
        let channel = ChannelId::new(self.next_channel.fetch_add(1, Ordering::Relaxed));
        self.hub
            .routes()
            .entry(channel)
            .or_insert_with(|| Route::new(self.hub.members));
        self.open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(channel);
        tracing::debug!(node = %self.node, %channel, "opened channel");
        Ok(channel)
    }

    fn close_channel(&self, channel: ChannelId) -> Result<(), GroupError> {
        let was_open = self
            .open
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&channel);
        if !was_open {
            return Err(GroupError::ChannelNotOpen { channel });
        }
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&channel);

        let mut routes = self.hub.routes();
        if let Some(route) = routes.get_mut(&channel) {
            route.closed[self.node.as_index()] = true;
            if route.closed.iter().all(|&closed| closed) {
                routes.remove(&channel);
            }
        }
        tracing::debug!(node = %self.node, %channel, "closed channel");
        Ok(())
    }

    fn broadcast(&self, channel: ChannelId, bytes: &[u8]) -> Result<(), GroupError> {
        self.ensure_open(channel)?;
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let message = pending.entry(channel).or_default();
        if message.len() + bytes.len() > self.config.packet_size {
            return Err(GroupError::MessageTooLarge {
                size: message.len() + bytes.len(),
                capacity: self.config.packet_size,
            });
        }
        message.extend_from_slice(bytes);
        Ok(())
    }

    fn finish_message(&self, channel: ChannelId) -> Result<(), GroupError> {
        self.ensure_open(channel)?;
        let message = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&channel)
            .unwrap_or_default();
        self.deliver(channel, message.freeze())
    }

    fn allocate_packet(&self) -> Packet {
        self.pool.allocate()
    }

    fn send(&self, channel: ChannelId, packet: Packet) -> Result<(), GroupError> {
        self.ensure_open(channel)?;
        let message = Bytes::copy_from_slice(packet.as_slice());
        drop(packet);
        self.deliver(channel, message)
    }

    fn receive(&self, channel: ChannelId) -> Result<Packet, GroupError> {
        self.ensure_open(channel)?;
        let inbox = {
            let routes = self.hub.routes();
            let route = routes
                .get(&channel)
                .ok_or(GroupError::ChannelNotOpen { channel })?;
            route.inboxes[self.node.as_index()].1.clone()
        };

        let message = match self.config.receive_timeout {
            Some(timeout) => inbox.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => GroupError::Timeout { channel, timeout },
                RecvTimeoutError::Disconnected => GroupError::Disconnected { channel },
            })?,
            None => inbox
                .recv()
                .map_err(|_| GroupError::Disconnected { channel })?,
        };
        tracing::trace!(node = %self.node, %channel, bytes = message.len(), "received message");
        self.pool.allocate_with(&message)
    }
}

impl std::fmt::Debug for GroupEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupEndpoint")
            .field("node", &self.node)
            .field("members", &self.hub.members)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
