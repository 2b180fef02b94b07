//! Per-resource replication conduit shared by channels and files.
//!
//! A [`Replica`] owns one Group Channel sub-channel. The master publishes one
//! outcome per replicated call; slaves receive them in the same order. Data
//! outcomes travel as pooled packets so slaves can read straight out of them;
//! everything else is a small framed message.

use std::ops::Range;
use std::sync::Arc;

use lockstep_group::{GroupChannel, Packet};
use lockstep_types::{ChannelId, DATA_HEADER_SIZE, Role};

use crate::error::{ReplicationError, Result};
use crate::outcome::Outcome;

/// One received outcome and the packet it arrived in.
pub(crate) struct Inbound {
    pub(crate) outcome: Outcome,
    pub(crate) packet: Packet,
    pub(crate) payload: Range<usize>,
}

pub(crate) struct Replica {
    group: Arc<dyn GroupChannel>,
    channel: ChannelId,
    role: Role,
    open: bool,
}

impl Replica {
    /// Opens the next sub-channel. Every member must call this in the same
    /// order.
    pub(crate) fn open(group: Arc<dyn GroupChannel>, role: Role) -> Result<Self> {
        let channel = group.open_channel()?;
        tracing::debug!(node = %group.node(), %channel, %role, "opened replica");
        Ok(Self {
            group,
            channel,
            role,
            open: true,
        })
    }

    pub(crate) fn channel(&self) -> ChannelId {
        self.channel
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(ReplicationError::Closed(self.channel))
        }
    }

    /// Replicates a payload-free outcome as one framed message.
    pub(crate) fn publish(&self, outcome: &Outcome) -> Result<()> {
        debug_assert!(self.role.is_master(), "slaves never publish");
        self.ensure_open()?;
        self.group.broadcast(self.channel, &outcome.to_bytes())?;
        self.group.finish_message(self.channel)?;
        tracing::trace!(channel = %self.channel, outcome = outcome.name(), "published outcome");
        Ok(())
    }

    /// Replicates a data outcome carrying `payload`.
    pub(crate) fn publish_data(&self, payload: &[u8]) -> Result<()> {
        debug_assert!(self.role.is_master(), "slaves never publish");
        self.ensure_open()?;
        let mut header = Vec::with_capacity(DATA_HEADER_SIZE);
        Outcome::Data {
            len: payload.len() as u32,
        }
        .encode_into(&mut header);

        let mut packet = self.group.allocate_packet();
        packet.put(&header)?;
        packet.put(payload)?;
        self.group.send(self.channel, packet)?;
        tracing::trace!(channel = %self.channel, bytes = payload.len(), "published data");
        Ok(())
    }

    /// Blocks until the next outcome for this resource arrives.
    pub(crate) fn receive(&self) -> Result<Inbound> {
        self.ensure_open()?;
        let packet = self.group.receive(self.channel)?;
        let (outcome, payload) = Outcome::decode(packet.as_slice())?;
        tracing::trace!(channel = %self.channel, outcome = outcome.name(), "received outcome");
        Ok(Inbound {
            outcome,
            packet,
            payload,
        })
    }

    /// Releases the sub-channel on this node. Idempotent.
    pub(crate) fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.group.close_channel(self.channel)?;
        tracing::debug!(channel = %self.channel, role = %self.role, "closed replica");
        Ok(())
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(channel = %self.channel, %error, "failed to close replica channel");
        }
    }
}

/// Error for an outcome that does not answer the call being replayed.
pub(crate) fn unexpected(outcome: &Outcome, expected: &str) -> ReplicationError {
    ReplicationError::Protocol(format!(
        "expected {expected} outcome, received {}",
        outcome.name()
    ))
}
