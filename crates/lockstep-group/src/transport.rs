//! The group channel contract.

use lockstep_types::{ChannelId, NodeId};

use crate::{GroupError, Packet};

/// Reliable, ordered, point-to-multipoint transport shared by a cluster.
///
/// Two delivery styles share one channel namespace:
///
/// - **Framed messages**: [`broadcast`](Self::broadcast) appends raw bytes to
///   a pending message and [`finish_message`](Self::finish_message) delivers
///   it as one unit.
/// - **Packets**: [`allocate_packet`](Self::allocate_packet) checks a
///   buffer out of the local pool, [`send`](Self::send) hands it to the
///   transport, and [`receive`](Self::receive) hands the next inbound packet
///   to the caller.
///
/// Both styles are received with [`receive`](Self::receive), in the order
/// they were sent.
pub trait GroupChannel: Send + Sync {
    /// This member's index within the group.
    fn node(&self) -> NodeId;

    /// Number of members in the group, including this one.
    fn member_count(&self) -> usize;

    /// Maximum number of bytes a single packet or message can carry.
    fn packet_size(&self) -> usize;

    /// Opens the next logical sub-channel.
    ///
    /// All members must open and close channels in the same relative order.
    fn open_channel(&self) -> Result<ChannelId, GroupError>;

    /// Closes a channel on this member.
    ///
    /// Closing is sequenced, not synchronized: other members may still be
    /// draining messages that were sent before this call.
    fn close_channel(&self, channel: ChannelId) -> Result<(), GroupError>;

    /// Appends bytes to the pending message on `channel`.
    fn broadcast(&self, channel: ChannelId, bytes: &[u8]) -> Result<(), GroupError>;

    /// Delivers the pending message on `channel` to every other member.
    fn finish_message(&self, channel: ChannelId) -> Result<(), GroupError>;

    /// Checks an empty packet out of the local pool.
    fn allocate_packet(&self) -> Packet;

    /// Sends a packet to every other member. Ownership moves to the transport.
    fn send(&self, channel: ChannelId, packet: Packet) -> Result<(), GroupError>;

    /// Blocks until the next packet or message on `channel` arrives.
    fn receive(&self, channel: ChannelId) -> Result<Packet, GroupError>;

    /// Returns a packet to the pool.
    ///
    /// Dropping a packet has the same effect; this exists for call sites that
    /// want the hand-back to be explicit.
    fn free(&self, packet: Packet) {
        drop(packet);
    }
}
