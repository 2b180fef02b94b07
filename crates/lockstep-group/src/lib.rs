//! # lockstep-group: Group channel transport for Lockstep
//!
//! The replication layer sits on top of a reliable, ordered, point-to-multipoint
//! transport. This crate defines that contract and ships an in-process
//! implementation:
//!
//! - **[`GroupChannel`]**: open/close logical sub-channels, assemble and
//!   broadcast framed messages, and move pooled [`Packet`]s between members.
//! - **[`PacketPool`]**: an index-based arena of fixed-capacity buffers.
//!   Packets are owned and move-only; dropping one returns it to its pool.
//! - **[`LocalGroup`]**: every member lives in the same process and talks
//!   over blocking in-memory inboxes. Used by tests and single-host clusters.
//!
//! # Guarantees
//!
//! - Reliable delivery and FIFO order per channel.
//! - Channel IDs are allocated in open order, so members that open channels
//!   in the same sequence agree on every ID.
//! - A sender never receives its own messages.

mod error;
mod local;
mod packet;
mod transport;

pub use error::GroupError;
pub use local::{GroupEndpoint, LocalGroup, LocalGroupConfig};
pub use packet::{Packet, PacketPool, PoolStats};
pub use transport::GroupChannel;

#[cfg(test)]
mod tests;
