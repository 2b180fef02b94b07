//! # lockstep-types: Core types for `Lockstep`
//!
//! This crate contains the vocabulary shared by every Lockstep crate:
//! - Identifiers ([`ChannelId`], [`NodeId`])
//! - Replication roles ([`Role`])
//! - Byte order handling ([`ByteOrder`], [`EndianMode`])
//! - Wire sizing ([`DATA_HEADER_SIZE`], [`MAX_CONTROL_SIZE`])

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Size of the header that precedes the payload of a replicated data
/// outcome: `[tag:u8][length:u32]`.
///
/// A transfer buffer plus this header must fit into one group packet.
pub const DATA_HEADER_SIZE: usize = 5;

/// Upper bound on the diagnostic text carried by a replicated failure.
pub const MAX_DETAIL_LEN: usize = 256;

/// Size of the largest control outcome: a write outcome carrying a failure
/// with the longest detail, `[tag][count:u64][has_failure][kind][has_code]
/// [code:i32][detail_len:u16][detail]`.
///
/// Every group packet must hold one.
pub const MAX_CONTROL_SIZE: usize = 1 + 8 + 1 + 8 + MAX_DETAIL_LEN;

// ============================================================================
// Identifiers - All Copy (cheap 8-byte values)
// ============================================================================

/// Identifier of a logical sub-channel multiplexed over the group transport.
///
/// Channel IDs are allocated in open order, so every member that opens its
/// channels in the same sequence observes the same IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(u64);

impl ChannelId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ChannelId> for u64 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

/// Index of a process within the cluster group.
///
/// Node 0 is conventionally the master of every resource it opens, but the
/// role of a given handle is decided by whether it owns a real local handle,
/// not by its node index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(u32);

impl NodeId {
    pub const MASTER: NodeId = NodeId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Replication role of a single channel or file handle.
///
/// Fixed at construction by whether a real local handle was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Owns the real handle, performs I/O, and broadcasts every outcome.
    Master,
    /// Replays outcomes received from the master.
    Slave,
}

impl Role {
    pub fn is_master(self) -> bool {
        self == Role::Master
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
        }
    }
}

// ============================================================================
// Byte order
// ============================================================================

/// A concrete byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Byte order of the machine this code runs on.
    pub const fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    /// Returns the other byte order.
    pub const fn opposite(self) -> Self {
        match self {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        }
    }

    /// True if values in this order must be byte-swapped on this machine.
    pub fn needs_swap(self) -> bool {
        self != Self::native()
    }
}

/// How one direction of a channel chooses its wire byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EndianMode {
    /// Pass-through of locally generated data; never swap.
    Native,
    /// Fixed little-endian wire format.
    Little,
    /// Fixed big-endian wire format.
    Big,
    /// Derived from a one-time magic value handshake with the peer.
    #[default]
    Automatic,
}

impl EndianMode {
    /// Swap decision for modes that don't require a handshake.
    ///
    /// Returns `None` for [`EndianMode::Automatic`].
    pub fn fixed_swap(self) -> Option<bool> {
        match self {
            EndianMode::Native => Some(false),
            EndianMode::Little => Some(ByteOrder::Little.needs_swap()),
            EndianMode::Big => Some(ByteOrder::Big.needs_swap()),
            EndianMode::Automatic => None,
        }
    }

    pub fn is_automatic(self) -> bool {
        self == EndianMode::Automatic
    }
}
