//! # Lockstep
//!
//! Cluster-replicated I/O for processes that run the same logic in lock-step.
//!
//! One process per resource, the **master**, performs the real I/O. Every
//! observable result of that I/O becomes an [`Outcome`] and is replicated,
//! in call order, to every other process, the **slaves**. All nodes then
//! return the same bytes, the same sizes, the same timeout decisions and the
//! same errors, so they keep branching identically.
//!
//! - **[`ReplicatedChannel`]**: a buffered, typed, byte-order aware stream
//!   over a point-to-point socket the master owns.
//! - **[`ReplicatedFile`]**: a seekable file with read/write extents, logical
//!   seeks and size queries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                         lockstep                         │
//! │  ┌──────────────────────┐     ┌──────────────────────┐   │
//! │  │  ReplicatedChannel   │     │   ReplicatedFile     │   │
//! │  └──────────┬───────────┘     └──────────┬───────────┘   │
//! │             └────────── Outcome ─────────┘               │
//! └───────┬──────────────────────┬───────────────────┬───────┘
//!         │ master only          │ every node        │ master only
//!   ┌─────┴──────┐        ┌──────┴───────┐     ┌─────┴──────┐
//!   │   Socket   │        │ GroupChannel │     │ IoBackend  │
//!   └────────────┘        └──────────────┘     └────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use lockstep::{FileSource, LockstepConfig, OpenFlags, ReplicatedFile, SyncBackend};
//!
//! let config = LockstepConfig::load()?;
//! let group: Arc<dyn lockstep::GroupChannel> = my_cluster_transport();
//!
//! let source = if group.node().as_index() == 0 {
//!     FileSource::local(Arc::new(SyncBackend::new()), "scene.dat", OpenFlags::read_only())
//! } else {
//!     FileSource::Remote
//! };
//! let mut file = ReplicatedFile::open(group, source, &config.file)?;
//! let size = file.stat_size()?; // same value on every node
//! ```
//!
//! # Determinism
//!
//! For a given resource, every node observes the same sequence of outcomes.
//! Members must therefore create, use and drop replicated resources in the
//! same order, with the same configuration.

mod buffer;
mod channel;
mod endian;
mod error;
mod file;
mod outcome;
mod replica;


pub use channel::{ReplicatedChannel, StreamParams};
pub use endian::{MAX_SCALAR_WIDTH, Scalar, SwapFlags, derive_swap};
pub use error::{Failure, FailureKind, MAX_DETAIL_LEN, ReplicationError, Result};
pub use file::{FileSource, ReplicatedFile};
pub use outcome::Outcome;

// Re-export the collaborators callers wire together
pub use lockstep_config::{ChannelConfig, FileConfig, GroupConfig, LockstepConfig};
pub use lockstep_group::{GroupChannel, GroupEndpoint, GroupError, LocalGroup, LocalGroupConfig};
pub use lockstep_io::{IoBackend, IoError, OpenFlags, Socket, SyncBackend, TcpSocket};
pub use lockstep_types::{ByteOrder, ChannelId, EndianMode, MAX_CONTROL_SIZE, NodeId, Role};

/// Creates an in-process group whose transport follows `config`.
pub fn local_group(members: usize, config: &GroupConfig) -> Vec<GroupEndpoint> {
    LocalGroup::new(
        members,
        LocalGroupConfig {
            packet_size: config.packet_size,
            pool_slots: config.pool_slots,
            receive_timeout: config.receive_timeout(),
        },
    )
}
