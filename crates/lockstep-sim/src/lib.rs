//! # lockstep-sim: Deterministic I/O doubles
//!
//! Replication is only as deterministic as the outcome stream the master
//! produces. These doubles let tests script that stream exactly, including
//! failures that are hard to provoke on a real machine:
//!
//! - [`ScriptedSocket`]: a [`Socket`](lockstep_io::Socket) that returns a
//!   pre-recorded sequence of reads, readiness answers and write limits.
//! - [`MemoryBackend`]: an in-memory [`IoBackend`](lockstep_io::IoBackend)
//!   with one-shot fault injection, short writes and a capacity limit.
//!
//! Errors are built from raw OS codes so that the replicated error code can
//! be asserted on every node.

mod socket;
mod storage;

pub use socket::{ReadStep, ScriptedSocket, WriteSink};
pub use storage::{BackendStats, FaultOp, MemoryBackend};

/// Raw OS error codes used by scripted faults (Linux values).
pub mod codes {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const EACCES: i32 = 13;
    pub const EINVAL: i32 = 22;
    pub const ENOSPC: i32 = 28;
    pub const ESPIPE: i32 = 29;
    pub const EPIPE: i32 = 32;
    pub const ECONNRESET: i32 = 104;
}
