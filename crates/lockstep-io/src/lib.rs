//! # lockstep-io: Master-side I/O primitives for Lockstep
//!
//! Only the master of a replicated resource ever touches real I/O. This crate
//! provides the two primitives it needs:
//!
//! - **[`IoBackend`]**: local file access (open, seek, read, write, size, close).
//!   [`SyncBackend`] implements it on top of `std::fs`.
//! - **[`Socket`]**: a blocking point-to-point byte stream with a
//!   level-triggered "data available" poll. [`TcpSocket`] implements it on
//!   top of `std::net::TcpStream`.
//!
//! Both primitives absorb transient OS conditions (`Interrupted`,
//! `WouldBlock`) in a local retry loop. Whatever they return after that is
//! terminal and becomes part of the replicated outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │           lockstep           │
//! │ (ReplicatedFile / Channel)   │
//! └──────────────┬───────────────┘
//!                │ master only
//! ┌──────────────┴───────────────┐
//! │          lockstep-io         │
//! │  ┌───────────┐ ┌───────────┐ │
//! │  │ IoBackend │ │  Socket   │ │
//! │  │  (files)  │ │  (TCP)    │ │
//! │  └───────────┘ └───────────┘ │
//! └──────────────────────────────┘
//! ```

mod backend;
mod error;
mod retry;
mod socket;
mod sync_backend;

pub use backend::{FileHandle, IoBackend, OpenFlags};
pub use error::{IoError, ShortWrite};
pub use retry::{MAX_TRANSIENT_RETRIES, retry_transient, write_fully_with};
pub use socket::{Socket, TcpSocket};
pub use sync_backend::SyncBackend;
