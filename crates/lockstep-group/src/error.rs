//! Group transport error types.

use std::time::Duration;

use lockstep_types::ChannelId;

/// Errors from the group transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    /// The channel is not open on this member.
    #[error("channel {channel} is not open")]
    ChannelNotOpen { channel: ChannelId },

    /// No message arrived within the configured receive timeout.
    #[error("no message on channel {channel} within {timeout:?}")]
    Timeout {
        channel: ChannelId,
        timeout: Duration,
    },

    /// Every sender for the channel is gone.
    #[error("channel {channel} disconnected")]
    Disconnected { channel: ChannelId },

    /// A message would not fit into one packet.
    #[error("message of {size} bytes exceeds packet capacity of {capacity} bytes")]
    MessageTooLarge { size: usize, capacity: usize },
}
