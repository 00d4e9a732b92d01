//! Channel-level error type.

use thiserror::Error;

/// Errors returned by a channel's `deliver` method.
///
/// Every variant ends up as an `error` row in the notification log; nothing
/// is retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The transport accepted the call but failed to deliver.
    #[error("transport error: {0}")]
    Transport(String),

    /// The recipient cannot be addressed by this channel.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The message could not be assembled.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
