//! Error types for sync channels.

use thiserror::Error;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur while syncing with a remote.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A transport call failed.
    ///
    /// Drives the channel's backoff; contained per channel, one remote's
    /// failure never affects another.
    #[error("transport failure for remote {remote}: {message}")]
    Transport {
        /// The remote the channel talks to.
        remote: String,
        /// Transport-level detail.
        message: String,
    },

    /// The local engine rejected an inbound batch.
    #[error(transparent)]
    Reactor(#[from] docsync_reactor::ReactorError),

    /// The remote is not tracked.
    #[error("unknown remote: {remote}")]
    UnknownRemote {
        /// The remote name.
        remote: String,
    },

    /// The channel halted after too many consecutive failures.
    ///
    /// It stays halted until explicitly restarted.
    #[error("channel for remote {remote} is halted")]
    Halted {
        /// The remote name.
        remote: String,
    },
}

impl ChannelError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Transport { .. } => true,
            ChannelError::Reactor(e) => e.is_retryable(),
            ChannelError::UnknownRemote { .. } | ChannelError::Halted { .. } => false,
        }
    }
}
