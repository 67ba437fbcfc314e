//! Error taxonomy for session synchronization.
//!
//! Transport and HTTP errors are caught at the module boundaries and mapped
//! into these variants; raw reqwest/tungstenite errors never cross the
//! public API.

use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while establishing or driving a chat session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The handshake was rejected or the network call failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The handshake did not complete within the configured bound.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The send REST call was rejected or the network call failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A send was attempted with no active binding.
    #[error("not connected to a chat")]
    NotConnected,

    /// The channel transport dropped while joined.
    #[error("channel lost: {0}")]
    ChannelLost(String),

    /// `open` was called on a channel that is already connecting or joined.
    #[error("channel already open")]
    AlreadyOpen,

    /// `seed` would have clobbered live messages.
    #[error("refusing to seed a non-empty store with a live channel")]
    InvalidSeed,

    /// A handshake completed after a newer selection superseded it; the
    /// result was discarded and no state was touched.
    #[error("selection superseded by a newer one")]
    Superseded,
}
