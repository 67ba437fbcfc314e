//! Canonical message types.
//!
//! A message is the persistent unit of a conversation. Its `id` is assigned
//! by the broker at delivery time and is monotonic per origin; clients never
//! mint ids of their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single chat message as it appears on the wire and in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Broker-assigned id, monotonic per origin.
    pub id: i64,

    /// Message text.
    #[serde(rename = "message")]
    pub body: String,

    /// When the broker accepted the message.
    #[serde(rename = "timestamp")]
    pub sent_at: DateTime<Utc>,

    /// Who sent it.
    #[serde(rename = "username")]
    pub sender_username: String,
}

/// What kind of destination a conversation targets.
///
/// The kind is decided once, when the directory snapshot is loaded, and
/// travels on the wire in the handshake and send requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DestinationKind {
    /// A direct peer conversation.
    Direct,
    /// A topic (group) conversation.
    Topic,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "DIRECT"),
            Self::Topic => write!(f, "TOPIC"),
        }
    }
}
