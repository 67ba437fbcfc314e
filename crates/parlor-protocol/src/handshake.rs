//! Handshake and send request/response shapes.
//!
//! The handshake (`POST /connect`) resolves a destination into an active
//! chat binding and returns the conversation history. Sends go over REST as
//! well (`POST /send_message`); delivery is confirmed only by the channel
//! echo, never by the send response.

use serde::{Deserialize, Serialize};

use crate::messages::{DestinationKind, Message};

/// `POST /connect` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Destination name from the directory snapshot.
    pub name: String,

    /// Destination kind.
    #[serde(rename = "type")]
    pub kind: DestinationKind,

    /// Resolved user id.
    pub id_user: String,

    /// Resolved username.
    pub username: String,
}

/// `POST /connect` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// Broker-reported status string (e.g. "success").
    pub status: String,

    /// Conversation history, sorted ascending by timestamp.
    #[serde(default)]
    pub messages: Vec<Message>,

    /// The session block carrying the channel to join.
    pub session: ConnectSession,
}

/// Session block of a handshake response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectSession {
    /// Channel id valid for an immediate join.
    pub chat: String,
}

/// `POST /send_message` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Destination name.
    pub name: String,

    /// Message text.
    pub message: String,

    /// Sender's user id.
    pub id_user: String,

    /// Sender's username.
    pub username: String,

    /// Destination kind.
    #[serde(rename = "type")]
    pub kind: DestinationKind,

    /// Channel id of the active binding.
    pub chat: String,
}
