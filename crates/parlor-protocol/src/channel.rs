//! Channel protocol events.
//!
//! The persistent channel speaks JSON text frames, tagged by `type`.
//! Commands flow client -> broker (`join`, `leave`); events flow
//! broker -> client (`new_message`, including the sender's own echo).

use serde::{Deserialize, Serialize};

use crate::messages::Message;

/// Control events sent by the client over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelCommand {
    /// Enter a room. Sent immediately once the transport connects.
    Join { room: String, username: String },

    /// Leave a room. Sent on close, best-effort.
    Leave { room: String },
}

/// Push events delivered by the broker to all room participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A message accepted by the broker, fanned out to the room.
    NewMessage(Message),
}
