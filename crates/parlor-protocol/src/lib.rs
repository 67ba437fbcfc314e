//! Canonical wire types for the parlor chat protocol.
//!
//! Everything that crosses a process boundary lives here: the handshake
//! request/response pair, the send-message request, the channel control and
//! push events, and the directory snapshot rows. The client and the broker
//! both deserialize from these types, so changing a field here is a protocol
//! change.

pub mod channel;
pub mod directory;
pub mod handshake;
pub mod messages;

pub use channel::{ChannelCommand, ChannelEvent};
pub use directory::DirectoryEntry;
pub use handshake::{ConnectRequest, ConnectResponse, ConnectSession, SendMessageRequest};
pub use messages::{DestinationKind, Message};
