//! Chat session synchronization subsystem.
//!
//! This library binds a signed-in user to a destination (a direct peer or a
//! topic), reconciles the handshake history with the live push stream of a
//! persistent channel, and manages the channel lifecycle without losing or
//! duplicating messages.
//!
//! The moving parts, leaves first:
//!
//! - [`directory`] — the externally supplied list of destinations
//! - [`handshake`] — the REST calls that establish and feed a binding
//! - [`channel`] — one persistent WebSocket per active binding
//! - [`store`] — the ordered, deduplicated message sequence
//! - [`controller`] — the state machine orchestrating all of the above

pub mod channel;
pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod handshake;
pub mod store;

pub use channel::{ChannelSession, ChannelState};
pub use config::SyncConfig;
pub use controller::{ConversationSnapshot, Phase, SessionController, SessionNotice};
pub use directory::{Destination, Directory};
pub use error::SyncError;
pub use handshake::{ChatApi, ChatBinding, HandshakeClient, HandshakeOutcome, UserIdentity};
pub use store::MessageStore;
