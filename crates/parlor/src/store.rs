//! Ordered, deduplicated message sequence for the active binding.
//!
//! The store never assigns ids; the broker is the single source of truth
//! for identity and ordering. Duplicate deliveries from the channel are
//! absorbed here as no-ops, which is the whole defense against at-least-once
//! transport semantics.

use log::debug;
use parlor_protocol::Message;

use crate::error::SyncError;

/// The message sequence of the currently active chat binding.
///
/// Invariant: messages are strictly ordered by `(sent_at, id)` and no two
/// messages share an `(origin, id)` pair, where origin is the sending user.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,

    /// Set while a channel is joined on top of this store. Guards `seed`
    /// against clobbering live messages with stale history.
    live: bool,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the store contents with handshake history.
    ///
    /// History arrives sorted ascending by timestamp; the store re-sorts
    /// defensively so the ordering invariant holds even against a sloppy
    /// broker. Fails with `InvalidSeed` when messages are already present
    /// and a channel is live on top of them.
    pub fn seed(&mut self, history: Vec<Message>) -> Result<(), SyncError> {
        if self.live && !self.messages.is_empty() {
            return Err(SyncError::InvalidSeed);
        }

        self.messages = history;
        self.messages.sort_by(|a, b| (a.sent_at, a.id).cmp(&(b.sent_at, b.id)));
        debug!("store seeded with {} messages", self.messages.len());
        Ok(())
    }

    /// Insert a message, preserving order. A message whose `(origin, id)`
    /// already exists is silently dropped.
    pub fn append(&mut self, message: Message) {
        let duplicate = self
            .messages
            .iter()
            .any(|m| m.id == message.id && m.sender_username == message.sender_username);
        if duplicate {
            debug!(
                "dropping duplicate delivery id={} from {}",
                message.id, message.sender_username
            );
            return;
        }

        let key = (message.sent_at, message.id);
        let idx = self
            .messages
            .partition_point(|m| (m.sent_at, m.id) <= key);
        self.messages.insert(idx, message);
    }

    /// Empty the store. Used when the active binding is torn down.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.live = false;
    }

    /// Mark that a channel is now joined on top of this store.
    pub fn mark_live(&mut self) {
        self.live = true;
    }

    /// Mark that no channel is feeding this store anymore.
    pub fn mark_idle(&mut self) {
        self.live = false;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
