//! Conversation directory.
//!
//! The directory is an immutable snapshot handed to the session at start.
//! Kind discrimination happens exactly once, here: a row with a `null` url
//! is a topic, anything else is a direct peer keyed by its queue id.
//! Business logic downstream only ever sees the explicit kind tag.

use parlor_protocol::{DestinationKind, DirectoryEntry};

/// A chat target, either a direct peer or a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Unique name within the snapshot.
    pub name: String,

    /// Preview of the last message exchanged.
    pub preview: String,

    /// Direct or topic, decided at load time.
    pub kind: DestinationKind,
}

/// Immutable snapshot of known destinations for the current user.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    destinations: Vec<Destination>,
}

impl Directory {
    /// Build a directory from externally supplied snapshot rows, preserving
    /// their order.
    pub fn from_snapshot(entries: Vec<DirectoryEntry>) -> Self {
        let destinations = entries
            .into_iter()
            .map(|entry| Destination {
                name: entry.name,
                preview: entry.last_message_preview,
                kind: match entry.url {
                    Some(_) => DestinationKind::Direct,
                    None => DestinationKind::Topic,
                },
            })
            .collect();

        Self { destinations }
    }

    /// All known destinations, in snapshot order.
    pub fn list(&self) -> &[Destination] {
        &self.destinations
    }

    /// Look up a destination by name.
    pub fn find(&self, name: &str) -> Option<&Destination> {
        self.destinations.iter().find(|d| d.name == name)
    }
}
