//! Directory snapshot rows.
//!
//! The directory is supplied by an external collaborator at session start.
//! A row carries the peer's queue identifier in `url` for direct
//! conversations and `null` for topics; the client converts that into an
//! explicit kind tag at load time and never inspects `url` again.

use serde::{Deserialize, Serialize};

/// One row of the externally supplied directory snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Destination name, unique within the snapshot.
    pub name: String,

    /// Preview of the last message exchanged.
    #[serde(default)]
    pub last_message_preview: String,

    /// Peer queue identifier for direct conversations, `null` for topics.
    pub url: Option<String>,
}
