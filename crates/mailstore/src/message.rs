//! Stored message rows as seen by readers

use chrono::{DateTime, Utc};

use crate::address::Address;
use crate::extract::Preview;
use crate::flags::{Flag, FlagSet};
use crate::ids::{FolderId, MessageRowId, PartId, ThreadNodeId};
use crate::mime::Part;

/// Where a message sits in its thread forest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadPlacement {
    pub node: ThreadNodeId,
    pub root: Option<ThreadNodeId>,
    pub parent: Option<ThreadNodeId>,
}

/// A message row with real content
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub row_id: MessageRowId,
    pub folder_id: FolderId,
    pub uid: String,
    pub subject: Option<String>,
    /// Sent date (falls back to save time when the header was absent)
    pub date: DateTime<Utc>,
    pub internal_date: DateTime<Utc>,
    pub flags: FlagSet,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
    pub reply_to: Vec<Address>,
    pub attachment_count: u32,
    /// Message-ID header value
    pub message_id: Option<String>,
    /// Root node of this message's part tree
    pub root_part_id: Option<PartId>,
    pub mime_type: Option<String>,
    pub encryption_type: Option<String>,
    pub preview: Preview,
    pub thread: Option<ThreadPlacement>,
    /// Hydrated part tree; `None` until a body fetch loads it.
    pub part: Option<Part>,
}

impl StoredMessage {
    pub fn is_set(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

/// One row of the messages table
///
/// Placeholder rows (`empty = 1`) anchor thread structure for messages
/// referenced but never seen; they have no part tree and no content
/// columns worth reading.
#[derive(Debug, Clone)]
pub enum MessageEntry {
    Real(StoredMessage),
    Placeholder {
        row_id: MessageRowId,
        folder_id: FolderId,
        /// Message-ID header the placeholder stands in for
        message_id: Option<String>,
        thread: Option<ThreadPlacement>,
    },
}

impl MessageEntry {
    pub fn row_id(&self) -> MessageRowId {
        match self {
            MessageEntry::Real(message) => message.row_id,
            MessageEntry::Placeholder { row_id, .. } => *row_id,
        }
    }

    pub fn thread(&self) -> Option<ThreadPlacement> {
        match self {
            MessageEntry::Real(message) => message.thread,
            MessageEntry::Placeholder { thread, .. } => *thread,
        }
    }

    pub fn as_real(&self) -> Option<&StoredMessage> {
        match self {
            MessageEntry::Real(message) => Some(message),
            MessageEntry::Placeholder { .. } => None,
        }
    }

    pub fn into_real(self) -> Option<StoredMessage> {
        match self {
            MessageEntry::Real(message) => Some(message),
            MessageEntry::Placeholder { .. } => None,
        }
    }
}
