use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, PresenceEntry, Sticker};

/// Tables the change feed reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Messages,
    Stickers,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Delete,
}

/// A row-level change notification. Carries only the affected row's id;
/// consumers that need denormalized fields re-fetch the row themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEvent {
    pub table: Table,
    pub kind: EventKind,
    pub row_id: String,
}

impl FeedEvent {
    pub fn insert(table: Table, row_id: impl Into<String>) -> Self {
        Self {
            table,
            kind: EventKind::Insert,
            row_id: row_id.into(),
        }
    }

    pub fn delete(table: Table, row_id: impl Into<String>) -> Self {
        Self {
            table,
            kind: EventKind::Delete,
            row_id: row_id.into(),
        }
    }
}

/// Events sent to a connected client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// Server confirms the session is established
    Ready { user_id: Uuid, display_name: String },

    /// Baseline message log, most recent window in ascending order
    MessageHistory { messages: Vec<Message> },

    /// A new message was reconciled into the log
    MessageAppend { message: Message },

    /// A sticker was added to the shared library
    StickerAdd { sticker: Sticker },

    /// A sticker was removed from the shared library
    StickerRemove { id: Uuid },

    /// Presence listing at connect time
    PresenceSnapshot { users: Vec<PresenceEntry> },

    /// A transient, auto-dismissing alert
    Notification {
        title: String,
        body: String,
        ttl_ms: u64,
    },

    /// Live-update availability. `live: false` means the feed exhausted its
    /// reconnect budget and the client should fall back to manual refresh.
    FeedStatus { live: bool },
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionCommand {
    /// Toggle alert delivery for this session. The client flips this after
    /// obtaining (or losing) notification permission on its side.
    SetNotifications { enabled: bool },
}
