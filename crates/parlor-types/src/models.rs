use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Sticker,
    Gif,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Sticker => "sticker",
            MessageKind::Gif => "gif",
        }
    }

    /// Text messages carry `content`; sticker and gif messages carry `media_url`.
    pub fn is_media(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "sticker" => Ok(MessageKind::Sticker),
            "gif" => Ok(MessageKind::Gif),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// A message in the shared room. Immutable once created.
///
/// Ids are server-assigned and monotonic; the room-wide ordering is
/// `(created_at, id)` ascending with the id breaking timestamp ties.
/// Exactly one of `content` / `media_url` is set, determined by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub author_id: Uuid,
    pub author_display_name: String,
    pub author_avatar_url: Option<String>,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Sort key for the room-wide message ordering.
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.id)
    }
}

/// A sticker in the shared library.
///
/// `storage_key` is the blob store key the public `url` resolves to; the
/// delete path removes both the row and the blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sticker {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub storage_key: String,
    pub file_type: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A user's presence as seen at one instant. `online` is derived from
/// `last_seen` against wall-clock time at listing time, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
}

/// The authenticated caller, passed explicitly into every operation that
/// needs identity or the admin check. Derived from the verified bearer
/// token at the HTTP layer; nothing below the handlers looks up ambient
/// auth state.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: Role,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}
