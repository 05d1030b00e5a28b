//! Database row types — these map directly to SQLite rows.
//! Distinct from the parlor-types API models to keep the DB layer
//! independent; conversions live here so callers get typed models back.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::str::FromStr;

use parlor_types::models::{Message, MessageKind, PresenceEntry, Role, Sticker};

pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub last_seen: i64,
}

pub struct MessageRow {
    pub id: i64,
    pub author_id: String,
    pub author_display_name: String,
    pub author_avatar_url: Option<String>,
    pub kind: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub created_at: i64,
}

pub struct StickerRow {
    pub id: String,
    pub name: String,
    pub url: String,
    pub storage_key: String,
    pub file_type: String,
    pub uploaded_by: String,
    pub created_at: i64,
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {ms}"))
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let kind = MessageKind::from_str(&self.kind).map_err(|e| anyhow!(e))?;
        // Normalize the exactly-one invariant on the way out: text carries
        // content, media kinds carry media_url.
        let (content, media_url) = if kind.is_media() {
            (None, self.media_url)
        } else {
            (self.content, None)
        };
        Ok(Message {
            id: self.id,
            author_id: self.author_id.parse()?,
            author_display_name: self.author_display_name,
            author_avatar_url: self.author_avatar_url,
            kind,
            content,
            media_url,
            created_at: millis_to_utc(self.created_at)?,
        })
    }
}

impl StickerRow {
    pub fn into_sticker(self) -> Result<Sticker> {
        Ok(Sticker {
            id: self.id.parse()?,
            name: self.name,
            url: self.url,
            storage_key: self.storage_key,
            file_type: self.file_type,
            uploaded_by: self.uploaded_by.parse()?,
            created_at: millis_to_utc(self.created_at)?,
        })
    }
}

impl UserRow {
    /// `online` is classified by the caller against its own wall-clock read;
    /// the row only knows the stored timestamp.
    pub fn into_presence(self, online: bool) -> Result<PresenceEntry> {
        Ok(PresenceEntry {
            user_id: self.id.parse()?,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            role: Role::from_str(&self.role).map_err(|e| anyhow!(e))?,
            last_seen: millis_to_utc(self.last_seen)?,
            online,
        })
    }
}
