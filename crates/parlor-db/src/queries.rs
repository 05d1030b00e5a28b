use crate::Database;
use crate::models::{MessageRow, StickerRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users / presence --

    pub fn create_user(
        &self,
        id: &str,
        display_name: &str,
        avatar_url: Option<&str>,
        role: &str,
        last_seen: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, avatar_url, role, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, display_name, avatar_url, role, last_seen],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    /// All users, most recently seen first.
    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, display_name, avatar_url, role, last_seen
                 FROM users
                 ORDER BY last_seen DESC",
            )?;
            let rows = stmt
                .query_map([], map_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Unconditionally overwrite a user's last_seen timestamp.
    pub fn touch_last_seen(&self, id: &str, now: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_seen = ?2 WHERE id = ?1",
                rusqlite::params![id, now],
            )?;
            Ok(())
        })
    }

    /// Returns false if no such user existed.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    // -- Messages --

    /// Insert a message and return its server-assigned id.
    pub fn insert_message(
        &self,
        author_id: &str,
        kind: &str,
        content: Option<&str>,
        media_url: Option<&str>,
        created_at: i64,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (author_id, kind, content, media_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![author_id, kind, content, media_url, created_at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// The most recent `limit` messages, returned in ascending
    /// (created_at, id) order with author display fields joined in.
    pub fn get_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, author_id, author_display_name, author_avatar_url,
                        kind, content, media_url, created_at
                 FROM (
                     SELECT m.id, m.author_id,
                            u.display_name AS author_display_name,
                            u.avatar_url AS author_avatar_url,
                            m.kind, m.content, m.media_url, m.created_at
                     FROM messages m
                     LEFT JOIN users u ON m.author_id = u.id
                     ORDER BY m.created_at DESC, m.id DESC
                     LIMIT ?1
                 )
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Fetch a single message by id with author display fields joined in.
    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.author_id,
                        u.display_name AS author_display_name,
                        u.avatar_url AS author_avatar_url,
                        m.kind, m.content, m.media_url, m.created_at
                 FROM messages m
                 LEFT JOIN users u ON m.author_id = u.id
                 WHERE m.id = ?1",
            )?;
            stmt.query_row([id], map_message_row).optional()
        })
    }

    // -- Stickers --

    pub fn insert_sticker(&self, sticker: &StickerRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stickers (id, name, url, storage_key, file_type, uploaded_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    sticker.id,
                    sticker.name,
                    sticker.url,
                    sticker.storage_key,
                    sticker.file_type,
                    sticker.uploaded_by,
                    sticker.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// All stickers, newest first.
    pub fn list_stickers(&self) -> Result<Vec<StickerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, url, storage_key, file_type, uploaded_by, created_at
                 FROM stickers
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([], map_sticker_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_sticker(&self, id: &str) -> Result<Option<StickerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, url, storage_key, file_type, uploaded_by, created_at
                 FROM stickers
                 WHERE id = ?1",
            )?;
            stmt.query_row([id], map_sticker_row).optional()
        })
    }

    /// Returns false if no such sticker existed.
    pub fn delete_sticker(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM stickers WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, display_name, avatar_url, role, last_seen FROM users WHERE id = ?1",
    )?;
    stmt.query_row([id], map_user_row).optional()
}

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        avatar_url: row.get(2)?,
        role: row.get(3)?,
        last_seen: row.get(4)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        author_display_name: row
            .get::<_, Option<String>>(2)?
            .unwrap_or_else(|| "unknown".to_string()),
        author_avatar_url: row.get(3)?,
        kind: row.get(4)?,
        content: row.get(5)?,
        media_url: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_sticker_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StickerRow> {
    Ok(StickerRow {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        storage_key: row.get(3)?,
        file_type: row.get(4)?,
        uploaded_by: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;
    use crate::models::StickerRow;

    fn db_with_user(id: &str, name: &str) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user(id, name, None, "user", 0).unwrap();
        db
    }

    const ALICE: &str = "6a9f0d8e-0000-0000-0000-000000000001";
    const BOB: &str = "6a9f0d8e-0000-0000-0000-000000000002";

    #[test]
    fn messages_come_back_ascending_within_the_recent_window() {
        let db = db_with_user(ALICE, "alice");

        for i in 0..5 {
            db.insert_message(ALICE, "text", Some(&format!("m{i}")), None, 1000 + i)
                .unwrap();
        }

        let rows = db.get_messages(3).unwrap();
        let contents: Vec<_> = rows.iter().map(|r| r.content.clone().unwrap()).collect();
        // window holds the 3 most recent, in ascending order
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let db = db_with_user(ALICE, "alice");

        let first = db.insert_message(ALICE, "text", Some("a"), None, 500).unwrap();
        let second = db.insert_message(ALICE, "text", Some("b"), None, 500).unwrap();
        assert!(second > first, "rowids are monotonic");

        let rows = db.get_messages(10).unwrap();
        assert_eq!(rows[0].id, first);
        assert_eq!(rows[1].id, second);
    }

    #[test]
    fn message_join_carries_author_display_fields() {
        let db = db_with_user(ALICE, "alice");

        let id = db.insert_message(ALICE, "text", Some("hi"), None, 42).unwrap();
        let row = db.get_message(id).unwrap().unwrap();
        assert_eq!(row.author_display_name, "alice");
        assert_eq!(row.kind, "text");
    }

    #[test]
    fn deleted_author_falls_back_to_unknown() {
        let db = db_with_user(ALICE, "alice");

        let id = db.insert_message(ALICE, "text", Some("hi"), None, 42).unwrap();
        db.delete_user(ALICE).unwrap();

        let row = db.get_message(id).unwrap().unwrap();
        assert_eq!(row.author_display_name, "unknown");
    }

    #[test]
    fn heartbeat_overwrites_last_seen() {
        let db = db_with_user(ALICE, "alice");

        db.touch_last_seen(ALICE, 123_456).unwrap();
        assert_eq!(db.get_user(ALICE).unwrap().unwrap().last_seen, 123_456);

        db.touch_last_seen(ALICE, 99).unwrap();
        assert_eq!(db.get_user(ALICE).unwrap().unwrap().last_seen, 99);
    }

    #[test]
    fn users_list_orders_by_last_seen_desc() {
        let db = db_with_user(ALICE, "alice");
        db.create_user(BOB, "bob", None, "admin", 0).unwrap();

        db.touch_last_seen(ALICE, 100).unwrap();
        db.touch_last_seen(BOB, 200).unwrap();

        let users = db.list_users().unwrap();
        assert_eq!(users[0].display_name, "bob");
        assert_eq!(users[1].display_name, "alice");
    }

    #[test]
    fn sticker_roundtrip_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let row = StickerRow {
            id: "11111111-2222-3333-4444-555555555555".into(),
            name: "party.gif".into(),
            url: "http://localhost/assets/k".into(),
            storage_key: "k".into(),
            file_type: "gif".into(),
            uploaded_by: ALICE.into(),
            created_at: 7,
        };
        db.insert_sticker(&row).unwrap();

        let listed = db.list_stickers().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "party.gif");

        assert!(db.delete_sticker(&row.id).unwrap());
        assert!(!db.delete_sticker(&row.id).unwrap());
        assert!(db.get_sticker(&row.id).unwrap().is_none());
    }

    #[test]
    fn stickers_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        for (i, name) in ["old", "mid", "new"].iter().enumerate() {
            db.insert_sticker(&StickerRow {
                id: format!("00000000-0000-0000-0000-00000000000{i}"),
                name: name.to_string(),
                url: String::new(),
                storage_key: String::new(),
                file_type: "png".into(),
                uploaded_by: ALICE.into(),
                created_at: i as i64,
            })
            .unwrap();
        }

        let names: Vec<_> = db
            .list_stickers()
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["new", "mid", "old"]);
    }
}
