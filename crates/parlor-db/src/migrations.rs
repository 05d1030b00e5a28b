use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            display_name    TEXT NOT NULL,
            avatar_url      TEXT,
            role            TEXT NOT NULL DEFAULT 'user'
                            CHECK (role IN ('user', 'admin')),
            last_seen       INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_users_last_seen
            ON users(last_seen DESC);

        -- Messages are append-only; ids are the rowid and therefore
        -- monotonic, which the log ordering relies on as a tie-break.
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id   TEXT NOT NULL,
            kind        TEXT NOT NULL
                        CHECK (kind IN ('text', 'sticker', 'gif')),
            content     TEXT,
            media_url   TEXT,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_order
            ON messages(created_at, id);

        CREATE TABLE IF NOT EXISTS stickers (
            id           TEXT PRIMARY KEY,
            name         TEXT NOT NULL,
            url          TEXT NOT NULL,
            storage_key  TEXT NOT NULL,
            file_type    TEXT NOT NULL,
            uploaded_by  TEXT NOT NULL,
            created_at   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_stickers_created
            ON stickers(created_at DESC);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
