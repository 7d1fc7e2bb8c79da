use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE profiles (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                avatar      TEXT,
                department  TEXT NOT NULL,
                ship_id     TEXT,
                lat         REAL NOT NULL DEFAULT 0,
                lng         REAL NOT NULL DEFAULT 0,
                updated_at  INTEGER
            );

            CREATE TABLE channels (
                id              TEXT PRIMARY KEY,
                participants    TEXT NOT NULL,
                last_message    TEXT,
                updated_at      INTEGER NOT NULL
            );

            -- No FK to channels: like the document store it models, a message
            -- sub-collection does not require its parent document.
            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                channel_id      TEXT NOT NULL,
                text            TEXT NOT NULL,
                sender_id       TEXT NOT NULL,
                sender_name     TEXT NOT NULL,
                timestamp       INTEGER NOT NULL,
                kind            TEXT NOT NULL DEFAULT 'text'
            );

            CREATE INDEX idx_messages_channel
                ON messages(channel_id, timestamp);

            -- Single-row table holding the retention sweeper's resume point
            CREATE TABLE sweep_state (
                id      INTEGER PRIMARY KEY CHECK (id = 1),
                cursor  TEXT
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
