use crate::Database;
use crate::models::{ChannelRow, MessageRow, ProfileRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "id, channel_id, text, sender_id, sender_name, timestamp, kind";
const PROFILE_COLUMNS: &str = "id, name, avatar, department, ship_id, lat, lng, updated_at";

impl Database {
    // -- Profiles --

    /// Insert or merge a profile. Existing rows keep their id and have every
    /// other column overwritten.
    pub fn upsert_profile(&self, row: &ProfileRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, name, avatar, department, ship_id, lat, lng, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    avatar = excluded.avatar,
                    department = excluded.department,
                    ship_id = excluded.ship_id,
                    lat = excluded.lat,
                    lng = excluded.lng,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    row.id,
                    row.name,
                    row.avatar,
                    row.department,
                    row.ship_id,
                    row.lat,
                    row.lng,
                    row.updated_at
                ],
            )?;
            Ok(())
        })
    }

    /// Heartbeat write. Returns false when the profile no longer exists.
    pub fn touch_profile(&self, id: &str, now_ms: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE profiles SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id, now_ms],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_profile(&self, id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM profiles WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
            conn.query_row(&sql, [id], profile_from_row).optional()
        })
    }

    pub fn list_profiles(&self) -> Result<Vec<ProfileRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY name, id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Channels --

    /// Merge channel metadata: participants, last message and updated_at are
    /// replaced, the row itself is never removed.
    pub fn upsert_channel(&self, row: &ChannelRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO channels (id, participants, last_message, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    participants = excluded.participants,
                    last_message = COALESCE(excluded.last_message, channels.last_message),
                    updated_at = excluded.updated_at",
                rusqlite::params![row.id, row.participants, row.last_message, row.updated_at],
            )?;
            Ok(())
        })
    }

    #[cfg(test)]
    pub fn get_channel(&self, id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, participants, last_message, updated_at FROM channels WHERE id = ?1",
                [id],
                |row| {
                    Ok(ChannelRow {
                        id: row.get(0)?,
                        participants: row.get(1)?,
                        last_message: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Channel ids in ascending order, strictly after `cursor` when given.
    pub fn list_channel_ids(&self, after: Option<&str>, limit: u32) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM channels
                 WHERE ?1 IS NULL OR id > ?1
                 ORDER BY id
                 LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![after, limit], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, channel_id, text, sender_id, sender_name, timestamp, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.channel_id,
                    row.text,
                    row.sender_id,
                    row.sender_name,
                    row.timestamp,
                    row.kind
                ],
            )?;
            Ok(())
        })
    }

    /// Newest messages of a channel, newest first.
    pub fn latest_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id, None, limit))
    }

    /// Messages strictly older than `before_ms`, newest first.
    pub fn messages_before(
        &self,
        channel_id: &str,
        before_ms: i64,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id, Some(before_ms), limit))
    }

    /// Ids of messages with `timestamp < cutoff_ms`, oldest first.
    pub fn stale_message_ids(
        &self,
        channel_id: &str,
        cutoff_ms: i64,
        limit: u32,
    ) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages
                 WHERE channel_id = ?1 AND timestamp < ?2
                 ORDER BY timestamp
                 LIMIT ?3",
            )?;
            let ids = stmt
                .query_map(rusqlite::params![channel_id, cutoff_ms, limit], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Delete a batch of messages in one transaction. Either every id is
    /// removed or none are.
    pub fn delete_messages(&self, channel_id: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM messages WHERE channel_id = ?1 AND id = ?2")?;
                for id in ids {
                    deleted += stmt.execute(rusqlite::params![channel_id, id])?;
                }
            }
            tx.commit()?;
            Ok(deleted)
        })
    }

    // -- Retention checkpoint --

    pub fn sweep_cursor(&self) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let cursor = conn
                .query_row("SELECT cursor FROM sweep_state WHERE id = 1", [], |row| {
                    row.get::<_, Option<String>>(0)
                })
                .optional()?;
            Ok(cursor.flatten())
        })
    }

    pub fn set_sweep_cursor(&self, cursor: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO sweep_state (id, cursor) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET cursor = excluded.cursor",
                [cursor],
            )?;
            Ok(())
        })
    }
}

fn query_messages(
    conn: &Connection,
    channel_id: &str,
    before_ms: Option<i64>,
    limit: u32,
) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE channel_id = ?1 AND (?2 IS NULL OR timestamp < ?2)
         ORDER BY timestamp DESC, id DESC
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(rusqlite::params![channel_id, before_ms, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                channel_id: row.get(1)?,
                text: row.get(2)?,
                sender_id: row.get(3)?,
                sender_name: row.get(4)?,
                timestamp: row.get(5)?,
                kind: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        name: row.get(1)?,
        avatar: row.get(2)?,
        department: row.get(3)?,
        ship_id: row.get(4)?,
        lat: row.get(5)?,
        lng: row.get(6)?,
        updated_at: row.get(7)?,
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
