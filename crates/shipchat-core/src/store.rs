use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::warn;

use shipchat_db::Database;
use shipchat_db::models::{ChannelRow, MessageRow, ProfileRow};
use shipchat_types::models::{Channel, Department, MessageKind, Profile, StoredMessage};

/// Notification that a collection changed. Listeners re-query; the payload
/// only says where to look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Profiles,
    Messages(String),
}

/// The durable document store the core runs against.
///
/// Message queries return newest first; callers reverse for display.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    // -- Profiles --
    async fn upsert_profile(&self, profile: &Profile) -> Result<()>;
    /// Heartbeat write; `false` when the profile does not exist
    async fn touch_profile(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;
    async fn delete_profile(&self, id: &str) -> Result<bool>;
    async fn get_profile(&self, id: &str) -> Result<Option<Profile>>;
    async fn list_profiles(&self) -> Result<Vec<Profile>>;

    // -- Channels --
    async fn upsert_channel(&self, channel: &Channel) -> Result<()>;
    async fn list_channel_ids(&self, after: Option<&str>, limit: u32) -> Result<Vec<String>>;

    // -- Messages --
    async fn insert_message(&self, message: &StoredMessage) -> Result<()>;
    async fn latest_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<StoredMessage>>;
    async fn messages_before(
        &self,
        channel_id: &str,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredMessage>>;
    async fn stale_message_ids(
        &self,
        channel_id: &str,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<String>>;
    /// Atomic batch delete
    async fn delete_messages(&self, channel_id: &str, ids: &[String]) -> Result<usize>;

    // -- Retention checkpoint --
    async fn sweep_cursor(&self) -> Result<Option<String>>;
    async fn set_sweep_cursor(&self, cursor: Option<&str>) -> Result<()>;

    /// Subscribe to change notifications.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

/// [`DocumentStore`] over the SQLite database. Blocking calls run on the
/// blocking pool; every write publishes a [`StoreChange`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    changes_tx: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        let (changes_tx, _) = broadcast::channel(256);
        Self { db, changes_tx }
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::open_in_memory()?)))
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db.as_ref())).await?
    }

    fn publish(&self, change: StoreChange) {
        let _ = self.changes_tx.send(change);
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let row = profile_to_row(profile);
        self.blocking(move |db| db.upsert_profile(&row)).await?;
        self.publish(StoreChange::Profiles);
        Ok(())
    }

    async fn touch_profile(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        let id = id.to_string();
        let ms = at.timestamp_millis();
        let touched = self.blocking(move |db| db.touch_profile(&id, ms)).await?;
        if touched {
            self.publish(StoreChange::Profiles);
        }
        Ok(touched)
    }

    async fn delete_profile(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let deleted = self.blocking(move |db| db.delete_profile(&id)).await?;
        if deleted {
            self.publish(StoreChange::Profiles);
        }
        Ok(deleted)
    }

    async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_profile(&id)).await?;
        Ok(row.map(profile_from_row))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        let rows = self.blocking(|db| db.list_profiles()).await?;
        Ok(rows.into_iter().map(profile_from_row).collect())
    }

    async fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        let row = ChannelRow {
            id: channel.id.clone(),
            participants: serde_json::to_string(&channel.participants)?,
            last_message: channel
                .last_message
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            updated_at: channel.updated_at.timestamp_millis(),
        };
        self.blocking(move |db| db.upsert_channel(&row)).await
    }

    async fn list_channel_ids(&self, after: Option<&str>, limit: u32) -> Result<Vec<String>> {
        let after = after.map(str::to_string);
        self.blocking(move |db| db.list_channel_ids(after.as_deref(), limit)).await
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        let row = message_to_row(message);
        let channel_id = message.channel_id.clone();
        self.blocking(move |db| db.insert_message(&row)).await?;
        self.publish(StoreChange::Messages(channel_id));
        Ok(())
    }

    async fn latest_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        let cid = channel_id.to_string();
        let rows = self.blocking(move |db| db.latest_messages(&cid, limit)).await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    async fn messages_before(
        &self,
        channel_id: &str,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let cid = channel_id.to_string();
        let before_ms = before.timestamp_millis();
        let rows = self
            .blocking(move |db| db.messages_before(&cid, before_ms, limit))
            .await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    async fn stale_message_ids(
        &self,
        channel_id: &str,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<String>> {
        let cid = channel_id.to_string();
        let cutoff_ms = cutoff.timestamp_millis();
        self.blocking(move |db| db.stale_message_ids(&cid, cutoff_ms, limit))
            .await
    }

    async fn delete_messages(&self, channel_id: &str, ids: &[String]) -> Result<usize> {
        let cid = channel_id.to_string();
        let ids = ids.to_vec();
        let deleted = self.blocking(move |db| db.delete_messages(&cid, &ids)).await?;
        if deleted > 0 {
            self.publish(StoreChange::Messages(channel_id.to_string()));
        }
        Ok(deleted)
    }

    async fn sweep_cursor(&self) -> Result<Option<String>> {
        self.blocking(|db| db.sweep_cursor()).await
    }

    async fn set_sweep_cursor(&self, cursor: Option<&str>) -> Result<()> {
        let cursor = cursor.map(str::to_string);
        self.blocking(move |db| db.set_sweep_cursor(cursor.as_deref()))
            .await
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes_tx.subscribe()
    }
}

// -- Row conversions --

fn profile_to_row(p: &Profile) -> ProfileRow {
    ProfileRow {
        id: p.id.clone(),
        name: p.name.clone(),
        avatar: p.avatar.clone(),
        department: p.department.as_str().to_string(),
        ship_id: p.ship_id.clone(),
        lat: p.lat,
        lng: p.lng,
        updated_at: p.updated_at.map(|t| t.timestamp_millis()),
    }
}

fn profile_from_row(row: ProfileRow) -> Profile {
    let department = Department::parse(&row.department).unwrap_or_else(|| {
        warn!("Unknown department '{}' on profile '{}'", row.department, row.id);
        Department::default()
    });
    Profile {
        department,
        updated_at: row.updated_at.and_then(DateTime::from_timestamp_millis),
        id: row.id,
        name: row.name,
        avatar: row.avatar,
        ship_id: row.ship_id,
        lat: row.lat,
        lng: row.lng,
    }
}

fn message_to_row(m: &StoredMessage) -> MessageRow {
    MessageRow {
        id: m.id.clone(),
        channel_id: m.channel_id.clone(),
        text: m.text.clone(),
        sender_id: m.sender_id.clone(),
        sender_name: m.sender_name.clone(),
        timestamp: m.timestamp.timestamp_millis(),
        kind: m.kind.as_str().to_string(),
    }
}

fn message_from_row(row: MessageRow) -> StoredMessage {
    let timestamp = DateTime::from_timestamp_millis(row.timestamp).unwrap_or_else(|| {
        warn!("Corrupt timestamp {} on message '{}'", row.timestamp, row.id);
        DateTime::default()
    });
    let kind = MessageKind::parse(&row.kind).unwrap_or_else(|| {
        warn!("Unknown kind '{}' on message '{}'", row.kind, row.id);
        MessageKind::Text
    });
    let sender_name = if row.sender_name.is_empty() {
        "Unknown".to_string()
    } else {
        row.sender_name
    };
    StoredMessage {
        id: row.id,
        channel_id: row.channel_id,
        text: row.text,
        sender_id: row.sender_id,
        sender_name,
        timestamp,
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_profile_roundtrip_and_change_feed() {
        let store = SqliteStore::in_memory().unwrap();
        let mut changes = store.changes();

        let profile = Profile {
            id: "user_1".into(),
            name: "Marta".into(),
            department: Department::Engine,
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_000),
            ..Default::default()
        };
        store.upsert_profile(&profile).await.unwrap();
        assert_eq!(changes.recv().await.unwrap(), StoreChange::Profiles);

        let loaded = store.get_profile("user_1").await.unwrap().unwrap();
        assert_eq!(loaded, profile);
    }

    #[tokio::test]
    async fn test_touch_unknown_profile_is_silent() {
        let store = SqliteStore::in_memory().unwrap();
        let mut changes = store.changes();
        assert!(!store.touch_profile("ghost", Utc::now()).await.unwrap());
        assert!(changes.try_recv().is_err());
    }
}
