#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Notify, broadcast};

use shipchat_core::store::{DocumentStore, SqliteStore, StoreChange};
use shipchat_types::models::{Channel, Department, MessageKind, Profile, StoredMessage};

/// SQLite-backed store whose writes can be made to fail on demand, and
/// whose next older-page read can be held open.
pub struct FlakyStore {
    inner: SqliteStore,
    fail_writes: AtomicBool,
    touches: AtomicUsize,
    page_hold: Mutex<Option<PageHold>>,
}

/// Pauses one `messages_before` call: `entered` fires once the read has
/// started, and the read returns after `release` is notified.
#[derive(Clone, Default)]
pub struct PageHold {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            fail_writes: AtomicBool::new(false),
            touches: AtomicUsize::new(0),
            page_hold: Mutex::new(None),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Successful `touch_profile` calls so far.
    pub fn touches(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }

    /// Hold the next older-page read until the returned handle is released.
    pub fn hold_next_page(&self) -> PageHold {
        let hold = PageHold::default();
        *self.page_hold.lock().unwrap() = Some(hold.clone());
        hold
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated backend outage");
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.check()?;
        self.inner.upsert_profile(profile).await
    }

    async fn touch_profile(&self, id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.check()?;
        let found = self.inner.touch_profile(id, at).await?;
        if found {
            self.touches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(found)
    }

    async fn delete_profile(&self, id: &str) -> Result<bool> {
        self.check()?;
        self.inner.delete_profile(id).await
    }

    async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        self.inner.get_profile(id).await
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.inner.list_profiles().await
    }

    async fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        self.check()?;
        self.inner.upsert_channel(channel).await
    }

    async fn list_channel_ids(&self, after: Option<&str>, limit: u32) -> Result<Vec<String>> {
        self.inner.list_channel_ids(after, limit).await
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.check()?;
        self.inner.insert_message(message).await
    }

    async fn latest_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        self.inner.latest_messages(channel_id, limit).await
    }

    async fn messages_before(
        &self,
        channel_id: &str,
        before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let hold = self.page_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            let rows = self.inner.messages_before(channel_id, before, limit).await;
            hold.entered.notify_one();
            hold.release.notified().await;
            return rows;
        }
        self.inner.messages_before(channel_id, before, limit).await
    }

    async fn stale_message_ids(
        &self,
        channel_id: &str,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<String>> {
        self.inner.stale_message_ids(channel_id, cutoff, limit).await
    }

    async fn delete_messages(&self, channel_id: &str, ids: &[String]) -> Result<usize> {
        self.check()?;
        self.inner.delete_messages(channel_id, ids).await
    }

    async fn sweep_cursor(&self) -> Result<Option<String>> {
        self.inner.sweep_cursor().await
    }

    async fn set_sweep_cursor(&self, cursor: Option<&str>) -> Result<()> {
        self.check()?;
        self.inner.set_sweep_cursor(cursor).await
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes()
    }
}

pub fn crew(id: &str, name: &str) -> Profile {
    Profile {
        id: id.to_string(),
        name: name.to_string(),
        department: Department::Hotel,
        ship_id: Some("ship_005".to_string()),
        ..Default::default()
    }
}

/// Write a message straight to the store with a chosen timestamp.
pub async fn seed_message(
    store: &dyn DocumentStore,
    channel_id: &str,
    sender_id: &str,
    text: &str,
    at: DateTime<Utc>,
) -> StoredMessage {
    let message = StoredMessage {
        id: uuid::Uuid::new_v4().to_string(),
        channel_id: channel_id.to_string(),
        text: text.to_string(),
        sender_id: sender_id.to_string(),
        sender_name: sender_id.to_string(),
        timestamp: at,
        kind: MessageKind::Text,
    };
    let channel = Channel {
        id: channel_id.to_string(),
        participants: channel_id.split('_').map(str::to_string).collect(),
        last_message: Some(message.snapshot()),
        updated_at: at,
    };
    store.upsert_channel(&channel).await.unwrap();
    store.insert_message(&message).await.unwrap();
    message
}

/// Fixed base time rounded to whole seconds so millisecond storage is exact.
pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

pub fn secs(n: i64) -> TimeDelta {
    TimeDelta::seconds(n)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
