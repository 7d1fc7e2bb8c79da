use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shipchat_types::models::{MessageKind, StoredMessage};

use crate::channel::channel_id;
use crate::config::ChatConfig;
use crate::session::Session;
use crate::store::{DocumentStore, StoreChange};

/// Where a message is in its life as seen by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Shown optimistically; the durable write is in flight under `durable_id`.
    Pending { durable_id: String },
    Confirmed,
    /// The durable write failed. Kept visible, never retried.
    Failed,
}

/// A message as displayed in a channel view.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
    pub is_own: bool,
    pub delivery: Delivery,
}

impl ChatMessage {
    pub fn from_stored(msg: StoredMessage, local_id: Option<&str>) -> Self {
        let is_own = local_id == Some(msg.sender_id.as_str());
        Self {
            id: msg.id,
            channel_id: msg.channel_id,
            text: msg.text,
            sender_id: msg.sender_id,
            sender_name: msg.sender_name,
            timestamp: msg.timestamp,
            kind: msg.kind,
            is_own,
            delivery: Delivery::Confirmed,
        }
    }

    pub fn sending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { .. })
    }

    pub fn failed(&self) -> bool {
        self.delivery == Delivery::Failed
    }

    fn confirmed(&self) -> bool {
        self.delivery == Delivery::Confirmed
    }
}

/// Per-channel state: the ascending message list plus paging flags.
#[derive(Debug, Clone, Default)]
pub(crate) struct ChannelView {
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) has_more: bool,
    pub(crate) loading_more: bool,
    /// Set once `load_more` has merged anything in; from then on snapshots
    /// preserve the older history and no longer drive `has_more`.
    pub(crate) paged: bool,
}

impl ChannelView {
    /// Full-replace with the newest page from the live subscription.
    ///
    /// Local unconfirmed entries survive (a pending one is dropped once its
    /// durable copy shows up). Confirmed history older than the snapshot
    /// window is kept once paging has run or while a page is in flight, minus
    /// the ids in `removed`, which the store no longer holds.
    fn apply_snapshot(
        &mut self,
        snapshot: Vec<ChatMessage>,
        page_size: u32,
        removed: &HashSet<String>,
    ) {
        let snapshot_ids: HashSet<&str> = snapshot.iter().map(|m| m.id.as_str()).collect();
        let window_start = snapshot.first().map(|m| m.timestamp);

        let mut merged: Vec<ChatMessage> = Vec::with_capacity(snapshot.len() + 8);

        if self.keeps_history() {
            if let Some(start) = window_start {
                merged.extend(
                    self.messages
                        .iter()
                        .filter(|m| m.confirmed() && m.timestamp < start)
                        .filter(|m| !snapshot_ids.contains(m.id.as_str()))
                        .filter(|m| !removed.contains(&m.id))
                        .cloned(),
                );
            }
        }

        let local: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| match &m.delivery {
                Delivery::Pending { durable_id } => !snapshot_ids.contains(durable_id.as_str()),
                Delivery::Failed => true,
                Delivery::Confirmed => false,
            })
            .cloned()
            .collect();

        if !self.paged {
            self.has_more = snapshot.len() as u64 >= u64::from(page_size);
        }

        merged.extend(snapshot);
        merged.extend(local);
        merged.sort_by_key(|m| m.timestamp);
        self.messages = merged;
    }

    fn keeps_history(&self) -> bool {
        self.paged || self.loading_more
    }

    /// Confirmed entries a snapshot starting at `start` would carry over.
    fn history_before(&self, start: DateTime<Utc>) -> Vec<(String, DateTime<Utc>)> {
        if !self.keeps_history() {
            return Vec::new();
        }
        self.messages
            .iter()
            .filter(|m| m.confirmed() && m.timestamp < start)
            .map(|m| (m.id.clone(), m.timestamp))
            .collect()
    }

    /// Merge an older page into the list, skipping ids already present.
    /// Returns how many entries were added.
    fn merge_older(&mut self, older: Vec<ChatMessage>) -> usize {
        let known: HashSet<&str> = self.messages.iter().map(|m| m.id.as_str()).collect();
        let fresh: Vec<ChatMessage> = older
            .into_iter()
            .filter(|m| !known.contains(m.id.as_str()))
            .collect();
        let added = fresh.len();
        if added > 0 {
            self.paged = true;
            self.messages.extend(fresh);
            self.messages.sort_by_key(|m| m.timestamp);
        }
        added
    }

    /// Timestamp of the oldest durable message, the pagination anchor.
    fn anchor(&self) -> Option<DateTime<Utc>> {
        self.messages
            .iter()
            .filter(|m| m.confirmed())
            .map(|m| m.timestamp)
            .min()
    }
}

/// Handle to a live channel subscription. Dropping it tears the listener down.
pub struct Subscription {
    channel_id: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// In-memory message lists for every channel this client has touched.
///
/// Two producers write here: the live subscription (full-replace snapshots)
/// and the send/pagination operations (targeted append, merge, promote).
pub struct MessageStore {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) session: Arc<Session>,
    pub(crate) config: ChatConfig,
    pub(crate) views: Mutex<HashMap<String, ChannelView>>,
    pub(crate) temp_seq: AtomicU64,
    active: Mutex<Option<Subscription>>,
}

impl MessageStore {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<Session>, config: ChatConfig) -> Self {
        Self {
            store,
            session,
            config,
            views: Mutex::new(HashMap::new()),
            temp_seq: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    /// Current messages of a channel, ascending by timestamp.
    pub async fn messages(&self, channel_id: &str) -> Vec<ChatMessage> {
        self.views
            .lock()
            .await
            .get(channel_id)
            .map(|v| v.messages.clone())
            .unwrap_or_default()
    }

    pub async fn has_more(&self, channel_id: &str) -> bool {
        self.views
            .lock()
            .await
            .get(channel_id)
            .is_some_and(|v| v.has_more)
    }

    pub async fn is_loading_more(&self, channel_id: &str) -> bool {
        self.views
            .lock()
            .await
            .get(channel_id)
            .is_some_and(|v| v.loading_more)
    }

    /// Switch the viewed conversation. The previous subscription is torn
    /// down first so its updates cannot land after the switch. `None` just
    /// stops watching. Returns the new channel id.
    pub async fn select_peer(self: &Arc<Self>, peer_id: Option<&str>) -> Option<String> {
        let mut active = self.active.lock().await;
        if let Some(old) = active.take() {
            debug!("Unsubscribing from channel {}", old.channel_id());
        }

        let local_id = self.session.profile_id().await?;
        let cid = channel_id(&local_id, peer_id?)?;
        *active = Some(self.watch(&cid));
        Some(cid)
    }

    /// Subscribe to a channel: load the newest page now and again on every
    /// change the store reports for it.
    pub fn watch(self: &Arc<Self>, channel_id: &str) -> Subscription {
        // Subscribe before the first load so no change slips between them.
        let mut changes = self.store.changes();
        let this = Arc::clone(self);
        let cid = channel_id.to_string();

        let task = tokio::spawn(async move {
            this.refresh(&cid).await;
            loop {
                match changes.recv().await {
                    Ok(StoreChange::Messages(changed)) if changed == cid => this.refresh(&cid).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("Change feed lagged by {} events, reloading {}", n, cid);
                        this.refresh(&cid).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        info!("Watching channel {}", channel_id);
        Subscription {
            channel_id: channel_id.to_string(),
            task,
        }
    }

    /// Reload the newest page of a channel and apply it as a snapshot.
    pub async fn refresh(&self, channel_id: &str) {
        let page = self.config.initial_page;
        let rows = match self.store.latest_messages(channel_id, page).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Error loading messages for {}: {}", channel_id, e);
                return;
            }
        };

        let local_id = self.session.profile_id().await;
        let mut snapshot: Vec<ChatMessage> = rows
            .into_iter()
            .map(|m| ChatMessage::from_stored(m, local_id.as_deref()))
            .collect();
        snapshot.reverse();

        let removed = match snapshot.first().map(|m| m.timestamp) {
            Some(start) => self.removed_history(channel_id, start).await,
            None => HashSet::new(),
        };

        let mut views = self.views.lock().await;
        views
            .entry(channel_id.to_string())
            .or_default()
            .apply_snapshot(snapshot, page, &removed);
    }

    /// Ids of carried-over history the store no longer holds, e.g. after a
    /// retention sweep. Checks the newest stretch below `start` that covers
    /// the carried entries; on error nothing is reported removed.
    async fn removed_history(&self, channel_id: &str, start: DateTime<Utc>) -> HashSet<String> {
        let held = {
            let views = self.views.lock().await;
            match views.get(channel_id) {
                Some(view) => view.history_before(start),
                None => return HashSet::new(),
            }
        };
        if held.is_empty() {
            return HashSet::new();
        }

        let limit = u32::try_from(held.len()).unwrap_or(u32::MAX);
        let rows = match self.store.messages_before(channel_id, start, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Error checking history for {}: {}", channel_id, e);
                return HashSet::new();
            }
        };

        // Rows come newest first. A short result means nothing older exists.
        let exhausted = rows.len() < held.len();
        let floor = rows.last().map(|m| m.timestamp);
        let present: HashSet<&str> = rows.iter().map(|m| m.id.as_str()).collect();

        held.into_iter()
            .filter(|(id, ts)| {
                let covered = exhausted || floor.is_some_and(|f| *ts >= f);
                covered && !present.contains(id.as_str())
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Fetch the next older page and merge it in.
    ///
    /// No-op (returns 0) while another load is in flight, when the channel is
    /// known to be exhausted, or when there is no loaded message to anchor on.
    /// Returns the number of messages added.
    pub async fn load_more(&self, channel_id: &str) -> usize {
        let anchor = {
            let mut views = self.views.lock().await;
            let Some(view) = views.get_mut(channel_id) else {
                return 0;
            };
            if view.loading_more || !view.has_more {
                return 0;
            }
            let Some(anchor) = view.anchor() else {
                return 0;
            };
            view.loading_more = true;
            anchor
        };

        let page = self.config.load_more_page;
        let result = self.store.messages_before(channel_id, anchor, page).await;
        let local_id = self.session.profile_id().await;

        let mut views = self.views.lock().await;
        let view = views.entry(channel_id.to_string()).or_default();
        view.loading_more = false;

        match result {
            Ok(rows) => {
                let fetched = rows.len();
                if fetched < page as usize {
                    view.has_more = false;
                }

                // A snapshot may have landed while the page was in flight;
                // merge by timestamp rather than prepending.
                let older: Vec<ChatMessage> = rows
                    .into_iter()
                    .map(|m| ChatMessage::from_stored(m, local_id.as_deref()))
                    .collect();
                let added = view.merge_older(older);
                debug!("Loaded {} older messages for {}", added, channel_id);
                added
            }
            Err(e) => {
                warn!("Error loading more messages for {}: {}", channel_id, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn confirmed(id: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            channel_id: "a_b".to_string(),
            text: id.to_string(),
            sender_id: "b".to_string(),
            sender_name: "Bea".to_string(),
            timestamp: DateTime::UNIX_EPOCH + TimeDelta::seconds(secs),
            kind: MessageKind::Text,
            is_own: false,
            delivery: Delivery::Confirmed,
        }
    }

    fn none() -> HashSet<String> {
        HashSet::new()
    }

    fn ids(view: &ChannelView) -> Vec<&str> {
        view.messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_snapshot_replaces_and_sets_has_more() {
        let mut view = ChannelView::default();
        view.apply_snapshot(vec![confirmed("m1", 1), confirmed("m2", 2)], 2, &none());
        assert!(view.has_more);
        view.apply_snapshot(vec![confirmed("m2", 2)], 2, &none());
        assert_eq!(ids(&view), vec!["m2"]);
        assert!(!view.has_more);
    }

    #[test]
    fn test_snapshot_keeps_failed_and_pending() {
        let mut view = ChannelView::default();
        let mut failed = confirmed("temp_1", 5);
        failed.delivery = Delivery::Failed;
        let mut pending = confirmed("temp_2", 6);
        pending.delivery = Delivery::Pending { durable_id: "d2".into() };
        view.messages = vec![failed, pending];

        view.apply_snapshot(vec![confirmed("m1", 1)], 50, &none());
        assert_eq!(ids(&view), vec!["m1", "temp_1", "temp_2"]);

        // The pending entry is superseded once its durable copy arrives.
        view.apply_snapshot(vec![confirmed("m1", 1), confirmed("d2", 6)], 50, &none());
        assert_eq!(ids(&view), vec!["m1", "temp_1", "d2"]);
    }

    #[test]
    fn test_snapshot_preserves_paged_history() {
        let mut view = ChannelView {
            messages: vec![confirmed("old", 1), confirmed("m5", 5)],
            paged: true,
            has_more: true,
            ..Default::default()
        };
        view.apply_snapshot(vec![confirmed("m5", 5), confirmed("m6", 6)], 2, &none());
        assert_eq!(ids(&view), vec!["old", "m5", "m6"]);
        // Pagination owns has_more once it has run.
        assert!(view.has_more);
    }

    #[test]
    fn test_snapshot_during_page_load_keeps_history() {
        let mut view = ChannelView {
            messages: vec![confirmed("m1", 1), confirmed("m2", 2)],
            has_more: true,
            loading_more: true,
            ..Default::default()
        };
        view.apply_snapshot(vec![confirmed("m2", 2), confirmed("m3", 3)], 2, &none());
        assert_eq!(ids(&view), vec!["m1", "m2", "m3"]);

        assert_eq!(view.merge_older(vec![confirmed("m0", 0), confirmed("m1", 1)]), 1);
        assert_eq!(ids(&view), vec!["m0", "m1", "m2", "m3"]);
        assert!(view.paged);
    }

    #[test]
    fn test_snapshot_drops_removed_history() {
        let mut view = ChannelView {
            messages: vec![confirmed("gone", 1), confirmed("old", 2), confirmed("m5", 5)],
            paged: true,
            ..Default::default()
        };
        let removed = HashSet::from(["gone".to_string()]);
        view.apply_snapshot(vec![confirmed("m5", 5)], 2, &removed);
        assert_eq!(ids(&view), vec!["old", "m5"]);
    }

    #[test]
    fn test_anchor_ignores_local_entries() {
        let mut local = confirmed("temp", 0);
        local.delivery = Delivery::Failed;
        let view = ChannelView {
            messages: vec![local, confirmed("m3", 3)],
            ..Default::default()
        };
        assert_eq!(view.anchor(), Some(DateTime::UNIX_EPOCH + TimeDelta::seconds(3)));
    }
}
