use std::sync::atomic::Ordering;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use shipchat_types::models::{Channel, MessageKind, StoredMessage};

use crate::channel::channel_id;
use crate::error::ChatError;
use crate::messages::{ChatMessage, Delivery, MessageStore};
use crate::store::DocumentStore;

/// Result of a send that passed its preconditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Durably written under this id
    Delivered(String),
    /// The durable write failed; the entry stays in the list as failed
    Failed,
}

/// Durable half of a send: merge the channel document, then append the
/// message. Shared by the client pipeline and the HTTP handler.
pub async fn deliver(store: &dyn DocumentStore, message: &StoredMessage, peer_id: &str) -> Result<()> {
    let channel = Channel {
        id: message.channel_id.clone(),
        participants: vec![message.sender_id.clone(), peer_id.to_string()],
        last_message: Some(message.snapshot()),
        updated_at: message.timestamp,
    };
    store.upsert_channel(&channel).await?;
    store.insert_message(message).await?;
    Ok(())
}

impl MessageStore {
    /// Send `text` to `to_user_id`, showing it immediately.
    ///
    /// The optimistic entry is appended before any store call. On success it
    /// becomes the confirmed message (or disappears if the subscription has
    /// already delivered the durable copy); on failure it stays, flagged
    /// failed. Store errors never surface as `Err`.
    pub async fn send(&self, to_user_id: &str, text: &str) -> Result<SendOutcome, ChatError> {
        let profile = self.session.profile().await.ok_or(ChatError::NoProfile)?;
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let cid = channel_id(&profile.id, to_user_id)
            .ok_or_else(|| ChatError::InvalidChannel(to_user_id.to_string()))?;

        let now = Utc::now();
        let temp_id = self.next_temp_id(now);
        let durable_id = Uuid::new_v4().to_string();

        let message = StoredMessage {
            id: durable_id.clone(),
            channel_id: cid.clone(),
            text: text.to_string(),
            sender_id: profile.id.clone(),
            sender_name: profile.display_name().to_string(),
            timestamp: now,
            kind: MessageKind::Text,
        };

        {
            let mut optimistic = ChatMessage::from_stored(message.clone(), Some(&profile.id));
            optimistic.id = temp_id.clone();
            optimistic.delivery = Delivery::Pending {
                durable_id: durable_id.clone(),
            };
            let mut views = self.views.lock().await;
            views.entry(cid.clone()).or_default().messages.push(optimistic);
        }

        let result = deliver(self.store.as_ref(), &message, to_user_id).await;

        let mut views = self.views.lock().await;
        let list = &mut views.entry(cid.clone()).or_default().messages;

        match result {
            Ok(()) => {
                if list.iter().any(|m| m.id == durable_id) {
                    list.retain(|m| m.id != temp_id);
                } else if let Some(m) = list.iter_mut().find(|m| m.id == temp_id) {
                    m.id = durable_id.clone();
                    m.delivery = Delivery::Confirmed;
                }
                debug!("Message {} delivered to {}", durable_id, cid);
                Ok(SendOutcome::Delivered(durable_id))
            }
            Err(e) => {
                warn!("Error sending message to {}: {}", cid, e);
                if let Some(m) = list.iter_mut().find(|m| m.id == temp_id) {
                    m.delivery = Delivery::Failed;
                }
                Ok(SendOutcome::Failed)
            }
        }
    }

    /// Time-based temporary id, made unique within the process by a counter.
    fn next_temp_id(&self, now: DateTime<Utc>) -> String {
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        format!("temp_{}_{}", now.timestamp_millis(), seq)
    }
}
