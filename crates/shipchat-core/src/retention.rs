use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ChatConfig, time_delta};
use crate::store::DocumentStore;

/// User-facing summary of a sweep, e.g. "3 old messages cleared".
pub fn cleanup_notice(count: usize) -> String {
    let plural = if count > 1 { "s" } else { "" };
    format!("{count} old message{plural} cleared")
}

/// Periodically deletes messages older than the retention age.
///
/// Each cycle visits at most `cleanup_channels` channels, resuming after the
/// channel recorded in the durable sweep checkpoint, and deletes at most
/// `cleanup_messages` stale messages per channel in one atomic batch.
pub struct RetentionSweeper {
    store: Arc<dyn DocumentStore>,
    config: ChatConfig,
    notice_tx: Arc<watch::Sender<Option<String>>>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn DocumentStore>, config: ChatConfig) -> Self {
        let (notice_tx, _) = watch::channel(None);
        Self {
            store,
            config,
            notice_tx: Arc::new(notice_tx),
        }
    }

    /// Current cleanup notice; `None` when nothing is on display.
    pub fn notices(&self) -> watch::Receiver<Option<String>> {
        self.notice_tx.subscribe()
    }

    /// Sweep now and then every `cleanup_interval` until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.sweep_once(Utc::now()).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleanup: pruned {} old messages", count);
                        self.publish_notice(count);
                    }
                }
                Err(e) => {
                    warn!("Error cleaning up old messages: {}", e);
                }
            }
        }
    }

    /// One cycle. Any error aborts the rest of the cycle without moving the
    /// checkpoint, so the next cycle retries the same channels.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let cap = self.config.cleanup_channels;
        let cutoff = now - time_delta(self.config.retention_age);

        let cursor = self.store.sweep_cursor().await?;
        let mut channels = self.store.list_channel_ids(cursor.as_deref(), cap).await?;
        if channels.is_empty() && cursor.is_some() {
            // Reached the end last time; wrap around.
            channels = self.store.list_channel_ids(None, cap).await?;
        }

        let mut total = 0;
        for channel_id in &channels {
            let stale = self
                .store
                .stale_message_ids(channel_id, cutoff, self.config.cleanup_messages)
                .await?;
            if stale.is_empty() {
                continue;
            }
            let deleted = self.store.delete_messages(channel_id, &stale).await?;
            debug!("Cleanup: {} stale messages removed from {}", deleted, channel_id);
            total += deleted;
        }

        let next = if channels.len() < cap as usize {
            None
        } else {
            channels.last().cloned()
        };
        self.store.set_sweep_cursor(next.as_deref()).await?;

        Ok(total)
    }

    /// Show the notice, then clear it after `notice_ttl` unless a newer one
    /// replaced it in the meantime.
    fn publish_notice(&self, count: usize) {
        let text = cleanup_notice(count);
        self.notice_tx.send_replace(Some(text.clone()));

        let tx = Arc::clone(&self.notice_tx);
        let ttl = self.config.notice_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            tx.send_if_modified(|current| {
                if current.as_deref() == Some(text.as_str()) {
                    *current = None;
                    true
                } else {
                    false
                }
            });
        });
    }
}
