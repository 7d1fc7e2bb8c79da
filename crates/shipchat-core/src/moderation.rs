use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::presence::PresenceTracker;
use crate::session::Session;
use crate::store::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// This reporter had already reported the user
    Duplicate,
    /// Report recorded; distinct reporters so far
    Recorded(usize),
    /// Report recorded and the threshold reached; the user was removed
    Removed,
}

/// Community moderation: distinct reports per user, removal at a threshold.
pub struct Moderation {
    store: Arc<dyn DocumentStore>,
    presence: Arc<PresenceTracker>,
    /// Present on clients, where removing yourself ends the session
    session: Option<Arc<Session>>,
    threshold: usize,
    reports: Mutex<HashMap<String, HashSet<String>>>,
}

impl Moderation {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        presence: Arc<PresenceTracker>,
        session: Option<Arc<Session>>,
        threshold: usize,
    ) -> Self {
        Self {
            store,
            presence,
            session,
            threshold: threshold.max(1),
            reports: Mutex::new(HashMap::new()),
        }
    }

    pub async fn report_count(&self, user_id: &str) -> usize {
        self.reports.lock().await.get(user_id).map_or(0, HashSet::len)
    }

    /// Record `reporter_id` against `user_id`. Idempotent per reporter; the
    /// report that brings the count to the threshold removes the user.
    pub async fn report(&self, user_id: &str, reporter_id: &str) -> ReportOutcome {
        let count = {
            let mut reports = self.reports.lock().await;
            let reporters = reports.entry(user_id.to_string()).or_default();
            if !reporters.insert(reporter_id.to_string()) {
                return ReportOutcome::Duplicate;
            }
            reporters.len()
        };

        info!("{} reported by {} ({} reports)", user_id, reporter_id, count);

        if count == self.threshold {
            self.delete_user(user_id).await;
            ReportOutcome::Removed
        } else {
            ReportOutcome::Recorded(count)
        }
    }

    /// Remove a user from the roster and the store. Removing the local user
    /// also clears the session. Failures are logged only.
    pub async fn delete_user(&self, user_id: &str) {
        self.presence.remove(user_id).await;

        if let Err(e) = self.store.delete_profile(user_id).await {
            warn!("Error deleting user {}: {}", user_id, e);
            return;
        }
        info!("Deleted user {}", user_id);

        if let Some(session) = &self.session {
            if session.profile_id().await.as_deref() == Some(user_id) {
                if let Err(e) = session.clear().await {
                    warn!("Error clearing session for {}: {}", user_id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use shipchat_types::models::Profile;
    use std::time::Duration;

    async fn setup() -> (Arc<SqliteStore>, Arc<PresenceTracker>, Moderation) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let target = Profile {
            id: "user_x".into(),
            name: "Xavi".into(),
            ..Default::default()
        };
        store.upsert_profile(&target).await.unwrap();

        let presence = Arc::new(PresenceTracker::new(Duration::from_secs(120)));
        presence.reload(store.as_ref()).await;

        let moderation = Moderation::new(store.clone(), presence.clone(), None, 5);
        (store, presence, moderation)
    }

    #[tokio::test]
    async fn test_duplicate_reporter_ignored() {
        let (_store, _presence, moderation) = setup().await;
        assert_eq!(moderation.report("user_x", "r1").await, ReportOutcome::Recorded(1));
        assert_eq!(moderation.report("user_x", "r1").await, ReportOutcome::Duplicate);
        assert_eq!(moderation.report_count("user_x").await, 1);
    }

    #[tokio::test]
    async fn test_fifth_reporter_removes() {
        let (store, presence, moderation) = setup().await;
        for r in 1..5 {
            let outcome = moderation.report("user_x", &format!("r{r}")).await;
            assert_eq!(outcome, ReportOutcome::Recorded(r));
        }
        assert_eq!(moderation.report("user_x", "r5").await, ReportOutcome::Removed);

        assert!(presence.crew(None).await.is_empty());
        assert!(store.get_profile("user_x").await.unwrap().is_none());

        // A repeat from a counted reporter changes nothing.
        assert_eq!(moderation.report("user_x", "r3").await, ReportOutcome::Duplicate);
        assert_eq!(moderation.report_count("user_x").await, 5);
    }
}
