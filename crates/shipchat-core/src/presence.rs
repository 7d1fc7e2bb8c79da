use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shipchat_types::models::{CrewMember, Profile};

use crate::config::time_delta;
use crate::session::Session;
use crate::store::{DocumentStore, StoreChange};

/// Online iff the last heartbeat is younger than `timeout`. The local user
/// (`self_id`) is always online; a profile that never beat is offline.
pub fn is_online(
    profile: &Profile,
    now: DateTime<Utc>,
    self_id: Option<&str>,
    timeout: TimeDelta,
) -> bool {
    if self_id == Some(profile.id.as_str()) {
        return true;
    }
    match profile.updated_at {
        Some(last) => now - last < timeout,
        None => false,
    }
}

/// Roster cache with online status derived on read from heartbeat age.
///
/// Nothing here stores an online bit; a crashed writer simply ages out.
pub struct PresenceTracker {
    roster: RwLock<Vec<Profile>>,
    now: RwLock<DateTime<Utc>>,
    timeout: TimeDelta,
}

impl PresenceTracker {
    pub fn new(online_timeout: Duration) -> Self {
        Self {
            roster: RwLock::new(Vec::new()),
            now: RwLock::new(Utc::now()),
            timeout: time_delta(online_timeout),
        }
    }

    /// Advance the clock sample used for derivation.
    pub async fn tick(&self, now: DateTime<Utc>) {
        *self.now.write().await = now;
    }

    pub async fn now(&self) -> DateTime<Utc> {
        *self.now.read().await
    }

    pub async fn set_roster(&self, profiles: Vec<Profile>) {
        *self.roster.write().await = profiles;
    }

    /// Drop a profile from the roster. Returns whether it was present.
    pub async fn remove(&self, user_id: &str) -> bool {
        let mut roster = self.roster.write().await;
        let before = roster.len();
        roster.retain(|p| p.id != user_id);
        roster.len() != before
    }

    /// The roster with fresh online flags, as seen by `self_id`.
    pub async fn crew(&self, self_id: Option<&str>) -> Vec<CrewMember> {
        let now = *self.now.read().await;
        self.roster
            .read()
            .await
            .iter()
            .map(|p| CrewMember {
                online: is_online(p, now, self_id, self.timeout),
                profile: p.clone().with_fallbacks(),
            })
            .collect()
    }

    pub async fn reload(&self, store: &dyn DocumentStore) {
        match store.list_profiles().await {
            Ok(profiles) => {
                debug!("Roster reloaded ({} profiles)", profiles.len());
                self.set_roster(profiles).await;
            }
            Err(e) => warn!("Error listening to users: {}", e),
        }
    }

    /// Re-sample the clock every `every` until cancelled.
    pub async fn run_ticker(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick(Utc::now()).await,
            }
        }
    }

    /// Keep the roster in sync with the store's profile collection.
    pub async fn run_roster_listener(
        self: Arc<Self>,
        store: Arc<dyn DocumentStore>,
        cancel: CancellationToken,
    ) {
        let mut changes = store.changes();
        self.reload(store.as_ref()).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(StoreChange::Profiles) | Err(RecvError::Lagged(_)) => {
                        self.reload(store.as_ref()).await;
                    }
                    Ok(StoreChange::Messages(_)) => {}
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}

/// Refresh the local profile's heartbeat every `every`, starting now.
///
/// Stops when cancelled or once the session no longer has a profile.
/// Write failures are logged and the next beat tries again.
pub async fn run_heartbeat(
    store: Arc<dyn DocumentStore>,
    session: Arc<Session>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(user_id) = session.profile_id().await else {
            info!("No local profile, heartbeat stopped");
            break;
        };

        match store.touch_profile(&user_id, Utc::now()).await {
            Ok(true) => debug!("Heartbeat for {}", user_id),
            Ok(false) => warn!("Heartbeat for {}: profile not found", user_id),
            Err(e) => warn!("Error updating status for {}: {}", user_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, last_seen: Option<DateTime<Utc>>) -> Profile {
        Profile {
            id: id.to_string(),
            name: id.to_string(),
            updated_at: last_seen,
            ..Default::default()
        }
    }

    #[test]
    fn test_heartbeat_window() {
        let now = Utc::now();
        let timeout = TimeDelta::seconds(120);

        let recent = profile("recent", Some(now - TimeDelta::seconds(90)));
        let stale = profile("stale", Some(now - TimeDelta::seconds(150)));
        let never = profile("never", None);

        assert!(is_online(&recent, now, None, timeout));
        assert!(!is_online(&stale, now, None, timeout));
        assert!(!is_online(&never, now, None, timeout));
    }

    #[test]
    fn test_self_always_online() {
        let now = Utc::now();
        let me = profile("me", Some(now - TimeDelta::days(3)));
        assert!(is_online(&me, now, Some("me"), TimeDelta::seconds(120)));
        let me_no_beat = profile("me", None);
        assert!(is_online(&me_no_beat, now, Some("me"), TimeDelta::seconds(120)));
    }

    #[tokio::test]
    async fn test_crew_rederives_on_tick() {
        let tracker = PresenceTracker::new(Duration::from_secs(120));
        let t0 = Utc::now();
        tracker.set_roster(vec![profile("a", Some(t0))]).await;

        tracker.tick(t0 + TimeDelta::seconds(60)).await;
        assert!(tracker.crew(None).await[0].online);

        tracker.tick(t0 + TimeDelta::seconds(121)).await;
        assert!(!tracker.crew(None).await[0].online);

        assert!(tracker.remove("a").await);
        assert!(tracker.crew(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_crew_fills_name_and_avatar() {
        let tracker = PresenceTracker::new(Duration::from_secs(120));
        let mut blank = profile("user_7", None);
        blank.name = " ".to_string();
        let mut custom = profile("user_8", None);
        custom.avatar = Some("https://cdn.example/p.png".to_string());
        tracker.set_roster(vec![blank, custom]).await;

        let crew = tracker.crew(None).await;
        assert_eq!(crew[0].profile.name, "Unknown");
        assert_eq!(
            crew[0].profile.avatar.as_deref(),
            Some("https://i.pravatar.cc/150?u=user_7")
        );
        assert_eq!(crew[1].profile.avatar.as_deref(), Some("https://cdn.example/p.png"));
    }
}
