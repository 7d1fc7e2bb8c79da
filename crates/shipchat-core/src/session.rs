use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use shipchat_types::models::Profile;

use crate::error::ChatError;
use crate::store::DocumentStore;

/// Storage key of the serialized local profile.
pub const PROFILE_KEY: &str = "shipChatProfile";
pub const USER_COOKIE: &str = "shipChatUserId";
pub const SHIP_COOKIE: &str = "shipChatShipId";
pub const COOKIE_TTL_DAYS: i64 = 7;

const STATE_FILE: &str = "session.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalState {
    #[serde(default)]
    items: BTreeMap<String, String>,
    #[serde(default)]
    cookies: BTreeMap<String, Cookie>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Cookie {
    value: String,
    expires_at: DateTime<Utc>,
}

impl LocalState {
    fn set_cookie(&mut self, name: &str, value: &str, now: DateTime<Utc>) {
        self.cookies.insert(
            name.to_string(),
            Cookie {
                value: value.to_string(),
                expires_at: now + TimeDelta::days(COOKIE_TTL_DAYS),
            },
        );
    }

    fn drop_expired(&mut self, now: DateTime<Utc>) {
        self.cookies.retain(|_, c| c.expires_at > now);
    }
}

/// The local crew member's session: who "self" is, persisted between runs
/// as a profile blob plus two week-long id cookies.
pub struct Session {
    store: Arc<dyn DocumentStore>,
    path: Option<PathBuf>,
    state: Mutex<LocalState>,
    profile: RwLock<Option<Profile>>,
}

impl Session {
    /// Restore a session from `dir`, creating the directory if needed.
    pub async fn open(store: Arc<dyn DocumentStore>, dir: &Path) -> Result<Self, ChatError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(STATE_FILE);

        let mut state: LocalState = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LocalState::default(),
            Err(e) => return Err(e.into()),
        };
        state.drop_expired(Utc::now());

        let profile = state.items.get(PROFILE_KEY).and_then(|blob| {
            serde_json::from_str::<Profile>(blob)
                .map_err(|e| warn!("Discarding unreadable stored profile: {}", e))
                .ok()
        });

        if let Some(p) = &profile {
            info!("Restored session for {} ({})", p.display_name(), p.id);
        }

        Ok(Self {
            store,
            path: Some(path),
            state: Mutex::new(state),
            profile: RwLock::new(profile),
        })
    }

    /// Session that is never written to disk.
    pub fn ephemeral(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            path: None,
            state: Mutex::new(LocalState::default()),
            profile: RwLock::new(None),
        }
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.profile.read().await.clone()
    }

    pub async fn profile_id(&self) -> Option<String> {
        self.profile.read().await.as_ref().map(|p| p.id.clone())
    }

    /// Unexpired cookie value.
    pub async fn cookie(&self, name: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .cookies
            .get(name)
            .filter(|c| c.expires_at > Utc::now())
            .map(|c| c.value.clone())
    }

    /// Save the local profile: assign an id if it has none, stamp the
    /// heartbeat, persist locally, then merge into the durable store.
    ///
    /// A durable failure is logged and the local copy kept.
    pub async fn save_profile(&self, mut profile: Profile) -> Result<Profile, ChatError> {
        let now = Utc::now();
        if profile.id.is_empty() {
            profile.id = format!("user_{}", now.timestamp_millis());
        }
        profile.updated_at = Some(now);

        {
            let mut state = self.state.lock().await;
            state
                .items
                .insert(PROFILE_KEY.to_string(), serde_json::to_string(&profile)?);
            state.set_cookie(USER_COOKIE, &profile.id, now);
            if let Some(ship_id) = &profile.ship_id {
                state.set_cookie(SHIP_COOKIE, ship_id, now);
            }
            self.persist(&state).await?;
        }
        *self.profile.write().await = Some(profile.clone());

        if let Err(e) = self.store.upsert_profile(&profile).await {
            warn!("Error saving profile {}: {}", profile.id, e);
        }

        Ok(profile)
    }

    /// Forget the local profile and its cookies.
    pub async fn clear(&self) -> Result<(), ChatError> {
        *self.profile.write().await = None;

        let mut state = self.state.lock().await;
        state.items.remove(PROFILE_KEY);
        state.cookies.remove(USER_COOKIE);
        state.cookies.remove(SHIP_COOKIE);
        self.persist(&state).await?;

        info!("Local session cleared");
        Ok(())
    }

    async fn persist(&self, state: &LocalState) -> Result<(), ChatError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use shipchat_types::models::Department;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "shipchat_session_{}_{}",
            name,
            uuid::Uuid::new_v4()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn crew(name: &str) -> Profile {
        Profile {
            name: name.into(),
            department: Department::Deck,
            ship_id: Some("ship_003".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_save_assigns_id_and_restores() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let dir = temp_dir("restore");

        let session = Session::open(store.clone(), &dir).await.unwrap();
        assert!(session.profile().await.is_none());

        let saved = session.save_profile(crew("Rosa")).await.unwrap();
        assert!(saved.id.starts_with("user_"));
        assert!(saved.updated_at.is_some());
        assert!(store.get_profile(&saved.id).await.unwrap().is_some());

        let reopened = Session::open(store, &dir).await.unwrap();
        assert_eq!(reopened.profile().await, Some(saved.clone()));
        assert_eq!(reopened.cookie(USER_COOKIE).await, Some(saved.id));
        assert_eq!(reopened.cookie(SHIP_COOKIE).await.as_deref(), Some("ship_003"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_clear_forgets_everything() {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let dir = temp_dir("clear");

        let session = Session::open(store.clone(), &dir).await.unwrap();
        session.save_profile(crew("Ivo")).await.unwrap();
        session.clear().await.unwrap();
        assert!(session.profile().await.is_none());
        assert!(session.cookie(USER_COOKIE).await.is_none());

        let reopened = Session::open(store, &dir).await.unwrap();
        assert!(reopened.profile().await.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_expired_cookies_dropped() {
        let now = Utc::now();
        let mut state = LocalState::default();
        state.set_cookie(USER_COOKIE, "user_1", now - TimeDelta::days(8));
        state.set_cookie(SHIP_COOKIE, "ship_001", now);
        state.drop_expired(now);
        assert!(!state.cookies.contains_key(USER_COOKIE));
        assert!(state.cookies.contains_key(SHIP_COOKIE));
    }
}
