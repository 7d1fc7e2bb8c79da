use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use shipchat_types::models::{CrewMember, Profile};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::messages::MessageStore;
use crate::moderation::Moderation;
use crate::presence::{self, PresenceTracker};
use crate::retention::RetentionSweeper;
use crate::session::Session;
use crate::store::DocumentStore;

/// One crew member's client: owns each piece of state explicitly and the
/// background tasks (presence tick, roster listener, heartbeat, retention).
pub struct CrewClient {
    pub store: Arc<dyn DocumentStore>,
    pub session: Arc<Session>,
    pub messages: Arc<MessageStore>,
    pub presence: Arc<PresenceTracker>,
    pub moderation: Moderation,
    pub retention: Arc<RetentionSweeper>,
    config: ChatConfig,
    tasks: CancellationToken,
    heartbeat: Mutex<Option<CancellationToken>>,
}

impl CrewClient {
    /// Restore the session from `data_dir` and start background tasks.
    pub async fn start(
        store: Arc<dyn DocumentStore>,
        config: ChatConfig,
        data_dir: &Path,
    ) -> Result<Arc<Self>, ChatError> {
        let session = Arc::new(Session::open(store.clone(), data_dir).await?);
        Ok(Self::with_session(store, config, session).await)
    }

    pub async fn with_session(
        store: Arc<dyn DocumentStore>,
        config: ChatConfig,
        session: Arc<Session>,
    ) -> Arc<Self> {
        let presence = Arc::new(PresenceTracker::new(config.online_timeout));
        let messages = Arc::new(MessageStore::new(store.clone(), session.clone(), config.clone()));
        let moderation = Moderation::new(
            store.clone(),
            presence.clone(),
            Some(session.clone()),
            config.report_threshold,
        );
        let retention = Arc::new(RetentionSweeper::new(store.clone(), config.clone()));
        let tasks = CancellationToken::new();

        tokio::spawn(presence.clone().run_ticker(config.presence_tick, tasks.child_token()));
        tokio::spawn(
            presence
                .clone()
                .run_roster_listener(store.clone(), tasks.child_token()),
        );
        tokio::spawn(retention.clone().run(tasks.child_token()));

        let client = Arc::new(Self {
            store,
            session,
            messages,
            presence,
            moderation,
            retention,
            config,
            tasks,
            heartbeat: Mutex::new(None),
        });
        client.restart_heartbeat().await;
        client
    }

    /// Save the local profile and make sure its heartbeat is running.
    pub async fn save_profile(&self, profile: Profile) -> Result<Profile, ChatError> {
        let saved = self.session.save_profile(profile).await?;
        self.restart_heartbeat().await;
        Ok(saved)
    }

    /// Clear the local session; the heartbeat stops with it.
    pub async fn sign_out(&self) -> Result<(), ChatError> {
        if let Some(token) = self.heartbeat.lock().await.take() {
            token.cancel();
        }
        self.messages.select_peer(None).await;
        self.session.clear().await
    }

    /// Roster with online flags, the local user forced online.
    pub async fn crew(&self) -> Vec<CrewMember> {
        let self_id = self.session.profile_id().await;
        self.presence.crew(self_id.as_deref()).await
    }

    /// Stop every background task.
    pub async fn shutdown(&self) {
        self.messages.select_peer(None).await;
        self.tasks.cancel();
        info!("Crew client stopped");
    }

    async fn restart_heartbeat(&self) {
        let mut slot = self.heartbeat.lock().await;
        if let Some(old) = slot.take() {
            old.cancel();
        }
        if self.session.profile_id().await.is_none() {
            return;
        }

        let token = self.tasks.child_token();
        tokio::spawn(presence::run_heartbeat(
            self.store.clone(),
            self.session.clone(),
            self.config.heartbeat_interval,
            token.clone(),
        ));
        *slot = Some(token);
    }
}
