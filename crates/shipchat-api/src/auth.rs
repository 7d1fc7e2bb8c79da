use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};

use shipchat_core::store::DocumentStore;
use shipchat_core::{ChatConfig, Moderation, PresenceTracker};
use shipchat_gateway::dispatcher::Dispatcher;
use shipchat_types::api::Claims;

/// Session tokens live as long as the browser's user-id cookie did.
pub const TOKEN_TTL_DAYS: i64 = 7;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<dyn DocumentStore>,
    pub presence: Arc<PresenceTracker>,
    pub moderation: Moderation,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    pub config: ChatConfig,
}

pub fn create_token(secret: &str, user_id: &str, name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        name: name.to_string(),
        exp: (Utc::now() + TimeDelta::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
