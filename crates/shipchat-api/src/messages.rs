use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use shipchat_core::channel_id;
use shipchat_core::send::deliver;
use shipchat_types::api::{Claims, MessageResponse, SendMessageRequest};
use shipchat_types::models::{MessageKind, StoredMessage};

use crate::auth::AppState;

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub limit: Option<u32>,
    /// Cursor: timestamp of the oldest message already held. Only strictly
    /// older messages are returned.
    pub before: Option<DateTime<Utc>>,
}

/// A page of the caller's conversation with `peer_id`, ascending.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let cid = channel_id(&claims.sub, &peer_id).ok_or(StatusCode::BAD_REQUEST)?;

    let default_limit = match query.before {
        Some(_) => state.config.load_more_page,
        None => state.config.initial_page,
    };
    let limit = query.limit.unwrap_or(default_limit).clamp(1, MAX_PAGE);

    let rows = match query.before {
        Some(before) => state.store.messages_before(&cid, before, limit).await,
        None => state.store.latest_messages(&cid, limit).await,
    }
    .map_err(|e| {
        warn!("Error loading messages for {}: {}", cid, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .rev()
        .map(|m| MessageResponse::from_stored(m, &claims.sub))
        .collect();

    Ok(Json(messages))
}

/// Durable send: the channel document is merged, then the message appended.
/// Live viewers pick it up through the store's change feed.
pub async fn send_message(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.text.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let cid = channel_id(&claims.sub, &peer_id).ok_or(StatusCode::BAD_REQUEST)?;

    // A token can outlive its profile (moderation removal).
    let sender = state
        .store
        .get_profile(&claims.sub)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::FORBIDDEN)?;

    let message = StoredMessage {
        id: Uuid::new_v4().to_string(),
        channel_id: cid.clone(),
        text: req.text,
        sender_id: sender.id.clone(),
        sender_name: sender.display_name().to_string(),
        timestamp: Utc::now(),
        kind: MessageKind::Text,
    };

    deliver(state.store.as_ref(), &message, &peer_id)
        .await
        .map_err(|e| {
            warn!("Error sending message to {}: {}", cid, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::from_stored(message, &claims.sub)),
    ))
}
