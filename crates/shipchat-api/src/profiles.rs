use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{info, warn};

use shipchat_types::api::{Claims, SaveProfileRequest, SaveProfileResponse};

use crate::auth::{AppState, create_token};
use crate::middleware::bearer_claims;

/// Create or update a profile. A request without an id gets a fresh
/// time-based one; the response carries the session token for that id.
///
/// Updating an existing profile needs that profile's own bearer token.
pub async fn save_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SaveProfileRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.trim().is_empty() || req.name.len() > 64 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let now = Utc::now();
    let mut profile = req.into_profile();
    if profile.id.trim().is_empty() {
        profile.id = format!("user_{}", now.timestamp_millis());
    } else {
        let existing = state.store.get_profile(&profile.id).await.map_err(|e| {
            warn!("Error loading profile {}: {}", profile.id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        let owner = bearer_claims(&state, &headers).is_some_and(|c| c.sub == profile.id);
        if existing.is_some() && !owner {
            warn!("Rejected update of profile {} without its token", profile.id);
            return Err(StatusCode::FORBIDDEN);
        }
    }
    profile.updated_at = Some(now);

    state.store.upsert_profile(&profile).await.map_err(|e| {
        warn!("Error saving profile {}: {}", profile.id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let token = create_token(&state.jwt_secret, &profile.id, profile.display_name())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("Profile saved: {} ({})", profile.display_name(), profile.id);
    Ok(Json(SaveProfileResponse {
        profile: profile.with_fallbacks(),
        token,
    }))
}

/// The crew roster with derived online flags; the caller is always online.
pub async fn list_profiles(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    Json(state.presence.crew(Some(&claims.sub)).await)
}

/// Refresh the caller's heartbeat.
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, StatusCode> {
    let found = state
        .store
        .touch_profile(&claims.sub, Utc::now())
        .await
        .map_err(|e| {
            warn!("Error updating status for {}: {}", claims.sub, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if found {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
