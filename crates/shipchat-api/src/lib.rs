pub mod auth;
pub mod messages;
pub mod middleware;
pub mod moderation;
pub mod profiles;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// REST routes: profile creation is public, everything else needs a token.
pub fn routes(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/profiles", post(profiles::save_profile))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/profiles", get(profiles::list_profiles))
        .route("/profiles/heartbeat", post(profiles::heartbeat))
        .route("/profiles/{user_id}/report", post(moderation::report_profile))
        .route(
            "/peers/{peer_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
