use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};

use shipchat_gateway::connection::verify_token;
use shipchat_types::api::Claims;

use crate::auth::AppState;

/// Extract and validate the JWT from the Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = bearer_claims(&state, req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Claims of a valid `Bearer` token, if the request carries one.
pub fn bearer_claims(state: &AppState, headers: &HeaderMap) -> Option<Claims> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?
        .strip_prefix("Bearer ")?;
    verify_token(&state.jwt_secret, token)
}
