use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use shipchat_core::ReportOutcome;
use shipchat_types::api::{Claims, ReportResponse};
use shipchat_types::events::GatewayEvent;

use crate::auth::AppState;

/// Report `user_id` on behalf of the caller. Repeat reports from the same
/// caller are accepted but not counted again.
pub async fn report_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    state
        .store
        .get_profile(&user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let outcome = state.moderation.report(&user_id, &claims.sub).await;
    let removed = outcome == ReportOutcome::Removed;
    if removed {
        info!("{} removed after reports", user_id);
        state
            .dispatcher
            .broadcast(GatewayEvent::ProfileRemoved { user_id: user_id.clone() });
    }

    Ok(Json(ReportResponse {
        reports: state.moderation.report_count(&user_id).await,
        removed,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use shipchat_types::api::ReportResponse;
    use shipchat_types::events::GatewayEvent;

    use crate::test_support::{call, json, sign_up, state};

    #[tokio::test]
    async fn test_fifth_distinct_report_removes_profile() {
        let state = state();
        let app = crate::routes(state.clone());
        sign_up(&app, "user_x", "Xavi").await;
        let mut events = state.dispatcher.subscribe();

        let mut tokens = Vec::new();
        for r in 1..=5 {
            tokens.push(sign_up(&app, &format!("user_r{r}"), "Reporter").await);
        }

        for (i, token) in tokens.iter().take(4).enumerate() {
            let (status, body) = call(&app, "POST", "/profiles/user_x/report", Some(token), None).await;
            assert_eq!(status, StatusCode::OK);
            let res: ReportResponse = json(&body);
            assert_eq!(res.reports, i + 1);
            assert!(!res.removed);
        }

        // Same reporter again: no change.
        let (_, body) = call(&app, "POST", "/profiles/user_x/report", Some(&tokens[0]), None).await;
        assert_eq!(json::<ReportResponse>(&body).reports, 4);

        let (_, body) = call(&app, "POST", "/profiles/user_x/report", Some(&tokens[4]), None).await;
        let res: ReportResponse = json(&body);
        assert!(res.removed);
        assert_eq!(res.reports, 5);
        assert!(state.store.get_profile("user_x").await.unwrap().is_none());

        match events.recv().await.unwrap() {
            GatewayEvent::ProfileRemoved { user_id } => assert_eq!(user_id, "user_x"),
            other => panic!("unexpected event {other:?}"),
        }

        // Gone now.
        let (status, _) = call(&app, "POST", "/profiles/user_x/report", Some(&tokens[1]), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
