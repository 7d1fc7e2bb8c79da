use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use shipchat_api::auth::{AppState, AppStateInner};
use shipchat_core::store::{DocumentStore, SqliteStore, StoreChange};
use shipchat_core::{ChatConfig, Moderation, PresenceTracker, RetentionSweeper};
use shipchat_gateway::connection::{self, GatewayContext};
use shipchat_gateway::dispatcher::Dispatcher;
use shipchat_types::events::GatewayEvent;

const DEV_SECRET: &str = "dev-secret-change-me";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipchat=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("SHIPCHAT_JWT_SECRET").unwrap_or_else(|_| DEV_SECRET.into());
    if jwt_secret == DEV_SECRET {
        warn!("SHIPCHAT_JWT_SECRET not set, using the development secret");
    }
    let db_path = std::env::var("SHIPCHAT_DB_PATH").unwrap_or_else(|_| "shipchat.db".into());
    let host = std::env::var("SHIPCHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("SHIPCHAT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let config = ChatConfig::from_env()?;

    // Init database
    let db = Arc::new(shipchat_db::Database::open(&PathBuf::from(&db_path))?);
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(db));

    // Background tasks
    let tasks = CancellationToken::new();
    let dispatcher = Dispatcher::new();

    let presence = Arc::new(PresenceTracker::new(config.online_timeout));
    tokio::spawn(presence.clone().run_ticker(config.presence_tick, tasks.child_token()));
    tokio::spawn(
        presence
            .clone()
            .run_roster_listener(store.clone(), tasks.child_token()),
    );

    let sweeper = Arc::new(RetentionSweeper::new(store.clone(), config.clone()));
    tokio::spawn(forward_notices(sweeper.notices(), dispatcher.clone(), tasks.child_token()));
    tokio::spawn(sweeper.run(tasks.child_token()));
    tokio::spawn(forward_roster_changes(store.clone(), dispatcher.clone(), tasks.child_token()));

    // Shared state
    let moderation = Moderation::new(store.clone(), presence.clone(), None, config.report_threshold);
    let gateway = GatewayContext {
        store: store.clone(),
        dispatcher: dispatcher.clone(),
        jwt_secret: jwt_secret.clone(),
        page_size: config.initial_page,
    };
    let app_state: AppState = Arc::new(AppStateInner {
        store,
        presence,
        moderation,
        dispatcher,
        jwt_secret,
        config,
    });

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(shipchat_api::routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Shipchat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.cancel();
    Ok(())
}

async fn ws_upgrade(State(ctx): State<GatewayContext>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx))
}

/// Relay each new cleanup notice to every gateway client.
async fn forward_notices(
    mut notices: watch::Receiver<Option<String>>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = notices.changed() => {
                if changed.is_err() {
                    break;
                }
                let notice = notices.borrow_and_update().clone();
                if let Some(text) = notice {
                    dispatcher.broadcast(GatewayEvent::CleanupNotice { text });
                }
            }
        }
    }
}

/// Tell gateway clients to refetch the roster whenever profiles change.
async fn forward_roster_changes(
    store: Arc<dyn DocumentStore>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
) {
    let mut changes = store.changes();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Ok(StoreChange::Profiles) | Err(RecvError::Lagged(_)) => {
                    dispatcher.broadcast(GatewayEvent::RosterChanged);
                }
                Ok(StoreChange::Messages(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
