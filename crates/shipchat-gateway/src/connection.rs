use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shipchat_core::channel_id;
use shipchat_core::store::{DocumentStore, StoreChange};
use shipchat_types::api::{Claims, MessageResponse};
use shipchat_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Shared pieces every connection needs.
#[derive(Clone)]
pub struct GatewayContext {
    pub store: Arc<dyn DocumentStore>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
    /// Messages per channel snapshot
    pub page_size: u32,
}

/// Validate a session token and return its claims.
pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Newest `page_size` messages of a channel, ascending, flagged for `viewer_id`.
pub async fn channel_snapshot(
    store: &dyn DocumentStore,
    channel_id: &str,
    viewer_id: &str,
    page_size: u32,
) -> anyhow::Result<GatewayEvent> {
    let mut rows = store.latest_messages(channel_id, page_size).await?;
    rows.reverse();
    Ok(GatewayEvent::ChannelSnapshot {
        channel_id: channel_id.to_string(),
        messages: rows
            .into_iter()
            .map(|m| MessageResponse::from_stored(m, viewer_id))
            .collect(),
    })
}

/// Handle a single WebSocket connection: Identify handshake, then the
/// event loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();

    let Some(claims) = wait_for_identify(&mut receiver, &ctx.jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };
    let user_id = claims.sub;
    let name = claims.name;

    info!("{} ({}) connected to gateway", name, user_id);

    let ready = GatewayEvent::Ready {
        user_id: user_id.clone(),
        name: name.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    let sockets = ctx.dispatcher.connect(&user_id).await;
    debug!(
        "{} has {} open connection(s), {} users online via gateway",
        user_id,
        sockets,
        ctx.dispatcher.connected_users().await.len()
    );
    run_connection_loop(sender, receiver, ctx.clone(), user_id.clone()).await;
    ctx.dispatcher.disconnect(&user_id).await;

    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn run_connection_loop(
    mut sender: WsSender,
    mut receiver: WsReceiver,
    ctx: GatewayContext,
    user_id: String,
) {
    // The conversation this connection is watching, set by Watch/Unwatch.
    let (watch_tx, mut watch_rx) = watch::channel::<Option<String>>(None);

    let mut broadcast_rx = ctx.dispatcher.subscribe();
    let mut changes = ctx.store.changes();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let send_user = user_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if let Some(cid) = event.channel_id() {
                        if watch_rx.borrow().as_deref() != Some(cid) {
                            continue;
                        }
                    }

                    let removed_self = matches!(
                        &event,
                        GatewayEvent::ProfileRemoved { user_id } if *user_id == send_user
                    );
                    if !send_event(&mut sender, &event).await || removed_self {
                        break;
                    }
                }
                changed = watch_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let watched = watch_rx.borrow_and_update().clone();
                    if let Some(cid) = watched {
                        if !push_snapshot(&mut sender, &ctx, &cid, &send_user).await {
                            break;
                        }
                    }
                }
                result = changes.recv() => {
                    let watched = watch_rx.borrow().clone();
                    let reload = match result {
                        Ok(StoreChange::Messages(cid)) => watched.as_deref() == Some(cid.as_str()),
                        Ok(StoreChange::Profiles) => false,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Change feed lagged by {} events for {}", n, send_user);
                            true
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if let (true, Some(cid)) = (reload, watched) {
                        if !push_snapshot(&mut sender, &ctx, &cid, &send_user).await {
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_user = user_id;
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(cmd) => handle_command(&recv_user, cmd, &watch_tx),
                    Err(e) => {
                        let raw = text.as_str();
                        let cut = raw.char_indices().nth(200).map_or(raw.len(), |(i, _)| i);
                        warn!("{} bad command: {} -- raw: {}", recv_user, e, &raw[..cut]);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

fn handle_command(user_id: &str, cmd: GatewayCommand, watched: &watch::Sender<Option<String>>) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Watch { peer_id } => match channel_id(user_id, &peer_id) {
            Some(cid) => {
                debug!("{} watching {}", user_id, cid);
                watched.send_replace(Some(cid));
            }
            None => warn!("{} tried to watch invalid peer {:?}", user_id, peer_id),
        },

        GatewayCommand::Unwatch => {
            debug!("{} stopped watching", user_id);
            watched.send_replace(None);
        }
    }
}

async fn wait_for_identify(receiver: &mut WsReceiver, jwt_secret: &str) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(text.as_str())
                {
                    return verify_token(jwt_secret, &token);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

/// Returns false once the socket is gone.
async fn send_event(sender: &mut WsSender, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Error encoding gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn push_snapshot(
    sender: &mut WsSender,
    ctx: &GatewayContext,
    channel_id: &str,
    viewer_id: &str,
) -> bool {
    match channel_snapshot(ctx.store.as_ref(), channel_id, viewer_id, ctx.page_size).await {
        Ok(event) => send_event(sender, &event).await,
        Err(e) => {
            warn!("Error loading messages for {}: {}", channel_id, e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use shipchat_core::SqliteStore;
    use shipchat_types::models::{MessageKind, StoredMessage};

    fn token(secret: &str, sub: &str, exp_in: TimeDelta) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            name: "Mara".to_string(),
            exp: (Utc::now() + exp_in).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_verify_token() {
        let good = token("s3cret", "user_1", TimeDelta::days(7));
        assert_eq!(verify_token("s3cret", &good).unwrap().sub, "user_1");
        assert!(verify_token("other", &good).is_none());

        let expired = token("s3cret", "user_1", TimeDelta::days(-1));
        assert!(verify_token("s3cret", &expired).is_none());
    }

    #[test]
    fn test_watch_command_sets_channel() {
        let (tx, rx) = watch::channel(None);
        handle_command("user_b", GatewayCommand::Watch { peer_id: "user_a".into() }, &tx);
        assert_eq!(rx.borrow().as_deref(), Some("user_a_user_b"));

        handle_command("user_b", GatewayCommand::Watch { peer_id: String::new() }, &tx);
        assert_eq!(rx.borrow().as_deref(), Some("user_a_user_b"));

        handle_command("user_b", GatewayCommand::Unwatch, &tx);
        assert_eq!(*rx.borrow(), None);
    }

    #[tokio::test]
    async fn test_snapshot_is_ascending_and_flags_viewer() {
        let store = SqliteStore::in_memory().unwrap();
        let base = Utc::now() - TimeDelta::minutes(5);
        for (i, sender) in ["user_a", "user_b", "user_a"].iter().enumerate() {
            let msg = StoredMessage {
                id: format!("m{i}"),
                channel_id: "user_a_user_b".into(),
                text: format!("hello {i}"),
                sender_id: sender.to_string(),
                sender_name: sender.to_string(),
                timestamp: base + TimeDelta::seconds(i as i64),
                kind: MessageKind::Text,
            };
            let peer = if *sender == "user_a" { "user_b" } else { "user_a" };
            shipchat_core::send::deliver(&store, &msg, peer).await.unwrap();
        }

        let event = channel_snapshot(&store, "user_a_user_b", "user_a", 2).await.unwrap();
        let GatewayEvent::ChannelSnapshot { channel_id, messages } = event else {
            panic!("expected a snapshot");
        };
        assert_eq!(channel_id, "user_a_user_b");
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(!messages[0].is_own);
        assert!(messages[1].is_own);
    }
}
