use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::api::Claims;
use parley_types::errors;
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a single WebSocket connection: Identify handshake, then relay
/// appends for every conversation the client subscribes to.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let Some(user_id) = wait_for_identify(&mut receiver, &db, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    info!("{} connected to gateway", user_id);

    // Step 2: Send Ready event
    if send_event(&mut sender, &GatewayEvent::Ready { user_id }).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user_id).await;
    info!("{} disconnected from gateway", user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user_id: Uuid,
) {
    let mut broadcast_rx = dispatcher.subscribe();

    // Direct replies (subscription acks) for this connection only.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    // Per-connection conversation subscriptions (shared between send and recv tasks).
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward subscribed appends + direct replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // The client resynchronises from a snapshot on reconnect.
                            warn!("Broadcast receiver for {} lagged by {} events, dropping connection", user_id, n);
                            break;
                        }
                        Err(_) => break,
                    };

                    if let Some(conversation_id) = event.conversation_id() {
                        let subscribed = send_subscriptions
                            .read()
                            .map(|subs| subs.contains(&conversation_id))
                            .unwrap_or(false);
                        if !subscribed {
                            continue;
                        }
                    }

                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
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
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&db, user_id, cmd, &subscriptions, &reply_tx).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
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

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    db: &Arc<Database>,
    jwt_secret: &str,
) -> Option<Uuid> {
    let claims = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;
                    return Some(token_data.claims);
                }
            }
        }
        None
    })
    .await
    .ok()
    .flatten()?;

    let db = db.clone();
    let active = tokio::task::spawn_blocking(move || db.is_session_active(&claims.sid, &claims.sub))
        .await
        .ok()?
        .ok()?;

    active.then_some(claims.sub)
}

async fn handle_command(
    db: &Arc<Database>,
    user_id: Uuid,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
    reply_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { conversation_id } => {
            let db = db.clone();
            let participants = tokio::task::spawn_blocking(move || {
                db.get_conversation_participants(&conversation_id)
            })
            .await;

            let rejection = match participants {
                Ok(Ok(Some(p))) if p.contains(&user_id) => None,
                Ok(Ok(Some(_))) => Some(errors::PERMISSION_DENIED),
                Ok(Ok(None)) => Some(errors::NOT_FOUND),
                _ => Some(errors::INTERNAL),
            };
            if let Some(code) = rejection {
                warn!("{} may not subscribe to conversation {}: {}", user_id, conversation_id, code);
                let _ = reply_tx.send(GatewayEvent::SubscriptionRejected {
                    conversation_id,
                    code: code.to_string(),
                });
                return;
            }

            if let Ok(mut subs) = subscriptions.write() {
                subs.insert(conversation_id);
            }
            debug!("{} subscribed to conversation {}", user_id, conversation_id);
            let _ = reply_tx.send(GatewayEvent::Subscribed { conversation_id });
        }

        GatewayCommand::Unsubscribe { conversation_id } => {
            if let Ok(mut subs) = subscriptions.write() {
                subs.remove(&conversation_id);
            }
            debug!("{} unsubscribed from conversation {}", user_id, conversation_id);
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
