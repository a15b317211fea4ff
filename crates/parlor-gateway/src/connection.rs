use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlor_db::Database;
use parlor_types::api::Claims;
use parlor_types::events::{GatewayCommand, GatewayEvent};
use parlor_types::models::User;

use crate::dispatcher::Dispatcher;
use crate::with_db;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a new socket has to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Handle a single WebSocket connection: Identify handshake, Ready, then the
/// event loop until either side goes away.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let Some(claims) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    let external_id = claims.sub.clone();
    let user = match with_db(&db, move |db| db.get_user_by_external_id(&external_id)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("Gateway identify for unsynced identity {}", claims.sub);
            return;
        }
        Err(e) => {
            warn!("Gateway identify lookup failed: {}", e);
            return;
        }
    };

    info!("{} ({}) connected to gateway", user.name, user.id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id: user.id,
        name: user.name.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, db, user).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    user: User,
) {
    let user_id = user.id;
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    // Connecting counts as a heartbeat
    match with_db(&db, move |db| db.heartbeat(user_id, None)).await {
        Ok(true) => dispatcher.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: true,
        }),
        Ok(false) => {}
        Err(e) => warn!("Initial heartbeat for {} failed: {}", user_id, e),
    }

    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection conversation subscriptions (shared between send and recv tasks).
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with ping heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
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

                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if let Ok(mut subs) = send_subscriptions.write() {
                        prune_subscriptions(&mut subs, user_id, &event);
                    }
                    if !send_event(&mut sender, &event).await {
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
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_db = db.clone();
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, &recv_db, &recv_user, cmd, &subscriptions).await;
                    }
                    Err(e) => {
                        let raw: String = text.as_str().chars().take(200).collect();
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_user.name, recv_user.id, e, raw
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

    // Only the connection that still owns the user's channel signs them off;
    // a newer connection may have taken over.
    if dispatcher.unregister_user_channel(user_id, conn_id).await {
        match with_db(&db, move |db| db.go_offline(user_id)).await {
            Ok(()) => dispatcher.broadcast(GatewayEvent::PresenceUpdate {
                user_id,
                online: false,
            }),
            Err(e) => warn!("Sign-off for {} failed: {}", user_id, e),
        }
    }
    info!("{} ({}) disconnected from gateway", user.name, user_id);
}

/// Drop a conversation from the subscription set once a membership update
/// shows the user is no longer part of it.
fn prune_subscriptions(subscriptions: &mut HashSet<Uuid>, user_id: Uuid, event: &GatewayEvent) {
    if let GatewayEvent::ConversationUpdate {
        conversation_id,
        conversation,
    } = event
    {
        if !conversation.has_participant(user_id) && subscriptions.remove(conversation_id) {
            debug!("{} unsubscribed from {} after leaving it", user_id, conversation_id);
        }
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            true
        }
    }
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(text.as_str())
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
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user: &User,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
) {
    let user_id = user.id;
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { conversation_ids } => {
            let requested = conversation_ids.len();
            let allowed = with_db(db, move |db| {
                let mut allowed = HashSet::new();
                for id in conversation_ids {
                    if db.is_participant(id, user_id)? {
                        allowed.insert(id);
                    }
                }
                Ok(allowed)
            })
            .await;

            match allowed {
                Ok(allowed) => {
                    info!(
                        "{} ({}) subscribing to {} of {} requested conversations",
                        user.name,
                        user_id,
                        allowed.len(),
                        requested
                    );
                    if let Ok(mut subs) = subscriptions.write() {
                        *subs = allowed;
                    }
                }
                Err(e) => warn!("{} ({}) subscribe failed: {}", user.name, user_id, e),
            }
        }

        GatewayCommand::StartTyping { conversation_id } => {
            match with_db(db, move |db| db.set_typing(conversation_id, user_id)).await {
                Ok(_) => dispatcher.broadcast(GatewayEvent::TypingStart {
                    conversation_id,
                    user_id,
                    name: user.name.clone(),
                }),
                Err(e) => warn!("{} ({}) typing rejected: {}", user.name, user_id, e),
            }
        }

        GatewayCommand::StopTyping { conversation_id } => {
            match with_db(db, move |db| db.clear_typing(conversation_id, user_id)).await {
                Ok(true) => dispatcher.broadcast(GatewayEvent::TypingStop {
                    conversation_id,
                    user_id,
                }),
                Ok(false) => {}
                Err(e) => warn!("{} ({}) clear typing failed: {}", user.name, user_id, e),
            }
        }

        GatewayCommand::Heartbeat { conversation_id } => {
            match with_db(db, move |db| db.heartbeat(user_id, conversation_id)).await {
                Ok(came_online) => {
                    debug!("Heartbeat from {} ({:?})", user_id, conversation_id);
                    if came_online {
                        dispatcher.broadcast(GatewayEvent::PresenceUpdate {
                            user_id,
                            online: true,
                        });
                    }
                }
                Err(e) => warn!("{} ({}) heartbeat rejected: {}", user.name, user_id, e),
            }
        }
    }
}
