use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parlor_types::events::GatewayEvent;

/// Fans gateway events out to connected clients.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events. Every connection receives every
    /// event and filters conversation-scoped ones by its subscriptions.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        // No receivers just means nobody is connected.
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a per-user targeted channel. Returns (conn_id, receiver).
    /// A newer connection for the same user replaces the older one.
    pub async fn register_user_channel(
        &self,
        user_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    /// Returns whether the channel was removed.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut channels = self.inner.user_channels.write().await;
        match channels.get(&user_id) {
            Some((stored_conn_id, _)) if *stored_conn_id == conn_id => {
                channels.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Send a targeted event to a specific user, if connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.user_channels.read().await.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let dispatcher = Dispatcher::new();
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();
        let user_id = Uuid::new_v4();

        dispatcher.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            online: true,
        });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                GatewayEvent::PresenceUpdate { user_id: got, online } => {
                    assert_eq!(got, user_id);
                    assert!(online);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn targeted_events_only_reach_their_user() {
        let dispatcher = Dispatcher::new();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (_, mut alice_rx) = dispatcher.register_user_channel(alice).await;
        let (_, mut bob_rx) = dispatcher.register_user_channel(bob).await;
        let conversation_id = Uuid::new_v4();

        dispatcher
            .send_to_user(
                alice,
                GatewayEvent::UnreadUpdate {
                    conversation_id,
                    count: 3,
                },
            )
            .await;

        assert!(matches!(
            alice_rx.recv().await,
            Some(GatewayEvent::UnreadUpdate { count: 3, .. })
        ));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_connection_cannot_unregister_newer_one() {
        let dispatcher = Dispatcher::new();
        let user_id = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register_user_channel(user_id).await;
        let (new_conn, _new_rx) = dispatcher.register_user_channel(user_id).await;

        assert!(!dispatcher.unregister_user_channel(user_id, old_conn).await);
        assert!(dispatcher.is_connected(user_id).await);

        assert!(dispatcher.unregister_user_channel(user_id, new_conn).await);
        assert!(!dispatcher.is_connected(user_id).await);
    }
}
