use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use glimpse_types::events::GatewayEvent;

/// Manages all connected clients and broadcasts events.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events; each connection filters
    /// conversation-scoped events against its own subscription set.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Track online users: user_id -> (owning connection id, username).
    /// The connection id guards against a newer connection for the same
    /// user being clobbered by the old one's disconnect.
    online_users: RwLock<HashMap<Uuid, (Uuid, String)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a user as online under a fresh connection id.
    pub async fn user_online(&self, user_id: Uuid, username: String) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner
            .online_users
            .write()
            .await
            .insert(user_id, (conn_id, username.clone()));

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username,
            online: true,
        });

        conn_id
    }

    /// Register a user as offline. Only cleans up if conn_id still owns the
    /// entry — a newer connection has taken over otherwise.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        let username = {
            let mut users = self.inner.online_users.write().await;
            let owns = users
                .get(&user_id)
                .is_some_and(|(owner, _)| *owner == conn_id);
            if !owns {
                // A newer connection has taken over; leave its entry alone
                return;
            }
            users.remove(&user_id).map(|(_, name)| name)
        };

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            username: username.unwrap_or_default(),
            online: false,
        });
    }

    /// Get list of online users.
    pub async fn online_users(&self) -> Vec<(Uuid, String)> {
        self.inner
            .online_users
            .read()
            .await
            .iter()
            .map(|(id, (_, name))| (*id, name.clone()))
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stale_disconnect_does_not_clobber_new_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let old_conn = dispatcher.user_online(user, "alice".into()).await;
        let _new_conn = dispatcher.user_online(user, "alice".into()).await;

        // The old connection's teardown must not mark the user offline
        dispatcher.user_offline(user, old_conn).await;
        assert_eq!(dispatcher.online_users().await.len(), 1);
    }

    #[tokio::test]
    async fn offline_removes_owning_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let conn = dispatcher.user_online(user, "bob".into()).await;
        dispatcher.user_offline(user, conn).await;
        assert!(dispatcher.online_users().await.is_empty());
    }

    #[tokio::test]
    async fn conversation_scoped_events_reach_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let conversation_id = Uuid::new_v4();
        dispatcher.broadcast(GatewayEvent::TypingUpdate {
            conversation_id,
            user_id: Uuid::new_v4(),
            username: "carol".into(),
            is_typing: true,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.conversation_id(), Some(conversation_id));
    }
}
