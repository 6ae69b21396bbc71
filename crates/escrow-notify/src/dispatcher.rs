use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use escrow_types::events::EscrowEvent;

/// Routes dashboard events to the connected sessions of their recipient.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every event, for in-process observers
    broadcast_tx: broadcast::Sender<EscrowEvent>,

    /// Per-user live sessions: user_id -> (conn_id -> sender)
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<EscrowEvent>>>>,
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

    /// Subscribe to every event regardless of recipient.
    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Register a live session for a user. Returns (conn_id, receiver).
    pub async fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<EscrowEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(sessions) = channels.get_mut(&user_id) {
            sessions.remove(&conn_id);
            if sessions.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Deliver an event to its recipient's sessions and to all subscribers.
    pub async fn notify(&self, event: EscrowEvent) {
        let recipient = event.recipient();
        debug!(
            "Notifying user {} about transaction {}",
            recipient,
            event.transaction_id()
        );

        {
            let channels = self.inner.user_channels.read().await;
            if let Some(sessions) = channels.get(&recipient) {
                for tx in sessions.values() {
                    let _ = tx.send(event.clone());
                }
            }
        }

        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Number of users with at least one live session.
    pub async fn connected_users(&self) -> usize {
        self.inner.user_channels.read().await.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
