//! Shared connection registry.
//!
//! The registry is the single structure shared between the listener, the
//! connection tasks and the push dispatcher: identity in, outbound handle
//! out. An identity present in the map denotes a connection the dispatcher
//! may legally address; absence is the recoverable not-found condition.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use tokio::sync::{mpsc, RwLock};

use crate::{frame::FrameView, Result, WebSocketError};

/// Process-unique connection identity.
///
/// Assigned sequentially by the listener starting at 1 and never reused
/// for the lifetime of the process.
pub type ConnId = u64;

/// Per-connection handle stored in the registry.
///
/// Holds the sending side of the connection's outbound frame queue rather
/// than the socket itself: the connection task owns the socket exclusively
/// and drains this queue, so writes from the push dispatcher are
/// serialized with the connection's own control-frame replies. A
/// concurrent close shows up here as a closed channel, not a torn write.
pub(crate) struct ConnectionHandle {
    /// Outbound frame queue consumed by the connection task.
    pub(crate) outbound: mpsc::UnboundedSender<FrameView>,
    /// Peer address, kept for logging.
    pub(crate) peer: SocketAddr,
}

/// Concurrency-safe mapping from connection identity to its handle.
///
/// Cloning is cheap and shares the underlying map. All operations are safe
/// under concurrent invocation from the listener (register), the owning
/// connection (remove) and the push dispatcher (send).
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<ConnId, ConnectionHandle>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle` under `id`.
    ///
    /// Identities are never reused, so a displaced entry indicates a bug
    /// in the caller; it is logged rather than panicked on.
    pub(crate) async fn register(&self, id: ConnId, handle: ConnectionHandle) {
        let mut map = self.inner.write().await;
        if map.insert(id, handle).is_some() {
            log::error!("connection {id} was already registered, replacing entry");
        }
    }

    /// Removes the entry for `id`, returning whether it was present.
    ///
    /// Removing an absent identity is a no-op: teardown runs on every
    /// connection exit path and must be idempotent.
    pub(crate) async fn remove(&self, id: ConnId) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    /// Queues `frame` on the outbound channel of connection `id`.
    ///
    /// # Errors
    /// - [`WebSocketError::ConnectionNotFound`] if `id` has no entry.
    /// - [`WebSocketError::ConnectionClosed`] if the connection task went
    ///   away between lookup and send.
    pub(crate) async fn send(&self, id: ConnId, frame: FrameView) -> Result<()> {
        let map = self.inner.read().await;
        let handle = map.get(&id).ok_or(WebSocketError::ConnectionNotFound(id))?;
        handle
            .outbound
            .send(frame)
            .map_err(|_| WebSocketError::ConnectionClosed)
    }

    /// Returns the peer address recorded for `id`, if registered.
    pub async fn peer(&self, id: ConnId) -> Option<SocketAddr> {
        self.inner.read().await.get(&id).map(|handle| handle.peer)
    }

    /// Whether `id` currently denotes a live connection.
    pub async fn contains(&self, id: ConnId) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<FrameView>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ConnectionHandle {
                outbound: tx,
                peer: "127.0.0.1:9999".parse().unwrap(),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_register_lookup_remove() {
        let registry = Registry::new();
        let (h, _rx) = handle();

        registry.register(7, h).await;
        assert!(registry.contains(7).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove(7).await);
        assert!(!registry.contains(7).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let registry = Registry::new();
        assert!(!registry.remove(42).await);
        // Idempotent against double teardown.
        assert!(!registry.remove(42).await);
    }

    #[tokio::test]
    async fn test_send_to_unknown_id() {
        let registry = Registry::new();
        let err = registry.send(3, FrameView::text("x")).await.unwrap_err();
        assert!(matches!(err, WebSocketError::ConnectionNotFound(3)));
    }

    #[tokio::test]
    async fn test_send_to_closed_connection() {
        let registry = Registry::new();
        let (h, rx) = handle();
        registry.register(1, h).await;
        drop(rx);

        let err = registry.send(1, FrameView::text("x")).await.unwrap_err();
        assert!(matches!(err, WebSocketError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_send_delivers_in_order() {
        let registry = Registry::new();
        let (h, mut rx) = handle();
        registry.register(1, h).await;

        registry.send(1, FrameView::text("a")).await.unwrap();
        registry.send(1, FrameView::text("b")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().as_str(), "a");
        assert_eq!(rx.recv().await.unwrap().as_str(), "b");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_remove_lookup() {
        // Hammer the map from many writers; no entry may be lost or
        // duplicated.
        let registry = Registry::new();
        let mut tasks = Vec::new();

        for worker in 0u64..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..100 {
                    let id = worker * 1000 + i;
                    let (h, _rx) = handle();
                    registry.register(id, h).await;
                    assert!(registry.contains(id).await);
                    if i % 2 == 0 {
                        assert!(registry.remove(id).await);
                    }
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        // Each worker kept its odd-numbered ids.
        assert_eq!(registry.len().await, 8 * 50);
        assert!(registry.contains(1).await);
        assert!(!registry.contains(2).await);
    }
}
