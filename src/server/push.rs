//! Push-dispatch subsystem.
//!
//! External collaborators (a REST control endpoint, an RPC service) hand
//! messages to the core by connection identity through a [`PushHandle`].
//! A single background dispatcher drains the queue, resolves each
//! identity in the registry and forwards the message to the connection's
//! outbound queue. Per-message failures are logged and never stop the
//! worker; per-identity delivery order is FIFO.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{frame::FrameView, Result, WebSocketError};

use super::registry::{ConnId, Registry};

/// One queued push: a target connection identity and a text payload.
#[derive(Debug)]
pub struct PushMessage {
    /// Identity of the target connection.
    pub id: ConnId,
    /// Message payload, sent as a text frame.
    pub payload: Bytes,
}

/// Producer side of the push queue.
///
/// Cloneable and cheap to pass around; every clone feeds the same
/// dispatcher. [`enqueue`](Self::enqueue) never blocks: the queue is
/// unbounded and the call returns as soon as the message is queued.
#[derive(Clone)]
pub struct PushHandle {
    tx: mpsc::UnboundedSender<PushMessage>,
    max_payload: usize,
}

impl PushHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<PushMessage>, max_payload: usize) -> Self {
        Self { tx, max_payload }
    }

    /// Queues `payload` for delivery to connection `id` as a text frame.
    ///
    /// Returns as soon as the message is enqueued; delivery happens
    /// asynchronously on the dispatcher. A missing target id is *not* an
    /// enqueue error — the dispatcher discovers and logs it, since the
    /// connection may close between this call and delivery either way.
    ///
    /// # Errors
    /// - [`WebSocketError::MessageTooLarge`] if `payload` exceeds the
    ///   configured outbound limit. Surfaced here, at the caller, rather
    ///   than logged and dropped downstream.
    /// - [`WebSocketError::PushQueueClosed`] if the server is gone.
    pub fn enqueue(&self, id: ConnId, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        if payload.len() > self.max_payload {
            return Err(WebSocketError::MessageTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        self.tx
            .send(PushMessage { id, payload })
            .map_err(|_| WebSocketError::PushQueueClosed)
    }
}

/// The background worker draining the push queue.
///
/// Started exactly once by the listener. Runs until every [`PushHandle`]
/// clone has been dropped.
pub(crate) struct PushDispatcher {
    rx: mpsc::UnboundedReceiver<PushMessage>,
    registry: Registry,
}

impl PushDispatcher {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<PushMessage>, registry: Registry) -> Self {
        Self { rx, registry }
    }

    /// Dispatch loop: blocking-dequeue, registry lookup, forward.
    ///
    /// A missing identity or a concurrently closed connection is logged
    /// and the loop continues — one bad delivery must not stop the
    /// dispatcher.
    pub(crate) async fn run(mut self) {
        log::info!("push dispatcher started");

        while let Some(PushMessage { id, payload }) = self.rx.recv().await {
            match self.registry.send(id, FrameView::text(payload)).await {
                Ok(()) => log::debug!("pushed message to connection {id}"),
                Err(WebSocketError::ConnectionNotFound(_)) => {
                    log::error!("push failed: connection {id} not found");
                }
                Err(err) => {
                    log::error!("push to connection {id} failed: {err}");
                }
            }
        }

        log::info!("push dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::registry::ConnectionHandle;
    use crate::OpCode;

    #[tokio::test]
    async fn test_enqueue_too_large() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = PushHandle::new(tx, 8);

        let err = handle.enqueue(1, "way too large").unwrap_err();
        assert!(matches!(
            err,
            WebSocketError::MessageTooLarge { size: 13, max: 8 }
        ));
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = PushHandle::new(tx, 1024);

        let err = handle.enqueue(1, "x").unwrap_err();
        assert!(matches!(err, WebSocketError::PushQueueClosed));
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_connection() {
        let registry = Registry::new();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        registry
            .register(
                5,
                ConnectionHandle {
                    outbound: out_tx,
                    peer: "127.0.0.1:9999".parse().unwrap(),
                },
            )
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(PushDispatcher::new(rx, registry).run());

        let handle = PushHandle::new(tx, 1024);
        handle.enqueue(5, "hello").unwrap();

        let frame = out_rx.recv().await.expect("delivered frame");
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.as_str(), "hello");
    }

    #[tokio::test]
    async fn test_unknown_id_does_not_stop_dispatcher() {
        let registry = Registry::new();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        registry
            .register(
                1,
                ConnectionHandle {
                    outbound: out_tx,
                    peer: "127.0.0.1:9999".parse().unwrap(),
                },
            )
            .await;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(PushDispatcher::new(rx, registry).run());

        let handle = PushHandle::new(tx, 1024);
        // First push targets a connection that does not exist; the
        // dispatcher must log it and keep going.
        handle.enqueue(999, "nobody home").unwrap();
        handle.enqueue(1, "still alive").unwrap();

        let frame = out_rx.recv().await.expect("delivered frame");
        assert_eq!(frame.as_str(), "still alive");
    }
}
