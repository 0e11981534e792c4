//! Per-connection lifecycle.
//!
//! Each accepted socket is owned by exactly one [`Connection`], driven on
//! its own tokio task. The task reads and decodes frames, answers control
//! frames, reassembles fragmented messages, drains the connection's
//! outbound queue (push deliveries), and tears itself down — registry
//! removal included — on every exit path.

use std::net::SocketAddr;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::{
    codec::Codec,
    frame::{Frame, FrameView, OpCode},
    Result, WebSocketError,
};

use super::registry::{ConnId, Registry};
use super::{Options, ServerEvent, MAX_PAYLOAD_READ, MAX_READ_BUFFER};

/// Fragmented message in progress: the opcode of the first frame and
/// whether every fragment so far was masked on the wire.
struct Fragment {
    opcode: OpCode,
    was_masked: bool,
}

/// One accepted client connection.
///
/// Owns the socket exclusively. Everything the rest of the process wants
/// to write to this peer goes through the outbound queue registered in
/// the [`Registry`], so socket writes are serialized with the
/// connection's own control-frame replies.
pub(crate) struct Connection {
    id: ConnId,
    peer: SocketAddr,
    stream: Framed<TcpStream, Codec>,
    registry: Registry,
    events: mpsc::UnboundedSender<ServerEvent>,
    outbound: mpsc::UnboundedReceiver<FrameView>,
    fragment: Option<Fragment>,
    accumulated: BytesMut,
    max_read_buffer: usize,
    options: Options,
}

impl Connection {
    pub(crate) fn new(
        id: ConnId,
        peer: SocketAddr,
        socket: TcpStream,
        outbound: mpsc::UnboundedReceiver<FrameView>,
        registry: Registry,
        events: mpsc::UnboundedSender<ServerEvent>,
        options: Options,
    ) -> Self {
        let max_payload_read = options.max_payload_read.unwrap_or(MAX_PAYLOAD_READ);
        let max_read_buffer = options.max_read_buffer.unwrap_or(
            options
                .max_payload_read
                .map(|payload_read| payload_read * 2)
                .unwrap_or(MAX_READ_BUFFER),
        );

        Self {
            id,
            peer,
            stream: Framed::new(socket, Codec::new(max_payload_read)),
            registry,
            events,
            outbound,
            fragment: None,
            accumulated: BytesMut::with_capacity(1024),
            max_read_buffer,
            options,
        }
    }

    /// Entry point, spawned by the listener. Never panics the task over a
    /// peer's behavior: every failure ends in teardown of this connection
    /// only.
    pub(crate) async fn run(mut self) {
        match self.serve().await {
            Ok(()) => log::info!("connection {} ({}) closed", self.id, self.peer),
            Err(err) => log::error!("connection {} ({}) failed: {err}", self.id, self.peer),
        }

        self.teardown().await;
    }

    /// Receive loop: decoded frames on one side, queued outbound frames
    /// (pushes) on the other. Returns `Ok(())` on an orderly or abrupt
    /// close, `Err` on a protocol or socket failure.
    async fn serve(&mut self) -> Result<()> {
        if self.options.probe_on_accept {
            self.heartbeat().await?;
        }

        loop {
            tokio::select! {
                incoming = self.stream.next() => {
                    let frame = match incoming {
                        Some(frame) => frame?,
                        None => {
                            // Zero-length read: the peer dropped the TCP
                            // connection without a close frame. No reply
                            // possible, just tear down.
                            log::warn!("connection {} ended abruptly", self.id);
                            return Ok(());
                        }
                    };

                    if self.on_frame(frame).await? {
                        return Ok(());
                    }
                }
                queued = self.outbound.recv() => {
                    match queued {
                        Some(view) => self.stream.send(Frame::from(view)).await?,
                        // Registry entry gone before teardown; shut down.
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    /// Sends a ping and waits one bounded decode cycle for the answer.
    ///
    /// Success iff the next decoded frame is a pong. A timeout, an end of
    /// stream or any other frame fails the probe.
    async fn heartbeat(&mut self) -> Result<()> {
        self.stream
            .send(Frame::new(true, OpCode::Ping, None, BytesMut::new()))
            .await?;

        let deadline = self
            .options
            .heartbeat_timeout
            .unwrap_or(super::HEARTBEAT_TIMEOUT);

        match timeout(deadline, self.stream.next()).await {
            Ok(Some(Ok(frame))) if frame.opcode == OpCode::Pong => {
                log::info!("connection {} liveness probe acknowledged", self.id);
                Ok(())
            }
            Ok(Some(Ok(frame))) => {
                log::error!(
                    "connection {} answered liveness probe with {:?}",
                    self.id,
                    frame.opcode
                );
                Err(WebSocketError::HeartbeatFailed)
            }
            Ok(Some(Err(err))) => Err(err),
            Ok(None) => Err(WebSocketError::ConnectionClosed),
            Err(_) => {
                log::error!("connection {} liveness probe timed out", self.id);
                Err(WebSocketError::HeartbeatFailed)
            }
        }
    }

    /// Dispatches one decoded frame. Returns `Ok(true)` when the close
    /// handshake completed and the loop should stop.
    async fn on_frame(&mut self, frame: Frame) -> Result<bool> {
        match frame.opcode {
            OpCode::Close => {
                log::info!("connection {} received close frame", self.id);
                // Exactly one empty close reply, then stop reading.
                self.stream
                    .send(Frame::new(true, OpCode::Close, None, BytesMut::new()))
                    .await?;
                Ok(true)
            }
            OpCode::Ping => {
                self.stream
                    .send(Frame::new(true, OpCode::Pong, None, frame.payload))
                    .await?;
                Ok(false)
            }
            OpCode::Pong => {
                // No probe pending: nothing to satisfy.
                log::debug!("connection {} received unsolicited pong", self.id);
                Ok(false)
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if let Some((opcode, payload, was_masked)) = self.assemble(frame)? {
                    self.deliver(opcode, payload, was_masked);
                }
                Ok(false)
            }
        }
    }

    /// Folds a data frame into the fragmentation state.
    ///
    /// Returns the completed message once a final frame arrives: the
    /// opcode of the initial frame, the full payload, and whether every
    /// wire frame of the message was masked. Stray continuations and a
    /// data frame arriving while another fragmented message is open are
    /// logged and dropped with the state reset.
    fn assemble(&mut self, frame: Frame) -> Result<Option<(OpCode, BytesMut, bool)>> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    log::warn!(
                        "connection {} started a new message inside a fragmented one, dropping both",
                        self.id
                    );
                    self.fragment = None;
                    self.accumulated.clear();
                    return Ok(None);
                }

                if !frame.fin {
                    self.fragment = Some(Fragment {
                        opcode: frame.opcode,
                        was_masked: frame.was_masked(),
                    });
                    self.accumulated.extend_from_slice(&frame.payload);

                    Ok(None)
                } else {
                    let was_masked = frame.was_masked();
                    Ok(Some((frame.opcode, frame.payload, was_masked)))
                }
            }
            OpCode::Continuation => {
                if self.fragment.is_none() {
                    log::warn!(
                        "connection {} sent a continuation with no message in progress, dropping",
                        self.id
                    );
                    return Ok(None);
                }

                if self.accumulated.len() + frame.payload.len() >= self.max_read_buffer {
                    return Err(WebSocketError::FrameTooLarge);
                }
                self.accumulated.extend_from_slice(&frame.payload);

                let fragment = self.fragment.as_mut().expect("fragment in progress");
                fragment.was_masked &= frame.was_masked();

                if frame.fin {
                    // Hand out the accumulated buffer and start a fresh
                    // one at its initial capacity.
                    let payload =
                        std::mem::replace(&mut self.accumulated, BytesMut::with_capacity(1024));
                    let fragment = self.fragment.take().expect("fragment in progress");

                    Ok(Some((fragment.opcode, payload, fragment.was_masked)))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    /// Surfaces a completed message to the application event stream.
    ///
    /// Text payloads are interpreted only when the wire frames were
    /// masked, as client frames normatively are; unmasked text and
    /// invalid UTF-8 are logged and dropped without affecting the
    /// connection.
    fn deliver(&mut self, opcode: OpCode, payload: BytesMut, was_masked: bool) {
        match opcode {
            OpCode::Text => {
                if !was_masked {
                    log::warn!(
                        "connection {} sent an unmasked text frame, payload not interpreted",
                        self.id
                    );
                    return;
                }

                let view = FrameView::text(payload.freeze());
                match view.to_text() {
                    Ok(text) => {
                        let text = text.to_owned();
                        let _ = self.events.send(ServerEvent::Text { id: self.id, text });
                    }
                    Err(err) => {
                        log::error!("connection {} text payload dropped: {err}", self.id);
                    }
                }
            }
            OpCode::Binary => {
                let _ = self.events.send(ServerEvent::Binary {
                    id: self.id,
                    payload: payload.freeze(),
                });
            }
            _ => {}
        }
    }

    /// Runs on every exit path: remove the registry entry (idempotent),
    /// emit the closed event, flush and shut the socket down.
    async fn teardown(mut self) {
        if self.registry.remove(self.id).await {
            log::info!("connection {} removed from registry", self.id);
        }

        let _ = self.events.send(ServerEvent::Closed { id: self.id });

        // The peer may already be gone; a failed shutdown is fine.
        let _ = self.stream.close().await;
    }
}
