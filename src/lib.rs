//! # wspush
//! A push-capable WebSocket server core built directly on TCP sockets.
//!
//! The crate implements the RFC 6455 base framing protocol (no extensions,
//! no opening HTTP handshake) together with the server-side machinery
//! around it: a per-connection receive loop with automatic control-frame
//! handling, a process-wide connection registry keyed by a monotonically
//! assigned connection id, and a background push dispatcher that lets any
//! other part of a program deliver messages to a connection by id.
//!
//! # Architecture
//!
//! - [`frame`] and [`codec`] form the pure protocol layer: decoding raw
//!   byte streams into [`Frame`]s, building outgoing frames, and
//!   masking/unmasking payloads. No I/O, no shared state.
//! - Each accepted socket is driven by its own tokio task. The task owns
//!   the socket, reads and decodes frames, answers pings, replies to close
//!   frames, reassembles fragmented messages, and removes itself from the
//!   registry when the peer goes away.
//! - The [`Registry`] is the only structure shared between tasks: the
//!   listener inserts on accept, a connection removes itself on teardown,
//!   and the push dispatcher reads it to route outbound messages.
//! - The push dispatcher is a single long-lived task draining a
//!   multi-producer queue of `(connection id, message)` pairs. Producers
//!   obtain a cloneable [`PushHandle`] and never block: delivery order per
//!   connection is FIFO, failures are isolated per message.
//!
//! # Example
//!
//! ```no_run
//! use wspush::{Options, Server, ServerEvent};
//!
//! #[tokio::main]
//! async fn main() -> wspush::Result<()> {
//!     let mut server = Server::new(Options::default());
//!     let push = server.push_handle();
//!     let mut events = server.events();
//!
//!     let listener = server.bind("127.0.0.1:9001".parse().unwrap()).await;
//!     tokio::spawn(listener.run());
//!
//!     while let Some(event) = events.recv().await {
//!         if let ServerEvent::Text { id, text } = event {
//!             // Echo back through the push path.
//!             push.enqueue(id, text)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Scope
//!
//! TLS termination, the opening HTTP handshake, subprotocol negotiation
//! and the permessage-deflate extension are deliberately out of scope;
//! clients are expected to speak base frames on a plain TCP connection.
//! Incoming fragmented messages are reassembled; outgoing messages are
//! always sent as a single final frame.

pub mod codec;
pub mod frame;
mod mask;
mod server;

use thiserror::Error;

pub use frame::{Frame, FrameView, OpCode};
pub use server::{
    ConnId, Listener, Options, PushHandle, PushMessage, Registry, Server, ServerEvent,
    HEARTBEAT_TIMEOUT, LISTEN_BACKLOG, MAX_PAYLOAD_READ, MAX_PUSH_PAYLOAD, MAX_READ_BUFFER,
    RETRY_BACKOFF,
};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
///
/// This type alias simplifies function signatures within the crate by providing a
/// standard result type for operations that may return a `WebSocketError`.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur while running the WebSocket server core.
///
/// The variants fall into three groups:
///
/// - Protocol and data errors observed on a single connection (invalid
///   opcodes, oversized frames, invalid UTF-8). These are fatal at most to
///   the connection that produced them, never to the process.
/// - Push-path errors surfaced to enqueuing callers (unknown connection
///   id, oversized message, dispatcher gone).
/// - I/O errors from the underlying sockets.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Receipt of a frame with an opcode outside the set defined by
    /// RFC 6455 (0x3-0x7 and 0xB-0xF are reserved).
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// A received masked text payload was not valid UTF-8. Recoverable:
    /// the payload is dropped and the connection stays open.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// Returned when attempting to perform operations on a closed
    /// connection, or when the peer ends the stream.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// A received frame's payload length exceeds the configured read
    /// limit. Fatal to the connection; prevents memory exhaustion from a
    /// single peer.
    #[error("Frame too large")]
    FrameTooLarge,

    /// An enqueued push message exceeds the configured outbound payload
    /// limit. Surfaced to the enqueuing caller instead of being silently
    /// dropped.
    #[error("Message too large ({size} bytes, limit {max})")]
    MessageTooLarge {
        /// Size of the rejected payload in bytes.
        size: usize,
        /// The configured limit the payload exceeded.
        max: usize,
    },

    /// A push target id is not present in the registry. Recoverable: the
    /// dispatcher logs it and moves on to the next message.
    #[error("Connection {0} not found")]
    ConnectionNotFound(u64),

    /// The push queue has no consumer anymore (the server shut down
    /// before the message was enqueued).
    #[error("Push queue is closed")]
    PushQueueClosed,

    /// A liveness probe did not complete: the bounded wait expired or the
    /// next frame on the stream was not a pong.
    #[error("Heartbeat failed")]
    HeartbeatFailed,

    /// Wraps standard I/O errors that may occur during socket
    /// communication, such as connection resets.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}
