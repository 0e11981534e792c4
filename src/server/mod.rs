//! WebSocket server runtime: listener, connection registry, push
//! dispatcher and configuration.
//!
//! The pieces fit together like this: [`Server::new`] constructs the
//! registry, the push queue and the event channel once, and hands out
//! their far ends ([`Server::push_handle`], [`Server::events`]).
//! [`Server::bind`] turns the server into a [`Listener`], retrying the
//! bind forever — staying up and retrying is preferred over crash-looping
//! when a port is temporarily taken. [`Listener::run`] starts the push
//! dispatcher exactly once and then accepts connections, spawning one
//! task per socket.

mod connection;
mod push;
mod registry;

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::mpsc;

use crate::Result;

use connection::Connection;
use push::PushDispatcher;
use registry::ConnectionHandle;

pub use push::{PushHandle, PushMessage};
pub use registry::{ConnId, Registry};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit will be rejected to ensure memory safety
/// and prevent excessively large messages from impacting performance.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed read buffer size, set to 2 MiB.
///
/// When the buffer accumulating a fragmented message exceeds this size,
/// the connection is closed to prevent unbounded memory growth.
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// The maximum allowed payload size for a single push message, set to 8 MiB.
///
/// Oversized enqueues are rejected at the caller with
/// [`crate::WebSocketError::MessageTooLarge`].
pub const MAX_PUSH_PAYLOAD: usize = 8 * 1024 * 1024;

/// Default TCP listen backlog.
pub const LISTEN_BACKLOG: u32 = 5;

/// Default delay between bind attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Default bounded wait for a liveness-probe answer.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration options for the server.
///
/// `Options` allows users to set parameters that govern the behavior of
/// the listener and of every accepted connection, including payload size
/// limits, the listen backlog, and the liveness probe.
#[derive(Clone, Default)]
pub struct Options {
    /// Maximum allowed payload size for incoming frames, in bytes.
    ///
    /// If a frame exceeds this size, the connection is closed immediately
    /// to prevent overloading the receiving end.
    ///
    /// Default: 1 MiB (1,048,576 bytes) as defined in [`MAX_PAYLOAD_READ`]
    pub max_payload_read: Option<usize>,

    /// Maximum size allowed for the buffer that accumulates fragmented messages.
    ///
    /// Messages can be split into multiple fragments for transmission.
    /// The fragments are accumulated until the final frame is received;
    /// once their total size exceeds this limit, the connection is closed.
    ///
    /// Default: 2 MiB (2,097,152 bytes) as defined in [`MAX_READ_BUFFER`], or twice the
    /// configured `max_payload_read` value if that is set.
    pub max_read_buffer: Option<usize>,

    /// Maximum payload size accepted by [`PushHandle::enqueue`], in bytes.
    ///
    /// Default: 8 MiB (8,388,608 bytes) as defined in [`MAX_PUSH_PAYLOAD`]
    pub max_push_payload: Option<usize>,

    /// TCP listen backlog passed to the socket.
    ///
    /// Default: 5 as defined in [`LISTEN_BACKLOG`]
    pub listen_backlog: Option<u32>,

    /// Delay between bind attempts when the endpoint is unavailable.
    ///
    /// Default: 5 seconds as defined in [`RETRY_BACKOFF`]
    pub retry_backoff: Option<Duration>,

    /// Bounded wait for the pong answering a liveness probe.
    ///
    /// Default: 30 seconds as defined in [`HEARTBEAT_TIMEOUT`]
    pub heartbeat_timeout: Option<Duration>,

    /// Flag to determine whether each accepted connection is probed with a
    /// ping before entering the receive loop.
    ///
    /// When `true`, the connection sends a ping immediately after accept
    /// and waits one decode cycle for a pong; anything else — including
    /// expiry of `heartbeat_timeout` — tears the connection down.
    ///
    /// Default: `false`
    pub probe_on_accept: bool,
}

impl Options {
    /// Sets the maximum allowed payload size for incoming frames.
    ///
    /// If an incoming frame exceeds this size, the connection is
    /// terminated to avoid overloading the receiver.
    ///
    /// # Parameters
    /// - `size`: The maximum payload size in bytes.
    ///
    /// # Returns
    /// A modified `Options` instance with the specified payload size limit.
    pub fn with_max_payload_read(self, size: usize) -> Self {
        Self {
            max_payload_read: Some(size),
            ..self
        }
    }

    /// Sets the maximum read buffer size for accumulated fragmented messages.
    ///
    /// # Parameters
    /// - `size`: Maximum size in bytes allowed for the read buffer
    ///
    /// # Returns
    /// A modified `Options` instance with the specified read buffer size limit.
    pub fn with_max_read_buffer(self, size: usize) -> Self {
        Self {
            max_read_buffer: Some(size),
            ..self
        }
    }

    /// Sets the maximum payload size accepted by [`PushHandle::enqueue`].
    ///
    /// # Parameters
    /// - `size`: The maximum push payload size in bytes.
    ///
    /// # Returns
    /// A modified `Options` instance with the specified push payload limit.
    pub fn with_max_push_payload(self, size: usize) -> Self {
        Self {
            max_push_payload: Some(size),
            ..self
        }
    }

    /// Sets the TCP listen backlog.
    ///
    /// # Parameters
    /// - `backlog`: Maximum number of pending connections in the kernel queue.
    ///
    /// # Returns
    /// A modified `Options` instance with the specified backlog.
    pub fn with_listen_backlog(self, backlog: u32) -> Self {
        Self {
            listen_backlog: Some(backlog),
            ..self
        }
    }

    /// Sets the delay between bind attempts when the endpoint is unavailable.
    ///
    /// # Parameters
    /// - `backoff`: Time to wait after a failed bind before retrying.
    ///
    /// # Returns
    /// A modified `Options` instance with the specified backoff.
    pub fn with_retry_backoff(self, backoff: Duration) -> Self {
        Self {
            retry_backoff: Some(backoff),
            ..self
        }
    }

    /// Sets the bounded wait for a liveness-probe answer.
    ///
    /// # Parameters
    /// - `timeout`: Time to wait for the pong before the probe fails.
    ///
    /// # Returns
    /// A modified `Options` instance with the specified timeout.
    pub fn with_heartbeat_timeout(self, timeout: Duration) -> Self {
        Self {
            heartbeat_timeout: Some(timeout),
            ..self
        }
    }

    /// Enables the liveness probe on accept.
    ///
    /// Each accepted connection is pinged before entering the receive
    /// loop; a connection that does not answer with a pong within
    /// `heartbeat_timeout` is torn down.
    ///
    /// # Returns
    /// A modified `Options` instance with the probe enabled.
    pub fn with_liveness_probe(self) -> Self {
        Self {
            probe_on_accept: true,
            ..self
        }
    }
}

/// Application-facing notifications emitted by the server.
///
/// Delivered through the channel returned by [`Server::events`]. Dropping
/// the receiver is allowed; the server keeps running and discards
/// further events.
#[derive(Debug)]
pub enum ServerEvent {
    /// A connection was accepted and registered under `id`.
    Opened {
        /// Identity assigned to the connection.
        id: ConnId,
        /// Peer socket address.
        peer: SocketAddr,
    },
    /// A complete (possibly reassembled) masked text message arrived.
    Text {
        /// Identity of the originating connection.
        id: ConnId,
        /// The validated UTF-8 payload.
        text: String,
    },
    /// A complete (possibly reassembled) binary message arrived.
    Binary {
        /// Identity of the originating connection.
        id: ConnId,
        /// The raw payload.
        payload: Bytes,
    },
    /// The connection was torn down and its registry entry removed.
    Closed {
        /// Identity of the closed connection.
        id: ConnId,
    },
}

/// The server before it is bound: owns the registry, the push queue and
/// the event channel, constructed once at startup.
///
/// Hand [`PushHandle`]s to whatever produces pushes, take the event
/// receiver, then call [`bind`](Self::bind) and spawn
/// [`Listener::run`].
pub struct Server {
    options: Options,
    registry: Registry,
    push_tx: mpsc::UnboundedSender<PushMessage>,
    push_rx: Option<mpsc::UnboundedReceiver<PushMessage>>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
}

impl Server {
    /// Creates a server with the given options.
    pub fn new(options: Options) -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            options,
            registry: Registry::new(),
            push_tx,
            push_rx: Some(push_rx),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Returns a handle for enqueuing push messages by connection id.
    ///
    /// May be called any number of times; clones are cheap and all feed
    /// the same dispatcher.
    pub fn push_handle(&self) -> PushHandle {
        PushHandle::new(
            self.push_tx.clone(),
            self.options.max_push_payload.unwrap_or(MAX_PUSH_PAYLOAD),
        )
    }

    /// Takes the receiving end of the server event stream.
    ///
    /// # Panics
    /// Panics if called more than once: there is a single consumer.
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<ServerEvent> {
        self.events_rx.take().expect("events receiver already taken")
    }

    /// Returns a clone of the connection registry.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Binds and listens on `addr`, retrying forever.
    ///
    /// A failed bind or listen is logged and retried after
    /// [`Options::retry_backoff`] — indefinitely. This is a deliberate
    /// availability choice: a taken port or a not-yet-configured
    /// interface resolves itself, a crash loop does not.
    pub async fn bind(self, addr: SocketAddr) -> Listener {
        let backlog = self.options.listen_backlog.unwrap_or(LISTEN_BACKLOG);
        let backoff = self.options.retry_backoff.unwrap_or(RETRY_BACKOFF);

        let listener = loop {
            log::info!("listening on {addr}");
            match try_listen(addr, backlog) {
                Ok(listener) => break listener,
                Err(err) => {
                    log::error!("failed to bind {addr}: {err}");
                    tokio::time::sleep(backoff).await;
                }
            }
        };

        Listener {
            listener,
            options: self.options,
            registry: self.registry,
            push_rx: self.push_rx,
            events_tx: self.events_tx,
            next_id: 1,
        }
    }
}

/// Creates the socket, binds it and starts listening with an explicit backlog.
fn try_listen(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// A bound server, ready to accept connections.
pub struct Listener {
    listener: TcpListener,
    options: Options,
    registry: Registry,
    push_rx: Option<mpsc::UnboundedReceiver<PushMessage>>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    next_id: ConnId,
}

impl Listener {
    /// The local address the listener is bound to.
    ///
    /// Useful when binding port 0 and letting the kernel pick.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns a clone of the connection registry.
    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Accept loop. Starts the push dispatcher exactly once, then accepts
    /// connections forever: each accepted socket gets the next identity,
    /// is registered, and is handed to its own task.
    ///
    /// Accept errors are logged and the loop continues; this function
    /// only returns if the runtime shuts the task down.
    pub async fn run(mut self) {
        if let Some(push_rx) = self.push_rx.take() {
            tokio::spawn(PushDispatcher::new(push_rx, self.registry.clone()).run());
        }

        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    log::error!("accept failed: {err}");
                    continue;
                }
            };

            let id = self.next_id;
            self.next_id += 1;

            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            self.registry
                .register(
                    id,
                    ConnectionHandle {
                        outbound: outbound_tx,
                        peer,
                    },
                )
                .await;

            log::info!("connection {id} accepted from {peer}");
            let _ = self.events_tx.send(ServerEvent::Opened { id, peer });

            let connection = Connection::new(
                id,
                peer,
                socket,
                outbound_rx,
                self.registry.clone(),
                self.events_tx.clone(),
                self.options.clone(),
            );
            tokio::spawn(connection.run());
        }
    }
}
