//! Transport abstraction layer for OCPP-J.
//!
//! Provides the [`Transport`] and [`Connection`] traits that the protocol
//! engine runs on. The engine only needs a duplex text channel with a
//! send-with-completion operation and a receive loop; everything about
//! sockets, HTTP upgrades and TLS stays behind these traits.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{
    DEFAULT_HANDSHAKE_TIMEOUT, IncomingWebSocket, WebSocketConnection, WebSocketTransport,
};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// OCPP-J sub-protocols this implementation speaks, in order of preference.
pub const SUPPORTED_PROTOCOLS: &[&str] = &["ocpp1.6", "ocpp1.5"];

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The HTTP request a peer used to open the connection.
///
/// Captured once during the WebSocket upgrade. The server derives the
/// charge point identity from [`target`](Self::target) and hands the whole
/// request to request handlers as diagnostic metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target as sent by the peer: path plus optional query,
    /// still percent-encoded (e.g. `/ocpp/keba1@Hotel%2023`).
    pub target: String,
    /// Request headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// The sub-protocol both sides agreed on.
    pub protocol: Option<String>,
    /// Remote socket address, when known.
    pub remote_addr: Option<SocketAddr>,
}

impl UpgradeRequest {
    /// Returns the first header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Picks the first of `supported` that the peer `offered`.
///
/// Preference follows the order of `supported`, not the peer's order.
pub fn negotiate_protocol<'a, S: AsRef<str>>(
    supported: &'a [S],
    offered: &[&str],
) -> Option<&'a str> {
    supported
        .iter()
        .map(AsRef::as_ref)
        .find(|protocol| offered.contains(protocol))
}

/// Accepts new incoming connections.
///
/// Accepting is split in two so a listener loop never waits on a peer:
/// [`accept`](Self::accept) only takes the next raw connection off the
/// listener, and the slow part (the upgrade handshake) happens in
/// [`Incoming::upgrade`], typically on a task of its own.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;
    /// A connection that still has to be upgraded.
    type Incoming: Incoming<Connection = Self::Connection, Error = Self::Error>;

    /// Waits for the next incoming connection.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Incoming, Self::Error>> + Send;
}

/// An accepted connection before its upgrade handshake.
pub trait Incoming: Send + 'static {
    /// The connection type produced by the upgrade.
    type Connection: Connection;
    /// The error type for the upgrade.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Remote socket address, when known.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Runs the handshake, returning the connection together with the
    /// upgrade request that opened it.
    fn upgrade(
        self,
    ) -> impl Future<Output = Result<(Self::Connection, UpgradeRequest), Self::Error>> + Send;
}

/// A single connection that can send and receive messages.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one text message to the remote peer. Resolves once the
    /// message has been handed to the socket.
    fn send(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Sends a keepalive ping with no payload.
    fn ping(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
