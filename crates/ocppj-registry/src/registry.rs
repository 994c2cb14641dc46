//! The set of live connections, keyed by peer identity.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ocppj_messages::Role;
use ocppj_rpc::{Connection, RequestError};
use ocppj_transport::Connection as Link;
use tokio::sync::{Mutex, RwLock};

/// A lifecycle event reported to connection listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionStatus {
    /// A peer connected (or reconnected) under this identity.
    Connected,
    /// The identity's connection went away.
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        })
    }
}

/// What [`ConnectionRegistry::register`] did with a connection.
pub enum Registration<R: Role, T: Link> {
    /// First connection under its identity.
    Added,
    /// Took the place of this older connection, which the caller should close.
    Replaced(Arc<Connection<R, T>>),
    /// The registry is closed; the connection was closed instead of stored.
    Refused,
}

impl<R: Role, T: Link> fmt::Debug for Registration<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => f.write_str("Added"),
            Self::Replaced(previous) => f.debug_tuple("Replaced").field(&previous.identity()).finish(),
            Self::Refused => f.write_str("Refused"),
        }
    }
}

struct Table<R: Role, T: Link> {
    connections: HashMap<String, Arc<Connection<R, T>>>,
    closed: bool,
}

/// Called with `(identity, status)` on every connect and disconnect.
pub type ConnectionListener = Arc<dyn Fn(&str, ConnectionStatus) + Send + Sync>;

/// Live connections keyed by identity.
///
/// An identity maps to at most one connection. A reconnect under the same
/// identity replaces the entry; the stale connection can then no longer
/// remove or shadow the new one:
///
/// ```text
/// register(A₁) ──→ {id: A₁}   "connected"
/// register(A₂) ──→ {id: A₂}   "connected"    (A₁ returned to the caller)
/// unregister(A₁) → {id: A₂}   (no-op: A₁ is not the live entry)
/// unregister(A₂) → {}         "disconnected"
/// ```
///
/// Once [`close_all`](Self::close_all) has run the registry stays closed:
/// connections whose handshake finished late are turned away.
///
/// Owned by the server; dropped with it.
pub struct ConnectionRegistry<R: Role, T: Link> {
    table: Mutex<Table<R, T>>,
    listeners: RwLock<Vec<ConnectionListener>>,
}

impl<R: Role, T: Link> Default for ConnectionRegistry<R, T> {
    fn default() -> Self {
        Self {
            table: Mutex::new(Table {
                connections: HashMap::new(),
                closed: false,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<R: Role, T: Link> ConnectionRegistry<R, T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to connect/disconnect events.
    pub async fn add_listener(&self, listener: ConnectionListener) {
        self.listeners.write().await.push(listener);
    }

    /// Stores `connection` under its identity and reports it connected.
    ///
    /// A replaced connection is handed back; the caller decides what to do
    /// with it, and its pending calls are not carried over. After
    /// [`close_all`](Self::close_all) the connection is closed and
    /// [`Registration::Refused`] returned.
    pub async fn register(&self, connection: Arc<Connection<R, T>>) -> Registration<R, T> {
        let identity = connection.identity().to_owned();
        let previous = {
            let mut table = self.table.lock().await;
            if table.closed {
                None
            } else {
                Some(table.connections.insert(identity.clone(), Arc::clone(&connection)))
            }
        };

        let registration = match previous {
            None => {
                tracing::info!(%identity, "registry closed, refusing connection");
                connection.close().await;
                return Registration::Refused;
            }
            Some(Some(previous)) => {
                tracing::info!(%identity, "peer reconnected, replacing previous connection");
                Registration::Replaced(previous)
            }
            Some(None) => {
                tracing::info!(%identity, "peer connected");
                Registration::Added
            }
        };
        self.notify(&identity, ConnectionStatus::Connected).await;
        registration
    }

    /// Removes `connection` if it is still the live entry for its identity,
    /// and fails its pending calls either way.
    ///
    /// Only the live entry produces a `disconnected` event. Returns whether
    /// an entry was removed.
    pub async fn unregister(&self, connection: &Arc<Connection<R, T>>) -> bool {
        let identity = connection.identity();
        let removed = {
            let mut table = self.table.lock().await;
            match table.connections.get(identity) {
                Some(live) if Arc::ptr_eq(live, connection) => {
                    table.connections.remove(identity);
                    true
                }
                _ => false,
            }
        };

        connection.abandon().await;
        if removed {
            tracing::info!(%identity, "peer disconnected");
            self.notify(identity, ConnectionStatus::Disconnected).await;
        } else {
            tracing::debug!(%identity, "stale connection closed");
        }
        removed
    }

    /// The live connection for `identity`.
    pub async fn get(&self, identity: &str) -> Option<Arc<Connection<R, T>>> {
        self.table.lock().await.connections.get(identity).cloned()
    }

    /// Sends a request to the peer registered under `identity`.
    ///
    /// # Errors
    /// [`RequestError::MissingIdentity`] for an empty identity,
    /// [`RequestError::NoConnection`] when nobody is registered under it
    /// (nothing is sent in either case), otherwise whatever
    /// [`Connection::send_request`] returns.
    pub async fn send_request(
        &self,
        identity: &str,
        request: R::OutboundRequest,
    ) -> Result<R::OutboundResponse, RequestError> {
        if identity.is_empty() {
            return Err(RequestError::MissingIdentity);
        }
        let connection = self
            .get(identity)
            .await
            .ok_or_else(|| RequestError::NoConnection(identity.to_owned()))?;
        connection.send_request(request).await
    }

    /// Identities with a live connection, in no particular order.
    pub async fn identities(&self) -> Vec<String> {
        self.table.lock().await.connections.keys().cloned().collect()
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.table.lock().await.connections.len()
    }

    /// Whether no connection is live.
    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.connections.is_empty()
    }

    /// Closes and removes every connection, reporting each disconnected,
    /// and refuses any registered afterwards.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut table = self.table.lock().await;
            table.closed = true;
            table.connections.drain().collect()
        };
        for (identity, connection) in drained {
            connection.close().await;
            self.notify(&identity, ConnectionStatus::Disconnected).await;
        }
    }

    async fn notify(&self, identity: &str, status: ConnectionStatus) {
        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            listener(identity, status);
        }
    }
}
