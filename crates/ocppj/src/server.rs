//! The central system: the server end of OCPP-J.
//!
//! Ties the layers together: the WebSocket transport accepts charge points,
//! each accepted socket becomes an RPC [`Connection`] registered under its
//! identity, and requests to a charge point go through the registry.

use std::net::SocketAddr;
use std::sync::Arc;

use ocppj_messages::{CentralSystemRequest, CentralSystemResponse, CentralSystemRole};
use ocppj_registry::{ConnectionRegistry, ConnectionStatus, KeepaliveConfig, derive_identity};
use ocppj_rpc::{Connection, ConnectionOptions, RawMessageHook, RequestError, RequestHandler};
use ocppj_transport::{
    Incoming, IncomingWebSocket, Transport, TransportError, WebSocketConnection,
    WebSocketTransport,
};
use tokio::task::JoinHandle;

use crate::handler::handle_connection;
use crate::{CentralSystemConfig, OcppError};

/// A server-side connection to one charge point.
pub type CentralSystemConnection = Connection<CentralSystemRole, WebSocketConnection>;

/// Shared server state passed to each connection task.
pub(crate) struct ServerState {
    pub(crate) registry: ConnectionRegistry<CentralSystemRole, WebSocketConnection>,
    pub(crate) handler: Arc<dyn RequestHandler<CentralSystemRole>>,
    pub(crate) options: ConnectionOptions,
    pub(crate) keepalive: KeepaliveConfig,
    pub(crate) on_raw_message: Option<RawMessageHook>,
}

/// A running central system.
///
/// # Example
///
/// ```rust,ignore
/// use ocppj::prelude::*;
///
/// async fn answer(
///     request: Inbound<ChargePointRequest>,
///     _meta: RequestMetadata,
/// ) -> Result<ChargePointResponse, BoxError> {
///     match request.valid() {
///         Some(ChargePointRequest::Heartbeat(_)) => Ok(HeartbeatResponse {
///             current_time: chrono::Utc::now(),
///         }
///         .into()),
///         _ => Err("not supported".into()),
///     }
/// }
///
/// let server = CentralSystem::start(CentralSystemConfig::default(), answer).await?;
/// let reply = server.send_request("CP1", ClearCacheRequest {}.into()).await?;
/// ```
pub struct CentralSystem {
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl CentralSystem {
    /// Binds the listener and starts accepting charge points.
    ///
    /// `handler` answers every request any charge point sends.
    ///
    /// # Errors
    /// [`OcppError::Transport`] if the address cannot be bound.
    pub async fn start(
        config: CentralSystemConfig,
        handler: impl RequestHandler<CentralSystemRole>,
    ) -> Result<Self, OcppError> {
        let transport =
            WebSocketTransport::bind_with_protocols(&config.bind_addr, &config.protocols)
                .await?
                .with_target_filter(|target| derive_identity(target).is_some())
                .with_handshake_timeout(config.handshake_timeout);
        let local_addr = transport.local_addr()?;

        let state = Arc::new(ServerState {
            registry: ConnectionRegistry::new(),
            handler: Arc::new(handler),
            options: config.connection_options(),
            keepalive: config.keepalive.clone(),
            on_raw_message: config.on_raw_message.clone(),
        });

        let accept_task = tokio::spawn(run(transport, Arc::clone(&state)));
        tracing::info!(%local_addr, protocols = ?config.protocols, "central system running");

        Ok(Self {
            local_addr,
            state,
            accept_task,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends a request to the charge point connected as `identity`.
    ///
    /// # Errors
    /// [`RequestError::MissingIdentity`] for an empty identity,
    /// [`RequestError::NoConnection`] if that charge point is not connected,
    /// and otherwise anything [`Connection::send_request`] reports.
    pub async fn send_request(
        &self,
        identity: &str,
        request: CentralSystemRequest,
    ) -> Result<CentralSystemResponse, RequestError> {
        self.state.registry.send_request(identity, request).await
    }

    /// Calls `listener` with `(identity, status)` whenever a charge point
    /// connects or disconnects.
    pub async fn add_connection_listener(
        &self,
        listener: impl Fn(&str, ConnectionStatus) + Send + Sync + 'static,
    ) {
        self.state.registry.add_listener(Arc::new(listener)).await;
    }

    /// The live connection for `identity`.
    pub async fn connection(&self, identity: &str) -> Option<Arc<CentralSystemConnection>> {
        self.state.registry.get(identity).await
    }

    /// Identities of the connected charge points.
    pub async fn connected(&self) -> Vec<String> {
        self.state.registry.identities().await
    }

    /// Stops accepting, then closes every connection. Calls still waiting
    /// on a charge point fail with [`RequestError::ConnectionClosed`].
    pub async fn close(&self) {
        self.accept_task.abort();
        self.state.registry.close_all().await;
        tracing::info!(local_addr = %self.local_addr, "central system closed");
    }
}

impl Drop for CentralSystem {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

impl std::fmt::Debug for CentralSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralSystem")
            .field("local_addr", &self.local_addr)
            .field("options", &self.state.options)
            .field("keepalive", &self.state.keepalive)
            .finish_non_exhaustive()
    }
}

/// The accept loop. Runs until aborted.
///
/// Only the TCP accept happens here; each upgrade runs on its own task so
/// a peer that stalls mid-handshake holds up nobody else.
async fn run(mut transport: WebSocketTransport, state: Arc<ServerState>) {
    loop {
        match transport.accept().await {
            Ok(incoming) => {
                tokio::spawn(upgrade_and_serve(incoming, Arc::clone(&state)));
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}

async fn upgrade_and_serve(incoming: IncomingWebSocket, state: Arc<ServerState>) {
    let remote_addr = incoming.remote_addr();
    match incoming.upgrade().await {
        Ok((conn, upgrade)) => handle_connection(conn, upgrade, state).await,
        Err(TransportError::Rejected(reason)) => {
            tracing::info!(?remote_addr, %reason, "upgrade rejected");
        }
        Err(e) => {
            tracing::warn!(?remote_addr, error = %e, "upgrade failed");
        }
    }
}
