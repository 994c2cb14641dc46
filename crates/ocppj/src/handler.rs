//! Per-connection task: identity, registration, keepalive, read loop.
//!
//! Each accepted socket gets its own Tokio task running
//! [`handle_connection`]. The flow is:
//!   1. Derive the charge point identity from the upgrade target
//!   2. Register the connection (closing any connection it replaces, or
//!      this one if the server is shutting down)
//!   3. Start the keepalive pings
//!   4. Serve inbound frames until the socket closes
//!   5. Unregister, which fails the calls still waiting on this socket,
//!      then finish the close handshake

use std::sync::Arc;

use ocppj_registry::{Keepalive, Registration, derive_identity};
use ocppj_rpc::Connection;
use ocppj_transport::{Connection as _, UpgradeRequest, WebSocketConnection};

use crate::server::ServerState;

/// Handles a single charge point from accept to close.
pub(crate) async fn handle_connection(
    link: WebSocketConnection,
    upgrade: UpgradeRequest,
    state: Arc<ServerState>,
) {
    let conn_id = link.id();
    let Some(identity) = derive_identity(&upgrade.target) else {
        tracing::warn!(%conn_id, target = %upgrade.target, "no charge point identity in request, closing");
        if let Err(e) = link.close().await {
            tracing::debug!(%conn_id, error = %e, "close failed");
        }
        return;
    };

    let link = Arc::new(link);
    let connection = Arc::new(Connection::new(
        identity.clone(),
        Arc::clone(&link),
        upgrade,
        Arc::clone(&state.handler),
        state.options.clone(),
    ));

    match state.registry.register(Arc::clone(&connection)).await {
        Registration::Added => {}
        Registration::Replaced(previous) => previous.close().await,
        Registration::Refused => return,
    }

    let keepalive = Keepalive::start(&identity, link, state.keepalive.clone());
    let result = connection.serve(state.on_raw_message.as_ref()).await;
    drop(keepalive);

    if let Err(e) = result {
        tracing::debug!(%identity, %conn_id, error = %e, "connection ended with error");
    }
    state.registry.unregister(&connection).await;
    connection.close().await;
}
