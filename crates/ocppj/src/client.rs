//! The charge point: the client end of OCPP-J.

use std::sync::Arc;

use ocppj_messages::{ChargePointRequest, ChargePointResponse, ChargePointRole};
use ocppj_rpc::{Connection, RequestError, RequestHandler};
use ocppj_transport::{UpgradeRequest, WebSocketConnection};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use tokio::task::JoinHandle;

use crate::{ChargePointConfig, OcppError};

/// A client-side connection to the central system.
pub type ChargePointConnection = Connection<ChargePointRole, WebSocketConnection>;

/// Characters left as-is in the identity path segment. Everything the
/// server splits on (`@`, `?`, `=`) is encoded so the identity arrives intact.
const IDENTITY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A charge point connected to a central system.
///
/// Owns one connection and the task reading from it. Requests from the
/// central system go to the handler given to [`connect`](Self::connect).
pub struct ChargePoint {
    connection: Arc<ChargePointConnection>,
    reader: JoinHandle<()>,
    protocol: String,
}

impl ChargePoint {
    /// Connects to `<url>/<identity>`, offering the configured
    /// sub-protocols.
    ///
    /// # Errors
    /// [`RequestError::MissingIdentity`] for an empty identity, or
    /// [`OcppError::Transport`] if the connection or upgrade fails.
    pub async fn connect(
        url: &str,
        identity: &str,
        handler: impl RequestHandler<ChargePointRole>,
        config: ChargePointConfig,
    ) -> Result<Self, OcppError> {
        if identity.is_empty() {
            return Err(RequestError::MissingIdentity.into());
        }
        let target = endpoint(url, identity);
        let (link, protocol) = WebSocketConnection::connect(&target, &config.protocols).await?;
        tracing::info!(identity, url = %target, %protocol, "connected to central system");

        let upgrade = UpgradeRequest {
            target,
            protocol: Some(protocol.clone()),
            ..UpgradeRequest::default()
        };
        let handler: Arc<dyn RequestHandler<ChargePointRole>> = Arc::new(handler);
        let connection = Arc::new(Connection::new(
            identity,
            Arc::new(link),
            upgrade,
            handler,
            config.connection_options(),
        ));

        let reader = {
            let connection = Arc::clone(&connection);
            let hook = config.on_raw_message.clone();
            tokio::spawn(async move {
                if let Err(e) = connection.serve(hook.as_ref()).await {
                    tracing::debug!(identity = %connection.identity(), error = %e, "read loop ended with error");
                }
                connection.close().await;
                tracing::info!(identity = %connection.identity(), "disconnected from central system");
            })
        };

        Ok(Self {
            connection,
            reader,
            protocol,
        })
    }

    /// This charge point's identity.
    pub fn identity(&self) -> &str {
        self.connection.identity()
    }

    /// The sub-protocol the central system picked.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The underlying RPC connection.
    pub fn connection(&self) -> &Arc<ChargePointConnection> {
        &self.connection
    }

    /// Whether the link to the central system is still up.
    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Sends a request to the central system and waits for its reply.
    ///
    /// # Errors
    /// See [`Connection::send_request`].
    pub async fn send_request(
        &self,
        request: ChargePointRequest,
    ) -> Result<ChargePointResponse, RequestError> {
        self.connection.send_request(request).await
    }

    /// Closes the link. Calls still waiting fail with
    /// [`RequestError::ConnectionClosed`].
    pub async fn close(&self) {
        self.connection.close().await;
        self.reader.abort();
    }
}

impl Drop for ChargePoint {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for ChargePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargePoint")
            .field("identity", &self.identity())
            .field("protocol", &self.protocol)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn endpoint(url: &str, identity: &str) -> String {
    format!(
        "{}/{}",
        url.trim_end_matches('/'),
        utf8_percent_encode(identity, IDENTITY_SEGMENT)
    )
}
