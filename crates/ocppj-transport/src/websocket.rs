//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    negotiate_protocol, Connection, ConnectionId, Incoming, Transport,
    TransportError, UpgradeRequest, SUPPORTED_PROTOCOLS,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const PROTOCOL_HEADER: &str = "sec-websocket-protocol";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a peer may take to complete the HTTP upgrade by default.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

type TargetFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
///
/// Every upgrade must offer at least one of the configured OCPP-J
/// sub-protocols, and pass the target filter if one is set; anything else
/// is answered with `400 Bad Request` before a WebSocket exists.
pub struct WebSocketTransport {
    listener: TcpListener,
    protocols: Arc<[String]>,
    target_filter: Option<TargetFilter>,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport speaking [`SUPPORTED_PROTOCOLS`].
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        Self::bind_with_protocols(addr, SUPPORTED_PROTOCOLS).await
    }

    /// Binds a new WebSocket transport with an explicit sub-protocol list,
    /// most preferred first.
    pub async fn bind_with_protocols<S: AsRef<str>>(
        addr: &str,
        protocols: &[S],
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            protocols: protocols.iter().map(|p| p.as_ref().to_owned()).collect(),
            target_filter: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Refuses upgrades whose request target (path plus query, still
    /// percent-encoded) `filter` returns `false` for.
    pub fn with_target_filter(
        mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.target_filter = Some(Arc::new(filter));
        self
    }

    /// Gives up on peers that have not finished the upgrade within `limit`.
    pub fn with_handshake_timeout(mut self, limit: Duration) -> Self {
        self.handshake_timeout = limit;
        self
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;
    type Incoming = IncomingWebSocket;

    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::trace!(%addr, "TCP connection accepted");

        Ok(IncomingWebSocket {
            stream,
            addr,
            protocols: Arc::clone(&self.protocols),
            target_filter: self.target_filter.clone(),
            handshake_timeout: self.handshake_timeout,
        })
    }
}

/// A TCP connection that has not been upgraded yet.
pub struct IncomingWebSocket {
    stream: TcpStream,
    addr: SocketAddr,
    protocols: Arc<[String]>,
    target_filter: Option<TargetFilter>,
    handshake_timeout: Duration,
}

impl Incoming for IncomingWebSocket {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.addr)
    }

    async fn upgrade(self) -> Result<(Self::Connection, UpgradeRequest), Self::Error> {
        let addr = self.addr;
        let protocols: &[String] = &self.protocols;
        let target_filter = self.target_filter.as_ref();
        let mut upgrade: Option<UpgradeRequest> = None;

        // Runs once, in the middle of the HTTP handshake. Negotiating here
        // lets us refuse the upgrade instead of closing a live socket.
        let callback = |request: &Request,
                        mut response: Response|
         -> Result<Response, ErrorResponse> {
            let target = request.uri().to_string();
            if target_filter.is_some_and(|accepts| !accepts(&target)) {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "request target refused",
                ));
            }

            let offered = offered_protocols(request);
            let Some(protocol) = negotiate_protocol(protocols, &offered) else {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    "no supported OCPP sub-protocol offered",
                ));
            };
            let Ok(value) = HeaderValue::from_str(protocol) else {
                return Err(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "invalid sub-protocol configuration",
                ));
            };
            response.headers_mut().insert(PROTOCOL_HEADER, value);

            upgrade = Some(UpgradeRequest {
                target,
                headers: request
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|v| (name.as_str().to_owned(), v.to_owned()))
                    })
                    .collect(),
                protocol: Some(protocol.to_owned()),
                remote_addr: Some(addr),
            });
            Ok(response)
        };

        let handshake = tokio_tungstenite::accept_hdr_async(
            MaybeTlsStream::Plain(self.stream),
            callback,
        );
        let ws = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                tracing::debug!(%addr, limit = ?self.handshake_timeout, "upgrade timed out");
                TransportError::HandshakeTimeout(self.handshake_timeout)
            })?
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => {
                    tracing::debug!(%addr, status = %response.status(), "upgrade rejected");
                    TransportError::Rejected(response.status().to_string())
                }
                other => TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    other,
                )),
            })?;

        let upgrade = upgrade.ok_or_else(|| {
            TransportError::Rejected("handshake finished without a request".into())
        })?;

        let conn = WebSocketConnection::from_stream(ws);
        tracing::debug!(
            id = %conn.id,
            %addr,
            target = %upgrade.target,
            protocol = ?upgrade.protocol,
            "accepted WebSocket connection"
        );
        Ok((conn, upgrade))
    }
}

/// A single WebSocket connection, server or client side.
///
/// The stream is split so that a task parked in [`recv`](Connection::recv)
/// never holds up [`send`](Connection::send) or [`ping`](Connection::ping).
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    source: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    /// Opens a client connection to `url`, offering `protocols`.
    ///
    /// Returns the connection and the sub-protocol the server picked.
    pub async fn connect<S: AsRef<str>>(
        url: &str,
        protocols: &[S],
    ) -> Result<(Self, String), TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let offered = protocols
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(", ");
        let value = HeaderValue::from_str(&offered)
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        request.headers_mut().insert(PROTOCOL_HEADER, value);

        let (ws, response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => {
                    TransportError::Rejected(response.status().to_string())
                }
                other => TransportError::ConnectFailed(other.to_string()),
            })?;

        let protocol = response
            .headers()
            .get(PROTOCOL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                TransportError::Rejected("server selected no sub-protocol".into())
            })?;

        let conn = Self::from_stream(ws);
        tracing::debug!(id = %conn.id, url, %protocol, "opened WebSocket connection");
        Ok((conn, protocol))
    }

    fn from_stream(ws: WsStream) -> Self {
        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        let (sink, source) = ws.split();
        Self {
            id,
            sink: Mutex::new(sink),
            source: Mutex::new(source),
        }
    }

    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        self.sink.lock().await.send(msg).await.map_err(send_error)
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), Self::Error> {
        self.send_message(Message::Text(text.to_owned().into())).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut source = self.source.lock().await;
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Close(_))) => {
                    // The close reply is only queued by the read; push it out.
                    if let Err(e) = self.sink.lock().await.flush().await {
                        tracing::trace!(id = %self.id, error = %e, "close reply flush");
                    }
                    return Ok(None);
                }
                None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(
                    tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed,
                )) => return Ok(None),
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn ping(&self) -> Result<(), Self::Error> {
        self.send_message(Message::Ping(Default::default())).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        match self.sink.lock().await.close().await {
            Ok(())
            | Err(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(e) => Err(send_error(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Splits a `Sec-WebSocket-Protocol` header (possibly repeated) into tokens.
fn offered_protocols(request: &Request) -> Vec<&str> {
    request
        .headers()
        .get_all(PROTOCOL_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn error_response(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_owned()));
    *response.status_mut() = status;
    response
}

fn send_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::SendAfterClosing) => {
            TransportError::ConnectionClosed(e.to_string())
        }
        other => TransportError::SendFailed(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            other,
        )),
    }
}
