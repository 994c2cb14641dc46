/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The WebSocket upgrade was refused, by us or by the remote side.
    #[error("upgrade rejected: {0}")]
    Rejected(String),

    /// The peer did not finish the WebSocket upgrade in time.
    #[error("upgrade timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// Opening an outbound connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
}
