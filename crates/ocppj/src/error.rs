//! Unified error type for the OCPP-J engine.

use ocppj_messages::ValidationError;
use ocppj_protocol::ProtocolError;
use ocppj_rpc::RequestError;
use ocppj_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum OcppError {
    /// A transport-level error (bind, connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame that is not a valid OCPP-J envelope.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A payload that does not fit its action's schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An outbound request that did not produce a response.
    #[error(transparent)]
    Request(#[from] RequestError),
}
