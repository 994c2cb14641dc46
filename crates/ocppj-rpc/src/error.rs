//! Error types for the RPC layer.

use std::time::Duration;

use ocppj_messages::ValidationError;
use serde_json::Value;

/// A boxed error as returned by request handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why an outbound call did not produce a response.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// No identity was given for the target charge point.
    #[error("charge point id was not provided")]
    MissingIdentity,

    /// No live connection exists for the target identity.
    #[error("there is no connection to this charge point: {0}")]
    NoConnection(String),

    /// The request failed validation and was never sent.
    #[error("invalid request: {0}")]
    InvalidRequest(#[source] ValidationError),

    /// The peer's CALLRESULT does not fit the expected response shape.
    #[error("invalid response: {0}")]
    InvalidResponse(#[source] ValidationError),

    /// The peer answered with a CALL where a reply was due.
    #[error("expected a CALLRESULT or CALLERROR, got a CALL")]
    UnexpectedCall,

    /// The peer answered with a CALLERROR.
    #[error("{code}: {description}")]
    CallError {
        /// The peer's error code, verbatim.
        code: String,
        /// The peer's description, verbatim.
        description: String,
        /// The peer's error details, if it sent any.
        details: Option<Value>,
    },

    /// The transport refused the outgoing frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection closed before a reply arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// No reply arrived within the configured call timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// A request handler failed.
///
/// Carries what the engine was doing when the handler failed, plus the
/// handler's own error as [`source`](std::error::Error::source).
#[derive(Debug, thiserror::Error)]
#[error("{context}: {source}")]
pub struct ApplicationError {
    /// What was being handled.
    pub context: String,
    /// The handler's error.
    #[source]
    pub source: BoxError,
}

impl ApplicationError {
    /// Wraps a handler error with context.
    pub fn new(context: impl Into<String>, source: BoxError) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }
}
