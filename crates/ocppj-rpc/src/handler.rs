//! The contract between the engine and application code that answers
//! inbound requests.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use ocppj_messages::{Message, Role, ValidationError};
use ocppj_transport::UpgradeRequest;
use serde_json::Value;

use crate::BoxError;

/// An inbound request as handed to a [`RequestHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<Req> {
    /// The request passed validation.
    Valid(Req),
    /// The request failed validation but the connection is permissive, so
    /// the handler sees it anyway. [`RequestMetadata::validation_error`]
    /// says what was wrong.
    Invalid {
        /// The action name the peer sent.
        action: String,
        /// The payload exactly as received.
        payload: Value,
    },
}

impl<Req: Message> Inbound<Req> {
    /// The action name, valid or not.
    pub fn action(&self) -> &str {
        match self {
            Self::Valid(request) => request.action(),
            Self::Invalid { action, .. } => action,
        }
    }

    /// The validated request, if there is one.
    pub fn valid(self) -> Option<Req> {
        match self {
            Self::Valid(request) => Some(request),
            Self::Invalid { .. } => None,
        }
    }
}

/// Side-channel information accompanying every inbound request.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// Identity of the peer that sent the request.
    pub identity: String,
    /// The HTTP upgrade request that opened the connection.
    pub upgrade: Arc<UpgradeRequest>,
    /// Set when the request failed validation and was forwarded anyway.
    pub validation_error: Option<ValidationError>,
}

/// Answers inbound requests for one role.
///
/// Returning an error makes the engine reply with a `GenericError`
/// CALLERROR. Any `Fn(Inbound<_>, RequestMetadata) -> impl Future` with
/// the right types is a handler, so a plain `async fn` can be passed
/// directly.
pub trait RequestHandler<R: Role>: Send + Sync + 'static {
    /// Handles one request.
    fn handle(
        &self,
        request: Inbound<R::InboundRequest>,
        metadata: RequestMetadata,
    ) -> BoxFuture<'static, Result<R::InboundResponse, BoxError>>;
}

impl<R, F, Fut> RequestHandler<R> for F
where
    R: Role,
    F: Fn(Inbound<R::InboundRequest>, RequestMetadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::InboundResponse, BoxError>> + Send + 'static,
{
    fn handle(
        &self,
        request: Inbound<R::InboundRequest>,
        metadata: RequestMetadata,
    ) -> BoxFuture<'static, Result<R::InboundResponse, BoxError>> {
        Box::pin(self(request, metadata))
    }
}

/// Observes every raw inbound frame before it is parsed.
///
/// Receives the peer identity and the untouched bytes. Purely diagnostic:
/// nothing it does affects dispatch.
pub type RawMessageHook = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;
