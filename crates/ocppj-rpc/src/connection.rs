//! One peer link: outbound calls and inbound dispatch.
//!
//! Both ends of OCPP-J may call at any time, so a [`Connection`] is caller
//! and callee at once. The two halves share nothing but the transport:
//!
//! ```text
//!                      ┌──────────────── Connection ────────────────┐
//! send_request ──────▶ │ register id → validate → CALL ──────────▶  │ ──▶ peer
//!                      │                 pending ◀── CALLRESULT     │ ◀── peer
//! handler ◀─────────── │ validate ◀── CALL                          │ ◀── peer
//!         ───────────▶ │ check reply → CALLRESULT / CALLERROR ────▶ │ ──▶ peer
//!                      └────────────────────────────────────────────┘
//! ```
//!
//! Every inbound CALL is answered exactly once, whatever happens to it.
//! Every outbound call resolves exactly once: with the peer's reply, with a
//! local failure before anything is sent, or with
//! [`RequestError::ConnectionClosed`] when the link goes away.

use std::sync::Arc;
use std::time::Duration;

use ocppj_messages::{Message, Role, checked_payload, validate_request, validate_response};
use ocppj_protocol::{CorrelationId, Envelope, ErrorCode, parse, salvage_call_id, stringify};
use ocppj_transport::{Connection as Link, UpgradeRequest};
use serde_json::{Value, json};

use crate::pending::PendingCalls;
use crate::{
    ApplicationError, Inbound, RawMessageHook, RequestError, RequestHandler, RequestMetadata,
};

/// Per-connection policy.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Answer invalid inbound requests with a CALLERROR (`true`) or pass
    /// them to the handler with the validation error attached (`false`).
    pub reject_invalid_requests: bool,
    /// Give up on an outbound call after this long. `None` waits until the
    /// connection closes.
    pub call_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reject_invalid_requests: true,
            call_timeout: None,
        }
    }
}

/// An OCPP-J RPC endpoint over one transport connection.
pub struct Connection<R: Role, T: Link> {
    identity: String,
    link: Arc<T>,
    upgrade: Arc<UpgradeRequest>,
    handler: Arc<dyn RequestHandler<R>>,
    options: ConnectionOptions,
    pending: PendingCalls,
}

impl<R: Role, T: Link> Connection<R, T> {
    /// Wraps `link`, which must already be open.
    pub fn new(
        identity: impl Into<String>,
        link: Arc<T>,
        upgrade: UpgradeRequest,
        handler: Arc<dyn RequestHandler<R>>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            identity: identity.into(),
            link,
            upgrade: Arc::new(upgrade),
            handler,
            options,
            pending: PendingCalls::default(),
        }
    }

    /// The peer's identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The underlying transport connection.
    pub fn link(&self) -> &Arc<T> {
        &self.link
    }

    /// The upgrade request that opened this connection.
    pub fn upgrade(&self) -> &UpgradeRequest {
        &self.upgrade
    }

    /// Number of outbound calls still waiting for a reply.
    pub async fn pending_calls(&self) -> usize {
        self.pending.len().await
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Sends a CALL and waits for the peer's reply.
    ///
    /// # Errors
    /// - [`RequestError::InvalidRequest`] if `request` fails validation;
    ///   nothing is sent.
    /// - [`RequestError::Transport`] if the frame could not be sent.
    /// - [`RequestError::CallError`] if the peer answered with a CALLERROR.
    /// - [`RequestError::InvalidResponse`] if the CALLRESULT does not fit.
    /// - [`RequestError::ConnectionClosed`] / [`RequestError::Timeout`] if
    ///   no reply arrived.
    pub async fn send_request(
        &self,
        request: R::OutboundRequest,
    ) -> Result<R::OutboundResponse, RequestError> {
        let action = request.action();
        let id = CorrelationId::generate();

        // Registered before the frame leaves so a fast reply has a slot. The
        // slot frees itself on every early return and if this future is
        // dropped mid-wait.
        let mut call = self.pending.register(id.clone()).await?;

        let frame = checked_payload(&request)
            .map_err(RequestError::InvalidRequest)
            .and_then(|payload| {
                stringify(&Envelope::Call {
                    id: id.clone(),
                    action: action.to_owned(),
                    payload,
                })
                .map_err(|e| RequestError::Transport(e.to_string()))
            })
            .inspect_err(|e| {
                tracing::warn!(identity = %self.identity, %id, action, error = %e, "outbound request refused");
            })?;

        if let Err(e) = self.link.send(&frame).await {
            tracing::warn!(identity = %self.identity, %id, action, error = %e, "send failed");
            return Err(RequestError::Transport(e.to_string()));
        }
        tracing::debug!(identity = %self.identity, %id, action, "CALL sent");

        let reply = match self.options.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call.wait()).await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::warn!(identity = %self.identity, %id, action, ?limit, "call timed out");
                    return Err(RequestError::Timeout(limit));
                }
            },
            None => call.wait().await,
        }
        .ok_or(RequestError::ConnectionClosed)?;

        match reply {
            Envelope::CallResult { payload, .. } => {
                validate_response(action, &payload).map_err(RequestError::InvalidResponse)
            }
            Envelope::CallError {
                error_code,
                error_description,
                error_details,
                ..
            } => Err(RequestError::CallError {
                code: error_code,
                description: error_description,
                details: error_details,
            }),
            Envelope::Call { .. } => Err(RequestError::UnexpectedCall),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Reads frames until the peer closes, dispatching each one on its own
    /// task.
    ///
    /// Handlers therefore never block the read loop, and a handler may
    /// itself call the peer on this connection.
    ///
    /// # Errors
    /// The transport's receive error, if the link broke rather than closed.
    pub async fn serve(self: &Arc<Self>, on_raw: Option<&RawMessageHook>) -> Result<(), T::Error> {
        while let Some(raw) = self.link.recv().await? {
            if let Some(hook) = on_raw {
                hook(&self.identity, &raw);
            }
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Some(reply) = this.handle_message(&raw).await {
                    this.transmit(&reply).await;
                }
            });
        }
        Ok(())
    }

    /// Processes one raw frame and returns the reply to send, if any.
    ///
    /// A CALL always produces a reply. A CALLRESULT or CALLERROR never does:
    /// it resolves a pending call or, if nobody is waiting on its id, is
    /// dropped.
    pub async fn handle_message(&self, raw: &[u8]) -> Option<Envelope> {
        let envelope = match parse(raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                let Some(id) = salvage_call_id(raw) else {
                    tracing::warn!(identity = %self.identity, %error, "dropping unparseable frame");
                    return None;
                };
                tracing::warn!(identity = %self.identity, %id, %error, "malformed CALL");
                return Some(Envelope::call_error(
                    id,
                    ErrorCode::FormationViolation,
                    error.to_string(),
                    None,
                ));
            }
        };

        match envelope {
            Envelope::Call {
                id,
                action,
                payload,
            } => Some(self.dispatch(id, action, payload).await),
            reply => {
                let id = reply.id().clone();
                let kind = reply.message_type().name();
                if !self.pending.resolve(reply).await {
                    tracing::debug!(identity = %self.identity, %id, kind, "reply for unknown call id ignored");
                }
                None
            }
        }
    }

    async fn dispatch(&self, id: CorrelationId, action: String, payload: Value) -> Envelope {
        let (request, validation_error) =
            match validate_request::<R::InboundRequest>(&action, &payload) {
                Ok(request) => (Inbound::Valid(request), None),
                Err(error) if self.options.reject_invalid_requests => {
                    tracing::info!(identity = %self.identity, %id, %action, %error, "rejecting invalid request");
                    return Envelope::call_error(
                        id,
                        ErrorCode::GenericError,
                        error.to_string(),
                        None,
                    );
                }
                Err(error) => {
                    tracing::info!(identity = %self.identity, %id, %action, %error, "forwarding invalid request");
                    (
                        Inbound::Invalid {
                            action: action.clone(),
                            payload,
                        },
                        Some(error),
                    )
                }
            };

        let metadata = RequestMetadata {
            identity: self.identity.clone(),
            upgrade: Arc::clone(&self.upgrade),
            validation_error,
        };

        match self.handler.handle(request, metadata).await {
            Ok(response) => self.reply(id, &action, response),
            Err(source) => {
                let cause = source.to_string();
                let error = ApplicationError::new(format!("handling {action}"), source);
                tracing::warn!(identity = %self.identity, %id, %action, %error, "handler failed");
                Envelope::call_error(
                    id,
                    ErrorCode::GenericError,
                    error.to_string(),
                    Some(json!({ "cause": cause })),
                )
            }
        }
    }

    fn reply(&self, id: CorrelationId, action: &str, response: R::InboundResponse) -> Envelope {
        if response.action() != action {
            tracing::warn!(
                identity = %self.identity,
                %id,
                action,
                response = response.action(),
                "handler answered with the wrong action"
            );
            return Envelope::call_error(
                id,
                ErrorCode::GenericError,
                format!("handler answered {action} with a {} response", response.action()),
                None,
            );
        }

        match checked_payload(&response) {
            Ok(payload) => Envelope::CallResult { id, payload },
            Err(error) => {
                tracing::warn!(identity = %self.identity, %id, action, %error, "handler response failed validation");
                Envelope::call_error(id, ErrorCode::GenericError, error.to_string(), None)
            }
        }
    }

    async fn transmit(&self, envelope: &Envelope) {
        let frame = match stringify(envelope) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::error!(identity = %self.identity, id = %envelope.id(), %error, "reply not encodable");
                return;
            }
        };
        if let Err(error) = self.link.send(&frame).await {
            tracing::warn!(identity = %self.identity, id = %envelope.id(), %error, "reply not sent");
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Fails every pending call and refuses new ones, without touching the
    /// transport. Used when the transport is already gone.
    pub async fn abandon(&self) {
        let failed = self.pending.close().await;
        if failed > 0 {
            tracing::debug!(identity = %self.identity, failed, "pending calls failed on close");
        }
    }

    /// Closes the connection: fails every pending call, then closes the
    /// transport.
    pub async fn close(&self) {
        self.abandon().await;
        if let Err(error) = self.link.close().await {
            tracing::debug!(identity = %self.identity, %error, "transport close failed");
        }
    }
}

impl<R: Role, T: Link> std::fmt::Debug for Connection<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.identity)
            .field("role", &R::NAME)
            .field("link", &self.link.id())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
