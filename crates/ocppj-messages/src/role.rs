//! Which side of the link we are on.
//!
//! The same connection engine runs on both ends. A [`Role`] picks the four
//! action sets that apply: what we accept and answer, and what we send and
//! expect back.

use crate::{
    CentralSystemRequest, CentralSystemResponse, ChargePointRequest, ChargePointResponse, Message,
};

/// The action sets for one end of an OCPP-J link.
pub trait Role: Send + Sync + 'static {
    /// Name used in logs.
    const NAME: &'static str;

    /// Requests the peer may send us.
    type InboundRequest: Message;
    /// Our answers to [`InboundRequest`](Self::InboundRequest)s.
    type InboundResponse: Message;
    /// Requests we may send the peer.
    type OutboundRequest: Message;
    /// The peer's answers to [`OutboundRequest`](Self::OutboundRequest)s.
    type OutboundResponse: Message;
}

/// The server end: answers charge point requests, issues commands.
#[derive(Debug)]
pub enum CentralSystemRole {}

impl Role for CentralSystemRole {
    const NAME: &'static str = "central-system";

    type InboundRequest = ChargePointRequest;
    type InboundResponse = ChargePointResponse;
    type OutboundRequest = CentralSystemRequest;
    type OutboundResponse = CentralSystemResponse;
}

/// The client end: the mirror image of [`CentralSystemRole`].
#[derive(Debug)]
pub enum ChargePointRole {}

impl Role for ChargePointRole {
    const NAME: &'static str = "charge-point";

    type InboundRequest = CentralSystemRequest;
    type InboundResponse = CentralSystemResponse;
    type OutboundRequest = ChargePointRequest;
    type OutboundResponse = ChargePointResponse;
}
