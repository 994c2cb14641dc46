//! # ocppj
//!
//! An OCPP-J protocol engine: JSON-RPC-style request/response over
//! WebSocket between charge points and a central system.
//!
//! Either end can call the other at any time on the same socket. This
//! crate wires the layers into the two roles:
//!
//! - [`CentralSystem`]: accepts charge points, keys them by the identity in
//!   the upgrade URL, pings them, and lets you call any of them by identity.
//! - [`ChargePoint`]: connects to a central system and calls it.
//!
//! Every payload in either direction is checked against its OCPP 1.6
//! schema. Handlers receive typed requests and return typed responses.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocppj::prelude::*;
//!
//! async fn answer(
//!     request: Inbound<ChargePointRequest>,
//!     _meta: RequestMetadata,
//! ) -> Result<ChargePointResponse, BoxError> {
//!     Err(format!("{} is not supported", request.action()).into())
//! }
//!
//! # async fn demo() -> Result<(), OcppError> {
//! let server = CentralSystem::start(CentralSystemConfig::default().bind("0.0.0.0:9220"), answer).await?;
//! let _status = server.send_request("CP1", ClearCacheRequest {}.into()).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod handler;
pub mod logging;
mod server;

pub use client::{ChargePoint, ChargePointConnection};
pub use config::{CentralSystemConfig, ChargePointConfig};
pub use error::OcppError;
pub use server::{CentralSystem, CentralSystemConnection};

pub use ocppj_messages as messages;
pub use ocppj_protocol as protocol;
pub use ocppj_registry as registry;
pub use ocppj_rpc as rpc;
pub use ocppj_transport as transport;

/// Everything needed to run either end.
pub mod prelude {
    pub use crate::{
        CentralSystem, CentralSystemConfig, ChargePoint, ChargePointConfig, OcppError,
    };
    pub use ocppj_messages::*;
    pub use ocppj_protocol::ErrorCode;
    pub use ocppj_registry::{ConnectionStatus, KeepaliveConfig};
    pub use ocppj_rpc::{
        BoxError, Inbound, RawMessageHook, RequestError, RequestHandler, RequestMetadata,
    };
}
