//! The OCPP-J RPC engine for a single connection.
//!
//! A [`Connection`] composes the codec (`ocppj-protocol`) and the
//! validation gate (`ocppj-messages`) over any [`ocppj_transport::Connection`]:
//!
//! - **Outbound**: [`Connection::send_request`] registers a pending call,
//!   validates and sends the CALL, then waits for the matching reply.
//! - **Inbound**: [`Connection::serve`] reads frames; CALLs go through
//!   validation to the [`RequestHandler`], replies resolve pending calls.
//!
//! The same engine serves both ends of a link. The [`Role`] parameter
//! picks which action sets are inbound and which are outbound.
//!
//! [`Role`]: ocppj_messages::Role

mod connection;
mod error;
mod handler;
mod pending;

pub use connection::{Connection, ConnectionOptions};
pub use error::{ApplicationError, BoxError, RequestError};
pub use handler::{Inbound, RawMessageHook, RequestHandler, RequestMetadata};
