//! Wire protocol for OCPP-J.
//!
//! This crate defines the envelope every OCPP-J message travels in and the
//! codec that maps it to and from JSON text:
//!
//! - **Types** ([`Envelope`], [`MessageType`], [`CorrelationId`],
//!   [`ErrorCode`]): the three frame kinds and their parts.
//! - **Codec** ([`parse`], [`stringify`]): raw bytes ⇄ [`Envelope`].
//! - **Errors** ([`ProtocolError`]): what can go wrong while parsing.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the RPC
//! engine (correlation and dispatch). It knows nothing about actions or
//! payload schemas; a payload is just a JSON value here.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → RPC (pending calls, handler)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{parse, salvage_call_id, stringify};
pub use error::ProtocolError;
pub use types::{CorrelationId, Envelope, ErrorCode, MessageType};
