//! OCPP 1.6 actions and the validation gate for OCPP-J.
//!
//! Payload schemas are expressed as Rust types: every action is a variant
//! of a per-direction enum ([`ChargePointRequest`], [`CentralSystemResponse`],
//! and so on) wrapping a struct that mirrors the JSON schema. Validating a
//! payload means decoding it into that struct, which checks
//!
//! - the action is in the direction's set,
//! - required fields are present and no unknown ones are,
//! - enumerations hold one of their listed values,
//! - `CiStringN` fields respect their length limit,
//! - date-times parse as RFC 3339.
//!
//! A [`Role`] bundles the four sets one end of a link uses, so the engine
//! in `ocppj-rpc` is written once for both ends.

mod central_system;
mod charge_point;
mod error;
pub(crate) mod message;
mod role;
mod types;

pub use central_system::*;
pub use charge_point::*;
pub use error::{CiStringError, ValidationError};
pub use message::{Message, checked_payload, validate_request, validate_response};
pub use role::{CentralSystemRole, ChargePointRole, Role};
pub use types::*;
