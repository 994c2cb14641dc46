//! The validation gate.
//!
//! Each direction of traffic is described by one enum whose variants are the
//! actions allowed in that direction. A variant *is* the action tag: once a
//! payload has passed [`validate_request`] the action travels with the value
//! and downstream code never carries it separately. Turning the value back
//! into a bare wire payload ([`Message::to_payload`]) drops the tag again.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ValidationError;

/// A set of actions together with their typed payloads.
///
/// Implemented by the request and response enums of each direction; see
/// [`ChargePointRequest`](crate::ChargePointRequest) and
/// [`CentralSystemRequest`](crate::CentralSystemRequest).
pub trait Message: Debug + Clone + Send + Sync + Sized + 'static {
    /// Every action name this set accepts.
    const ACTIONS: &'static [&'static str];

    /// The action this value belongs to.
    fn action(&self) -> &'static str;

    /// Checks `action` membership, then decodes `payload` against that
    /// action's schema.
    ///
    /// # Errors
    /// [`ValidationError::ActionNotValid`] for an action outside
    /// [`ACTIONS`](Self::ACTIONS), [`ValidationError::Schema`] for a payload
    /// that does not fit.
    fn from_payload(action: &str, payload: &Value) -> Result<Self, ValidationError>;

    /// The wire payload, without the action tag.
    ///
    /// # Errors
    /// Fails only if the typed value cannot be represented as JSON.
    fn to_payload(&self) -> Result<Value, ValidationError>;

    /// Whether `action` belongs to this set.
    fn allows(action: &str) -> bool {
        Self::ACTIONS.contains(&action)
    }
}

/// Validates an inbound or outbound request payload.
///
/// Membership is checked first, so an unknown action is reported as such
/// even when its payload would be garbage for every schema.
///
/// # Errors
/// See [`Message::from_payload`].
pub fn validate_request<M: Message>(action: &str, payload: &Value) -> Result<M, ValidationError> {
    M::from_payload(action, payload)
}

/// Validates a response payload against the shape expected for `action`.
///
/// # Errors
/// See [`Message::from_payload`].
pub fn validate_response<M: Message>(action: &str, payload: &Value) -> Result<M, ValidationError> {
    M::from_payload(action, payload)
}

/// Encodes a typed value and runs it back through the gate.
///
/// Typed construction already rules out most violations, but a value can
/// still serialize to something its schema refuses (a `NaN` limit becomes
/// `null`, for instance). Both send paths go through here so nothing
/// unvalidated reaches the wire.
///
/// # Errors
/// The [`ValidationError`] the round trip produced.
pub fn checked_payload<M: Message>(message: &M) -> Result<Value, ValidationError> {
    let payload = message.to_payload()?;
    M::from_payload(message.action(), &payload)?;
    Ok(payload)
}

pub(crate) fn decode<T: DeserializeOwned>(
    action: &str,
    payload: &Value,
) -> Result<T, ValidationError> {
    if !payload.is_object() {
        return Err(ValidationError::Schema {
            action: action.to_owned(),
            violations: vec![format!("payload must be a JSON object, got {payload}")],
        });
    }
    T::deserialize(payload).map_err(|e| ValidationError::Schema {
        action: action.to_owned(),
        violations: vec![e.to_string()],
    })
}

pub(crate) fn encode<T: Serialize>(action: &str, payload: &T) -> Result<Value, ValidationError> {
    serde_json::to_value(payload).map_err(|e| ValidationError::Schema {
        action: action.to_owned(),
        violations: vec![e.to_string()],
    })
}

/// Declares one direction's action set.
///
/// Expands to the enum, its [`Message`] impl, and a `From` impl per payload
/// type so callers can write `HeartbeatRequest {}.into()`.
macro_rules! action_set {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $action:ident($payload:ty) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis enum $name {
            $( $(#[$vmeta])* $action($payload), )+
        }

        impl $crate::Message for $name {
            const ACTIONS: &'static [&'static str] = &[$(stringify!($action)),+];

            fn action(&self) -> &'static str {
                match self {
                    $( Self::$action(_) => stringify!($action), )+
                }
            }

            fn from_payload(
                action: &str,
                payload: &serde_json::Value,
            ) -> Result<Self, $crate::ValidationError> {
                match action {
                    $( stringify!($action) => {
                        $crate::message::decode(action, payload).map(Self::$action)
                    } )+
                    _ => Err($crate::ValidationError::ActionNotValid(action.to_owned())),
                }
            }

            fn to_payload(&self) -> Result<serde_json::Value, $crate::ValidationError> {
                match self {
                    $( Self::$action(payload) => {
                        $crate::message::encode(stringify!($action), payload)
                    } )+
                }
            }
        }

        $(
            impl From<$payload> for $name {
                fn from(payload: $payload) -> Self {
                    Self::$action(payload)
                }
            }
        )+
    };
}

pub(crate) use action_set;
