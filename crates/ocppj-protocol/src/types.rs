//! Core protocol types for the OCPP-J wire format.
//!
//! An OCPP-J frame is a JSON array whose first element says what kind of
//! message it is:
//!
//! ```text
//! [2, "<id>", "<action>", {payload}]                        CALL
//! [3, "<id>", {payload}]                                    CALLRESULT
//! [4, "<id>", "<errorCode>", "<description>", {details}]    CALLERROR
//! ```
//!
//! This module defines the Rust side of those shapes. The array encoding
//! itself lives in [`crate::codec`].

use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The numeric type tag in the first element of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A request.
    Call = 2,
    /// A successful reply.
    CallResult = 3,
    /// An error reply.
    CallError = 4,
}

impl MessageType {
    /// Reads a type tag. Accepts both `2` and `"2"` on the wire.
    pub fn from_tag(tag: &Value) -> Option<Self> {
        let n = match tag {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        match n {
            2 => Some(Self::Call),
            3 => Some(Self::CallResult),
            4 => Some(Self::CallError),
            _ => None,
        }
    }

    /// The integer written on the wire.
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::CallResult => "CALLRESULT",
            Self::CallError => "CALLERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// CorrelationId
// ---------------------------------------------------------------------------

/// Caller-generated token that ties a CALL to its reply.
///
/// Opaque to everyone but the side that generated it. We generate v4 UUIDs;
/// peers may use any string, so parsing never assumes a format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// A fresh random id for an outbound call.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// The error codes OCPP-J defines for CALLERROR frames.
///
/// Peers are free to send anything, so [`Envelope::CallError`] keeps the
/// raw string; this enum is for the codes *we* emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Requested action is not known by the receiver.
    NotImplemented,
    /// Requested action is recognized but not supported by the receiver.
    NotSupported,
    /// An internal error occurred while processing the action.
    InternalError,
    /// Payload for the action is incomplete.
    ProtocolError,
    /// A security issue prevented the receiver from completing the action.
    SecurityError,
    /// Payload for the action is syntactically incorrect.
    FormationViolation,
    /// A field contains an invalid value.
    PropertyConstraintViolation,
    /// A field violates occurrence constraints.
    OccurenceConstraintViolation,
    /// A field violates data type constraints.
    TypeConstraintViolation,
    /// Any other error.
    GenericError,
}

impl ErrorCode {
    /// The code as written on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One OCPP-J frame.
///
/// `payload` is always present in memory: a frame that omits it decodes to
/// an empty object. `error_details` is genuinely optional and is left off
/// the wire when `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A request from either side.
    Call {
        /// Correlation id chosen by the caller.
        id: CorrelationId,
        /// Action name, e.g. `"Heartbeat"`.
        action: String,
        /// Request payload.
        payload: Value,
    },
    /// A successful reply to the CALL with the same id.
    CallResult {
        /// Id of the CALL being answered.
        id: CorrelationId,
        /// Response payload.
        payload: Value,
    },
    /// An error reply to the CALL with the same id.
    CallError {
        /// Id of the CALL being answered.
        id: CorrelationId,
        /// Error code, normally one of [`ErrorCode`].
        error_code: String,
        /// Free-form description.
        error_description: String,
        /// Optional structured details.
        error_details: Option<Value>,
    },
}

impl Envelope {
    /// Builds a CALLERROR from one of the standard codes.
    pub fn call_error(
        id: CorrelationId,
        code: ErrorCode,
        description: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self::CallError {
            id,
            error_code: code.as_str().to_owned(),
            error_description: description.into(),
            error_details: details,
        }
    }

    /// The correlation id, whatever the kind.
    pub fn id(&self) -> &CorrelationId {
        match self {
            Self::Call { id, .. }
            | Self::CallResult { id, .. }
            | Self::CallError { id, .. } => id,
        }
    }

    /// The frame's type tag.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Call { .. } => MessageType::Call,
            Self::CallResult { .. } => MessageType::CallResult,
            Self::CallError { .. } => MessageType::CallError,
        }
    }
}

/// Serializes as the positional JSON array, never as an object.
impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Call {
                id,
                action,
                payload,
            } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element(&MessageType::Call.tag())?;
                seq.serialize_element(id)?;
                seq.serialize_element(action)?;
                seq.serialize_element(payload)?;
                seq.end()
            }
            Self::CallResult { id, payload } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element(&MessageType::CallResult.tag())?;
                seq.serialize_element(id)?;
                seq.serialize_element(payload)?;
                seq.end()
            }
            Self::CallError {
                id,
                error_code,
                error_description,
                error_details,
            } => {
                let details = error_details.as_ref().filter(|d| !d.is_null());
                let len = if details.is_some() { 5 } else { 4 };
                let mut seq = serializer.serialize_seq(Some(len))?;
                seq.serialize_element(&MessageType::CallError.tag())?;
                seq.serialize_element(id)?;
                seq.serialize_element(error_code)?;
                seq.serialize_element(error_description)?;
                if let Some(details) = details {
                    seq.serialize_element(details)?;
                }
                seq.end()
            }
        }
    }
}
