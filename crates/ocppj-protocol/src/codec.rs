//! Turning raw frames into [`Envelope`]s and back.
//!
//! [`parse`] is strict about shape (type tag, arity, string ids) and lenient
//! about the optional trailing element: a missing or `null` payload decodes
//! to `{}`. [`stringify`] is the inverse and leaves absent error details off
//! the wire entirely.

use serde_json::{Map, Value};

use crate::{CorrelationId, Envelope, MessageType, ProtocolError};

/// Parses one transport message into an envelope.
///
/// # Errors
/// Any malformed input (not UTF-8, not a JSON array, unknown type tag,
/// wrong arity, non-string id/action/code) is a [`ProtocolError`].
pub fn parse(raw: &[u8]) -> Result<Envelope, ProtocolError> {
    let text = std::str::from_utf8(raw).map_err(ProtocolError::NotText)?;
    let frame: Vec<Value> =
        serde_json::from_str(text).map_err(ProtocolError::Decode)?;

    let Some(tag) = frame.first() else {
        return Err(ProtocolError::UnsupportedMessageType("<empty>".into()));
    };
    let kind = MessageType::from_tag(tag)
        .ok_or_else(|| ProtocolError::UnsupportedMessageType(tag.to_string()))?;

    let (min, max, expected) = match kind {
        MessageType::Call => (3, 4, "3 or 4"),
        MessageType::CallResult => (2, 3, "2 or 3"),
        MessageType::CallError => (4, 5, "4 or 5"),
    };
    if !(min..=max).contains(&frame.len()) {
        return Err(ProtocolError::Arity {
            kind: kind.name(),
            len: frame.len(),
            expected,
        });
    }

    let mut items = frame.into_iter().skip(1);
    let id = CorrelationId::from(string_field(items.next(), "message id")?);

    Ok(match kind {
        MessageType::Call => Envelope::Call {
            id,
            action: string_field(items.next(), "action")?,
            payload: payload_or_empty(items.next()),
        },
        MessageType::CallResult => Envelope::CallResult {
            id,
            payload: payload_or_empty(items.next()),
        },
        MessageType::CallError => Envelope::CallError {
            id,
            error_code: string_field(items.next(), "error code")?,
            error_description: string_field(items.next(), "error description")?,
            error_details: items.next().filter(|d| !d.is_null()),
        },
    })
}

/// Writes an envelope as a compact JSON array.
///
/// # Errors
/// Only fails if `serde_json` itself refuses the value, which cannot
/// happen for payloads that came out of `serde_json` in the first place.
pub fn stringify(envelope: &Envelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(ProtocolError::Encode)
}

/// Recovers the id of a CALL that failed to [`parse`].
///
/// When a peer sends `[2, "<id>", ...]` with a broken tail we can still
/// answer it with a CALLERROR instead of leaving the caller hanging.
/// Returns `None` for anything that isn't recognizably a CALL.
pub fn salvage_call_id(raw: &[u8]) -> Option<CorrelationId> {
    let frame: Vec<Value> = serde_json::from_slice(raw).ok()?;
    match frame.as_slice() {
        [tag, Value::String(id), ..]
            if MessageType::from_tag(tag) == Some(MessageType::Call) =>
        {
            Some(CorrelationId::from(id.as_str()))
        }
        _ => None,
    }
}

fn string_field(
    value: Option<Value>,
    field: &'static str,
) -> Result<String, ProtocolError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        _ => Err(ProtocolError::NotAString { field }),
    }
}

fn payload_or_empty(value: Option<Value>) -> Value {
    match value {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(payload) => payload,
    }
}
