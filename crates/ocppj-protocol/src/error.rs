//! Error types for the protocol layer.
//!
//! Everything here is a *declared* failure: the codec never panics on peer
//! input, it hands back a `ProtocolError` that the connection turns into a
//! CALLERROR or a log line.

/// Errors that can occur while parsing or writing an OCPP-J frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not valid UTF-8 text.
    #[error("frame is not UTF-8 text: {0}")]
    NotText(#[source] std::str::Utf8Error),

    /// The frame was not a JSON array.
    #[error("frame is not a JSON array: {0}")]
    Decode(#[source] serde_json::Error),

    /// Writing the frame failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The first element is not one of the three envelope type tags.
    #[error("not supported message type: {0}")]
    UnsupportedMessageType(String),

    /// The array has the wrong number of elements for its type.
    #[error("{kind} frame has {len} elements, expected {expected}")]
    Arity {
        /// Envelope kind named by the type tag.
        kind: &'static str,
        /// Elements actually present.
        len: usize,
        /// Human-readable expected range.
        expected: &'static str,
    },

    /// An element has the wrong JSON type (e.g. a numeric call id).
    #[error("{field} must be a string")]
    NotAString {
        /// Which element was wrong.
        field: &'static str,
    },
}
