//! Error types for payload validation.

/// Why a payload was refused by the validation gate.
///
/// Always locally recoverable: the RPC layer turns it into a CALLERROR,
/// a failed `send_request`, or side-channel metadata for permissive
/// handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The action is not in the set this direction accepts.
    #[error("action is not valid: {0}")]
    ActionNotValid(String),

    /// The payload does not match the action's schema.
    #[error("schema violations for {action}: {}", .violations.join("; "))]
    Schema {
        /// The action whose schema was checked.
        action: String,
        /// One entry per violation found.
        violations: Vec<String>,
    },
}

impl ValidationError {
    /// The offending action name.
    pub fn action(&self) -> &str {
        match self {
            Self::ActionNotValid(action) | Self::Schema { action, .. } => action,
        }
    }
}

/// A string exceeded its OCPP `CiStringN` length limit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("string of {len} characters exceeds the limit of {max}")]
pub struct CiStringError {
    /// The limit for this field.
    pub max: usize,
    /// The length that was supplied.
    pub len: usize,
}
