//! Charge point identity from the upgrade request target.
//!
//! OCPP-J puts the identity in the last path segment
//! (`ws://host/ocpp/CP001`). Some deployments cannot route on paths, so a
//! query form (`/?CP001` or `/?chargerId=CP001`) is accepted too, and a
//! site suffix (`keba1@Hotel 23`) is dropped.
//!
//! Only literal separators count: the target is split first and decoded
//! last, so `CP%3D7` is the identity `CP=7`.

use percent_encoding::percent_decode_str;

/// Derives the peer identity from a request target such as
/// `/ocpp/keba1@Hotel%2023`. Returns `None` when nothing usable is left.
pub fn derive_identity(target: &str) -> Option<String> {
    let mut identity = target.rsplit('/').next().unwrap_or(target);

    if let Some((before, _)) = identity.split_once('@') {
        if !before.is_empty() {
            identity = before;
        }
    }
    if let Some(after) = second_part(identity, '?') {
        identity = after;
    }
    if let Some(after) = second_part(identity, '=') {
        identity = after;
    }

    (!identity.is_empty()).then(|| percent_decode_str(identity).decode_utf8_lossy().into_owned())
}

/// The text between the first and second `sep`, if non-empty.
fn second_part(s: &str, sep: char) -> Option<&str> {
    s.split(sep).nth(1).filter(|part| !part.is_empty())
}
