//! Connection lifecycle for the server role.
//!
//! - [`ConnectionRegistry`]: live connections keyed by charge point
//!   identity, with connect/disconnect listeners.
//! - [`derive_identity`]: the identity from the WebSocket upgrade target.
//! - [`Keepalive`]: periodic pings per connection.

mod identity;
mod keepalive;
mod registry;

pub use identity::derive_identity;
pub use keepalive::{Keepalive, KeepaliveConfig};
pub use registry::{ConnectionListener, ConnectionRegistry, ConnectionStatus, Registration};
