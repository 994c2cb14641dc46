//! Configuration for both ends of a link.
//!
//! Plain structs with public fields and a `Default`, plus chainable setters
//! so they read well at the call site:
//!
//! ```rust,ignore
//! let config = CentralSystemConfig::default()
//!     .bind("0.0.0.0:9220")
//!     .reject_invalid_requests(false)
//!     .call_timeout(Duration::from_secs(30));
//! ```

use std::fmt;
use std::time::Duration;

use ocppj_registry::KeepaliveConfig;
use ocppj_rpc::{ConnectionOptions, RawMessageHook};
use ocppj_transport::{DEFAULT_HANDSHAKE_TIMEOUT, SUPPORTED_PROTOCOLS};

fn default_protocols() -> Vec<String> {
    SUPPORTED_PROTOCOLS.iter().map(|p| (*p).to_owned()).collect()
}

// ---------------------------------------------------------------------------
// Central system
// ---------------------------------------------------------------------------

/// Settings for a [`CentralSystem`](crate::CentralSystem).
#[derive(Clone)]
pub struct CentralSystemConfig {
    /// Address to listen on.
    pub bind_addr: String,
    /// Answer invalid inbound requests with a CALLERROR (`true`) or hand
    /// them to the handler with the validation error attached (`false`).
    pub reject_invalid_requests: bool,
    /// Ping schedule for every accepted connection.
    pub keepalive: KeepaliveConfig,
    /// Deadline for calls to charge points. `None` waits for the reply or
    /// the disconnect.
    pub call_timeout: Option<Duration>,
    /// Sees every inbound frame before it is parsed.
    pub on_raw_message: Option<RawMessageHook>,
    /// Sub-protocols to accept, most preferred first.
    pub protocols: Vec<String>,
    /// How long a peer may take to finish the WebSocket upgrade.
    pub handshake_timeout: Duration,
}

impl Default for CentralSystemConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9220".to_string(),
            reject_invalid_requests: true,
            keepalive: KeepaliveConfig::default(),
            call_timeout: None,
            on_raw_message: None,
            protocols: default_protocols(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl CentralSystemConfig {
    /// Sets the listen address.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the invalid-request policy.
    pub fn reject_invalid_requests(mut self, reject: bool) -> Self {
        self.reject_invalid_requests = reject;
        self
    }

    /// Sets the keepalive schedule.
    pub fn keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Sets the ping interval, keeping the default jitter.
    /// `Duration::ZERO` disables pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive.interval = interval;
        self
    }

    /// Sets a deadline for outbound calls.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Installs the raw-frame observer.
    pub fn on_raw_message(mut self, hook: RawMessageHook) -> Self {
        self.on_raw_message = Some(hook);
        self
    }

    /// Replaces the accepted sub-protocols.
    pub fn protocols<S: AsRef<str>>(mut self, protocols: &[S]) -> Self {
        self.protocols = protocols.iter().map(|p| p.as_ref().to_owned()).collect();
        self
    }

    /// Sets the upgrade deadline for accepted sockets.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub(crate) fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            reject_invalid_requests: self.reject_invalid_requests,
            call_timeout: self.call_timeout,
        }
    }
}

impl fmt::Debug for CentralSystemConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralSystemConfig")
            .field("bind_addr", &self.bind_addr)
            .field("reject_invalid_requests", &self.reject_invalid_requests)
            .field("keepalive", &self.keepalive)
            .field("call_timeout", &self.call_timeout)
            .field("on_raw_message", &self.on_raw_message.is_some())
            .field("protocols", &self.protocols)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Charge point
// ---------------------------------------------------------------------------

/// Settings for a [`ChargePoint`](crate::ChargePoint).
#[derive(Clone)]
pub struct ChargePointConfig {
    /// Answer invalid requests from the central system with a CALLERROR
    /// (`true`) or pass them to the handler (`false`).
    pub reject_invalid_requests: bool,
    /// Deadline for calls to the central system.
    pub call_timeout: Option<Duration>,
    /// Sees every inbound frame before it is parsed.
    pub on_raw_message: Option<RawMessageHook>,
    /// Sub-protocols to offer, most preferred first.
    pub protocols: Vec<String>,
}

impl Default for ChargePointConfig {
    fn default() -> Self {
        Self {
            reject_invalid_requests: true,
            call_timeout: None,
            on_raw_message: None,
            protocols: default_protocols(),
        }
    }
}

impl ChargePointConfig {
    /// Sets the invalid-request policy.
    pub fn reject_invalid_requests(mut self, reject: bool) -> Self {
        self.reject_invalid_requests = reject;
        self
    }

    /// Sets a deadline for outbound calls.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Installs the raw-frame observer.
    pub fn on_raw_message(mut self, hook: RawMessageHook) -> Self {
        self.on_raw_message = Some(hook);
        self
    }

    /// Replaces the offered sub-protocols.
    pub fn protocols<S: AsRef<str>>(mut self, protocols: &[S]) -> Self {
        self.protocols = protocols.iter().map(|p| p.as_ref().to_owned()).collect();
        self
    }

    pub(crate) fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            reject_invalid_requests: self.reject_invalid_requests,
            call_timeout: self.call_timeout,
        }
    }
}

impl fmt::Debug for ChargePointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChargePointConfig")
            .field("reject_invalid_requests", &self.reject_invalid_requests)
            .field("call_timeout", &self.call_timeout)
            .field("on_raw_message", &self.on_raw_message.is_some())
            .field("protocols", &self.protocols)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_central_system_defaults() {
        let config = CentralSystemConfig::default();
        assert!(config.reject_invalid_requests);
        assert_eq!(config.keepalive.interval, Duration::from_secs(30));
        assert_eq!(config.call_timeout, None);
        assert_eq!(config.protocols, vec!["ocpp1.6", "ocpp1.5"]);
        assert_eq!(config.handshake_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_setters_chain() {
        let config = CentralSystemConfig::default()
            .bind("0.0.0.0:0")
            .reject_invalid_requests(false)
            .keepalive_interval(Duration::ZERO)
            .call_timeout(Duration::from_secs(5))
            .protocols(&["ocpp1.6"])
            .handshake_timeout(Duration::from_secs(3));
        assert_eq!(config.bind_addr, "0.0.0.0:0");
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert!(!config.keepalive.is_enabled());

        let options = config.connection_options();
        assert!(!options.reject_invalid_requests);
        assert_eq!(options.call_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.protocols, vec!["ocpp1.6"]);
    }

    #[test]
    fn test_debug_hides_hook() {
        let config = ChargePointConfig::default().on_raw_message(std::sync::Arc::new(|_: &str, _: &[u8]| {}));
        assert!(format!("{config:?}").contains("on_raw_message: true"));
    }
}
