//! Periodic WebSocket pings for live connections.
//!
//! One task per connection. The first ping is delayed by a random jitter
//! on top of the interval so that charge points which reconnected together
//! (after a server restart, say) are not pinged in lockstep.

use std::sync::Arc;
use std::time::Duration;

use ocppj_transport::Connection as Link;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Keepalive settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Time between pings. `Duration::ZERO` disables keepalive.
    pub interval: Duration,
    /// Upper bound of the random delay added to the first ping.
    pub initial_jitter: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_jitter: Duration::from_secs(1),
        }
    }
}

impl KeepaliveConfig {
    /// Shortest interval accepted; anything below (other than zero) is
    /// raised to it.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

    /// A config pinging every `interval` with default jitter.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`Keepalive::start`].
    ///
    /// - A non-zero `interval` is raised to at least [`Self::MIN_INTERVAL`].
    /// - `initial_jitter` is capped at `interval`.
    pub fn validated(mut self) -> Self {
        if !self.interval.is_zero() && self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                "keepalive interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.initial_jitter = self.initial_jitter.min(self.interval);
        self
    }

    /// Whether pings are sent at all.
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }
}

/// A running keepalive task. Dropping it stops the pings.
#[derive(Debug)]
pub struct Keepalive {
    task: Option<JoinHandle<()>>,
}

impl Keepalive {
    /// Starts pinging `link` according to `config`.
    ///
    /// The task ends by itself on the first failed ping: a link that
    /// cannot be pinged is closing anyway, and the read loop will notice.
    pub fn start<T: Link>(identity: &str, link: Arc<T>, config: KeepaliveConfig) -> Self {
        let config = config.validated();
        if !config.is_enabled() {
            debug!(identity, "keepalive disabled");
            return Self { task: None };
        }

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max = config.initial_jitter.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=max))
        };
        let first = Instant::now() + config.interval + jitter;
        let identity = identity.to_owned();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(first, config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(error) = link.ping().await {
                    debug!(%identity, %error, "keepalive ping failed, stopping");
                    break;
                }
                trace!(%identity, "keepalive ping sent");
            }
        });
        Self { task: Some(task) }
    }

    /// Stops the pings.
    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the ping task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_thirty_seconds() {
        let config = KeepaliveConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert!(config.is_enabled());
    }

    #[test]
    fn test_validated_clamps() {
        let config = KeepaliveConfig {
            interval: Duration::from_millis(10),
            initial_jitter: Duration::from_secs(5),
        }
        .validated();
        assert_eq!(config.interval, KeepaliveConfig::MIN_INTERVAL);
        assert_eq!(config.initial_jitter, KeepaliveConfig::MIN_INTERVAL);
    }

    #[test]
    fn test_zero_interval_disables() {
        let config = KeepaliveConfig::with_interval(Duration::ZERO).validated();
        assert!(!config.is_enabled());
        assert_eq!(config.initial_jitter, Duration::ZERO);
    }
}
