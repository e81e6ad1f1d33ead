//! # Global runtime configuration.
//!
//! [`Config`] defines the substrate's timing behavior: how long workers
//! block on their inboxes between housekeeping passes, the fd poller's OS
//! wait, and the netlink service's inbox slice. Every long-lived task must
//! observe its inbox at least once per second so a broadcast QUIT is seen
//! promptly; the defaults here guarantee that.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use syncvisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.poll_cycle = Duration::from_millis(250);
//!
//! assert!(cfg.pop_timeout <= Duration::from_secs(1));
//! ```

use std::time::Duration;

/// Timing configuration for the runtime and services.
#[derive(Clone, Debug)]
pub struct Config {
    /// Upper bound on a worker's inbox wait before it re-checks for
    /// periodic work. Must not exceed one second.
    pub pop_timeout: Duration,
    /// OS readiness wait used by each fd poller iteration.
    pub poll_cycle: Duration,
    /// Inbox wait used by the netlink service when its socket is drained.
    pub netlink_wait: Duration,
}

impl Default for Config {
    /// Provides the default configuration:
    /// - `pop_timeout = 1s`
    /// - `poll_cycle = 500ms`
    /// - `netlink_wait = 500ms`
    fn default() -> Self {
        Self {
            pop_timeout: Duration::from_secs(1),
            poll_cycle: Duration::from_millis(500),
            netlink_wait: Duration::from_millis(500),
        }
    }
}
