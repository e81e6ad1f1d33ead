//! System services: the daemon's long-lived workers.
//!
//! ## Files & responsibilities
//! - **signals.rs**: signal supervisor; converts process signals into QUIT
//!   and RELOAD broadcasts, reaps children on SIGCHLD.
//! - **timer.rs**: second-tick driver over a registry of logical timers;
//!   fires TIMER events at their targets.
//! - **poller.rs**: fd readiness poller; latches OS readiness bits and
//!   notifies its owner with an Exclusive|Persistent FDREADY event.
//! - **netlink/**: RTNETLINK query/response correlation and route-change
//!   fan-out.
//!
//! ## Wiring
//! ```text
//! OS signals ─► signals ─► Bus.broadcast(QUIT/RELOAD)
//! 1 s clock  ─► timer   ─► Bus.push(TIMER → target | supervisor)
//! poll(2)    ─► poller  ─► Bus.push(FDREADY → owner)
//! rtnetlink  ─► netlink ─► Bus.push(NETLINK → caller / watchers)
//!
//! plugin workers ──► Bus ──► supervisor ──► filter table ──► plugin inboxes
//! ```
//!
//! The timer registry and the netlink service are singletons: they are
//! constructed once by the supervisor and handed to plugins through
//! [`SystemServices`]. Installing a second instance fails with
//! [`RuntimeError::AlreadyExists`].

pub mod netlink;
pub mod poller;
pub mod signals;
pub mod timer;

use std::sync::{Arc, OnceLock};

use crate::error::RuntimeError;
use crate::events::ClientId;

use timer::TimerRegistry;

/// Handle object giving plugins access to the singleton services.
pub struct SystemServices {
    timer: OnceLock<Arc<TimerRegistry>>,
    netlink: OnceLock<ClientId>,
}

impl SystemServices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            timer: OnceLock::new(),
            netlink: OnceLock::new(),
        })
    }

    pub(crate) fn install_timer(&self, registry: Arc<TimerRegistry>) -> Result<(), RuntimeError> {
        self.timer
            .set(registry)
            .map_err(|_| RuntimeError::AlreadyExists {
                service: "timer service",
            })
    }

    /// The timer registry, once the timer service is up.
    pub fn timer(&self) -> Option<&Arc<TimerRegistry>> {
        self.timer.get()
    }

    pub(crate) fn install_netlink(&self, service: ClientId) -> Result<(), RuntimeError> {
        self.netlink
            .set(service)
            .map_err(|_| RuntimeError::AlreadyExists {
                service: "netlink service",
            })
    }

    /// Inbox address of the netlink service, once it is up. NETLINK query
    /// and route-watch events are pushed here.
    pub fn netlink(&self) -> Option<ClientId> {
        self.netlink.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;

    #[test]
    fn second_timer_install_fails() {
        let bus = Bus::new();
        let supervisor = bus.register();
        let services = SystemServices::new();

        let first = TimerRegistry::new(supervisor.id());
        assert!(services.install_timer(first).is_ok());

        let second = TimerRegistry::new(supervisor.id());
        let err = services.install_timer(second).unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyExists { .. }));
    }

    #[test]
    fn second_netlink_install_fails() {
        let bus = Bus::new();
        let a = bus.register();
        let b = bus.register();
        let services = SystemServices::new();

        assert!(services.install_netlink(a.id()).is_ok());
        let err = services.install_netlink(b.id()).unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyExists { .. }));
        assert_eq!(services.netlink(), Some(a.id()));
    }
}
