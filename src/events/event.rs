//! # Events carried between clients.
//!
//! The [`Event`] struct is the universal message of the daemon. Its
//! [`EventKind`] classifies what happened; [`EventFlags`] control how it is
//! delivered; the payload carries the variant-specific data.
//!
//! ## Delivery flags
//! - **Sticky**: a broadcast event retained by the bus so clients that
//!   register later still observe it exactly once. QUIT is the canonical
//!   sticky event.
//! - **HighPriority**: drained before normal events in every inbox.
//! - **Exclusive**: at most one equivalent event (same kind and source) may
//!   be pending in an inbox; re-pushing is a no-op.
//! - **Persistent**: the producer retains interest in the event after
//!   delivery; consumers must not assume exclusive ownership of its state.
//!   Used together with Exclusive by the fd poller.
//!
//! ## Cloning
//! Events are cloned when one logical occurrence must reach several
//! inboxes (broadcast, plugin filter fan-out). [`Event::try_clone`] is the
//! only sanctioned path: netlink events refuse it, because duplicating an
//! in-flight kernel exchange would let two clients race over one reply
//! queue.
//!
//! ## Ordering
//! Each event has a globally unique sequence number (`seq`) assigned at
//! construction. Clones keep the original's `seq`: it identifies the
//! logical occurrence, which is what sticky-delivery bookkeeping needs.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bitflags::bitflags;

use crate::error::RuntimeError;
use crate::services::netlink::NetlinkExchange;

/// Global sequence counter for event identity.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered event client.
///
/// Events carry `ClientId`s instead of references to the clients
/// themselves; the bus resolves an id to an inbox at delivery time, so a
/// departed client simply stops receiving. This is the weak-reference half
/// of the client/event relation: inboxes own events, events only name
/// clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client#{}", self.0)
    }
}

/// Classification of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Orderly shutdown. Broadcast as Sticky|HighPriority.
    Quit,
    /// Configuration reload requested (SIGHUP).
    Reload,
    /// A logical timer expired.
    Timer,
    /// Netlink request or reply; payload is the shared exchange.
    Netlink,
    /// One or more watched file descriptors became ready.
    FdReady,
    /// Plugin-to-plugin message routed through the filter table.
    Plugin,
}

bitflags! {
    /// Delivery flags. See the module docs for semantics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EventFlags: u8 {
        const STICKY = 0b0001;
        const HIGH_PRIORITY = 0b0010;
        const EXCLUSIVE = 0b0100;
        const PERSISTENT = 0b1000;
    }
}

/// Key/value payload of a PLUGIN event.
///
/// The host stamps `event_source` with the emitting plugin's name before
/// routing, so subscribers can tell their sources apart.
#[derive(Debug, Clone, Default)]
pub struct PluginData {
    values: HashMap<String, String>,
}

impl PluginData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Payload of a TIMER event.
#[derive(Debug, Clone, Copy)]
pub struct TimerFired {
    /// Informational timer id; multiple timers may share one.
    pub timer_id: u64,
}

/// Variant-specific event payload.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    None,
    Timer(TimerFired),
    Netlink(Arc<NetlinkExchange>),
    Plugin(PluginData),
}

/// The universal message.
#[derive(Debug)]
pub struct Event {
    seq: u64,
    kind: EventKind,
    flags: EventFlags,
    source: Option<ClientId>,
    target: Option<ClientId>,
    payload: Payload,
}

impl Event {
    /// Creates a bare event of the given kind with the next sequence
    /// number, no flags, and no payload.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            kind,
            flags: EventFlags::empty(),
            source: None,
            target: None,
            payload: Payload::None,
        }
    }

    /// The canonical shutdown event: Sticky so late registrants still see
    /// it, HighPriority so it jumps any queued work.
    pub fn quit() -> Self {
        Self::new(EventKind::Quit).with_flags(EventFlags::STICKY | EventFlags::HIGH_PRIORITY)
    }

    pub fn reload() -> Self {
        Self::new(EventKind::Reload)
    }

    pub fn timer(timer_id: u64) -> Self {
        let mut ev = Self::new(EventKind::Timer);
        ev.payload = Payload::Timer(TimerFired { timer_id });
        ev
    }

    /// Readiness notification from an fd poller. Exclusive|Persistent: at
    /// most one is pending per inbox no matter how many poll cycles fire
    /// before the owner drains it.
    pub fn fd_ready() -> Self {
        Self::new(EventKind::FdReady).with_flags(EventFlags::EXCLUSIVE | EventFlags::PERSISTENT)
    }

    pub fn plugin(data: PluginData) -> Self {
        let mut ev = Self::new(EventKind::Plugin);
        ev.payload = Payload::Plugin(data);
        ev
    }

    pub fn netlink(exchange: Arc<NetlinkExchange>) -> Self {
        let mut ev = Self::new(EventKind::Netlink);
        ev.payload = Payload::Netlink(exchange);
        ev
    }

    pub fn with_flags(mut self, flags: EventFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_source(mut self, source: ClientId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: ClientId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    pub fn source(&self) -> Option<ClientId> {
        self.source
    }

    pub fn target(&self) -> Option<ClientId> {
        self.target
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    /// Convenience accessor for PLUGIN payloads.
    pub fn plugin_data(&self) -> Option<&PluginData> {
        match &self.payload {
            Payload::Plugin(data) => Some(data),
            _ => None,
        }
    }

    /// Convenience accessor for NETLINK payloads.
    pub fn netlink_exchange(&self) -> Option<&Arc<NetlinkExchange>> {
        match &self.payload {
            Payload::Netlink(exchange) => Some(exchange),
            _ => None,
        }
    }

    /// Duplicates this event for delivery to an additional inbox.
    ///
    /// Netlink events refuse: their payload is a live exchange with the
    /// kernel and must have exactly one consumer.
    pub fn try_clone(&self) -> Result<Self, RuntimeError> {
        if matches!(self.payload, Payload::Netlink(_)) {
            return Err(RuntimeError::UnsupportedOperation {
                op: "clone of a netlink event",
            });
        }
        Ok(Self {
            seq: self.seq,
            kind: self.kind,
            flags: self.flags,
            source: self.source,
            target: self.target,
            payload: self.payload.clone(),
        })
    }

    /// Two events are equivalent for Exclusive dedup when they are the same
    /// kind from the same source.
    pub(crate) fn is_equivalent(&self, other: &Event) -> bool {
        self.kind == other.kind && self.source == other.source
    }
}
