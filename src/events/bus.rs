//! # Event bus: client registry, targeted push, and broadcast.
//!
//! The [`Bus`] owns the map from [`ClientId`] to inbox and the list of
//! retained sticky events. It is cheaply cloneable; every service and
//! plugin worker holds one.
//!
//! ## Key characteristics
//! - **Targeted push**: delivers to exactly one inbox; unknown targets are
//!   reported to the caller, never an error.
//! - **Broadcast**: clones the event into every registered inbox. The
//!   broadcaster is included unless it would be the sole recipient.
//! - **Sticky retention**: sticky broadcasts are kept and replayed to
//!   clients that register afterwards, once each.
//! - **No cross-inbox ordering**: two clients may observe one broadcast in
//!   different relative positions against their other traffic.
//!
//! Deregistration drains the departing client's inbox so queued payloads
//! are released promptly.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use log::debug;

use crate::error::RuntimeError;

use super::client::EventClient;
use super::event::{ClientId, Event, EventFlags};
use super::inbox::Inbox;

struct BusInner {
    clients: DashMap<ClientId, Arc<Inbox>>,
    sticky: Mutex<Vec<Event>>,
    next_id: AtomicU64,
}

/// Shared handle to the delivery plane.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                clients: DashMap::new(),
                sticky: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a new client and replays retained sticky events into its
    /// inbox. The returned handle deregisters on drop.
    pub fn register(&self) -> EventClient {
        let id = ClientId(self.inner.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        let inbox = Arc::new(Inbox::new());
        self.inner.clients.insert(id, inbox.clone());

        let sticky = self.inner.sticky.lock().expect("sticky lock poisoned");
        for event in sticky.iter() {
            // Retained events are clonable by construction; the inbox's
            // seen-set keeps a concurrent broadcast from double-delivering.
            if let Ok(copy) = event.try_clone() {
                inbox.push(copy);
            }
        }
        drop(sticky);

        EventClient::new(id, self.clone(), inbox)
    }

    pub(crate) fn deregister(&self, id: ClientId) {
        if let Some((_, inbox)) = self.inner.clients.remove(&id) {
            let dropped = inbox.drain();
            if dropped > 0 {
                debug!("{id} deregistered with {dropped} undelivered event(s)");
            }
        }
    }

    pub fn is_registered(&self, id: ClientId) -> bool {
        self.inner.clients.contains_key(&id)
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// Delivers an event to exactly one client. Returns `false` when the
    /// target is no longer registered (the event is dropped).
    pub fn push(&self, event: Event, target: ClientId) -> bool {
        match self.inner.clients.get(&target) {
            Some(inbox) => {
                inbox.push(event.with_target(target));
                true
            }
            None => false,
        }
    }

    /// Fans an event out to every registered client.
    ///
    /// Sticky events are additionally retained for replay to future
    /// registrants. Fails with `UnsupportedOperation` when the event kind
    /// refuses cloning (netlink): such events cannot be broadcast.
    pub fn broadcast(&self, event: Event) -> Result<(), RuntimeError> {
        if event.flags().contains(EventFlags::STICKY) {
            let retained = event.try_clone()?;
            self.inner
                .sticky
                .lock()
                .expect("sticky lock poisoned")
                .push(retained);
        }

        let source = event.source();
        let lone_broadcaster =
            self.inner.clients.len() == 1 && source.map_or(false, |id| self.is_registered(id));

        for entry in self.inner.clients.iter() {
            if lone_broadcaster && Some(*entry.key()) == source {
                continue;
            }
            entry.value().push(event.try_clone()?);
        }
        Ok(())
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
