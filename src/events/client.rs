//! # Client handle: identity plus inbox access.
//!
//! An [`EventClient`] is what a worker owns: its [`ClientId`], a bus
//! handle, and its inbox. Construction registers with the bus (see
//! [`Bus::register`](super::Bus::register)); dropping the handle
//! deregisters and drains the inbox, which also ends any netlink route
//! watches held for this client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RuntimeError;

use super::bus::Bus;
use super::event::{ClientId, Event};
use super::inbox::Inbox;

pub struct EventClient {
    id: ClientId,
    bus: Bus,
    inbox: Arc<Inbox>,
}

impl EventClient {
    pub(crate) fn new(id: ClientId, bus: Bus, inbox: Arc<Inbox>) -> Self {
        Self { id, bus, inbox }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Non-blocking pop; `None` when the inbox is empty.
    pub fn pop(&self) -> Option<Event> {
        self.inbox.pop()
    }

    /// Waits for the next event. `None` waits indefinitely; a zero timeout
    /// is a pure non-blocking check.
    pub async fn pop_wait(&self, timeout: Option<Duration>) -> Option<Event> {
        self.inbox.pop_wait(timeout).await
    }

    /// Sends an event to one peer, stamped with this client as source.
    /// Returns `false` when the peer is gone.
    pub fn push_to(&self, target: ClientId, event: Event) -> bool {
        self.bus.push(event.with_source(self.id), target)
    }

    /// Broadcasts an event, stamped with this client as source.
    pub fn broadcast(&self, event: Event) -> Result<(), RuntimeError> {
        self.bus.broadcast(event.with_source(self.id))
    }
}

impl Drop for EventClient {
    fn drop(&mut self) {
        self.bus.deregister(self.id);
    }
}

impl fmt::Debug for EventClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventClient").field("id", &self.id).finish()
    }
}
