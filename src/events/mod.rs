//! Typed events and the delivery plane.
//!
//! This module groups the event **data model** and the **bus** that carries
//! events between the supervisor, the system services, and plugin workers.
//!
//! ## Contents
//! - [`EventKind`], [`EventFlags`], [`Event`] event classification, delivery
//!   flags, and payload variants
//! - `inbox` (crate-internal) per-client priority mailbox
//! - [`Bus`] client registry, targeted push, broadcast with sticky retention
//! - [`EventClient`] a client's handle: identity plus pop/push/broadcast
//!
//! ## Quick reference
//! - **Producers**: signal supervisor (QUIT/RELOAD), timer service (TIMER),
//!   fd pollers (FDREADY), netlink service (NETLINK replies), plugins
//!   (PLUGIN, NETLINK requests).
//! - **Consumers**: every registered client; the supervisor's main loop is
//!   just another client.
//!
//! See `services/mod.rs` for the system-level wiring diagram.

mod bus;
mod client;
mod event;
mod inbox;

pub use bus::Bus;
pub use client::EventClient;
pub use event::{ClientId, Event, EventFlags, EventKind, Payload, PluginData, TimerFired};
