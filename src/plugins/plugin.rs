//! # Plugin contract and loader boundary.
//!
//! A plugin is an event-driven guest: it never owns a thread of the
//! supervisor and never blocks a peer. The host calls its lifecycle
//! methods from the plugin's dedicated worker thread, and all events reach
//! it through its inbox; the host makes no thread-safety assumptions
//! about plugin internals.
//!
//! The dynamic-library loader is an external collaborator; this module
//! only fixes its contract ([`PluginLoader`]) and ships [`StaticLoader`],
//! a registry of in-process factories used by embedders and tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::PluginError;
use crate::events::{Bus, ClientId, Event, PluginData};
use crate::services::netlink::{NetlinkExchange, NetlinkQuery};
use crate::services::poller::FdPoller;
use crate::services::timer::Timer;
use crate::services::SystemServices;

/// Handle object passed to a plugin at start.
///
/// Grants access to the event plane and the singleton services without
/// exposing the plugin's inbox (the host drains that).
#[derive(Clone)]
pub struct PluginContext {
    bus: Bus,
    self_id: ClientId,
    supervisor: ClientId,
    services: Arc<SystemServices>,
    cfg: Config,
}

impl PluginContext {
    pub(crate) fn new(
        bus: Bus,
        self_id: ClientId,
        supervisor: ClientId,
        services: Arc<SystemServices>,
        cfg: Config,
    ) -> Self {
        Self {
            bus,
            self_id,
            supervisor,
            services,
            cfg,
        }
    }

    /// This plugin's event address.
    pub fn client_id(&self) -> ClientId {
        self.self_id
    }

    pub fn services(&self) -> &SystemServices {
        &self.services
    }

    /// Emits a PLUGIN event. The supervisor stamps `event_source` and fans
    /// it out to every subscriber whose filter names this plugin.
    /// Fire-and-forget: delivery failures never come back.
    pub fn emit(&self, data: PluginData) {
        let event = Event::plugin(data).with_source(self.self_id);
        self.bus.push(event, self.supervisor);
    }

    /// Registers a countdown timer targeted at this plugin. Returns `None`
    /// until the timer service is up.
    pub fn timer(&self, id: u64, value: u64, interval: u64) -> Option<Arc<Timer>> {
        let registry = self.services.timer()?;
        let timer = Timer::new(id, value, interval, Some(self.self_id));
        registry.add(timer.clone());
        Some(timer)
    }

    /// Starts a kernel dump query. Replies arrive as NETLINK events; drain
    /// them from the returned exchange. Returns `None` until the netlink
    /// service is up.
    pub fn netlink_query(&self, kind: NetlinkQuery) -> Option<Arc<NetlinkExchange>> {
        let service = self.services.netlink()?;
        let exchange = NetlinkExchange::query(kind);
        let event = Event::netlink(exchange.clone()).with_source(self.self_id);
        self.bus.push(event, service).then_some(exchange)
    }

    /// Subscribes to kernel route changes for the lifetime of this plugin.
    pub fn netlink_watch(&self) -> Option<Arc<NetlinkExchange>> {
        let service = self.services.netlink()?;
        let exchange = NetlinkExchange::route_watch();
        let event = Event::netlink(exchange.clone()).with_source(self.self_id);
        self.bus.push(event, service).then_some(exchange)
    }

    /// Creates an fd readiness poller that reports to this plugin's inbox.
    pub fn poller(&self) -> FdPoller {
        FdPoller::new(&self.bus, self.self_id, self.cfg.poll_cycle)
    }
}

/// Contract implemented by every hosted plugin.
///
/// All methods run on the plugin's dedicated thread; implementations may
/// keep `!Sync` state internally.
#[async_trait]
pub trait Plugin: Send + 'static {
    /// Unique name within the loaded set, as declared in configuration.
    fn name(&self) -> &str;

    /// Records the configuration file the plugin was declared in.
    fn set_configuration_file(&mut self, _path: PathBuf) {}

    /// Records the path for [`PluginState`](crate::plugins::PluginState)
    /// persistence.
    fn set_state_file(&mut self, _path: PathBuf) {}

    /// Called once on the plugin's thread before any event is delivered.
    /// A failure excludes the plugin from the running set; peers continue.
    async fn start(&mut self, ctx: PluginContext) -> Result<(), PluginError>;

    /// Called once when the daemon shuts down, before the thread joins.
    async fn stop(&mut self) -> Result<(), PluginError>;

    /// Handles one event from the plugin's inbox. Errors are logged by the
    /// host and never reach the emitter.
    async fn consume_event(&mut self, event: &Event) -> Result<(), PluginError>;
}

/// Resolves a configured library identifier to a plugin instance.
pub trait PluginLoader: Send + Sync + 'static {
    fn load(&self, library: &str, name: &str) -> Result<Box<dyn Plugin>, PluginError>;
}

type Factory = Box<dyn Fn(&str) -> Box<dyn Plugin> + Send + Sync>;

/// In-process loader: a registry of plugin factories keyed by library
/// identifier. The factory receives the configured plugin name.
#[derive(Default)]
pub struct StaticLoader {
    factories: HashMap<String, Factory>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, library: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(library.into(), Box::new(factory));
    }
}

impl PluginLoader for StaticLoader {
    fn load(&self, library: &str, name: &str) -> Result<Box<dyn Plugin>, PluginError> {
        match self.factories.get(library) {
            Some(factory) => Ok(factory(name)),
            None => Err(PluginError::NotFound {
                library: library.to_string(),
            }),
        }
    }
}
