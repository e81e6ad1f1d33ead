//! # Plugin host: lifecycle and filter routing.
//!
//! The host turns the parsed configuration into a running set of plugins.
//! Each plugin gets a dedicated OS thread sized per its `stack-size`
//! declaration, a registered event client, and a worker loop that feeds
//! its inbox to [`Plugin::consume_event`] until QUIT arrives.
//!
//! ## Event routing
//! When a plugin emits a PLUGIN event, the supervisor hands it to
//! [`PluginHost::dispatch`]: the host stamps `event_source` with the
//! emitter's name and, for every subscriber whose filter list contains
//! that name (case-insensitive), clones the event into the subscriber's
//! inbox. A subscriber is notified once per event no matter how many
//! duplicate filter entries match. Routing is fire-and-forget.
//!
//! ## Rules
//! - Plugins that fail to load or start are logged and excluded; the rest
//!   of the set keeps running.
//! - Startup order is configuration order; shutdown joins in reverse.
//! - Self-subscriptions were already rejected at parse time.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, warn};

use crate::conf::MainConfig;
use crate::config::Config;
use crate::events::{Bus, ClientId, Event, EventClient, EventKind, Payload};
use crate::services::SystemServices;
use crate::util::DEFAULT_STACK_SIZE;
use crate::worker::{self, Worker, WorkerHandle};

use super::plugin::{Plugin, PluginContext, PluginLoader};

struct PluginRecord {
    name: String,
    stack_size: usize,
    plugin: Option<Box<dyn Plugin>>,
    client: Option<ClientId>,
    handle: Option<WorkerHandle>,
}

struct FilterEntry {
    subscriber: String,
    sources: Vec<String>,
}

/// Owns the plugin records and the event-filter table.
pub struct PluginHost {
    bus: Bus,
    services: Arc<SystemServices>,
    cfg: Config,
    records: Vec<PluginRecord>,
    filters: Vec<FilterEntry>,
}

impl PluginHost {
    /// Loads every configured plugin through `loader`. Load failures are
    /// logged and the plugin is skipped.
    pub fn from_config(
        conf: &MainConfig,
        cfg: &Config,
        loader: &dyn PluginLoader,
        bus: &Bus,
        services: &Arc<SystemServices>,
    ) -> Self {
        let mut records = Vec::new();

        for decl in &conf.plugins {
            let mut plugin = match loader.load(&decl.library, &decl.name) {
                Ok(plugin) => plugin,
                Err(err) => {
                    error!("Plugin loader failed: {err}");
                    continue;
                }
            };
            plugin.set_configuration_file(conf.path.clone());
            if let Some(state_file) = &decl.state_file {
                plugin.set_state_file(state_file.clone());
            }
            debug!(
                "Plugin: {} ({}), stack size: {}",
                decl.name,
                decl.library,
                decl.stack_size.unwrap_or(DEFAULT_STACK_SIZE)
            );
            records.push(PluginRecord {
                name: decl.name.clone(),
                stack_size: decl.stack_size.unwrap_or(DEFAULT_STACK_SIZE),
                plugin: Some(plugin),
                client: None,
                handle: None,
            });
        }

        let filters = conf
            .filters
            .iter()
            .map(|(subscriber, sources)| FilterEntry {
                subscriber: subscriber.clone(),
                sources: sources.clone(),
            })
            .collect();

        Self {
            bus: bus.clone(),
            services: services.clone(),
            cfg: cfg.clone(),
            records,
            filters,
        }
    }

    /// Warns about filter sources that name no loaded plugin. Never fatal.
    pub fn validate(&self) {
        for entry in &self.filters {
            for source in &entry.sources {
                let known = self
                    .records
                    .iter()
                    .any(|r| r.name.eq_ignore_ascii_case(source));
                if !known {
                    warn!("Event filter plugin not found: {source}");
                }
            }
        }
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }

    /// Resolves a plugin name to its event address, once started.
    pub fn client_of(&self, name: &str) -> Option<ClientId> {
        self.records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .and_then(|r| r.client)
    }

    /// Starts every loaded plugin on its own thread, in configuration
    /// order. Call after the signal supervisor is running so a QUIT
    /// arriving mid-start still reaches every plugin (sticky).
    pub fn start_all(&mut self, supervisor: ClientId) {
        for record in &mut self.records {
            let Some(plugin) = record.plugin.take() else {
                continue;
            };
            let client = self.bus.register();
            record.client = Some(client.id());

            let worker = Box::new(PluginWorker {
                name: record.name.clone(),
                plugin,
                supervisor,
                services: self.services.clone(),
                cfg: self.cfg.clone(),
            });
            match worker::spawn_on_thread(client, worker, record.stack_size) {
                Ok(handle) => record.handle = Some(handle),
                Err(err) => {
                    error!("Error starting plugin: {}: {err}", record.name);
                    record.client = None;
                }
            }
        }
    }

    /// Joins every plugin worker in reverse insertion order. QUIT must
    /// already have been broadcast.
    pub async fn stop_all(&mut self) {
        for record in self.records.iter_mut().rev() {
            if let Some(handle) = record.handle.take() {
                handle.join().await;
                debug!("Plugin unloaded: {}", record.name);
            }
            record.client = None;
        }
    }

    /// Routes a plugin-emitted PLUGIN event through the filter table.
    pub fn dispatch(&self, mut event: Event) {
        let Some(source) = event.source() else {
            debug!("plugin event without source");
            return;
        };
        let Some(emitter) = self
            .records
            .iter()
            .find(|r| r.client == Some(source))
            .map(|r| r.name.clone())
        else {
            debug!("plugin event from unknown {source}");
            return;
        };

        match event.payload_mut() {
            Payload::Plugin(data) => data.set_value("event_source", &emitter),
            _ => {
                debug!("plugin event with non-plugin payload");
                return;
            }
        }

        for entry in &self.filters {
            if !entry
                .sources
                .iter()
                .any(|s| s.eq_ignore_ascii_case(&emitter))
            {
                continue;
            }
            let Some(target) = self.client_of(&entry.subscriber) else {
                continue;
            };
            match event.try_clone() {
                Ok(copy) => {
                    if !self.bus.push(copy, target) {
                        debug!("subscriber {} is gone", entry.subscriber);
                    }
                }
                Err(err) => {
                    warn!("cannot route event to {}: {err}", entry.subscriber);
                    continue;
                }
            }
        }
    }
}

/// Worker loop hosting a single plugin.
struct PluginWorker {
    name: String,
    plugin: Box<dyn Plugin>,
    supervisor: ClientId,
    services: Arc<SystemServices>,
    cfg: Config,
}

#[async_trait]
impl Worker for PluginWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(mut self: Box<Self>, client: EventClient) {
        let ctx = PluginContext::new(
            client.bus().clone(),
            client.id(),
            self.supervisor,
            self.services.clone(),
            self.cfg.clone(),
        );
        if let Err(err) = self.plugin.start(ctx).await {
            error!("Error starting plugin: {}: {err}", self.name);
            return;
        }
        debug!("Plugin started: {}", self.name);

        loop {
            match client.pop_wait(Some(self.cfg.pop_timeout)).await {
                Some(ev) if ev.kind() == EventKind::Quit => {
                    if let Err(err) = self.plugin.stop().await {
                        error!("Error stopping plugin: {}: {err}", self.name);
                    }
                    debug!("Plugin terminated: {}", self.name);
                    return;
                }
                Some(ev) => {
                    if let Err(err) = self.plugin.consume_event(&ev).await {
                        warn!("{}: event handler failed: {err}", self.name);
                    }
                }
                None => {}
            }
        }
    }
}
