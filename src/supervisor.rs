//! # Supervisor: owns the bus, the services, and the plugin set.
//!
//! The [`Supervisor`] is the daemon's main client. It constructs the event
//! bus, installs the singleton system services, loads the plugin set, and
//! then drives the main event loop until QUIT.
//!
//! ## Architecture
//! ```text
//! MainConfig ──► Supervisor::new()
//!                     │
//!                     ├──► PluginHost (load plugins, filter table)
//!                     │
//! Supervisor::run()
//!                     ├──► spawn signal supervisor
//!                     ├──► spawn timer service     (singleton)
//!                     ├──► spawn netlink service   (singleton)
//!                     ├──► start plugins (one thread each)
//!                     │
//!                     └──► loop on own inbox:
//!                           ├──► QUIT   → shutdown (reverse order, join all)
//!                           ├──► RELOAD → re-validate configuration
//!                           ├──► PLUGIN → filter-table fan-out
//!                           └──► TIMER  → untargeted timers land here
//! ```
//!
//! ## Rules
//! - Shutdown joins every worker; a stuck plugin blocks shutdown visibly
//!   rather than being force-killed.
//! - RELOAD re-reads and re-validates the configuration but never
//!   re-plumbs the running plugin set; an unchanged configuration is a
//!   no-op.
//! - A failed netlink socket at startup degrades the daemon (queries go
//!   unanswered) but does not abort it.

use std::sync::Arc;

use log::{debug, error, info};

use crate::conf::MainConfig;
use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::{Bus, EventClient, EventKind};
use crate::plugins::{PluginHost, PluginLoader};
use crate::services::netlink::NetlinkService;
use crate::services::signals::SignalSupervisor;
use crate::services::timer::TimerService;
use crate::services::SystemServices;
use crate::worker::{self, WorkerHandle};

pub struct Supervisor {
    cfg: Config,
    conf: MainConfig,
    bus: Bus,
    client: EventClient,
    services: Arc<SystemServices>,
    host: PluginHost,
    workers: Vec<WorkerHandle>,
}

impl Supervisor {
    /// Builds the bus, the service handles, and the plugin set. Nothing
    /// runs until [`run`](Self::run).
    pub fn new(cfg: Config, conf: MainConfig, loader: &dyn PluginLoader) -> Self {
        let bus = Bus::new();
        let client = bus.register();
        let services = SystemServices::new();

        let host = PluginHost::from_config(&conf, &cfg, loader, &bus, &services);
        host.validate();

        Self {
            cfg,
            conf,
            bus,
            client,
            services,
            host,
            workers: Vec::new(),
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn services(&self) -> &Arc<SystemServices> {
        &self.services
    }

    /// Runs until a QUIT event is observed, then shuts everything down.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        self.start_services()?;
        self.host.start_all(self.client.id());
        info!("Initialized.");

        loop {
            let Some(event) = self.client.pop_wait(None).await else {
                continue;
            };
            match event.kind() {
                EventKind::Quit => {
                    debug!("Terminating...");
                    break;
                }
                EventKind::Reload => self.reload(),
                EventKind::Plugin => self.host.dispatch(event),
                EventKind::Timer => {
                    debug!("untargeted timer fired");
                }
                kind => debug!("Unhandled event: {kind:?}"),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn start_services(&mut self) -> Result<(), RuntimeError> {
        self.workers
            .push(worker::spawn(&self.bus, Box::new(SignalSupervisor)));

        let timer = TimerService::new(&self.services, self.client.id())?;
        self.workers.push(worker::spawn(&self.bus, timer));

        let netlink_client = self.bus.register();
        match NetlinkService::new(&self.services, &self.cfg, netlink_client.id()) {
            Ok(service) => self
                .workers
                .push(worker::spawn_with(netlink_client, service)),
            Err(err @ RuntimeError::AlreadyExists { .. }) => return Err(err),
            Err(err) => error!("netlink service unavailable: {err}"),
        }
        Ok(())
    }

    /// RELOAD handler: re-read and re-validate the configuration, report
    /// drift, leave the running set untouched.
    fn reload(&mut self) {
        debug!("Reload configuration.");
        match MainConfig::load(&self.conf.path) {
            Ok(fresh) => {
                fresh.validate();
                let running = self.host.plugin_names();
                let declared: Vec<String> = fresh.plugins.iter().map(|p| p.name.clone()).collect();
                if running == declared {
                    debug!("Configuration unchanged.");
                } else {
                    info!("Plugin set changed in configuration; restart to apply.");
                }
                self.conf = fresh;
            }
            Err(err) => error!("{err}"),
        }
    }

    async fn shutdown(mut self) {
        // QUIT arrived as a sticky broadcast, so every worker has already
        // seen it or will on its next inbox pass.
        self.host.stop_all().await;
        for handle in self.workers.drain(..).rev() {
            handle.join().await;
        }
        info!("Terminated.");
    }
}
