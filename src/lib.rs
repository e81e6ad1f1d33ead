//! # syncvisor
//!
//! **Syncvisor** is a plugin-hosting host synchronization daemon: it loads
//! a configured set of plugins and mediates between them, the kernel, and
//! the wall clock. Plugins exchange typed events with peers, receive
//! scheduled timer ticks, query and watch kernel routing state, and
//! multiplex readiness on arbitrary file descriptors, without owning a
//! thread of the supervisor or blocking one another.
//!
//! ## Features
//!
//! | Area                  | Description                                                       | Key types / traits                        |
//! |-----------------------|-------------------------------------------------------------------|-------------------------------------------|
//! | **Event plane**       | Priority inboxes, sticky/exclusive delivery, broadcast.           | [`Bus`], [`Event`], [`EventClient`]        |
//! | **Workers**           | Long-lived tasks with an inbox, cooperative QUIT shutdown.        | [`Worker`], [`WorkerHandle`]               |
//! | **Timers**            | Second-resolution one-shot and interval timers.                   | [`Timer`], [`TimerRegistry`]               |
//! | **Fd readiness**      | Latched poll(2) readiness reported through the event plane.       | [`FdPoller`], [`FdInterest`]               |
//! | **Kernel routing**    | RTNETLINK dumps and route-change watches.                         | [`NetlinkExchange`], [`NetlinkQuery`]      |
//! | **Plugins**           | Per-plugin threads, filter-table routing, state persistence.      | [`Plugin`], [`PluginHost`], [`PluginState`]|
//! | **Configuration**     | XML main document plus per-plugin overlays.                       | [`MainConfig`]                             |
//! | **Errors**            | Typed errors for runtime, configuration, and plugins.             | [`RuntimeError`], [`ConfigError`]          |
//!
//! ```no_run
//! use std::path::Path;
//! use syncvisor::{Config, MainConfig, StaticLoader, Supervisor};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let conf = MainConfig::load(Path::new("/etc/syncvisor.conf"))?;
//!     let loader = StaticLoader::new();
//!
//!     let runtime = tokio::runtime::Builder::new_multi_thread()
//!         .enable_all()
//!         .build()?;
//!     let supervisor = Supervisor::new(Config::default(), conf, &loader);
//!     runtime.block_on(supervisor.run())?;
//!     Ok(())
//! }
//! ```
//!
//! ---

pub mod conf;
pub mod config;
pub mod error;
pub mod events;
pub mod plugins;
pub mod services;
pub mod supervisor;
pub mod util;
pub mod worker;

// ---- Public re-exports ----

pub use conf::MainConfig;
pub use config::Config;
pub use error::{ConfigError, PluginError, RuntimeError};
pub use events::{Bus, ClientId, Event, EventClient, EventFlags, EventKind, Payload, PluginData};
pub use plugins::{Plugin, PluginContext, PluginHost, PluginLoader, PluginState, StaticLoader};
pub use services::netlink::{ExchangeKind, NetlinkExchange, NetlinkQuery, NetlinkService};
pub use services::poller::{FdInterest, FdPoller};
pub use services::signals::SignalSupervisor;
pub use services::timer::{Timer, TimerRegistry, TimerService};
pub use services::SystemServices;
pub use supervisor::Supervisor;
pub use worker::{Worker, WorkerHandle};
