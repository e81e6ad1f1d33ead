//! Plugin hosting: the contract plugins implement, the loader boundary,
//! the per-plugin worker host with filter routing, and the state file
//! plugins persist themselves into.
//!
//! ## Files & responsibilities
//! - **plugin.rs**: the [`Plugin`] trait, the [`PluginLoader`] boundary,
//!   and [`PluginContext`], the handle object giving plugin code access
//!   to the bus and the system services.
//! - **host.rs**: [`PluginHost`]: builds the running set from
//!   configuration, spawns one dedicated thread per plugin, routes PLUGIN
//!   events through the filter table, stops everything in reverse order.
//! - **state.rs**: [`PluginState`]: opaque key/value persistence with a
//!   hex dump renderer.

mod host;
mod plugin;
mod state;

pub use host::PluginHost;
pub use plugin::{Plugin, PluginContext, PluginLoader, StaticLoader};
pub use state::PluginState;
