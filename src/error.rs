//! # Error types used by the syncvisor runtime and plugins.
//!
//! This module defines three error enums:
//!
//! - [`RuntimeError`] errors raised by the event substrate and services.
//! - [`ConfigError`] errors raised while loading the XML configuration.
//! - [`PluginError`] errors raised by plugin loading and plugin callbacks.
//!
//! Plugin errors are never fatal to the daemon: a plugin that fails to load
//! or start is excluded from the running set, and errors raised while a
//! plugin consumes an event are logged and dropped (event routing is
//! fire-and-forget).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced by the runtime substrate.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A second instance of a singleton system service was constructed.
    #[error("{service} already exists")]
    AlreadyExists {
        /// Name of the service that already has an instance.
        service: &'static str,
    },

    /// The operation is not supported for this event variant,
    /// e.g. cloning an in-flight netlink exchange.
    #[error("unsupported operation: {op}")]
    UnsupportedOperation { op: &'static str },

    /// An OS call failed; carries the failing context.
    #[error("{context}: {source}")]
    Os {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl RuntimeError {
    pub(crate) fn os(context: impl Into<String>, source: io::Error) -> Self {
        RuntimeError::Os {
            context: context.into(),
            source,
        }
    }
}

/// # Errors produced while loading configuration.
///
/// `Xml` carries the row, column, and byte offset of the offending input
/// so operators can locate the problem; it maps to exit code 2. Content
/// violations that must abort startup (a `version` newer than
/// [`crate::conf::CONFIG_VERSION_MAX`], a duplicate plugin name) are
/// raised through the same `Xml` path as structural ones. Unknown
/// event-filter targets are only warned about.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Malformed XML or a schema violation, with input coordinates.
    #[error("XML parse error, {message} on line: {row}, column: {col}, byte: 0x{byte:02x}")]
    Xml {
        message: String,
        row: usize,
        col: usize,
        byte: usize,
    },

    /// The configuration file could not be read.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// # Errors produced by plugin loading and plugin callbacks.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PluginError {
    /// The loader has no library under the requested name.
    #[error("plugin library not found: {library}")]
    NotFound { library: String },

    /// The library resolved but the plugin could not be constructed.
    #[error("plugin load failed: {library}: {reason}")]
    Load { library: String, reason: String },

    /// A plugin callback (start/stop/consume) failed.
    #[error("{0}")]
    Callback(String),

    /// Plugin state file I/O failed.
    #[error("state file: {source}")]
    State {
        #[from]
        source: io::Error,
    },
}
