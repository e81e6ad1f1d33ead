//! # Main configuration.
//!
//! The daemon is configured by one XML document plus a directory of
//! per-plugin overlay files sharing the same schema:
//!
//! ```xml
//! <csconf version="1">
//!   <plugin-dir>/etc/syncvisor.d</plugin-dir>
//!   <plugin name="p1" library="demo" stack-size="262144">
//!     <state-file>/var/lib/syncvisor/p1.state</state-file>
//!     <event-filter>p2 | p3</event-filter>
//!   </plugin>
//! </csconf>
//! ```
//!
//! Overlay files (`*.conf` in `plugin-dir`, basename match is
//! case-insensitive) may add `state-file` and `event-filter` settings to
//! plugins already declared in the main document; unknown names are
//! ignored with a warning. Overlay parse errors are logged, never fatal.
//!
//! Validation policy: a `version` above [`CONFIG_VERSION_MAX`] and
//! duplicate plugin names are fatal at parse time; a plugin subscribing to
//! itself is dropped with a warning; filter entries naming unknown plugins
//! only warn.

mod xml;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};

use crate::error::ConfigError;

/// Highest `version` attribute this build accepts.
pub const CONFIG_VERSION_MAX: u32 = 1;

/// Default plugin overlay directory.
pub const DEFAULT_PLUGIN_DIR: &str = "/etc/syncvisor.d";

/// One `plugin` declaration.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub name: String,
    pub library: String,
    /// Worker thread stack size in bytes; clamped at spawn time.
    pub stack_size: Option<usize>,
    pub state_file: Option<PathBuf>,
}

/// Parsed and merged configuration.
#[derive(Debug)]
pub struct MainConfig {
    pub path: PathBuf,
    pub version: u32,
    pub plugin_dir: PathBuf,
    pub plugins: Vec<PluginConfig>,
    /// Subscriber plugin name → event-source names (case preserved,
    /// matched case-insensitively, self-references already dropped).
    pub filters: HashMap<String, Vec<String>>,
}

impl MainConfig {
    /// Reads the main document and merges every overlay found in its
    /// plugin directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut conf = Self::parse(&input, path)?;
        conf.scan_plugin_dir();
        Ok(conf)
    }

    /// Parses the main document only.
    pub fn parse(input: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut conf = Self {
            path: path.to_path_buf(),
            version: 0,
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            plugins: Vec::new(),
            filters: HashMap::new(),
        };
        xml::parse_document(input, &mut conf, false)?;
        debug!("Configuration version: {}", conf.version);
        Ok(conf)
    }

    /// Merges `*.conf` overlays from the plugin directory. Unreadable
    /// directories and malformed overlays are logged and skipped.
    pub fn scan_plugin_dir(&mut self) {
        let dir = self.plugin_dir.clone();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Error opening plugin-dir: {}: {err}", dir.display());
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_type()
                    .map(|t| t.is_file() || t.is_symlink())
                    .unwrap_or(false)
            })
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_ascii_lowercase().ends_with(".conf"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            let input = match fs::read_to_string(&path) {
                Ok(input) => input,
                Err(err) => {
                    error!("{}: {err}", path.display());
                    continue;
                }
            };
            debug!("Merging plugin configuration: {}", path.display());
            if let Err(err) = xml::parse_document(&input, self, true) {
                error!("{err}");
            }
        }
    }

    /// Warns about filter sources that name no declared plugin.
    pub fn validate(&self) {
        for sources in self.filters.values() {
            for source in sources {
                let known = self
                    .plugins
                    .iter()
                    .any(|p| p.name.eq_ignore_ascii_case(source));
                if !known {
                    warn!("Event filter plugin not found: {source}");
                }
            }
        }
    }

    pub(crate) fn plugin_mut(&mut self, name: &str) -> Option<&mut PluginConfig> {
        self.plugins.iter_mut().find(|p| p.name == name)
    }

    /// Splits an `event-filter` value on `|`, trims whitespace, drops
    /// empty atoms, and rejects self-references with a warning.
    pub(crate) fn add_event_filter(&mut self, subscriber: &str, text: &str) {
        for atom in text.split('|') {
            let atom = atom.trim();
            if atom.is_empty() {
                continue;
            }
            if atom.eq_ignore_ascii_case(subscriber) {
                warn!("You can not add a plugin to it's own event filter: {atom}");
                continue;
            }
            self.filters
                .entry(subscriber.to_string())
                .or_default()
                .push(atom.to_string());
        }
    }
}
