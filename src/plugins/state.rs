//! # Plugin state file.
//!
//! An opaque key/value store plugins use for persistence across restarts.
//! The core never interprets the values. The on-disk layout is a small
//! length-prefixed binary format:
//!
//! ```text
//! magic "SVS1"
//! u32   entry count        (little endian)
//! per entry:
//!   u16 key length, key bytes (UTF-8)
//!   u32 value length, value bytes
//! ```
//!
//! A file written by [`save`](PluginState::save) and re-read by
//! [`load`](PluginState::load) yields byte-identical contents. The dump
//! tool renders each entry as a quoted key followed by a hex dump of the
//! value.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::PluginError;
use crate::util::hex_dump;

const STATE_MAGIC: &[u8; 4] = b"SVS1";

fn corrupt(reason: &str) -> PluginError {
    PluginError::State {
        source: io::Error::new(io::ErrorKind::InvalidData, reason.to_string()),
    }
}

/// In-memory view of one plugin's state file.
#[derive(Debug, Default)]
pub struct PluginState {
    path: PathBuf,
    entries: BTreeMap<String, Vec<u8>>,
}

impl PluginState {
    /// An empty state bound to `path`; nothing is read until
    /// [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Reads and decodes the state file at `path`.
    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let data = fs::read(path)?;
        let mut state = Self::new(path);

        if data.len() < STATE_MAGIC.len() + 4 || &data[..4] != STATE_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let mut at = 4;
        let count = read_u32(&data, &mut at)? as usize;
        for _ in 0..count {
            let key_len = read_u16(&data, &mut at)? as usize;
            let key = data
                .get(at..at + key_len)
                .ok_or_else(|| corrupt("truncated key"))?;
            at += key_len;
            let key = String::from_utf8(key.to_vec()).map_err(|_| corrupt("non-UTF-8 key"))?;

            let value_len = read_u32(&data, &mut at)? as usize;
            let value = data
                .get(at..at + value_len)
                .ok_or_else(|| corrupt("truncated value"))?;
            at += value_len;

            state.entries.insert(key, value.to_vec());
        }
        Ok(state)
    }

    /// Encodes and writes the current entries to the bound path.
    pub fn save(&self) -> Result<(), PluginError> {
        let mut out = Vec::new();
        out.extend_from_slice(STATE_MAGIC);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (key, value) in &self.entries {
            out.extend_from_slice(&(key.len() as u16).to_le_bytes());
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }
        fs::write(&self.path, out)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<u8>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Renders every entry as a quoted key followed by a hex dump of its
    /// value, with a blank line between entries.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for (key, value) in &self.entries {
            writeln!(w, "\"{key}\"")?;
            hex_dump(w, value)?;
            writeln!(w)?;
        }
        Ok(())
    }
}

fn read_u16(data: &[u8], at: &mut usize) -> Result<u16, PluginError> {
    let bytes = data
        .get(*at..*at + 2)
        .ok_or_else(|| corrupt("truncated length"))?;
    *at += 2;
    let mut raw = [0u8; 2];
    raw.copy_from_slice(bytes);
    Ok(u16::from_le_bytes(raw))
}

fn read_u32(data: &[u8], at: &mut usize) -> Result<u32, PluginError> {
    let bytes = data
        .get(*at..*at + 4)
        .ok_or_else(|| corrupt("truncated length"))?;
    *at += 4;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(raw))
}
