//! # XML parsing for the configuration schema.
//!
//! One parser handles both the main document and plugin-dir overlays; the
//! `overlay` flag selects the binding rules (overlays may only amend
//! plugins the main document declared). Schema violations are reported as
//! [`ConfigError::Xml`] with the row, column, and byte offset of the
//! offending input.

use std::path::PathBuf;

use log::debug;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;

use crate::error::ConfigError;

use super::{MainConfig, PluginConfig, CONFIG_VERSION_MAX};

/// Element nesting state.
enum Frame {
    Csconf,
    /// `Some(name)` when the plugin is bound, `None` when an overlay names
    /// an undeclared plugin and its subtree is ignored.
    Plugin(Option<String>),
    PluginDir,
    StateFile,
    EventFilter,
}

pub(super) fn parse_document(
    input: &str,
    conf: &mut MainConfig,
    overlay: bool,
) -> Result<(), ConfigError> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|err| xml_error(input, reader.buffer_position() as usize, err.to_string()))?;
        match event {
            XmlEvent::Eof => break,
            XmlEvent::Start(e) => {
                let frame = open_element(input, &reader, conf, overlay, &stack, &e)?;
                stack.push(frame);
                text.clear();
            }
            XmlEvent::Empty(e) => {
                let frame = open_element(input, &reader, conf, overlay, &stack, &e)?;
                stack.push(frame);
                text.clear();
                close_element(input, &reader, conf, overlay, &mut stack, &text)?;
            }
            XmlEvent::Text(t) => {
                let chunk = t
                    .unescape()
                    .map_err(|err| xml_error(input, reader.buffer_position() as usize, err.to_string()))?;
                text.push_str(&chunk);
            }
            XmlEvent::End(_) => {
                close_element(input, &reader, conf, overlay, &mut stack, &text)?;
                text.clear();
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(xml_error(
            input,
            reader.buffer_position() as usize,
            "unexpected end of document".to_string(),
        ));
    }
    Ok(())
}

fn open_element(
    input: &str,
    reader: &Reader<&[u8]>,
    conf: &mut MainConfig,
    overlay: bool,
    stack: &[Frame],
    e: &BytesStart<'_>,
) -> Result<Frame, ConfigError> {
    let fail = |message: String| xml_error(input, reader.buffer_position() as usize, message);
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

    match name.as_str() {
        "csconf" => {
            if !stack.is_empty() {
                return Err(fail(format!("unexpected tag: {name}")));
            }
            let version = attribute(e, "version")
                .map_err(&fail)?
                .ok_or_else(|| fail("version parameter missing".into()))?;
            let version: u32 = version
                .parse()
                .map_err(|_| fail(format!("invalid version: {version}")))?;
            if version > CONFIG_VERSION_MAX {
                return Err(fail("unsupported version, too new".into()));
            }
            if !overlay {
                conf.version = version;
            }
            Ok(Frame::Csconf)
        }
        "plugin" => {
            if !matches!(stack.last(), Some(Frame::Csconf)) {
                return Err(fail(format!("unexpected tag: {name}")));
            }
            let plugin_name = attribute(e, "name")
                .map_err(&fail)?
                .ok_or_else(|| fail("name parameter missing".into()))?;

            if overlay {
                if conf.plugin_mut(&plugin_name).is_some() {
                    return Ok(Frame::Plugin(Some(plugin_name)));
                }
                debug!("Ignoring undeclared plugin: {plugin_name}");
                return Ok(Frame::Plugin(None));
            }

            let library = attribute(e, "library")
                .map_err(&fail)?
                .ok_or_else(|| fail("library parameter missing".into()))?;
            if conf.plugins.iter().any(|p| p.name == plugin_name) {
                return Err(fail(format!("duplicate plugin: {plugin_name}")));
            }
            let stack_size = match attribute(e, "stack-size").map_err(&fail)? {
                Some(raw) => Some(
                    raw.parse::<usize>()
                        .map_err(|_| fail(format!("invalid stack-size: {raw}")))?,
                ),
                None => None,
            };

            conf.plugins.push(PluginConfig {
                name: plugin_name.clone(),
                library,
                stack_size,
                state_file: None,
            });
            Ok(Frame::Plugin(Some(plugin_name)))
        }
        "plugin-dir" => {
            if !matches!(stack.last(), Some(Frame::Csconf)) {
                return Err(fail(format!("unexpected tag: {name}")));
            }
            Ok(Frame::PluginDir)
        }
        "state-file" => {
            if !matches!(stack.last(), Some(Frame::Plugin(_))) {
                return Err(fail(format!("unexpected tag: {name}")));
            }
            Ok(Frame::StateFile)
        }
        "event-filter" => {
            if !matches!(stack.last(), Some(Frame::Plugin(_))) {
                return Err(fail(format!("unexpected tag: {name}")));
            }
            Ok(Frame::EventFilter)
        }
        _ => Err(fail(format!("unexpected tag: {name}"))),
    }
}

fn close_element(
    input: &str,
    reader: &Reader<&[u8]>,
    conf: &mut MainConfig,
    overlay: bool,
    stack: &mut Vec<Frame>,
    text: &str,
) -> Result<(), ConfigError> {
    let fail = |message: String| xml_error(input, reader.buffer_position() as usize, message);
    let Some(frame) = stack.pop() else {
        return Err(fail("unbalanced document".into()));
    };

    // The plugin a leaf element applies to, if it is bound.
    let bound_plugin = match stack.last() {
        Some(Frame::Plugin(name)) => name.clone(),
        _ => None,
    };

    match frame {
        Frame::Csconf | Frame::Plugin(_) => {}
        Frame::PluginDir => {
            if text.is_empty() {
                return Err(fail("missing value for tag: plugin-dir".into()));
            }
            if !overlay {
                conf.plugin_dir = PathBuf::from(text);
                debug!("Plug-in configuration directory: {text}");
            }
        }
        Frame::StateFile => {
            if text.is_empty() {
                return Err(fail("missing value for tag: state-file".into()));
            }
            if let Some(name) = bound_plugin {
                if let Some(plugin) = conf.plugin_mut(&name) {
                    plugin.state_file = Some(PathBuf::from(text));
                }
            }
        }
        Frame::EventFilter => {
            if text.is_empty() {
                return Err(fail("missing value for tag: event-filter".into()));
            }
            if let Some(name) = bound_plugin {
                conf.add_event_filter(&name, text);
            }
        }
    }
    Ok(())
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, String> {
    match e.try_get_attribute(name) {
        Ok(Some(attr)) => attr
            .unescape_value()
            .map(|v| Some(v.into_owned()))
            .map_err(|err| err.to_string()),
        Ok(None) => Ok(None),
        Err(err) => Err(err.to_string()),
    }
}

fn xml_error(input: &str, byte: usize, message: impl Into<String>) -> ConfigError {
    let byte = byte.min(input.len());
    let (row, col) = position(input, byte);
    ConfigError::Xml {
        message: message.into(),
        row,
        col,
        byte,
    }
}

/// Maps a byte offset to 1-based (row, column).
fn position(input: &str, byte: usize) -> (usize, usize) {
    let prefix = &input.as_bytes()[..byte];
    let row = prefix.iter().filter(|b| **b == b'\n').count() + 1;
    let line_start = prefix
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    (row, byte - line_start + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_counts_rows_and_columns() {
        let input = "ab\ncd\nef";
        assert_eq!(position(input, 0), (1, 1));
        assert_eq!(position(input, 4), (2, 2));
        assert_eq!(position(input, 6), (3, 1));
    }
}
