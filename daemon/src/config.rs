//! TOML configuration loading: the engine's only external input.
//!
//! Follows the raw-struct-then-validate shape used across this codebase's
//! other config loaders: every field is `Option` on the wire so missing
//! keys produce one named error instead of a generic deserialization
//! failure, and defaults are applied during `validate`, not at parse time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pmd_engine::{Device, DeviceRegistry, NodeTable, Plug, TcpConnector};
use pmd_protocol::{Command, Interpretation, Protocol, Script, ScriptElement, SendTemplate};
use regex::bytes::Regex;
use serde::Deserialize;

const DEFAULT_BUFFER_CAPACITY: usize = 4096;
const DEFAULT_PER_COMMAND_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("device '{0}' references unknown protocol '{1}'")]
    UnknownProtocol(String, String),

    #[error("device '{0}' has no host")]
    MissingHost(String),

    #[error("protocol '{0}' has an unrecognized command key '{1}'")]
    UnknownCommand(String, String),

    #[error("script element in protocol '{0}' command '{1}' must set exactly one of send/expect/delay_ms")]
    AmbiguousElement(String, String),

    #[error("protocol '{0}' command '{1}': send template {2} a target but the command {3}")]
    TargetMismatch(String, String, &'static str, &'static str),

    #[error("invalid regex in protocol '{0}': {1}")]
    Regex(String, #[source] regex::Error),

    #[error("invalid send/expect template in protocol '{0}': {1}")]
    Protocol(String, #[source] pmd_protocol::ProtocolError),
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    engine: Option<RawEngineConfig>,
    #[serde(default)]
    protocol: Vec<RawProtocolConfig>,
    #[serde(default)]
    device: Vec<RawDeviceConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct RawEngineConfig {
    buffer_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawProtocolConfig {
    name: String,
    #[serde(default)]
    scripts: HashMap<String, Vec<RawScriptElement>>,
}

#[derive(Debug, Deserialize)]
struct RawScriptElement {
    send: Option<String>,
    expect: Option<String>,
    delay_ms: Option<u64>,
    #[serde(default)]
    interpretation: Vec<RawCaptureMapping>,
}

#[derive(Debug, Deserialize)]
struct RawCaptureMapping {
    capture_index: usize,
    plug_index: usize,
}

#[derive(Debug, Deserialize)]
struct RawDeviceConfig {
    name: String,
    host: Option<String>,
    port: Option<u16>,
    protocol: String,
    all_shorthand: Option<String>,
    on_regex: Option<String>,
    off_regex: Option<String>,
    per_command_timeout_secs: Option<u64>,
    reset_reconnect_on_timeout: Option<bool>,
    #[serde(default)]
    plug: Vec<RawPlugConfig>,
}

#[derive(Debug, Deserialize)]
struct RawPlugConfig {
    name: String,
    node: Option<String>,
}

/// Parse and validate a config file into a ready-to-run registry.
pub fn load(path: impl AsRef<Path>) -> Result<DeviceRegistry, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw: RawConfig = toml::from_str(&text)?;
    build(raw)
}

fn build(raw: RawConfig) -> Result<DeviceRegistry, ConfigError> {
    let buffer_capacity = raw
        .engine
        .and_then(|e| e.buffer_capacity)
        .unwrap_or(DEFAULT_BUFFER_CAPACITY);

    let mut protocols: HashMap<String, Arc<Protocol>> = HashMap::new();
    for raw_protocol in raw.protocol {
        let name = raw_protocol.name.clone();
        let protocol = build_protocol(raw_protocol)?;
        protocols.insert(name, Arc::new(protocol));
    }

    let connector = Arc::new(TcpConnector);
    let mut registry = DeviceRegistry::new();
    for raw_device in raw.device {
        let device = build_device(raw_device, &protocols, buffer_capacity, connector.clone())?;
        registry.insert(device);
    }
    Ok(registry)
}

fn build_protocol(raw: RawProtocolConfig) -> Result<Protocol, ConfigError> {
    let mut protocol = Protocol::new(raw.name.clone());
    for (key, elements) in raw.scripts {
        let command = parse_command(&raw.name, &key)?;
        let mut built = Vec::with_capacity(elements.len());
        for element in elements {
            built.push(build_element(&raw.name, &key, command, element)?);
        }
        protocol = protocol.with_script(command, Script::new(built));
    }
    Ok(protocol)
}

fn parse_command(protocol_name: &str, key: &str) -> Result<Command, ConfigError> {
    match key {
        "log_in" => Ok(Command::LogIn),
        "log_out" => Ok(Command::LogOut),
        "update_plugs" => Ok(Command::UpdatePlugs),
        "update_nodes" => Ok(Command::UpdateNodes),
        "power_on" => Ok(Command::PowerOn),
        "power_off" => Ok(Command::PowerOff),
        "power_cycle" => Ok(Command::PowerCycle),
        "reset" => Ok(Command::Reset),
        other => Err(ConfigError::UnknownCommand(
            protocol_name.to_owned(),
            other.to_owned(),
        )),
    }
}

fn build_element(
    protocol_name: &str,
    command_key: &str,
    command: Command,
    raw: RawScriptElement,
) -> Result<ScriptElement, ConfigError> {
    match (raw.send, raw.expect, raw.delay_ms) {
        (Some(fmt), None, None) => {
            let template = SendTemplate::parse(&fmt)
                .map_err(|e| ConfigError::Protocol(protocol_name.to_owned(), e))?;
            if template.requires_target() != command.requires_target() {
                return Err(ConfigError::TargetMismatch(
                    protocol_name.to_owned(),
                    command_key.to_owned(),
                    if template.requires_target() {
                        "requires"
                    } else {
                        "does not require"
                    },
                    if command.requires_target() {
                        "takes one"
                    } else {
                        "takes none"
                    },
                ));
            }
            Ok(ScriptElement::Send(template))
        }
        (None, Some(pattern), None) => {
            let interpretation = if raw.interpretation.is_empty() {
                None
            } else {
                Some(Arc::new(Interpretation::new(
                    raw.interpretation
                        .into_iter()
                        .map(|m| pmd_protocol::CaptureMapping {
                            capture_index: m.capture_index,
                            plug_index: m.plug_index,
                        })
                        .collect(),
                )))
            };
            ScriptElement::parse_expect(&pattern, interpretation)
                .map_err(|e| ConfigError::Protocol(protocol_name.to_owned(), e))
        }
        (None, None, Some(ms)) => Ok(ScriptElement::Delay(Duration::from_millis(ms))),
        _ => Err(ConfigError::AmbiguousElement(
            protocol_name.to_owned(),
            command_key.to_owned(),
        )),
    }
}

fn build_device(
    raw: RawDeviceConfig,
    protocols: &HashMap<String, Arc<Protocol>>,
    buffer_capacity: usize,
    connector: Arc<TcpConnector>,
) -> Result<Device, ConfigError> {
    let protocol = protocols
        .get(&raw.protocol)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownProtocol(raw.name.clone(), raw.protocol.clone()))?;
    let host = raw
        .host
        .ok_or_else(|| ConfigError::MissingHost(raw.name.clone()))?;
    let on_regex = Regex::new(raw.on_regex.as_deref().unwrap_or("^ON"))
        .map_err(|e| ConfigError::Regex(raw.protocol.clone(), e))?;
    let off_regex = Regex::new(raw.off_regex.as_deref().unwrap_or("^OFF"))
        .map_err(|e| ConfigError::Regex(raw.protocol.clone(), e))?;

    let mut device = Device::new(
        raw.name,
        host,
        raw.port.unwrap_or(23),
        protocol,
        Vec::new(),
        raw.all_shorthand.unwrap_or_else(|| "ALL".to_owned()),
        Arc::new(on_regex),
        Arc::new(off_regex),
        Duration::from_secs(
            raw.per_command_timeout_secs
                .unwrap_or(DEFAULT_PER_COMMAND_TIMEOUT_SECS),
        ),
        buffer_capacity,
        connector,
    );
    device.reset_reconnect_on_timeout = raw.reset_reconnect_on_timeout.unwrap_or(true);

    let mut nodes = NodeTable::new();
    let mut plugs = Vec::with_capacity(raw.plug.len());
    for raw_plug in raw.plug {
        let node_id = raw_plug
            .node
            .map(|name| nodes.insert(pmd_engine::Node::new(name)));
        plugs.push(Plug::new(raw_plug.name, node_id));
    }
    device.nodes = nodes;
    device.plugs = plugs;

    Ok(device)
}
