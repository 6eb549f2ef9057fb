//! TOML-based configuration for the link server.
//!
//! The configuration names the shared devices and tunes the timers.  It is
//! read once at startup from `/etc/link-server.toml` (or the path given with
//! `--config`):
//!
//! ```toml
//! [server]
//! listen_port = 9876
//! multicast_group = "239.255.42.42"
//! poll_time_secs = 5
//!
//! [[devices]]
//! name = "modem1"
//! description = "Dial-up modem"
//! link_up = "/usr/sbin/ifup ppp0"
//! link_down = "/usr/sbin/ifdown ppp0"
//! link_force_down = "/usr/bin/killall pppd"
//! ```
//!
//! # Serde default values
//!
//! Every field is annotated with `#[serde(default = "some_fn")]` (or plain
//! `#[serde(default)]`), so a file only needs to mention what differs from the
//! defaults, and a missing file is the same as an empty one.
//!
//! # Validation
//!
//! Parsing only checks types.  [`ServerConfig::validate`] checks the things the
//! wire protocol relies on: device names and descriptions travel inside
//! tab/newline-delimited records, so they may not contain those characters.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::application::link_state::StateMachineSettings;
use crate::application::registry::{ActivationCommands, Device, Registry};
use crate::application::timeout_sweep::SweepSettings;
use crate::application::BrokerSettings;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/link-server.toml";

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A device name is unusable on the wire.
    #[error("invalid device name {name:?}: {reason}")]
    InvalidDeviceName { name: String, reason: &'static str },

    /// A device description contains a field or record separator.
    #[error("description of device {0:?} must not contain tabs or newlines")]
    InvalidDescription(String),

    /// Two devices share a name.
    #[error("device {0:?} is configured more than once")]
    DuplicateDevice(String),

    /// An address field does not parse.
    #[error("invalid {field} {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    /// The poll interval is zero.
    #[error("poll_time_secs must be greater than zero")]
    ZeroPollTime,
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    /// Shared devices, in the order they are listed to clients.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// Network and timer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// IP address the command socket binds to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// UDP port for client and peer commands.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Multicast group that receives `BROADCAST` datagrams.
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    /// UDP port of the multicast group.
    #[serde(default = "default_multicast_port")]
    pub multicast_port: u16,
    /// Hop limit of multicast datagrams.
    #[serde(default = "default_multicast_ttl")]
    pub multicast_ttl: u32,
    /// Seconds between status broadcasts and timeout sweeps.
    #[serde(default = "default_poll_time")]
    pub poll_time_secs: u64,
    /// Seconds of silence after which a client is dropped.
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,
    /// Extra link-up attempts before a connect is abandoned.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Seconds a device may stay CONNECTING before a retry.
    #[serde(default = "default_transition_timeout")]
    pub connect_timeout_secs: u64,
    /// Seconds a device may stay DISCONNECTING before it is forced down.
    #[serde(default = "default_transition_timeout")]
    pub disconnect_timeout_secs: u64,
    /// Pause after a forced teardown before the link is raised again.
    #[serde(default = "default_force_down_settle")]
    pub force_down_settle_ms: u64,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// One shared device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Command that brings the link up.
    #[serde(default)]
    pub link_up: String,
    /// Command that takes the link down gracefully.
    #[serde(default)]
    pub link_down: String,
    /// Command that kills the link unconditionally.
    #[serde(default)]
    pub link_force_down: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    9876
}
fn default_multicast_group() -> String {
    "239.255.42.42".to_string()
}
fn default_multicast_port() -> u16 {
    6789
}
fn default_multicast_ttl() -> u32 {
    1
}
fn default_poll_time() -> u64 {
    5
}
fn default_client_timeout() -> u64 {
    2400
}
fn default_retries() -> u32 {
    2
}
fn default_transition_timeout() -> u64 {
    60
}
fn default_force_down_settle() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            multicast_group: default_multicast_group(),
            multicast_port: default_multicast_port(),
            multicast_ttl: default_multicast_ttl(),
            poll_time_secs: default_poll_time(),
            client_timeout_secs: default_client_timeout(),
            retries: default_retries(),
            connect_timeout_secs: default_transition_timeout(),
            disconnect_timeout_secs: default_transition_timeout(),
            force_down_settle_ms: default_force_down_settle(),
            log_level: default_log_level(),
        }
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

impl ServerSection {
    /// Address the command socket binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = parse_ip("listen_address", &self.listen_address)?;
        Ok(SocketAddr::new(ip, self.listen_port))
    }

    /// Destination of `BROADCAST` datagrams.
    pub fn multicast_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = parse_ip("multicast_group", &self.multicast_group)?;
        Ok(SocketAddr::new(ip, self.multicast_port))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_time_secs)
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

impl ServerConfig {
    /// Checks everything that parsing alone cannot.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.poll_time_secs == 0 {
            return Err(ConfigError::ZeroPollTime);
        }
        self.server.listen_addr()?;
        self.server.multicast_addr()?;

        for device in &self.devices {
            validate_device_name(&device.name)?;
            if device.description.contains(['\t', '\n', '\r']) {
                return Err(ConfigError::InvalidDescription(device.name.clone()));
            }
        }
        Ok(())
    }

    /// Builds the device registry in configuration order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateDevice`] if two entries share a name.
    pub fn build_registry(&self) -> Result<Registry, ConfigError> {
        let mut registry = Registry::new();
        for entry in &self.devices {
            let device = Device::new(
                entry.name.clone(),
                entry.description.clone(),
                ActivationCommands {
                    up: entry.link_up.clone(),
                    down: entry.link_down.clone(),
                    force_down: entry.link_force_down.clone(),
                },
            );
            registry
                .add_device(device)
                .map_err(|_| ConfigError::DuplicateDevice(entry.name.clone()))?;
        }
        Ok(registry)
    }

    /// Timer and addressing settings for the broker.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if the multicast group does not parse.
    pub fn broker_settings(&self) -> Result<BrokerSettings, ConfigError> {
        let s = &self.server;
        Ok(BrokerSettings {
            state_machine: StateMachineSettings {
                retries: s.retries,
                force_down_settle: Duration::from_millis(s.force_down_settle_ms),
            },
            sweep: SweepSettings {
                client_timeout: Duration::from_secs(s.client_timeout_secs),
                connect_timeout: Duration::from_secs(s.connect_timeout_secs),
                disconnect_timeout: Duration::from_secs(s.disconnect_timeout_secs),
            },
            multicast_group: s.multicast_addr()?,
        })
    }
}

fn validate_device_name(name: &str) -> Result<(), ConfigError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains(['\t', '\n', '\r']) {
        "name contains a tab or newline"
    } else if name.trim() != name {
        "name has leading or trailing whitespace"
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidDeviceName {
        name: name.to_string(),
        reason,
    })
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads the configuration at `path`, returning `ServerConfig::default()` if
/// the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("config file {} not found; using defaults", path.display());
            Ok(ServerConfig::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Parses configuration text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
