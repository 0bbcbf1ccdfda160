//! Runtime configuration loaded from `statelink.toml`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::error::Result;
use crate::memory::layout::timing;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "statelink.toml";

pub const DEFAULT_RELAY_PORT: u16 = 5192;
pub const DEFAULT_DISCOVERY_PORT: u16 = 9999;
pub const DEFAULT_CONTROL_PORT: u16 = 52525;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RelayRole {
    #[default]
    Hub,
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub role: RelayRole,
    pub port: u16,
    pub bind_address: IpAddr,
    /// Peer only: connect straight to this hub instead of waiting for an announcement
    pub hub_address: Option<SocketAddr>,
    pub tick_interval_ms: u64,
    pub recv_timeout_ms: u64,
    /// Hub: announcement period. Peer with `hub_address`: re-Connect period.
    /// 0 disables both.
    pub announce_interval_ms: u64,
    pub broadcast_address: Ipv4Addr,
    /// Hubs announce to this port and discovering peers listen on it
    pub discovery_port: u16,
    pub drop_stale: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            role: RelayRole::Hub,
            port: DEFAULT_RELAY_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            hub_address: None,
            tick_interval_ms: timing::TICK_INTERVAL_MS,
            recv_timeout_ms: timing::RECV_TIMEOUT_MS,
            announce_interval_ms: timing::ANNOUNCE_INTERVAL_MS,
            broadcast_address: Ipv4Addr::BROADCAST,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            drop_stale: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Loopback-only TCP port; 0 picks an ephemeral port
    pub port: u16,
    pub max_workers: usize,
    pub read_timeout_ms: u64,
    /// A connection with no request for this long is closed
    pub idle_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_CONTROL_PORT,
            max_workers: 8,
            read_timeout_ms: timing::RECV_TIMEOUT_MS,
            idle_timeout_ms: timing::CONTROL_IDLE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub process_name: String,
    /// Id stamped on outgoing packets; the process id when unset
    pub local_player_id: Option<u32>,
    /// JSON offset table that replaces the detected one
    pub offsets_path: Option<PathBuf>,
    pub relay: RelayConfig,
    pub control: ControlConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            process_name: "gta-vc.exe".to_string(),
            local_player_id: None,
            offsets_path: None,
            relay: RelayConfig::default(),
            control: ControlConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!("Loading config from {}", path.display());
                Self::from_toml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn local_player_id(&self) -> u32 {
        self.local_player_id.unwrap_or_else(std::process::id)
    }
}

/// Builder for CoreConfig
#[derive(Debug, Clone, Default)]
pub struct CoreConfigBuilder {
    process_name: Option<String>,
    local_player_id: Option<u32>,
    offsets_path: Option<PathBuf>,
    relay: Option<RelayConfig>,
    control: Option<ControlConfig>,
}

impl CoreConfigBuilder {
    pub fn process_name<S: Into<String>>(mut self, name: S) -> Self {
        self.process_name = Some(name.into());
        self
    }

    pub fn local_player_id(mut self, id: u32) -> Self {
        self.local_player_id = Some(id);
        self
    }

    pub fn offsets_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.offsets_path = Some(path.into());
        self
    }

    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn control(mut self, control: ControlConfig) -> Self {
        self.control = Some(control);
        self
    }

    pub fn build(self) -> CoreConfig {
        let default = CoreConfig::default();
        CoreConfig {
            process_name: self.process_name.unwrap_or(default.process_name),
            local_player_id: self.local_player_id.or(default.local_player_id),
            offsets_path: self.offsets_path.or(default.offsets_path),
            relay: self.relay.unwrap_or(default.relay),
            control: self.control.unwrap_or(default.control),
        }
    }
}
