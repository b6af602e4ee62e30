//! Process configuration, read from a JSON5 file.
//!
//! Every field has a default, so `{}` is a complete configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse config file {path}: {source}")]
    Json5 {
        path: String,
        #[source]
        source: json5::Error,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PushgateConfig {
    pub connector: ConnectorConfig,
    pub schema: SchemaConfig,
    pub dictionary: DictionaryConfig,
    pub push: PushConfig,
}

impl PushgateConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&data).map_err(|source| ConfigError::Json5 {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(data: &str) -> Result<Self, json5::Error> {
        json5::from_str(data)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UdpFamily {
    #[default]
    Udp4,
    Udp6,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorConfig {
    /// Bind address; empty means the unspecified address of `udp_family`.
    pub host: String,
    pub port: u16,
    pub udp_family: UdpFamily,
    /// Datagrams are unordered and lossy, so handshake supervision is off unless asked for.
    pub handshake: bool,
    /// Advertised to clients in the handshake reply.
    pub heartbeat_interval_secs: Option<u64>,
    /// Endpoints silent this long are disconnected. Without it, every source address
    /// ever seen keeps a connection until `stop`.
    pub idle_timeout_ms: Option<u64>,
    pub inbound_buffer_size: usize,
    pub event_queue_size: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 3010,
            udp_family: UdpFamily::Udp4,
            handshake: false,
            heartbeat_interval_secs: None,
            idle_timeout_ms: None,
            inbound_buffer_size: 65_535,
            event_queue_size: 1024,
        }
    }
}

impl ConnectorConfig {
    /// `None` when unset or zero.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        let ip = if self.host.is_empty() {
            match self.udp_family {
                UdpFamily::Udp4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                UdpFamily::Udp6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }
        } else {
            self.host.parse()?
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaConfig {
    pub server_protos: PathBuf,
    pub client_protos: PathBuf,
    pub watch_debounce_ms: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            server_protos: PathBuf::from("config/serverProtos.json"),
            client_protos: PathBuf::from("config/clientProtos.json"),
            watch_debounce_ms: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DictionaryConfig {
    pub user_dictionary: Option<PathBuf>,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            user_dictionary: Some(PathBuf::from("config/dictionary.json")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PushConfig {
    /// Pending pushes kept per session; 0 keeps every entry.
    pub ledger_capacity: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            ledger_capacity: 1024,
        }
    }
}
