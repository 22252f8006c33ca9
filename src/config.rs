use crate::error::{Result, SensorError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level sensor configuration, read once at start
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub network: NetworkConfig,
    pub queries: QueriesConfig,
    pub events: EventsConfig,
    pub data: DataConfig,
    pub whitelist: WhitelistConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Interface name for live capture
    pub interface: String,

    /// Port used when synthesizing the BPF filter
    pub port: u16,

    /// Protocols used when synthesizing the BPF filter (udp, tcp)
    pub protocols: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: 53,
            protocols: vec!["udp".to_string(), "tcp".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueriesConfig {
    /// Soft buffer threshold that triggers an early flush
    pub buffer_size: usize,

    /// Periodic flush interval in seconds
    pub flush_interval: u64,

    pub failed: FailedQueriesConfig,
}

impl Default for QueriesConfig {
    fn default() -> Self {
        Self {
            buffer_size: 300,
            flush_interval: 30,
            failed: FailedQueriesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FailedQueriesConfig {
    /// PCAP sidecar path for queries the API could not accept.
    /// Unset disables the spill.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Event log path; "stdout" and "stderr" write to the process streams
    pub file: String,

    /// Alert poller idle sleep in seconds
    pub poll_interval: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            file: "stdout".to_string(),
            poll_interval: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Follow cursor persistence path. Unset keeps the cursor in memory only.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WhitelistConfig {
    pub groups: BTreeMap<String, GroupConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupConfig {
    /// Human readable description attached to emitted events
    pub label: String,

    /// Source networks considered part of the group
    pub networks: Vec<String>,

    pub exclude: GroupExcludeConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupExcludeConfig {
    /// Networks removed from the group even when an include matches
    pub networks: Vec<String>,

    /// Domains whose queries from this group are never submitted
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    /// Analysis service base URL
    pub host: String,

    /// API version path segment
    pub api_version: String,

    /// Key sent with every request
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "https://api.alphasoc.net".to_string(),
            api_version: "v1".to_string(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment
    /// variable overrides. A missing path yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)
                    .map_err(|err| SensorError::ConfigParse(err.to_string()))?
            }
            None => Self::default(),
        };

        if let Ok(key) = std::env::var("HUGINN_API_KEY") {
            config.api.api_key = key;
        }
        if let Ok(host) = std::env::var("HUGINN_API_HOST") {
            config.api.host = host;
        }
        if let Ok(interface) = std::env::var("HUGINN_INTERFACE") {
            config.network.interface = interface;
        }

        Ok(config)
    }

    /// Validate the configuration for the requested mode. `live` requires
    /// a capture interface; `api` requires credentials for submission.
    pub fn validate(&self, live: bool, api: bool) -> Result<()> {
        if live && self.network.interface.is_empty() {
            return Err(SensorError::InvalidInterface(
                "interface not set".to_string(),
            ));
        }

        if self.network.protocols.is_empty() {
            return Err(SensorError::InvalidProtocol(
                "at least one of udp, tcp required".to_string(),
            ));
        }
        for protocol in &self.network.protocols {
            if protocol != "udp" && protocol != "tcp" {
                return Err(SensorError::InvalidProtocol(protocol.clone()));
            }
        }

        if self.queries.buffer_size == 0 {
            return Err(SensorError::InvalidBufferSize(
                "buffer size must be greater than 0".to_string(),
            ));
        }
        if self.queries.flush_interval == 0 {
            return Err(SensorError::InvalidInterval(
                "flush interval must be greater than 0".to_string(),
            ));
        }
        if self.events.poll_interval == 0 {
            return Err(SensorError::InvalidInterval(
                "poll interval must be greater than 0".to_string(),
            ));
        }

        if api {
            if self.api.host.is_empty() {
                return Err(SensorError::MissingApiHost);
            }
            if self.api.api_key.is_empty() {
                return Err(SensorError::MissingApiKey);
            }
        }

        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.queries.flush_interval)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.events.poll_interval)
    }
}
