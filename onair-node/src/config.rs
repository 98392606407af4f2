use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::registry::PeerRecord;

/// Default port for the status push API
pub const DEFAULT_SERVICE_PORT: u16 = 8991;

/// Main configuration for an on-air node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Valid status names, lowest priority first
    pub statuses: Vec<String>,
    /// Status shown when nothing outranks it
    pub default_status: String,
    /// This node's service announcement and push listener
    pub service: ServiceConfig,
    /// Outbound push settings
    pub push: PushConfig,
    /// Discovery settings
    pub discovery: DiscoveryConfig,
    /// Local control API
    pub management: ManagementApiConfig,
    /// Metrics and monitoring
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Service announcement and inbound listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Announced service name, also used as this node's identity
    pub name: String,
    /// Port of the push API (0 picks an ephemeral port)
    pub port: u16,
    /// Interface the push API binds to
    pub bind_address: String,
}

/// Outbound push configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Per-push timeout in milliseconds
    pub timeout_ms: u64,
}

/// Discovery configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Peers known ahead of time
    pub peers: Vec<StaticPeerConfig>,
}

/// A statically configured peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticPeerConfig {
    pub identity: String,
    pub address: String,
    pub port: u16,
}

impl From<&StaticPeerConfig> for PeerRecord {
    fn from(peer: &StaticPeerConfig) -> Self {
        PeerRecord::new(peer.identity.clone(), peer.address.clone(), peer.port)
    }
}

/// Management API configuration for local control
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementApiConfig {
    /// Enable management API
    pub enabled: bool,
    /// Listen address for management API
    pub listen_addr: String,
    /// Bearer token required on every request, if set
    pub auth_token: Option<String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,
    /// Exporter listen address
    pub listen_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            statuses: vec!["off".to_string(), "low".to_string(), "high".to_string()],
            default_status: "off".to_string(),
            service: ServiceConfig::default(),
            push: PushConfig::default(),
            discovery: DiscoveryConfig::default(),
            management: ManagementApiConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            port: DEFAULT_SERVICE_PORT,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { timeout_ms: 2000 }
    }
}

impl Default for ManagementApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8992".to_string(),
            auth_token: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// `on-air-box-<hostname>`, or a random suffix when the hostname is unknown
fn default_service_name() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());
    format!("on-air-box-{}", host.trim())
}

impl NodeConfig {
    /// Load configuration from file, layered with `ONAIR_*` environment variables
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("ONAIR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Socket address string the push API binds to
    pub fn bind_addr(&self) -> String {
        match self.service.bind_address.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.service.port).to_string(),
            Err(_) => format!("{}:{}", self.service.bind_address, self.service.port),
        }
    }

    /// This node's identity on the network
    pub fn identity(&self) -> &str {
        &self.service.name
    }

    /// Outbound push timeout
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push.timeout_ms)
    }

    /// Statically configured peers as registry records
    pub fn static_peers(&self) -> Vec<PeerRecord> {
        self.discovery.peers.iter().map(PeerRecord::from).collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.statuses.is_empty() {
            return Err(SyncError::Config(
                "Must provide at least one status in \"statuses\"".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for status in &self.statuses {
            if status.is_empty() {
                return Err(SyncError::Config("Status names cannot be empty".to_string()));
            }
            if !seen.insert(status.as_str()) {
                return Err(SyncError::Config(format!("Duplicate status \"{}\"", status)));
            }
        }

        if !seen.contains(self.default_status.as_str()) {
            return Err(SyncError::Config(format!(
                "Default status \"{}\" is not present in statuses",
                self.default_status
            )));
        }

        if self.service.name.trim().is_empty() {
            return Err(SyncError::Config("Service name cannot be empty".to_string()));
        }

        if self.push.timeout_ms == 0 {
            return Err(SyncError::Config("Push timeout cannot be 0".to_string()));
        }

        for peer in &self.discovery.peers {
            if peer.identity.is_empty() {
                return Err(SyncError::Config("Static peer identity cannot be empty".to_string()));
            }
            if peer.identity == self.service.name {
                return Err(SyncError::Config(format!(
                    "Static peer \"{}\" has this node's own identity",
                    peer.identity
                )));
            }
            if peer.port == 0 {
                return Err(SyncError::Config(format!(
                    "Static peer \"{}\" port cannot be 0",
                    peer.identity
                )));
            }
        }

        Ok(())
    }
}
