//! Configuration handling for the p2p node.
//!
//! Values come from an optional YAML file, then environment variables, then
//! command line flags (applied in `main`).

use anyhow::Result;
use p2p_wire::DEFAULT_MAX_PAYLOAD;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Network magic used when none is configured ("P2P1")
pub const DEFAULT_NETWORK_MAGIC: u32 = 0x5032_5031;

/// Node configuration
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Node id announced in the hello
    pub node_id: u64,
    /// Network magic; peers must match it
    pub network_magic: u32,
    /// Listen address for inbound sessions
    pub listen: Option<SocketAddr>,
    /// Peers to dial
    pub connect: Vec<SocketAddr>,
    /// Whether sessions send keep-alive pings
    pub keep_alive: bool,
    /// Interval between pings
    pub keep_alive_interval: Duration,
    /// Bound for every session write
    pub write_timeout: Duration,
    /// Largest accepted frame payload
    pub max_payload: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1001,
            network_magic: DEFAULT_NETWORK_MAGIC,
            listen: None,
            connect: Vec::new(),
            keep_alive: true,
            keep_alive_interval: p2p_session::DEFAULT_KEEP_ALIVE_INTERVAL,
            write_timeout: p2p_session::DEFAULT_WRITE_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    node: Option<FileNodeConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileNodeConfig {
    node_id: Option<u64>,
    network_magic: Option<String>,
    listen: Option<SocketAddr>,
    connect: Option<Vec<SocketAddr>>,
    keep_alive: Option<bool>,
    keep_alive_interval: Option<String>,
    write_timeout: Option<String>,
    max_payload: Option<usize>,
}

impl NodeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();
        let path = config_path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root) => {
                    if let Some(node) = root.node {
                        config.apply_file_config(node);
                    }
                    info!("Loaded configuration from {:?}", path);
                }
                Err(e) => warn!("Failed to parse config file {:?}, using defaults: {}", path, e),
            },
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        config.apply_environment_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Defaults plus environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_environment_overrides(|key| std::env::var(key).ok());
        config
    }

    fn apply_file_config(&mut self, file: FileNodeConfig) {
        if let Some(node_id) = file.node_id {
            self.node_id = node_id;
        }
        if let Some(magic) = file.network_magic {
            match parse_magic(&magic) {
                Ok(magic) => self.network_magic = magic,
                Err(e) => warn!("Ignoring network_magic {:?}: {}", magic, e),
            }
        }
        if let Some(listen) = file.listen {
            self.listen = Some(listen);
        }
        if let Some(connect) = file.connect {
            self.connect = connect;
        }
        if let Some(keep_alive) = file.keep_alive {
            self.keep_alive = keep_alive;
        }
        if let Some(interval) = file.keep_alive_interval {
            match humantime::parse_duration(&interval) {
                Ok(interval) => self.keep_alive_interval = interval,
                Err(e) => warn!("Ignoring keep_alive_interval {:?}: {}", interval, e),
            }
        }
        if let Some(timeout) = file.write_timeout {
            match humantime::parse_duration(&timeout) {
                Ok(timeout) => self.write_timeout = timeout,
                Err(e) => warn!("Ignoring write_timeout {:?}: {}", timeout, e),
            }
        }
        if let Some(max_payload) = file.max_payload {
            self.max_payload = max_payload;
        }
    }

    /// Apply environment variable overrides read through `lookup`
    fn apply_environment_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(node_id) = lookup("P2P_NODE_ID") {
            match node_id.parse::<u64>() {
                Ok(id) => {
                    self.node_id = id;
                    info!("Node ID overridden by environment: {}", id);
                }
                Err(e) => warn!("Ignoring P2P_NODE_ID={:?}: {}", node_id, e),
            }
        }

        if let Some(listen) = lookup("P2P_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.listen = Some(addr);
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring P2P_LISTEN={:?}: {}", listen, e),
            }
        }

        if let Some(magic) = lookup("P2P_NETWORK_MAGIC") {
            match parse_magic(&magic) {
                Ok(value) => {
                    self.network_magic = value;
                    info!("Network magic overridden by environment: {:#010x}", value);
                }
                Err(e) => warn!("Ignoring P2P_NETWORK_MAGIC={:?}: {}", magic, e),
            }
        }

        if let Some(connect) = lookup("P2P_CONNECT") {
            let parsed: Result<Vec<SocketAddr>, _> = connect
                .split(',')
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(addrs) => self.connect = addrs,
                Err(e) => warn!("Ignoring P2P_CONNECT={:?}: {}", connect, e),
            }
        }
    }
}

/// Parse a network magic in decimal or `0x` hex notation
pub fn parse_magic(value: &str) -> Result<u32, std::num::ParseIntError> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.node_id, 1001);
        assert_eq!(config.network_magic, DEFAULT_NETWORK_MAGIC);
        assert!(config.listen.is_none());
        assert!(config.keep_alive);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(15));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
node:
  node_id: 2001
  network_magic: "0xCAFEF00D"
  listen: 127.0.0.1:7000
  connect:
    - 10.0.0.2:7000
    - 10.0.0.3:7000
  keep_alive_interval: 5s
  write_timeout: 750ms
  max_payload: 65536
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut config = NodeConfig::default();
        let root: RootConfig = serde_yaml::from_str(yaml_content).unwrap();
        config.apply_file_config(root.node.unwrap());

        assert_eq!(config.node_id, 2001);
        assert_eq!(config.network_magic, 0xCAFE_F00D);
        assert_eq!(config.listen, Some("127.0.0.1:7000".parse().unwrap()));
        assert_eq!(config.connect.len(), 2);
        assert_eq!(config.keep_alive_interval, Duration::from_secs(5));
        assert_eq!(config.write_timeout, Duration::from_millis(750));
        assert_eq!(config.max_payload, 65536);

        let loaded = NodeConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.keep_alive_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"node: [not, a, map").unwrap();

        let config = NodeConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.max_payload, DEFAULT_MAX_PAYLOAD);

        let missing = NodeConfig::load_from_file("/nonexistent/p2p-node.yaml").unwrap();
        assert_eq!(missing.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("P2P_NODE_ID", "42"),
            ("P2P_LISTEN", "0.0.0.0:7100"),
            ("P2P_NETWORK_MAGIC", "0x0000BEEF"),
            ("P2P_CONNECT", "10.0.0.5:7000, 10.0.0.6:7000"),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config.apply_environment_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.node_id, 42);
        assert_eq!(config.listen, Some("0.0.0.0:7100".parse().unwrap()));
        assert_eq!(config.network_magic, 0xBEEF);
        assert_eq!(config.connect.len(), 2);
    }

    #[test]
    fn test_invalid_environment_values_are_ignored() {
        let mut config = NodeConfig::default();
        config.apply_environment_overrides(|key| match key {
            "P2P_NODE_ID" => Some("not-a-number".to_string()),
            "P2P_LISTEN" => Some("nowhere".to_string()),
            _ => None,
        });
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_parse_magic() {
        assert_eq!(parse_magic("0x10").unwrap(), 16);
        assert_eq!(parse_magic("16").unwrap(), 16);
        assert!(parse_magic("0xZZ").is_err());
    }
}
