//! Configuration management for noded
//!
//! Values come from three layers: built-in defaults, an optional TOML file
//! and the command line, later layers winning. Everything is validated in
//! [`NodeConfig::from_sources`] before the node touches the filesystem or
//! the network.

use crate::api::DEFAULT_API_ADDR;
use crate::error::NodeError;
use crate::logging::parse_level;
use crate::network::Network;
use crate::syncer::SyncerOptions;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_SYNCER_PORT: u32 = 9981;

/// Full node for the mainnet and zen networks.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "noded", version, about, long_about = None)]
pub struct Args {
    /// The network to use (mainnet, zen)
    #[arg(long)]
    pub network: Option<String>,

    /// The directory to store data
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// The port to listen for syncer connections on
    #[arg(long)]
    pub port: Option<u32>,

    /// The log level
    #[arg(long = "log.level")]
    pub log_level: Option<String>,

    /// The address to listen for API connections on
    #[arg(long = "api.addr")]
    pub api_addr: Option<String>,

    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub network: Option<String>,
    pub dir: Option<PathBuf>,
    pub port: Option<u32>,
    pub log_level: Option<String>,
    pub api_addr: Option<String>,
    pub syncer: SyncerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncerConfig {
    #[serde(default = "default_max_inbound_peers")]
    pub max_inbound_peers: usize,
    #[serde(default = "default_max_inflight_rpcs")]
    pub max_inflight_rpcs: usize,
    #[serde(default = "default_max_outbound_peers")]
    pub max_outbound_peers: usize,
    #[serde(default = "default_connect_interval")]
    pub connect_interval: String,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: String,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            max_inbound_peers: default_max_inbound_peers(),
            max_inflight_rpcs: default_max_inflight_rpcs(),
            max_outbound_peers: default_max_outbound_peers(),
            connect_interval: default_connect_interval(),
            handshake_timeout: default_handshake_timeout(),
        }
    }
}

fn default_max_inbound_peers() -> usize {
    1_000_000
}

fn default_max_inflight_rpcs() -> usize {
    1_000_000
}

fn default_max_outbound_peers() -> usize {
    8
}

fn default_connect_interval() -> String {
    "30s".to_string()
}

fn default_handshake_timeout() -> String {
    "10s".to_string()
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let contents = fs::read_to_string(path).map_err(|e| NodeError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| NodeError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl SyncerConfig {
    fn to_options(&self) -> Result<SyncerOptions, NodeError> {
        Ok(SyncerOptions {
            max_inbound_peers: self.max_inbound_peers,
            max_outbound_peers: self.max_outbound_peers,
            max_inflight_rpcs: self.max_inflight_rpcs,
            connect_interval: parse_duration("syncer.connect_interval", &self.connect_interval)?,
            handshake_timeout: parse_duration("syncer.handshake_timeout", &self.handshake_timeout)?,
        })
    }
}

fn parse_duration(key: &'static str, value: &str) -> Result<Duration, NodeError> {
    let duration = humantime::parse_duration(value).map_err(|e| NodeError::InvalidDuration {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if duration.is_zero() {
        return Err(NodeError::InvalidDuration {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

/// Syncer ports are 1-65535; 0 would let the OS pick a port peers can't
/// know about.
pub fn validate_port(port: u32) -> Result<u16, NodeError> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(NodeError::InvalidPort(port)),
    }
}

/// Validated node configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    pub port: u16,
    pub log_level: Level,
    pub api_addr: SocketAddr,
    pub syncer: SyncerOptions,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            data_dir: PathBuf::from("."),
            port: DEFAULT_SYNCER_PORT as u16,
            log_level: Level::INFO,
            api_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            syncer: SyncerOptions::default(),
        }
    }
}

impl NodeConfig {
    /// Load the file named by `--config` (if any) and merge it with `args`.
    pub fn from_sources(args: &Args) -> Result<Self, NodeError> {
        let file = match &args.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        Self::merge(args, file)
    }

    /// Merge already-loaded layers. Command line beats file beats defaults.
    pub fn merge(args: &Args, file: ConfigFile) -> Result<Self, NodeError> {
        let network = args
            .network
            .as_deref()
            .or(file.network.as_deref())
            .unwrap_or("mainnet")
            .parse::<Network>()?;

        let port = validate_port(args.port.or(file.port).unwrap_or(DEFAULT_SYNCER_PORT))?;

        let log_level = parse_level(
            args.log_level
                .as_deref()
                .or(file.log_level.as_deref())
                .unwrap_or("info"),
        )?;

        let api_addr_str = args
            .api_addr
            .as_deref()
            .or(file.api_addr.as_deref())
            .unwrap_or(DEFAULT_API_ADDR);
        let api_addr = api_addr_str
            .parse::<SocketAddr>()
            .map_err(|_| NodeError::InvalidApiAddress(api_addr_str.to_string()))?;

        let data_dir = args
            .dir
            .clone()
            .or(file.dir)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            network,
            data_dir,
            port,
            log_level,
            api_addr,
            syncer: file.syncer.to_options()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Args {
        Args::parse_from(std::iter::once("noded").chain(list.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_sources(&args(&[])).unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.syncer.max_inbound_peers, 1_000_000);
        assert_eq!(config.syncer.max_inflight_rpcs, 1_000_000);
    }

    #[test]
    fn test_command_line_flags() {
        let config = NodeConfig::from_sources(&args(&[
            "--network",
            "zen",
            "--dir",
            "/tmp/node",
            "--port",
            "9881",
            "--log.level",
            "debug",
            "--api.addr",
            "127.0.0.1:9980",
        ]))
        .unwrap();
        assert_eq!(config.network, Network::Zen);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/node"));
        assert_eq!(config.port, 9881);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.api_addr, "127.0.0.1:9980".parse().unwrap());
    }

    fn config_err(flags: &[&str]) -> NodeError {
        let err = NodeConfig::from_sources(&args(flags)).unwrap_err();
        assert!(err.is_fatal(), "{:?} should be fatal", err);
        err
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(matches!(
            config_err(&["--network", "unknown"]),
            NodeError::UnknownNetwork(n) if n == "unknown"
        ));
        assert!(matches!(config_err(&["--port", "0"]), NodeError::InvalidPort(0)));
        assert!(matches!(
            config_err(&["--port", "70000"]),
            NodeError::InvalidPort(70000)
        ));
        assert!(matches!(
            config_err(&["--log.level", "loud"]),
            NodeError::InvalidLogLevel(_)
        ));
        assert!(matches!(
            config_err(&["--api.addr", ":8080"]),
            NodeError::InvalidApiAddress(_)
        ));
    }

    #[test]
    fn test_port_bounds() {
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(validate_port(65536).is_err());
    }

    #[test]
    fn test_file_layer_and_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
network = "zen"
port = 9881
log_level = "warning"

[syncer]
max_outbound_peers = 2
connect_interval = "1m 30s"
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = NodeConfig::from_sources(&args(&["--config", &path, "--port", "9990"])).unwrap();
        assert_eq!(config.network, Network::Zen);
        assert_eq!(config.port, 9990);
        assert_eq!(config.log_level, Level::WARN);
        assert_eq!(config.syncer.max_outbound_peers, 2);
        assert_eq!(config.syncer.connect_interval, Duration::from_secs(90));
        assert_eq!(config.syncer.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_bad_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[syncer]\nhandshake_timeout = \"soon\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert!(matches!(
            NodeConfig::from_sources(&args(&["--config", &path])),
            Err(NodeError::InvalidDuration { key: "syncer.handshake_timeout", .. })
        ));

        let missing = args(&["--config", "/nonexistent/noded.toml"]);
        assert!(matches!(
            NodeConfig::from_sources(&missing),
            Err(NodeError::ConfigFile { .. })
        ));
    }
}
