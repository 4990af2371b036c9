//! Configuration management for snapsync
//!
//! This crate loads the node configuration from defaults, an optional
//! configuration file (YAML, TOML or JSON) and environment variables, and
//! validates the result before any volume is touched.
//!
//! # Examples
//!
//! ```rust,no_run
//! use snapsync_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("snapsync.yaml")
//!     .add_env_prefix("SNAPSYNC")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Snapshots go to {}", config.volume_config().unwrap().snapshot_root().display());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use snapsync_types::{Result, TimeoutConfig, VolumeConfig};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Environment variable prefix used by the default loaders
pub const ENV_PREFIX: &str = "SNAPSYNC";

/// Main configuration structure for snapsync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Volume being managed
    pub volume: VolumeSection,
    /// Role of this node and how it reaches its peer
    pub node: NodeConfig,
    /// Timeouts for commands and peers
    pub timeouts: TimeoutsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Validated volume record passed to every driver operation
    pub fn volume_config(&self) -> Result<VolumeConfig> {
        VolumeConfig::new(&self.volume.path, &self.volume.snapshot_dir)
    }

    /// Timeouts as durations
    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig {
            command_timeout: Duration::from_secs(self.timeouts.command_timeout),
            connect_timeout: Duration::from_secs(self.timeouts.connect_timeout),
            request_timeout: Duration::from_secs(self.timeouts.request_timeout),
        }
    }

    /// `host:port` of the peer a client talks to
    pub fn peer_address(&self) -> String {
        format!("{}:{}", self.node.peer_host, self.node.peer_port)
    }

    /// Address a server listens on
    pub fn bind_addr(&self) -> ConfigResult<SocketAddr> {
        self.node
            .bind_addr
            .parse()
            .map_err(|e| ConfigError::invalid_value("node.bind_addr", format!("{}", e)))
    }
}

/// Volume configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSection {
    /// Mount path of the btrfs volume
    pub path: PathBuf,
    /// Snapshot directory, relative to the volume
    pub snapshot_dir: PathBuf,
    /// Create the snapshot directory as a subvolume when it is missing
    #[serde(default = "default_auto_create_container")]
    pub auto_create_container: bool,
    /// Take one snapshot right after startup
    #[serde(default)]
    pub snapshot_on_start: bool,
}

impl Default for VolumeSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/"),
            snapshot_dir: PathBuf::from(".snapshots"),
            auto_create_container: default_auto_create_container(),
            snapshot_on_start: false,
        }
    }
}

fn default_auto_create_container() -> bool {
    true
}

/// Which side of the exchange this node plays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Answers inventory exchanges
    Server,
    /// Initiates inventory exchanges
    #[default]
    Client,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Role of this node
    pub role: NodeRole,
    /// Listen address when serving
    pub bind_addr: String,
    /// Peer host when acting as client
    pub peer_host: String,
    /// Peer port when acting as client
    pub peer_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Client,
            bind_addr: "0.0.0.0:8000".to_string(),
            peer_host: "localhost".to_string(),
            peer_port: 8000,
        }
    }
}

/// Timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Upper bound for a single btrfs or sync invocation
    pub command_timeout: u64,
    /// Connection timeout when dialing the peer
    pub connect_timeout: u64,
    /// Upper bound for one request/response round trip
    pub request_timeout: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        let defaults = TimeoutConfig::default();
        Self {
            command_timeout: defaults.command_timeout.as_secs(),
            connect_timeout: defaults.connect_timeout.as_secs(),
            request_timeout: defaults.request_timeout.as_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.volume.path, PathBuf::from("/"));
        assert_eq!(config.volume.snapshot_dir, PathBuf::from(".snapshots"));
        assert!(config.volume.auto_create_container);
        assert!(!config.volume.snapshot_on_start);
        assert_eq!(config.node.role, NodeRole::Client);
        assert_eq!(config.peer_address(), "localhost:8000");
    }

    #[test]
    fn test_volume_config() {
        let mut config = Config::default();
        config.volume.path = PathBuf::from("/data");

        let volume = config.volume_config().unwrap();
        assert_eq!(volume.snapshot_root(), PathBuf::from("/data/.snapshots"));
    }

    #[test]
    fn test_timeout_config() {
        let mut config = Config::default();
        config.timeouts.command_timeout = 30;

        let timeouts = config.timeout_config();
        assert_eq!(timeouts.command_timeout, Duration::from_secs(30));
        assert_eq!(timeouts.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_bind_addr() {
        let mut config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8000);

        config.node.bind_addr = "not an address".to_string();
        assert!(config.bind_addr().is_err());
    }
}
