//! Configuration file.
//!
//! Client and server settings share one `config.toml`, found at
//! `~/.config/c2w/config.toml` by default. Every field is optional; command
//! line flags override what the file says.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use c2w_core::{DEFAULT_PORT, MIN_PORT, TransportKind, is_valid_port};
use c2w_protocol::ArqConfig;
use c2w_server::{MovieConfig, ServerConfig, default_movies};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectOptions;
use crate::error::{ClientError, ClientResult};

const DEFAULT_RETRANSMIT_MS: u64 = 1000;

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Settings for `c2w connect`.
    pub client: ClientSettings,

    /// Settings for `c2w server`.
    pub server: ServerSettings,
}

/// Settings for `c2w connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Server host name or address.
    pub host: String,

    pub port: u16,

    pub transport: TransportKind,

    /// Name to log in with when none is given on the command line.
    pub user_name: Option<String>,

    /// Probability of dropping an outgoing datagram.
    pub loss: f64,

    /// Retransmission interval in milliseconds.
    pub retransmit_interval_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST.to_string(),
            port: DEFAULT_PORT,
            transport: TransportKind::default(),
            user_name: None,
            loss: 0.0,
            retransmit_interval_ms: DEFAULT_RETRANSMIT_MS,
        }
    }
}

impl ClientSettings {
    /// Checks values coming from the command line or the config file.
    pub fn validate(&self) -> ClientResult<()> {
        if !is_valid_port(self.port) {
            return Err(ClientError::Config(format!(
                "port {} is below the minimum of {}",
                self.port, MIN_PORT
            )));
        }
        if !(0.0..=1.0).contains(&self.loss) {
            return Err(ClientError::Config(format!(
                "loss probability {} is outside 0.0..=1.0",
                self.loss
            )));
        }
        if self.retransmit_interval_ms == 0 {
            return Err(ClientError::Config(
                "retransmit interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Builds connection options from these settings.
    pub fn to_connect_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.host.clone(), self.port)
            .with_transport(self.transport)
            .with_loss(self.loss)
            .with_arq(
                ArqConfig::default()
                    .with_retransmit_interval(Duration::from_millis(self.retransmit_interval_ms)),
            )
    }
}

/// Settings for `c2w server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to listen on.
    pub bind: IpAddr,

    pub port: u16,

    pub transport: TransportKind,

    /// Probability of dropping an outgoing datagram.
    pub loss: f64,

    /// Retransmission interval in milliseconds.
    pub retransmit_interval_ms: u64,

    /// Give up on a message after this many retransmissions.
    pub max_retransmits: Option<u32>,

    /// Movie catalog.
    pub movies: Vec<MovieConfig>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            transport: TransportKind::default(),
            loss: 0.0,
            retransmit_interval_ms: DEFAULT_RETRANSMIT_MS,
            max_retransmits: None,
            movies: default_movies(),
        }
    }
}

impl ServerSettings {
    /// Builds the server configuration. The result is not validated yet.
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig::new(SocketAddr::new(self.bind, self.port))
            .with_transport(self.transport)
            .with_loss(self.loss)
            .with_retransmit_interval(Duration::from_millis(self.retransmit_interval_ms))
            .with_max_retransmits(self.max_retransmits)
            .with_movies(self.movies.clone())
    }
}

impl ClientConfig {
    /// Loads configuration from the default path, or the defaults if the
    /// file does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ClientError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("c2w")
    }
}
