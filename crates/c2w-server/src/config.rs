//! Server configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use c2w_core::{DEFAULT_PORT, TransportKind, is_valid_port};
use c2w_protocol::ArqConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// One movie offered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieConfig {
    /// Title shown in the catalog and used to join the room.
    pub title: String,
    /// Address the movie is streamed to.
    pub address: Ipv4Addr,
    /// Port the movie is streamed to.
    pub port: u16,
    /// Video file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl MovieConfig {
    /// Creates a movie streamed to `address:port`.
    pub fn new(title: impl Into<String>, address: Ipv4Addr, port: u16) -> Self {
        Self {
            title: title.into(),
            address,
            port,
            path: None,
        }
    }

    /// Builder: set the video file.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// The catalog served when none is configured.
pub fn default_movies() -> Vec<MovieConfig> {
    vec![
        MovieConfig::new("Big Buck Bunny", Ipv4Addr::LOCALHOST, 1234),
        MovieConfig::new("Sintel - Trailer", Ipv4Addr::LOCALHOST, 1285),
    ]
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,

    /// Transport binding.
    pub transport: TransportKind,

    /// Retransmission settings applied to every peer.
    pub arq: ArqConfig,

    /// Probability of dropping an outgoing datagram (UDP only).
    pub loss_probability: f64,

    /// Seed for the loss simulator. `None` seeds from the OS.
    pub loss_seed: Option<u64>,

    /// Movie catalog.
    pub movies: Vec<MovieConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            transport: TransportKind::default(),
            arq: ArqConfig::default(),
            loss_probability: 0.0,
            loss_seed: None,
            movies: default_movies(),
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration listening on the given address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builder: set the transport.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Builder: set the retransmission interval.
    pub fn with_retransmit_interval(mut self, interval: Duration) -> Self {
        self.arq = self.arq.with_retransmit_interval(interval);
        self
    }

    /// Builder: set the retransmission cap.
    pub fn with_max_retransmits(mut self, max: Option<u32>) -> Self {
        self.arq = self.arq.with_max_retransmits(max);
        self
    }

    /// Builder: set the datagram loss probability.
    pub fn with_loss(mut self, probability: f64) -> Self {
        self.loss_probability = probability;
        self
    }

    /// Builder: seed the loss simulator.
    pub fn with_loss_seed(mut self, seed: u64) -> Self {
        self.loss_seed = Some(seed);
        self
    }

    /// Builder: replace the movie catalog.
    pub fn with_movies(mut self, movies: Vec<MovieConfig>) -> Self {
        self.movies = movies;
        self
    }

    /// Checks values coming from the command line or the config file.
    ///
    /// Port 0 (ephemeral) is refused here, so it can only be chosen
    /// programmatically.
    pub fn validate(&self) -> ServerResult<()> {
        let port = self.bind_addr.port();
        if !is_valid_port(port) {
            return Err(ServerError::invalid_port(port));
        }
        if !(0.0..=1.0).contains(&self.loss_probability) {
            return Err(ServerError::config(format!(
                "loss probability {} is outside 0.0..=1.0",
                self.loss_probability
            )));
        }
        if self.arq.retransmit_interval.is_zero() {
            return Err(ServerError::config("retransmit interval must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 1900);
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.arq.retransmit_interval, Duration::from_secs(1));
        assert_eq!(config.arq.max_retransmits, None);
        assert_eq!(config.loss_probability, 0.0);
        assert_eq!(config.movies.len(), 2);
        assert_eq!(config.movies[0].title, "Big Buck Bunny");
        assert_eq!(config.movies[1].port, 1285);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn custom_config() {
        let config = ServerConfig::new("127.0.0.1:4000".parse().unwrap())
            .with_transport(TransportKind::Udp)
            .with_retransmit_interval(Duration::from_millis(200))
            .with_max_retransmits(Some(5))
            .with_loss(0.1)
            .with_movies(vec![MovieConfig::new("Test", Ipv4Addr::LOCALHOST, 1234)]);

        assert_eq!(config.bind_addr.port(), 4000);
        assert!(config.transport.is_datagram());
        assert_eq!(config.arq.retransmit_interval, Duration::from_millis(200));
        assert_eq!(config.arq.max_retransmits, Some(5));
        assert_eq!(config.movies.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_reserved_ports() {
        let config = ServerConfig::new("0.0.0.0:80".parse().unwrap());
        assert!(matches!(
            config.validate(),
            Err(ServerError::InvalidPort { port: 80, min: 1501 })
        ));
    }

    #[test]
    fn rejects_bad_loss() {
        let config = ServerConfig::default().with_loss(1.5);
        assert!(matches!(config.validate(), Err(ServerError::Config { .. })));
    }

    #[test]
    fn movie_from_toml() {
        let movie: MovieConfig = toml::from_str(
            r#"
            title = "Tears of Steel"
            address = "127.0.0.1"
            port = 1300
            path = "/srv/movies/tears.ogv"
            "#,
        )
        .unwrap();
        assert_eq!(movie.title, "Tears of Steel");
        assert_eq!(movie.port, 1300);
        assert_eq!(movie.path, Some(PathBuf::from("/srv/movies/tears.ogv")));
    }
}
