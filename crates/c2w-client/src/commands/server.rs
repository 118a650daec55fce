//! Server command: runs the chat server in the foreground until SIGINT or
//! SIGTERM.

use std::net::IpAddr;

use tracing::info;

use c2w_core::TransportKind;
use c2w_server::{ChatListener, ServerConfig, SignalHandler};

use crate::config::ServerSettings;
use crate::error::ClientResult;

/// Command line values that override `[server]` in the config file.
#[derive(Debug, Clone, Default)]
pub struct ServerOverrides {
    pub port: Option<u16>,
    pub transport: Option<TransportKind>,
    pub bind: Option<IpAddr>,
    pub loss: Option<f64>,
    pub seed: Option<u64>,
    pub retransmit_ms: Option<u64>,
    pub max_retransmits: Option<u32>,
}

/// Merges the overrides into the file settings and builds a validated
/// server configuration.
pub fn build_config(settings: &ServerSettings, overrides: ServerOverrides) -> ClientResult<ServerConfig> {
    let mut settings = settings.clone();
    if let Some(port) = overrides.port {
        settings.port = port;
    }
    if let Some(transport) = overrides.transport {
        settings.transport = transport;
    }
    if let Some(bind) = overrides.bind {
        settings.bind = bind;
    }
    if let Some(loss) = overrides.loss {
        settings.loss = loss;
    }
    if let Some(ms) = overrides.retransmit_ms {
        settings.retransmit_interval_ms = ms;
    }
    if overrides.max_retransmits.is_some() {
        settings.max_retransmits = overrides.max_retransmits;
    }

    let mut config = settings.to_server_config();
    if let Some(seed) = overrides.seed {
        config = config.with_loss_seed(seed);
    }
    config.validate()?;
    Ok(config)
}

/// Starts the server and blocks until a shutdown signal arrives.
pub async fn run(config: ServerConfig) -> ClientResult<()> {
    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    let listener = ChatListener::bind(&config).await?;
    info!(
        addr = %listener.local_addr()?,
        transport = %listener.transport(),
        movies = config.movies.len(),
        "Server listening"
    );

    listener.run_until_shutdown(signal_handler.shutdown().wait()).await?;
    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[test]
    fn overrides_win() {
        let config = build_config(
            &ServerSettings::default(),
            ServerOverrides {
                port: Some(2500),
                transport: Some(TransportKind::Udp),
                max_retransmits: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.bind_addr.port(), 2500);
        assert_eq!(config.transport, TransportKind::Udp);
        assert_eq!(config.arq.max_retransmits, Some(3));
    }

    #[test]
    fn file_values_are_validated() {
        let settings = ServerSettings {
            port: 80,
            ..Default::default()
        };
        assert!(matches!(
            build_config(&settings, ServerOverrides::default()),
            Err(ClientError::Server(_))
        ));

        let settings = ServerSettings {
            loss: 1.5,
            ..Default::default()
        };
        assert!(build_config(&settings, ServerOverrides::default()).is_err());
    }
}
