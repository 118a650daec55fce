//! Transport selection for a bound server.

use std::future::Future;
use std::net::SocketAddr;

use c2w_core::TransportKind;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::tcp::TcpChatServer;
use crate::udp::UdpChatServer;

/// A server bound on the configured transport.
pub enum ChatListener {
    Tcp(TcpChatServer),
    Udp(UdpChatServer),
}

impl ChatListener {
    /// Binds the transport named in `config`.
    pub async fn bind(config: &ServerConfig) -> ServerResult<Self> {
        Ok(match config.transport {
            TransportKind::Tcp => Self::Tcp(TcpChatServer::bind(config).await?),
            TransportKind::Udp => Self::Udp(UdpChatServer::bind(config).await?),
        })
    }

    pub fn transport(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Udp(_) => TransportKind::Udp,
        }
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        match self {
            Self::Tcp(server) => server.local_addr(),
            Self::Udp(server) => server.local_addr(),
        }
    }

    /// Serves until `shutdown` completes.
    pub async fn run_until_shutdown<S>(self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        match self {
            Self::Tcp(server) => server.run_until_shutdown(shutdown).await,
            Self::Udp(server) => server.run_until_shutdown(shutdown).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(transport: TransportKind) -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_transport(transport)
    }

    #[tokio::test]
    async fn binds_both_transports() {
        for transport in [TransportKind::Tcp, TransportKind::Udp] {
            let listener = ChatListener::bind(&loopback(transport)).await.unwrap();
            assert_eq!(listener.transport(), transport);
            assert_ne!(listener.local_addr().unwrap().port(), 0);
        }
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let listener = ChatListener::bind(&loopback(TransportKind::Tcp)).await.unwrap();
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            listener.run_until_shutdown(async {}),
        )
        .await;
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn reports_bind_failures() {
        let first = ChatListener::bind(&loopback(TransportKind::Tcp)).await.unwrap();
        let taken = ServerConfig::new(first.local_addr().unwrap());
        assert!(matches!(
            ChatListener::bind(&taken).await,
            Err(crate::error::ServerError::Bind { .. })
        ));
    }
}
