//! Datagram binding.
//!
//! One frame per datagram, no reassembly. Every outgoing datagram goes
//! through the [`LossModel`] first.

use std::future::Future;
use std::net::SocketAddr;

use c2w_protocol::{LossModel, MAX_FRAME_LEN, sleep_until_deadline};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{ChatServer, Outgoing};

/// Chat server over UDP.
pub struct UdpChatServer {
    socket: UdpSocket,
    server: ChatServer<SocketAddr>,
    loss: LossModel,
}

impl UdpChatServer {
    /// Binds the socket.
    pub async fn bind(config: &ServerConfig) -> ServerResult<Self> {
        let server = ChatServer::new(config)?;
        Self::bind_with(config, server).await
    }

    /// Binds the socket around an already built server.
    pub async fn bind_with(
        config: &ServerConfig,
        server: ChatServer<SocketAddr>,
    ) -> ServerResult<Self> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|e| ServerError::bind(config.bind_addr, e))?;
        let loss = match config.loss_seed {
            Some(seed) => LossModel::seeded(config.loss_probability, seed),
            None => LossModel::new(config.loss_probability),
        };
        info!(
            addr = %socket.local_addr()?,
            transport = "udp",
            loss = loss.probability(),
            "Chat server listening"
        );
        Ok(Self {
            socket,
            server,
            loss,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serves datagrams until `shutdown` completes.
    pub async fn run_until_shutdown<S>(self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        let Self {
            socket,
            mut server,
            mut loss,
        } = self;
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        tokio::pin!(shutdown);

        loop {
            let deadline = server.next_deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => {
                        trace!(peer = %addr, len, "Datagram received");
                        let out = server.handle_datagram(addr, &buf[..len], Instant::now());
                        send_all(&socket, &mut loss, out);
                    }
                    // Some platforms report ICMP port unreachable here; the
                    // socket stays usable.
                    Err(e) => debug!(error = %e, "Receive failed"),
                },
                _ = sleep_until_deadline(deadline) => {
                    let out = server.poll_retransmits(Instant::now());
                    send_all(&socket, &mut loss, out);
                }
            }
        }
        Ok(())
    }
}

/// Sends datagrams without waiting; anything not sent is left to the
/// retransmission timers.
fn send_all(socket: &UdpSocket, loss: &mut LossModel, out: Vec<Outgoing<SocketAddr>>) {
    for Outgoing { peer, bytes } in out {
        if loss.should_drop() {
            trace!(peer = %peer, len = bytes.len(), "Simulated loss, dropping datagram");
            continue;
        }
        if let Err(e) = socket.try_send_to(&bytes, peer) {
            warn!(peer = %peer, error = %e, "Datagram not sent");
        }
    }
}
