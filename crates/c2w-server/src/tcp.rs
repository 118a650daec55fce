//! Stream binding.
//!
//! Each accepted connection gets a reader task, which reassembles frames
//! and forwards them, and a writer task, which drains that connection's
//! outgoing queue. One loop owns the [`ChatServer`] and serializes
//! everything else: accepts, inbound frames, disconnects and retransmission
//! timers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use c2w_protocol::{Frame, FrameAssembler, sleep_until_deadline};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{ChatServer, Outgoing};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Identifies one accepted stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

enum ConnectionEvent {
    Frame(ConnectionId, Frame),
    Closed(ConnectionId),
}

struct Connection {
    outgoing: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

/// Chat server over TCP.
pub struct TcpChatServer {
    listener: TcpListener,
    server: ChatServer<ConnectionId>,
}

impl TcpChatServer {
    /// Binds the listening socket.
    pub async fn bind(config: &ServerConfig) -> ServerResult<Self> {
        let server = ChatServer::new(config)?;
        Self::bind_with(config, server).await
    }

    /// Binds the listening socket around an already built server.
    pub async fn bind_with(
        config: &ServerConfig,
        server: ChatServer<ConnectionId>,
    ) -> ServerResult<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| ServerError::bind(config.bind_addr, e))?;
        info!(addr = %listener.local_addr()?, transport = "tcp", "Chat server listening");
        Ok(Self { listener, server })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until `shutdown` completes.
    pub async fn run_until_shutdown<S>(self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        let Self {
            listener,
            mut server,
        } = self;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut connections: HashMap<ConnectionId, Connection> = HashMap::new();
        let mut next_id = 0u64;
        tokio::pin!(shutdown);

        loop {
            let deadline = server.next_deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let id = ConnectionId(next_id);
                        next_id += 1;
                        info!(connection = %id, addr = %addr, "Accepted connection");
                        connections.insert(id, spawn_connection(id, stream, events_tx.clone()));
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                Some(event) = events_rx.recv() => {
                    let now = Instant::now();
                    let out = match event {
                        ConnectionEvent::Frame(id, frame) => server.handle_frame(id, &frame, now),
                        ConnectionEvent::Closed(id) => {
                            connections.remove(&id);
                            info!(connection = %id, "Connection closed");
                            server.peer_disconnected(id, now)
                        }
                    };
                    deliver(&connections, out);
                }
                _ = sleep_until_deadline(deadline) => {
                    let out = server.poll_retransmits(Instant::now());
                    deliver(&connections, out);
                }
            }
        }

        for (_, connection) in connections.drain() {
            connection.reader.abort();
        }
        Ok(())
    }
}

fn spawn_connection(
    id: ConnectionId,
    stream: TcpStream,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) -> Connection {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(connection = %id, error = %e, "Failed to disable Nagle");
    }
    let (reader, writer) = stream.into_split();
    let (outgoing, queue) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_frames(id, reader, events));
    tokio::spawn(write_frames(id, writer, queue));
    Connection { outgoing, reader }
}

async fn read_frames(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let mut assembler = FrameAssembler::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                assembler.push(&buf[..n]);
                loop {
                    match assembler.next_frame() {
                        Ok(Some(frame)) => {
                            if events.send(ConnectionEvent::Frame(id, frame)).is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => warn!(connection = %id, error = %e, "Discarding malformed frame header"),
                    }
                }
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "Read failed");
                break;
            }
        }
    }
    if !assembler.is_empty() {
        debug!(connection = %id, buffered = assembler.buffered(), "Connection closed mid-frame");
    }
    let _ = events.send(ConnectionEvent::Closed(id));
}

async fn write_frames(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(bytes) = queue.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(connection = %id, error = %e, "Write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

fn deliver(connections: &HashMap<ConnectionId, Connection>, out: Vec<Outgoing<ConnectionId>>) {
    for Outgoing { peer, bytes } in out {
        match connections.get(&peer) {
            Some(connection) => {
                let _ = connection.outgoing.send(bytes);
            }
            None => trace!(connection = %peer, "Dropping frame for closed connection"),
        }
    }
}
