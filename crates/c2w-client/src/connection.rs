//! Async client: one task owns the [`ClientSession`] and the socket.
//!
//! [`ChatClient`] is the handle the front end holds. Operations travel to
//! the task over a channel and report back whether they could be sent;
//! their outcome arrives later as a [`ClientEvent`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use c2w_core::TransportKind;
use c2w_protocol::{
    ArqConfig, Frame, FrameAssembler, LossModel, MAX_FRAME_LEN, decode_frame, sleep_until_deadline,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::{ClientEvent, ClientSession};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// How to reach the server.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Server host name or address.
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub arq: ArqConfig,
    /// Probability of dropping an outgoing datagram (UDP only).
    pub loss_probability: f64,
    /// Seed for the loss simulator. `None` seeds from the OS.
    pub loss_seed: Option<u64>,
    /// Time allowed for the TCP handshake.
    pub connect_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: TransportKind::default(),
            arq: ArqConfig::default(),
            loss_probability: 0.0,
            loss_seed: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Builder: set the transport.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Builder: set the retransmission settings.
    pub fn with_arq(mut self, arq: ArqConfig) -> Self {
        self.arq = arq;
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

    /// Builder: set the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn loss_model(&self) -> LossModel {
        match self.loss_seed {
            Some(seed) => LossModel::seeded(self.loss_probability, seed),
            None => LossModel::new(self.loss_probability),
        }
    }
}

enum Operation {
    Login(String),
    JoinMovie(String),
    ReturnToMainRoom,
    Leave,
    Chat(String),
}

struct Command {
    operation: Operation,
    reply: oneshot::Sender<ClientResult<()>>,
}

/// Handle to a running client connection.
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    task: JoinHandle<()>,
    server: SocketAddr,
}

impl ChatClient {
    /// Resolves the server, opens the transport and starts the client task.
    pub async fn connect(options: ConnectOptions) -> ClientResult<Self> {
        let server = resolve(&options.host, options.port).await?;
        let link = match options.transport {
            TransportKind::Tcp => Link::connect_stream(server, options.connect_timeout).await?,
            TransportKind::Udp => Link::connect_datagram(server, options.loss_model()).await?,
        };
        info!(server = %server, transport = %options.transport, "Connected");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = ClientSession::new(options.arq);
        let task = tokio::spawn(drive(link, session, commands_rx, events_tx));

        Ok(Self {
            commands: commands_tx,
            events: events_rx,
            task,
            server,
        })
    }

    /// Address of the server this client talks to.
    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub async fn login(&self, user_name: impl Into<String>) -> ClientResult<()> {
        self.call(Operation::Login(user_name.into())).await
    }

    pub async fn join_movie(&self, title: impl Into<String>) -> ClientResult<()> {
        self.call(Operation::JoinMovie(title.into())).await
    }

    pub async fn return_to_main_room(&self) -> ClientResult<()> {
        self.call(Operation::ReturnToMainRoom).await
    }

    pub async fn leave(&self) -> ClientResult<()> {
        self.call(Operation::Leave).await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> ClientResult<()> {
        self.call(Operation::Chat(text.into())).await
    }

    /// Waits for the next event. Returns `None` once the client task ended
    /// and every event was consumed.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Stops the client task.
    pub fn close(self) {
        self.task.abort();
    }

    async fn call(&self, operation: Operation) -> ClientResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command { operation, reply })
            .map_err(|_| ClientError::Closed)?;
        response.await.map_err(|_| ClientError::Closed)?
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn resolve(host: &str, port: u16) -> ClientResult<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| ClientError::Connection(format!("could not resolve {host}:{port}")))
}

/// The socket side of the client task.
enum Link {
    Stream {
        reader: OwnedReadHalf,
        assembler: FrameAssembler,
        outgoing: mpsc::UnboundedSender<Bytes>,
    },
    Datagram {
        socket: UdpSocket,
        loss: LossModel,
    },
}

impl Link {
    async fn connect_stream(server: SocketAddr, timeout: Duration) -> ClientResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(server))
            .await
            .map_err(|_| ClientError::Connection(format!("timed out connecting to {server}")))?
            .map_err(|e| ClientError::Connection(format!("failed to connect to {server}: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to disable Nagle");
        }
        let (reader, writer) = stream.into_split();
        let (outgoing, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(writer, queue));
        Ok(Link::Stream {
            reader,
            assembler: FrameAssembler::new(),
            outgoing,
        })
    }

    async fn connect_datagram(server: SocketAddr, loss: LossModel) -> ClientResult<Self> {
        let local = match server.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        debug!(local = %socket.local_addr()?, loss = loss.probability(), "Datagram socket ready");
        Ok(Link::Datagram { socket, loss })
    }

    /// Queues bytes for the server without waiting.
    fn send(&mut self, bytes: Bytes) {
        match self {
            Link::Stream { outgoing, .. } => {
                let _ = outgoing.send(bytes);
            }
            Link::Datagram { socket, loss } => {
                if loss.should_drop() {
                    trace!(len = bytes.len(), "Simulated loss, dropping datagram");
                } else if let Err(e) = socket.try_send(&bytes) {
                    warn!(error = %e, "Datagram not sent");
                }
            }
        }
    }

    /// Waits for inbound data. `Ok(None)` means the server closed the stream.
    async fn receive(&mut self, buf: &mut [u8]) -> ClientResult<Option<Vec<Frame>>> {
        match self {
            Link::Stream {
                reader, assembler, ..
            } => {
                let n = reader.read(buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                assembler.push(&buf[..n]);
                let mut frames = Vec::new();
                loop {
                    match assembler.next_frame() {
                        Ok(Some(frame)) => frames.push(frame),
                        Ok(None) => break,
                        Err(e) => warn!(error = %e, "Discarding malformed frame header"),
                    }
                }
                Ok(Some(frames))
            }
            Link::Datagram { socket, .. } => {
                let n = match socket.recv(buf).await {
                    Ok(n) => n,
                    // ICMP port unreachable while the server is down; the
                    // retransmission timers keep trying.
                    Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                        debug!(error = %e, "Server unreachable");
                        return Ok(Some(Vec::new()));
                    }
                    Err(e) => return Err(e.into()),
                };
                match decode_frame(&buf[..n]) {
                    Ok(frame) => Ok(Some(vec![frame])),
                    Err(e) => {
                        warn!(len = n, error = %e, "Dropping malformed datagram");
                        Ok(Some(Vec::new()))
                    }
                }
            }
        }
    }
}

async fn write_frames(mut writer: OwnedWriteHalf, mut queue: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = queue.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(error = %e, "Write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

fn apply(session: &mut ClientSession, operation: Operation, now: Instant) -> ClientResult<Bytes> {
    match operation {
        Operation::Login(name) => session.login(&name, now),
        Operation::JoinMovie(title) => session.join_movie(&title, now),
        Operation::ReturnToMainRoom => session.return_to_main_room(now),
        Operation::Leave => session.leave(now),
        Operation::Chat(text) => session.send_chat(&text, now),
    }
}

async fn drive(
    mut link: Link,
    mut session: ClientSession,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE.max(MAX_FRAME_LEN)];
    let mut connected = true;

    while connected {
        let deadline = session.next_deadline();
        tokio::select! {
            command = commands.recv() => {
                let Some(Command { operation, reply }) = command else {
                    debug!("Client handle dropped");
                    break;
                };
                let result = apply(&mut session, operation, Instant::now()).map(|bytes| link.send(bytes));
                let _ = reply.send(result);
            }
            received = link.receive(&mut buf) => match received {
                Ok(Some(frames)) => {
                    for frame in frames {
                        for reply in session.handle_frame(&frame) {
                            link.send(reply);
                        }
                    }
                }
                Ok(None) => {
                    info!("Server closed the connection");
                    session.connection_lost();
                    connected = false;
                }
                Err(e) => {
                    warn!(error = %e, "Receive failed");
                    session.connection_lost();
                    connected = false;
                }
            },
            _ = sleep_until_deadline(deadline) => {
                for bytes in session.poll_retransmits(Instant::now()) {
                    link.send(bytes);
                }
            }
        }

        for event in session.drain_events() {
            if events.send(event).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = ConnectOptions::new("localhost", 1900);
        assert_eq!(options.transport, TransportKind::Tcp);
        assert_eq!(options.arq, ArqConfig::default());
        assert_eq!(options.loss_probability, 0.0);
    }

    #[tokio::test]
    async fn connect_fails_without_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ChatClient::connect(ConnectOptions::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }

    #[tokio::test]
    async fn operations_report_state_errors() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let client = ChatClient::connect(
            ConnectOptions::new("127.0.0.1", port).with_transport(TransportKind::Udp),
        )
        .await
        .unwrap();

        assert!(matches!(
            client.send_chat("hi").await,
            Err(ClientError::InvalidState { .. })
        ));
        client.login("alice").await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\x00\x09\x00\x01alice");
    }
}
