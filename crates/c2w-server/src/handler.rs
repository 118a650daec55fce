//! Server side of the session protocol.
//!
//! [`ChatServer`] owns every peer session and the [`Directory`]. It is a
//! plain state machine: drivers feed it inbound bytes, disconnects and
//! timer ticks, and write out the [`Outgoing`] frames it returns. A single
//! task owns it, so a directory change and the roster broadcast that
//! follows it are never interleaved with another change.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use bytes::Bytes;
use c2w_core::Room;
use c2w_protocol::{
    ArqConfig, ArqEngine, ChatMessage, Frame, Message, MessageType, RequestTracker, Seq, Verdict,
    decode_frame, encode_catalog, encode_chat, encode_frame, encode_roster,
};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::directory::Directory;
use crate::error::ServerResult;
use crate::streaming::{LoggingStreamer, MovieStreamer};

/// Longest user name a roster entry can carry.
const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Identity of a remote endpoint: a connection id for streams, a socket
/// address for datagrams.
pub trait PeerId: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + 'static {}

impl<T> PeerId for T where T: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + 'static {}

/// Encoded frame to write to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing<P> {
    pub peer: P,
    pub bytes: Bytes,
}

/// Where a peer is in the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No accepted login yet.
    Anonymous,
    /// Login refused. The session is dropped once the refusal is
    /// acknowledged.
    Rejected,
    AwaitingAcceptAck,
    AwaitingCatalogAck,
    /// Catalog acknowledged; receives rosters and chat.
    Ready,
}

/// Server sends whose acknowledgment moves the handshake forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerRequest {
    LoginAccepted,
    LoginRejected,
    Catalog,
}

#[derive(Debug)]
struct PeerSession {
    user: Option<String>,
    phase: Phase,
    arq: ArqEngine,
    requests: RequestTracker<ServerRequest>,
    /// Sequence number of the last login this peer was refused.
    rejected_login: Option<Seq>,
}

impl PeerSession {
    /// Session opened by a login frame. Its own sends are numbered from the
    /// login's sequence number, so they never collide with frames of an
    /// earlier session the peer may still remember.
    fn opened_by(config: ArqConfig, login: Seq) -> Self {
        Self {
            user: None,
            phase: Phase::Anonymous,
            arq: ArqEngine::starting_at(config, login),
            requests: RequestTracker::new(),
            rejected_login: None,
        }
    }

    /// Nobody logged in and nothing left to deliver.
    fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Anonymous | Phase::Rejected) && self.arq.in_flight() == 0
    }

    fn send<P: PeerId>(
        &mut self,
        peer: P,
        kind: MessageType,
        payload: &[u8],
        now: Instant,
        out: &mut Vec<Outgoing<P>>,
    ) -> Option<Seq> {
        match self.arq.send(kind, payload, now) {
            Ok((seq, bytes)) => {
                out.push(Outgoing { peer, bytes });
                Some(seq)
            }
            Err(e) => {
                warn!(peer = %peer, kind = %kind, error = %e, "Failed to queue frame");
                None
            }
        }
    }

    fn request<P: PeerId>(
        &mut self,
        peer: P,
        request: ServerRequest,
        kind: MessageType,
        payload: &[u8],
        now: Instant,
        out: &mut Vec<Outgoing<P>>,
    ) {
        if let Some(seq) = self.send(peer, kind, payload, now, out) {
            self.requests.track(seq, request);
        }
    }
}

/// The chat server state machine, generic over how peers are identified.
pub struct ChatServer<P> {
    arq_config: ArqConfig,
    directory: Directory<P>,
    sessions: HashMap<P, PeerSession>,
    streamer: Box<dyn MovieStreamer>,
}

impl<P: PeerId> ChatServer<P> {
    /// Creates a server with the configured catalog and a logging streamer.
    pub fn new(config: &ServerConfig) -> ServerResult<Self> {
        Ok(Self {
            arq_config: config.arq,
            directory: Directory::new(&config.movies)?,
            sessions: HashMap::new(),
            streamer: Box::new(LoggingStreamer),
        })
    }

    /// Builder: replace the movie streamer.
    pub fn with_streamer(mut self, streamer: impl MovieStreamer + 'static) -> Self {
        self.streamer = Box::new(streamer);
        self
    }

    pub fn directory(&self) -> &Directory<P> {
        &self.directory
    }

    /// Handshake phase of a peer, if it has a session.
    pub fn phase(&self, peer: P) -> Option<Phase> {
        self.sessions.get(&peer).map(|session| session.phase)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handles one datagram, or one reassembled stream frame in raw form.
    pub fn handle_datagram(&mut self, peer: P, data: &[u8], now: Instant) -> Vec<Outgoing<P>> {
        match decode_frame(data) {
            Ok(frame) => self.handle_frame(peer, &frame, now),
            Err(e) => {
                warn!(peer = %peer, len = data.len(), error = %e, "Dropping malformed datagram");
                Vec::new()
            }
        }
    }

    /// Handles one decoded frame.
    ///
    /// Only a login opens a session. Other frames from unknown peers are
    /// acknowledged and otherwise ignored.
    pub fn handle_frame(&mut self, peer: P, frame: &Frame, now: Instant) -> Vec<Outgoing<P>> {
        let mut out = Vec::new();
        if !self.sessions.contains_key(&peer) {
            match frame.kind {
                MessageType::Login => {
                    debug!(peer = %peer, "New peer session");
                    self.sessions
                        .insert(peer, PeerSession::opened_by(self.arq_config, frame.seq));
                }
                MessageType::Ack => {
                    trace!(peer = %peer, seq = %frame.seq, "Ignoring acknowledgment from unknown peer");
                    return out;
                }
                kind => {
                    debug!(peer = %peer, kind = %kind, "Ignoring frame from peer that is not logged in");
                    match encode_frame(MessageType::Ack, frame.seq, &[]) {
                        Ok(bytes) => out.push(Outgoing { peer, bytes }),
                        Err(e) => warn!(peer = %peer, seq = %frame.seq, error = %e, "Failed to acknowledge frame"),
                    }
                    return out;
                }
            }
        }
        let Some(session) = self.sessions.get_mut(&peer) else {
            return out;
        };

        let gate = match session.arq.receive(frame) {
            Ok(gate) => gate,
            Err(e) => {
                warn!(peer = %peer, seq = %frame.seq, error = %e, "Failed to acknowledge frame");
                return out;
            }
        };
        if let Some(ack) = gate.ack {
            out.push(Outgoing { peer, bytes: ack });
        }

        match gate.verdict {
            Verdict::Deliver => self.dispatch(peer, frame, now, &mut out),
            Verdict::Acknowledged(pending) => self.acknowledged(peer, pending.seq, now, &mut out),
            Verdict::Duplicate | Verdict::StaleAck => {}
        }
        if self.sessions.get(&peer).is_some_and(PeerSession::is_idle) {
            debug!(peer = %peer, "Dropping session without a user");
            self.sessions.remove(&peer);
        }
        out
    }

    /// Removes a peer whose connection went away.
    pub fn peer_disconnected(&mut self, peer: P, now: Instant) -> Vec<Outgoing<P>> {
        let mut out = Vec::new();
        let Some(session) = self.sessions.remove(&peer) else {
            return out;
        };
        if let Some(name) = session.user {
            info!(peer = %peer, user = %name, "User disconnected");
            self.remove_user(&name);
            self.broadcast_roster(now, &mut out);
        }
        out
    }

    /// Collects every retransmission due at `now`.
    pub fn poll_retransmits(&mut self, now: Instant) -> Vec<Outgoing<P>> {
        let mut out = Vec::new();
        for (peer, session) in &mut self.sessions {
            out.extend(
                session
                    .arq
                    .poll_retransmits(now)
                    .into_iter()
                    .map(|bytes| Outgoing { peer: *peer, bytes }),
            );
        }
        // Refusals that were given up on leave nothing to wait for.
        self.sessions.retain(|_, session| !session.is_idle());
        out
    }

    /// Earliest retransmission deadline over all peers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(|session| session.arq.next_deadline())
            .min()
    }

    fn dispatch(&mut self, peer: P, frame: &Frame, now: Instant, out: &mut Vec<Outgoing<P>>) {
        let message = match Message::from_frame(frame) {
            Ok(Message::Login { user_name }) => {
                self.login(peer, frame.seq, user_name, now, out);
                return;
            }
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %peer, seq = %frame.seq, kind = %frame.kind, error = %e, "Dropping undecodable payload");
                return;
            }
        };

        let Some(name) = self.sessions.get(&peer).and_then(|s| s.user.clone()) else {
            debug!(peer = %peer, kind = %frame.kind, "Ignoring frame from peer that is not logged in");
            return;
        };

        match message {
            Message::Leave { user_name } => {
                if user_name != name {
                    debug!(peer = %peer, user = %name, claimed = %user_name, "Leave request names another user");
                }
                self.leave(peer, &name, now, out);
            }
            Message::JoinMovieRoom { title } => {
                match self.directory.movie_by_title(&title).map(|movie| movie.id) {
                    Some(id) => self.move_user(&name, Room::Movie(id), now, out),
                    None => warn!(peer = %peer, user = %name, title = %title, "Join request for unknown movie"),
                }
            }
            Message::ReturnToMainRoom => self.move_user(&name, Room::Main, now, out),
            Message::Chat(chat) => self.chat(&name, chat, now, out),
            other => debug!(peer = %peer, kind = %other.kind(), "Ignoring unexpected message"),
        }
    }

    fn login(&mut self, peer: P, seq: Seq, name: String, now: Instant, out: &mut Vec<Outgoing<P>>) {
        let Some(session) = self.sessions.get_mut(&peer) else {
            return;
        };
        if session.rejected_login == Some(seq) {
            debug!(peer = %peer, user = %name, seq = %seq, "Refused login retransmitted");
            return;
        }
        match session.user.as_deref() {
            Some(current) if current == name => {
                debug!(peer = %peer, user = %name, "Login retransmitted by its owner");
                return;
            }
            Some(current) => {
                warn!(peer = %peer, user = %current, requested = %name, "Peer already logged in");
                return;
            }
            None => {}
        }

        let rejection = if name.is_empty() {
            Some("empty user name")
        } else if name.len() > MAX_NAME_LEN {
            Some("user name too long")
        } else if !self.directory.add_user(&name, peer) {
            Some("user name already in use")
        } else {
            None
        };

        match rejection {
            None => {
                info!(peer = %peer, user = %name, "User logged in");
                session.rejected_login = None;
                session.user = Some(name);
                session.phase = Phase::AwaitingAcceptAck;
                session.request(
                    peer,
                    ServerRequest::LoginAccepted,
                    MessageType::LoginAccepted,
                    &[],
                    now,
                    out,
                );
            }
            Some(reason) => {
                info!(peer = %peer, user = %name, reason, "Login rejected");
                session.rejected_login = Some(seq);
                session.phase = Phase::Rejected;
                session.request(
                    peer,
                    ServerRequest::LoginRejected,
                    MessageType::LoginRejected,
                    &[],
                    now,
                    out,
                );
            }
        }
    }

    fn acknowledged(&mut self, peer: P, seq: Seq, now: Instant, out: &mut Vec<Outgoing<P>>) {
        let Some(session) = self.sessions.get_mut(&peer) else {
            return;
        };
        match session.requests.resolve(seq) {
            Some(ServerRequest::LoginAccepted) => {
                session.phase = Phase::AwaitingCatalogAck;
                match encode_catalog(&self.directory.catalog()) {
                    Ok(payload) => session.request(
                        peer,
                        ServerRequest::Catalog,
                        MessageType::Catalog,
                        &payload,
                        now,
                        out,
                    ),
                    Err(e) => warn!(peer = %peer, error = %e, "Failed to encode catalog"),
                }
            }
            Some(ServerRequest::Catalog) => {
                session.phase = Phase::Ready;
                debug!(peer = %peer, "Peer ready");
                self.broadcast_roster(now, out);
            }
            Some(ServerRequest::LoginRejected) => {
                if session.phase == Phase::Rejected {
                    session.phase = Phase::Anonymous;
                }
            }
            None => {}
        }
    }

    fn leave(&mut self, peer: P, name: &str, now: Instant, out: &mut Vec<Outgoing<P>>) {
        self.sessions.remove(&peer);
        self.remove_user(name);
        info!(peer = %peer, user = %name, "User left");
        self.broadcast_roster(now, out);
    }

    fn move_user(&mut self, name: &str, room: Room, now: Instant, out: &mut Vec<Outgoing<P>>) {
        let Some(previous) = self.directory.set_room(name, room) else {
            return;
        };
        if previous != room {
            info!(user = %name, from = %previous, to = %room, "User changed room");
            self.room_vacated(previous);
            if let Some(id) = room.movie()
                && self.directory.occupancy(room) == 1
                && let Some(movie) = self.directory.movie(id)
            {
                self.streamer.start(movie);
            }
        }
        self.broadcast_roster(now, out);
    }

    fn remove_user(&mut self, name: &str) {
        if let Some(record) = self.directory.remove_user(name) {
            self.room_vacated(record.room);
        }
    }

    fn room_vacated(&mut self, room: Room) {
        if let Some(id) = room.movie()
            && self.directory.occupancy(room) == 0
            && let Some(movie) = self.directory.movie(id)
        {
            self.streamer.stop(movie);
        }
    }

    fn chat(&mut self, name: &str, chat: ChatMessage, now: Instant, out: &mut Vec<Outgoing<P>>) {
        if chat.author != name {
            debug!(user = %name, claimed = %chat.author, "Re-attributing chat message");
        }
        let Some(room) = self.directory.user(name).map(|user| user.room) else {
            return;
        };
        let payload = match encode_chat(&ChatMessage {
            author: name.to_string(),
            text: chat.text,
        }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(user = %name, error = %e, "Failed to encode chat message");
                return;
            }
        };

        debug!(user = %name, room = %room, "Relaying chat message");
        for user in self.directory.users_in(room) {
            if let Some(session) = self.sessions.get_mut(&user.peer)
                && session.phase == Phase::Ready
            {
                session.send(user.peer, MessageType::Chat, &payload, now, out);
            }
        }
    }

    fn broadcast_roster(&mut self, now: Instant, out: &mut Vec<Outgoing<P>>) {
        let payload = match encode_roster(&self.directory.roster()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode roster");
                return;
            }
        };
        let mut recipients = 0usize;
        for (peer, session) in &mut self.sessions {
            if session.phase == Phase::Ready {
                session.send(*peer, MessageType::Roster, &payload, now, out);
                recipients += 1;
            }
        }
        debug!(users = self.directory.users().len(), recipients, "Broadcasting roster");
    }
}
