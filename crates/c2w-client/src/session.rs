//! Client side of the session protocol.
//!
//! [`ClientSession`] performs no I/O. User operations return the frame to
//! write; inbound bytes return the frames to write back (ACKs). Whatever
//! the front end should show is queued as [`ClientEvent`]s and collected
//! with [`ClientSession::drain_events`].
//!
//! ```text
//! Disconnected --login--> Connecting --accept, catalog, roster--> MainRoom
//! MainRoom --join--> ToMovieRoomPending --ACK--> MovieRoom
//! MovieRoom --main--> ToMainRoomPending --ACK--> MainRoom
//! MainRoom --leave--> ToOutOfSystemPending --ACK--> Disconnected
//! ```

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use c2w_core::{MovieId, Room};
use c2w_protocol::{
    ArqConfig, ArqEngine, ChatMessage, Frame, Message, MovieEntry, RequestTracker, RosterEntry,
    Seq, Verdict, decode_frame,
};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{ClientError, ClientResult};

/// Longest user name the roster can carry.
const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Where the client is in the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    /// Login sent; `accepted` once the server said yes.
    Connecting { accepted: bool },
    MainRoom,
    MovieRoom(MovieId),
    ToMovieRoomPending(MovieId),
    ToMainRoomPending,
    ToOutOfSystemPending,
}

impl ClientState {
    /// True once the login handshake has completed.
    pub fn is_logged_in(self) -> bool {
        !matches!(
            self,
            ClientState::Disconnected | ClientState::Connecting { .. }
        )
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Disconnected => write!(f, "disconnected"),
            ClientState::Connecting { .. } => write!(f, "logging in"),
            ClientState::MainRoom => write!(f, "in the main room"),
            ClientState::MovieRoom(id) => write!(f, "in movie room {id}"),
            ClientState::ToMovieRoomPending(id) => write!(f, "joining movie room {id}"),
            ClientState::ToMainRoomPending => write!(f, "returning to the main room"),
            ClientState::ToOutOfSystemPending => write!(f, "leaving"),
        }
    }
}

/// Something the front end should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server refused the user name.
    LoginRejected { user_name: String },
    /// Logged in; the client is in the main room.
    InitComplete {
        users: Vec<RosterEntry>,
        movies: Vec<MovieEntry>,
    },
    UserListUpdated(Vec<RosterEntry>),
    /// A room change was acknowledged.
    JoinedRoom(Room),
    /// The leave request was acknowledged.
    LeftSystem,
    /// A chat line from another user.
    ChatReceived(ChatMessage),
    ConnectionLost,
}

/// Client sends whose acknowledgment completes a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientRequest {
    JoinMovie(MovieId),
    ReturnToMain,
    Leave,
}

/// The client state machine.
#[derive(Debug)]
pub struct ClientSession {
    state: ClientState,
    room: Room,
    user_name: Option<String>,
    arq: ArqEngine,
    requests: RequestTracker<ClientRequest>,
    /// Login still waiting for the server's answer.
    login_seq: Option<Seq>,
    movies: Option<Vec<MovieEntry>>,
    users: Option<Vec<RosterEntry>>,
    events: VecDeque<ClientEvent>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new(ArqConfig::default())
    }
}

impl ClientSession {
    pub fn new(config: ArqConfig) -> Self {
        Self {
            state: ClientState::Disconnected,
            room: Room::OutOfSystem,
            user_name: None,
            arq: ArqEngine::new(config),
            requests: RequestTracker::new(),
            login_seq: None,
            movies: None,
            users: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    /// Room the server last confirmed.
    pub fn room(&self) -> Room {
        self.room
    }

    pub fn movies(&self) -> &[MovieEntry] {
        self.movies.as_deref().unwrap_or_default()
    }

    pub fn users(&self) -> &[RosterEntry] {
        self.users.as_deref().unwrap_or_default()
    }

    /// Frames sent and not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.arq.in_flight()
    }

    /// Sends a login request.
    pub fn login(&mut self, user_name: &str, now: Instant) -> ClientResult<Bytes> {
        if self.state != ClientState::Disconnected {
            return Err(ClientError::invalid_state("log in", self.state));
        }
        if user_name.is_empty() {
            return Err(ClientError::InvalidUserName {
                name: user_name.to_string(),
                reason: "name is empty",
            });
        }
        if user_name.len() > MAX_NAME_LEN {
            return Err(ClientError::InvalidUserName {
                name: user_name.to_string(),
                reason: "name is longer than 255 bytes",
            });
        }

        let (seq, bytes) = self.arq.send_message(
            &Message::Login {
                user_name: user_name.to_string(),
            },
            now,
        )?;
        self.login_seq = Some(seq);
        self.user_name = Some(user_name.to_string());
        self.movies = None;
        self.users = None;
        self.state = ClientState::Connecting { accepted: false };
        info!(user = %user_name, "Logging in");
        Ok(bytes)
    }

    /// Asks to enter the room of the movie with the given title.
    pub fn join_movie(&mut self, title: &str, now: Instant) -> ClientResult<Bytes> {
        if self.state != ClientState::MainRoom {
            return Err(ClientError::invalid_state("join a movie room", self.state));
        }
        let id = self
            .movies()
            .iter()
            .find(|movie| movie.title == title)
            .map(|movie| movie.id)
            .ok_or_else(|| ClientError::UnknownMovie(title.to_string()))?;

        let bytes = self.request(
            ClientRequest::JoinMovie(id),
            &Message::JoinMovieRoom {
                title: title.to_string(),
            },
            now,
        )?;
        self.state = ClientState::ToMovieRoomPending(id);
        Ok(bytes)
    }

    /// Asks to go back to the main room.
    pub fn return_to_main_room(&mut self, now: Instant) -> ClientResult<Bytes> {
        if !matches!(self.state, ClientState::MovieRoom(_)) {
            return Err(ClientError::invalid_state(
                "return to the main room",
                self.state,
            ));
        }
        let bytes = self.request(ClientRequest::ReturnToMain, &Message::ReturnToMainRoom, now)?;
        self.state = ClientState::ToMainRoomPending;
        Ok(bytes)
    }

    /// Asks to leave the system.
    pub fn leave(&mut self, now: Instant) -> ClientResult<Bytes> {
        if self.state != ClientState::MainRoom {
            return Err(ClientError::invalid_state("leave", self.state));
        }
        let user_name = self.user_name.clone().unwrap_or_default();
        let bytes = self.request(ClientRequest::Leave, &Message::Leave { user_name }, now)?;
        self.state = ClientState::ToOutOfSystemPending;
        Ok(bytes)
    }

    /// Sends a chat line to the current room.
    pub fn send_chat(&mut self, text: &str, now: Instant) -> ClientResult<Bytes> {
        let Some(author) = self.user_name.clone().filter(|_| self.state.is_logged_in()) else {
            return Err(ClientError::invalid_state("chat", self.state));
        };
        let message = Message::Chat(ChatMessage {
            author,
            text: text.to_string(),
        });
        let (_, bytes) = self.arq.send_message(&message, now)?;
        Ok(bytes)
    }

    /// Handles one datagram or one reassembled frame in raw form.
    pub fn handle_datagram(&mut self, data: &[u8]) -> Vec<Bytes> {
        match decode_frame(data) {
            Ok(frame) => self.handle_frame(&frame),
            Err(e) => {
                warn!(len = data.len(), error = %e, "Dropping malformed datagram");
                Vec::new()
            }
        }
    }

    /// Handles one decoded frame and returns the frames to write back.
    pub fn handle_frame(&mut self, frame: &Frame) -> Vec<Bytes> {
        let gate = match self.arq.receive(frame) {
            Ok(gate) => gate,
            Err(e) => {
                warn!(seq = %frame.seq, error = %e, "Failed to acknowledge frame");
                return Vec::new();
            }
        };
        match gate.verdict {
            Verdict::Deliver => self.dispatch(frame),
            Verdict::Acknowledged(pending) => self.acknowledged(pending.seq),
            Verdict::Duplicate | Verdict::StaleAck => {}
        }
        gate.ack.into_iter().collect()
    }

    /// Collects every retransmission due at `now`.
    pub fn poll_retransmits(&mut self, now: Instant) -> Vec<Bytes> {
        self.arq.poll_retransmits(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.arq.next_deadline()
    }

    /// Tears the session down after the transport failed.
    pub fn connection_lost(&mut self) {
        if self.state != ClientState::Disconnected {
            warn!(state = %self.state, "Connection lost");
        }
        self.end_session();
        self.events.push_back(ClientEvent::ConnectionLost);
    }

    /// Removes and returns the queued events, oldest first.
    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    fn request(
        &mut self,
        request: ClientRequest,
        message: &Message,
        now: Instant,
    ) -> ClientResult<Bytes> {
        let (seq, bytes) = self.arq.send_message(message, now)?;
        self.requests.track(seq, request);
        Ok(bytes)
    }

    fn dispatch(&mut self, frame: &Frame) {
        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(seq = %frame.seq, kind = %frame.kind, error = %e, "Dropping undecodable payload");
                return;
            }
        };

        match message {
            Message::LoginAccepted => {
                if self.take_login_reply() {
                    debug!("Login accepted");
                    self.state = ClientState::Connecting { accepted: true };
                    self.finish_login();
                }
            }
            Message::LoginRejected => {
                if self.take_login_reply() {
                    let user_name = self.user_name.take().unwrap_or_default();
                    info!(user = %user_name, "Login rejected, user name already in use");
                    self.state = ClientState::Disconnected;
                    self.requests.clear();
                    self.events
                        .push_back(ClientEvent::LoginRejected { user_name });
                }
            }
            Message::Catalog(movies) => {
                debug!(movies = movies.len(), "Catalog received");
                self.movies = Some(movies);
                self.finish_login();
            }
            Message::Roster(users) => {
                self.users = Some(users.clone());
                if self.state.is_logged_in() {
                    self.events.push_back(ClientEvent::UserListUpdated(users));
                } else {
                    self.finish_login();
                }
            }
            Message::Chat(chat) => {
                if self.user_name.as_deref() == Some(chat.author.as_str()) {
                    trace!("Skipping own chat message");
                } else if self.state.is_logged_in() {
                    self.events.push_back(ClientEvent::ChatReceived(chat));
                }
            }
            other => debug!(kind = %other.kind(), "Ignoring unexpected message"),
        }
    }

    /// Consumes the outstanding login, if any, for an accept or a refusal.
    /// The reply also answers the login, so it is no longer retransmitted.
    fn take_login_reply(&mut self) -> bool {
        if self.state != (ClientState::Connecting { accepted: false }) {
            debug!(state = %self.state, "Ignoring login reply");
            return false;
        }
        let Some(seq) = self.login_seq.take() else {
            debug!("Ignoring login reply with no login outstanding");
            return false;
        };
        self.arq.cancel(seq);
        true
    }

    /// Enters the main room once the accept, the catalog and the first
    /// roster have all arrived.
    fn finish_login(&mut self) {
        if self.state != (ClientState::Connecting { accepted: true }) {
            return;
        }
        let (Some(movies), Some(users)) = (&self.movies, &self.users) else {
            return;
        };
        let event = ClientEvent::InitComplete {
            users: users.clone(),
            movies: movies.clone(),
        };
        info!(users = users.len(), movies = movies.len(), "Logged in");
        self.state = ClientState::MainRoom;
        self.room = Room::Main;
        self.events.push_back(event);
    }

    fn acknowledged(&mut self, seq: Seq) {
        match self.requests.resolve(seq) {
            Some(ClientRequest::JoinMovie(id)) => {
                if self.state == ClientState::ToMovieRoomPending(id) {
                    self.state = ClientState::MovieRoom(id);
                    self.room = Room::Movie(id);
                    self.events.push_back(ClientEvent::JoinedRoom(Room::Movie(id)));
                }
            }
            Some(ClientRequest::ReturnToMain) => {
                if self.state == ClientState::ToMainRoomPending {
                    self.state = ClientState::MainRoom;
                    self.room = Room::Main;
                    self.events.push_back(ClientEvent::JoinedRoom(Room::Main));
                }
            }
            Some(ClientRequest::Leave) => {
                if self.state == ClientState::ToOutOfSystemPending {
                    info!("Left the system");
                    self.end_session();
                    self.events.push_back(ClientEvent::LeftSystem);
                }
            }
            None => {}
        }
    }

    fn end_session(&mut self) {
        self.state = ClientState::Disconnected;
        self.room = Room::OutOfSystem;
        self.user_name = None;
        self.movies = None;
        self.users = None;
        self.login_seq = None;
        self.requests.clear();
        self.arq.reset();
    }
}
