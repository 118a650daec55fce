//! Typed messages and the structured payload layouts.
//!
//! Catalog entry (type 5, repeated):
//!
//! ```text
//! | ip (4) | port (2 BE) | entry length (2 BE) | id (1) | title (UTF-8) |
//! ```
//!
//! The entry length counts the nine fixed bytes plus the title.
//!
//! Roster entry (type 6, repeated):
//!
//! ```text
//! | name length (1) | room id (1) | name (UTF-8) |
//! ```
//!
//! Chat message (type 9):
//!
//! ```text
//! | name length (1) | name (UTF-8) | message (UTF-8, rest of the frame) |
//! ```

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut};
use c2w_core::{MovieId, Room};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Frame, MessageType};

/// Payload of a return-to-main-room request.
pub const MAIN_ROOM_PAYLOAD: &str = "0";

/// Fixed bytes of a catalog entry before its title.
const CATALOG_FIXED_LEN: usize = 9;

/// One movie in the catalog push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieEntry {
    pub id: MovieId,
    pub title: String,
    pub address: Ipv4Addr,
    pub port: u16,
}

/// One user in the roster push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub room: Room,
}

/// A chat line and its author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
}

/// A decoded message of any type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ack,
    Login { user_name: String },
    Leave { user_name: String },
    JoinMovieRoom { title: String },
    ReturnToMainRoom,
    Catalog(Vec<MovieEntry>),
    Roster(Vec<RosterEntry>),
    LoginAccepted,
    LoginRejected,
    Chat(ChatMessage),
    /// A reserved type; its payload is not interpreted.
    Unknown(u8),
}

impl Message {
    /// Returns the header type of this message.
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Ack => MessageType::Ack,
            Message::Login { .. } => MessageType::Login,
            Message::Leave { .. } => MessageType::Leave,
            Message::JoinMovieRoom { .. } => MessageType::JoinMovieRoom,
            Message::ReturnToMainRoom => MessageType::ReturnToMainRoom,
            Message::Catalog(_) => MessageType::Catalog,
            Message::Roster(_) => MessageType::Roster,
            Message::LoginAccepted => MessageType::LoginAccepted,
            Message::LoginRejected => MessageType::LoginRejected,
            Message::Chat(_) => MessageType::Chat,
            Message::Unknown(code) => MessageType::Unknown(*code),
        }
    }

    /// Encodes the payload that follows the header.
    pub fn encode_payload(&self) -> ProtocolResult<Vec<u8>> {
        Ok(match self {
            Message::Ack
            | Message::LoginAccepted
            | Message::LoginRejected
            | Message::Unknown(_) => Vec::new(),
            Message::Login { user_name } | Message::Leave { user_name } => {
                user_name.as_bytes().to_vec()
            }
            Message::JoinMovieRoom { title } => title.as_bytes().to_vec(),
            Message::ReturnToMainRoom => MAIN_ROOM_PAYLOAD.as_bytes().to_vec(),
            Message::Catalog(movies) => encode_catalog(movies)?,
            Message::Roster(users) => encode_roster(users)?,
            Message::Chat(chat) => encode_chat(chat)?,
        })
    }

    /// Decodes a payload of the given type.
    pub fn decode(kind: MessageType, payload: &[u8]) -> ProtocolResult<Self> {
        Ok(match kind {
            MessageType::Ack => Message::Ack,
            MessageType::Login => Message::Login {
                user_name: utf8(payload)?,
            },
            MessageType::Leave => Message::Leave {
                user_name: utf8(payload)?,
            },
            MessageType::JoinMovieRoom => Message::JoinMovieRoom {
                title: utf8(payload)?,
            },
            MessageType::ReturnToMainRoom => Message::ReturnToMainRoom,
            MessageType::Catalog => Message::Catalog(decode_catalog(payload)?),
            MessageType::Roster => Message::Roster(decode_roster(payload)?),
            MessageType::LoginAccepted => Message::LoginAccepted,
            MessageType::LoginRejected => Message::LoginRejected,
            MessageType::Chat => Message::Chat(decode_chat(payload)?),
            MessageType::Unknown(code) => Message::Unknown(code),
        })
    }

    /// Decodes the payload of a received frame.
    pub fn from_frame(frame: &Frame) -> ProtocolResult<Self> {
        Self::decode(frame.kind, &frame.payload)
    }
}

fn utf8(bytes: &[u8]) -> ProtocolResult<String> {
    Ok(std::str::from_utf8(bytes)?.to_owned())
}

fn ensure_remaining(buf: &[u8], needed: usize, kind: MessageType) -> ProtocolResult<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::TruncatedPayload {
            kind,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn short_len(field: &'static str, value: &str) -> ProtocolResult<u8> {
    u8::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
        max: u8::MAX as usize,
    })
}

/// Encodes the movie catalog payload.
pub fn encode_catalog(movies: &[MovieEntry]) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    for movie in movies {
        let entry_len = CATALOG_FIXED_LEN + movie.title.len();
        let entry_len = u16::try_from(entry_len).map_err(|_| ProtocolError::FieldTooLong {
            field: "movie title",
            len: movie.title.len(),
            max: u16::MAX as usize - CATALOG_FIXED_LEN,
        })?;

        buf.put_slice(&movie.address.octets());
        buf.put_u16(movie.port);
        buf.put_u16(entry_len);
        buf.put_u8(movie.id.get());
        buf.put_slice(movie.title.as_bytes());
    }
    Ok(buf)
}

/// Decodes the movie catalog payload.
pub fn decode_catalog(mut buf: &[u8]) -> ProtocolResult<Vec<MovieEntry>> {
    let mut movies = Vec::new();
    while buf.has_remaining() {
        ensure_remaining(buf, CATALOG_FIXED_LEN, MessageType::Catalog)?;

        let mut octets = [0u8; 4];
        buf.copy_to_slice(&mut octets);
        let port = buf.get_u16();
        let entry_len = buf.get_u16();
        let id = buf.get_u8();

        let title_len = usize::from(entry_len)
            .checked_sub(CATALOG_FIXED_LEN)
            .ok_or(ProtocolError::InvalidEntryLength(entry_len))?;
        ensure_remaining(buf, title_len, MessageType::Catalog)?;
        let title = utf8(&buf[..title_len])?;
        buf.advance(title_len);

        movies.push(MovieEntry {
            id: MovieId::new(id).ok_or(ProtocolError::InvalidMovieId)?,
            title,
            address: Ipv4Addr::from(octets),
            port,
        });
    }
    Ok(movies)
}

/// Encodes the user roster payload.
pub fn encode_roster(users: &[RosterEntry]) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    for user in users {
        let room = user
            .room
            .wire_id()
            .ok_or_else(|| ProtocolError::UnlistedRoom(user.name.clone()))?;
        buf.put_u8(short_len("user name", &user.name)?);
        buf.put_u8(room);
        buf.put_slice(user.name.as_bytes());
    }
    Ok(buf)
}

/// Decodes the user roster payload.
pub fn decode_roster(mut buf: &[u8]) -> ProtocolResult<Vec<RosterEntry>> {
    let mut users = Vec::new();
    while buf.has_remaining() {
        ensure_remaining(buf, 2, MessageType::Roster)?;
        let name_len = usize::from(buf.get_u8());
        let room = Room::from_wire_id(buf.get_u8());

        ensure_remaining(buf, name_len, MessageType::Roster)?;
        let name = utf8(&buf[..name_len])?;
        buf.advance(name_len);

        users.push(RosterEntry { name, room });
    }
    Ok(users)
}

/// Encodes a chat payload.
pub fn encode_chat(chat: &ChatMessage) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(1 + chat.author.len() + chat.text.len());
    buf.put_u8(short_len("user name", &chat.author)?);
    buf.put_slice(chat.author.as_bytes());
    buf.put_slice(chat.text.as_bytes());
    Ok(buf)
}

/// Decodes a chat payload.
pub fn decode_chat(mut buf: &[u8]) -> ProtocolResult<ChatMessage> {
    ensure_remaining(buf, 1, MessageType::Chat)?;
    let name_len = usize::from(buf.get_u8());
    ensure_remaining(buf, name_len, MessageType::Chat)?;
    let author = utf8(&buf[..name_len])?;
    let text = utf8(&buf[name_len..])?;
    Ok(ChatMessage { author, text })
}
