//! Header field types and the decoded frame.

use std::fmt;

use bytes::Bytes;

use crate::error::{ProtocolError, ProtocolResult};

/// A 12-bit frame sequence number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Seq(u16);

impl Seq {
    /// Largest value that fits in the header.
    pub const MAX: u16 = 0x0FFF;

    /// The first sequence number of every session.
    pub const ZERO: Seq = Seq(0);

    /// Creates a sequence number, rejecting values wider than 12 bits.
    pub fn new(value: u16) -> ProtocolResult<Self> {
        if value > Self::MAX {
            return Err(ProtocolError::SequenceOutOfRange(value));
        }
        Ok(Self(value))
    }

    /// Creates a sequence number from the low 12 bits of `value`.
    pub const fn wrapping(value: u16) -> Self {
        Self(value & Self::MAX)
    }

    /// Returns the raw value.
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Returns the following sequence number, wrapping after [`Seq::MAX`].
    pub const fn next(self) -> Self {
        Self((self.0 + 1) & Self::MAX)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The 4-bit message type carried in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// 0: acknowledgment of the frame with the same sequence number.
    Ack,
    /// 1: login request carrying the user name.
    Login,
    /// 2: leave the system, carrying the user name.
    Leave,
    /// 3: join the room of the named movie.
    JoinMovieRoom,
    /// 4: go back to the main room.
    ReturnToMainRoom,
    /// 5: movie catalog push.
    Catalog,
    /// 6: user roster push.
    Roster,
    /// 7: login accepted.
    LoginAccepted,
    /// 8: login rejected.
    LoginRejected,
    /// 9: chat message.
    Chat,
    /// 10-15: reserved; acknowledged but otherwise ignored.
    Unknown(u8),
}

impl MessageType {
    /// Largest value that fits in the header.
    pub const MAX: u8 = 0x0F;

    /// Maps a 4-bit header value to a message type.
    pub fn from_code(code: u8) -> ProtocolResult<Self> {
        Ok(match code {
            0 => MessageType::Ack,
            1 => MessageType::Login,
            2 => MessageType::Leave,
            3 => MessageType::JoinMovieRoom,
            4 => MessageType::ReturnToMainRoom,
            5 => MessageType::Catalog,
            6 => MessageType::Roster,
            7 => MessageType::LoginAccepted,
            8 => MessageType::LoginRejected,
            9 => MessageType::Chat,
            10..=Self::MAX => MessageType::Unknown(code),
            _ => return Err(ProtocolError::InvalidMessageType(code)),
        })
    }

    /// Returns the header value.
    pub const fn code(self) -> u8 {
        match self {
            MessageType::Ack => 0,
            MessageType::Login => 1,
            MessageType::Leave => 2,
            MessageType::JoinMovieRoom => 3,
            MessageType::ReturnToMainRoom => 4,
            MessageType::Catalog => 5,
            MessageType::Roster => 6,
            MessageType::LoginAccepted => 7,
            MessageType::LoginRejected => 8,
            MessageType::Chat => 9,
            MessageType::Unknown(code) => code,
        }
    }

    pub const fn is_ack(self) -> bool {
        matches!(self, MessageType::Ack)
    }

    /// Login, leave and join-room frames carry plain UTF-8 text.
    pub const fn carries_text(self) -> bool {
        matches!(
            self,
            MessageType::Login | MessageType::Leave | MessageType::JoinMovieRoom
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Ack => "ack",
            MessageType::Login => "login",
            MessageType::Leave => "leave",
            MessageType::JoinMovieRoom => "join-movie-room",
            MessageType::ReturnToMainRoom => "return-to-main-room",
            MessageType::Catalog => "catalog",
            MessageType::Roster => "roster",
            MessageType::LoginAccepted => "login-accepted",
            MessageType::LoginRejected => "login-rejected",
            MessageType::Chat => "chat",
            MessageType::Unknown(code) => return write!(f, "unknown({code})"),
        };
        f.write_str(name)
    }
}

/// One decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: Seq,
    pub kind: MessageType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: MessageType, seq: Seq, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            kind,
            payload: payload.into(),
        }
    }

    /// Total frame length as written in the header.
    pub fn length(&self) -> usize {
        crate::framing::HEADER_LEN + self.payload.len()
    }

    /// Interprets the payload as UTF-8 text.
    pub fn text(&self) -> ProtocolResult<&str> {
        Ok(std::str::from_utf8(&self.payload)?)
    }

    /// Encodes the frame back into wire bytes.
    pub fn encode(&self) -> ProtocolResult<Bytes> {
        crate::framing::encode_frame(self.kind, self.seq, &self.payload)
    }
}
