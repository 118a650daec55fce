//! Protocol error types.

use thiserror::Error;

use crate::types::MessageType;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Sequence number does not fit in the 12-bit header field.
    #[error("sequence number {0} does not fit in 12 bits")]
    SequenceOutOfRange(u16),

    /// Message type does not fit in the 4-bit header field.
    #[error("message type {0} does not fit in 4 bits")]
    InvalidMessageType(u8),

    /// Frame would exceed the 16-bit length field.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Declared frame length is shorter than the header itself.
    #[error("malformed header: declared length {length} is shorter than the header")]
    MalformedHeader { length: u16 },

    /// Not enough bytes for the declared frame.
    #[error("incomplete frame: expected {expected} bytes, got {received}")]
    IncompleteFrame { expected: usize, received: usize },

    /// Structured payload ended in the middle of a field.
    #[error("truncated {kind} payload: needed {needed} more bytes, {remaining} left")]
    TruncatedPayload {
        kind: MessageType,
        needed: usize,
        remaining: usize,
    },

    /// Catalog entry declares a length that cannot hold its fixed fields.
    #[error("catalog entry length {0} is shorter than its fixed fields")]
    InvalidEntryLength(u16),

    /// Movie id 0 is reserved for the main room.
    #[error("movie id 0 is reserved for the main room")]
    InvalidMovieId,

    /// A string field exceeds its length prefix.
    #[error("{field} is {len} bytes long (max: {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A user in the out-of-system room cannot appear in a roster.
    #[error("user {0:?} is out of the system and cannot be listed")]
    UnlistedRoom(String),

    /// Every sequence number is waiting for an acknowledgment.
    #[error("sequence number {0} is still awaiting acknowledgment")]
    SequenceInUse(u16),

    /// Text payload is not valid UTF-8.
    #[error("invalid UTF-8 payload: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
