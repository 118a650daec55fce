//! Wire protocol for c2w.
//!
//! Frames share one layout on every transport:
//! - 2 bytes: total frame length, header included (u16, big-endian)
//! - 2 bytes: sequence number (12 bits) and message type (4 bits)
//! - N bytes: payload
//!
//! Stream transports concatenate frames and rebuild them with a
//! [`FrameAssembler`]. Datagram transports carry one frame per datagram.
//! In both cases every frame except an ACK is acknowledged, and senders
//! keep retransmitting through an [`ArqEngine`] until the ACK arrives.
//!
//! # Example
//!
//! ```rust
//! use c2w_protocol::{FrameAssembler, Message, MessageType, Seq, encode_frame};
//!
//! let login = Message::Login { user_name: "alice".into() };
//! let payload = login.encode_payload().unwrap();
//! let bytes = encode_frame(login.kind(), Seq::ZERO, &payload).unwrap();
//!
//! let mut assembler = FrameAssembler::new();
//! assembler.push(&bytes);
//! let frame = assembler.next_frame().unwrap().unwrap();
//! assert_eq!(frame.kind, MessageType::Login);
//! assert_eq!(Message::from_frame(&frame).unwrap(), login);
//! ```

mod arq;
mod error;
mod framing;
#[cfg(test)]
mod golden_tests;
mod lossy;
mod message;
mod types;

pub use arq::{
    ArqConfig, ArqEngine, DEFAULT_RETRANSMIT_INTERVAL, DeliveryState, GateOutcome, PendingSend,
    RequestTracker, SeenSet, Verdict, sleep_until_deadline,
};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{
    FrameAssembler, HEADER_LEN, MAX_FRAME_LEN, decode_frame, encode_frame, encode_header,
};
pub use lossy::LossModel;
pub use message::{
    ChatMessage, MAIN_ROOM_PAYLOAD, Message, MovieEntry, RosterEntry, decode_catalog, decode_chat,
    decode_roster, encode_catalog, encode_chat, encode_roster,
};
pub use types::{Frame, MessageType, Seq};
