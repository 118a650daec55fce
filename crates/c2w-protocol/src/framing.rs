//! Length-prefixed frame codec and stream reassembly.
//!
//! Every frame starts with a 4-byte big-endian header:
//!
//! ```text
//! +----------------------+----------------------------------+-----------+
//! | length (2 BE)        | seq (12 bits) | type (4 bits)    |  payload  |
//! +----------------------+----------------------------------+-----------+
//! ```
//!
//! `length` counts the whole frame, header included. Over a datagram
//! transport each datagram is exactly one frame. Over a byte stream frames
//! are concatenated and [`FrameAssembler`] cuts them apart again.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Frame, MessageType, Seq};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 4;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Encodes a frame header.
///
/// Fails when the message type does not fit in 4 bits or when the frame
/// would not fit in the 16-bit length field. Sequence numbers are range
/// checked when the [`Seq`] is built.
///
/// # Example
///
/// ```rust
/// use c2w_protocol::{encode_header, MessageType, Seq};
///
/// let header = encode_header(MessageType::Login, 5, Seq::new(3).unwrap()).unwrap();
/// assert_eq!(header, [0x00, 0x09, 0x00, 0x31]);
/// ```
pub fn encode_header(kind: MessageType, payload_len: usize, seq: Seq) -> ProtocolResult<[u8; 4]> {
    let code = kind.code();
    if code > MessageType::MAX {
        return Err(ProtocolError::InvalidMessageType(code));
    }

    let total = HEADER_LEN + payload_len;
    if total > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            size: total,
            max: MAX_FRAME_LEN,
        });
    }

    let length = (total as u16).to_be_bytes();
    let seq_and_type = ((seq.get() << 4) | u16::from(code)).to_be_bytes();
    Ok([length[0], length[1], seq_and_type[0], seq_and_type[1]])
}

/// Encodes a complete frame ready for transmission.
pub fn encode_frame(kind: MessageType, seq: Seq, payload: &[u8]) -> ProtocolResult<Bytes> {
    let header = encode_header(kind, payload.len(), seq)?;
    let mut buffer = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(payload);
    Ok(buffer.freeze())
}

/// Decodes one frame from the front of `data`.
///
/// The payload is `data[4..length]`; bytes past the declared length are not
/// part of the frame and are ignored.
///
/// # Example
///
/// ```rust
/// use c2w_protocol::{decode_frame, MessageType};
///
/// let frame = decode_frame(&[0x00, 0x09, 0x00, 0x31, b'a', b'l', b'i', b'c', b'e']).unwrap();
/// assert_eq!(frame.kind, MessageType::Login);
/// assert_eq!(frame.seq.get(), 3);
/// assert_eq!(frame.text().unwrap(), "alice");
/// ```
pub fn decode_frame(data: &[u8]) -> ProtocolResult<Frame> {
    let length = declared_length(data)?;
    parse_frame(Bytes::copy_from_slice(&data[..length]))
}

/// Reads and validates the declared length of the frame at the front of `data`.
fn declared_length(data: &[u8]) -> ProtocolResult<usize> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::IncompleteFrame {
            expected: HEADER_LEN,
            received: data.len(),
        });
    }

    let length = u16::from_be_bytes([data[0], data[1]]);
    if usize::from(length) < HEADER_LEN {
        return Err(ProtocolError::MalformedHeader { length });
    }

    let length = usize::from(length);
    if data.len() < length {
        return Err(ProtocolError::IncompleteFrame {
            expected: length,
            received: data.len(),
        });
    }

    Ok(length)
}

/// Splits an exactly-sized frame into its fields without copying the payload.
fn parse_frame(raw: Bytes) -> ProtocolResult<Frame> {
    let seq_and_type = u16::from_be_bytes([raw[2], raw[3]]);
    let kind = MessageType::from_code((seq_and_type & 0x000F) as u8)?;
    let seq = Seq::new(seq_and_type >> 4)?;
    Ok(Frame {
        seq,
        kind,
        payload: raw.slice(HEADER_LEN..),
    })
}

/// Reassembles frames from a byte stream.
///
/// Bytes are appended as they arrive; [`FrameAssembler::next_frame`] hands
/// out one complete frame at a time and keeps any partial remainder for the
/// next delivery.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the stream.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Extracts the next complete frame.
    ///
    /// Returns `Ok(None)` while the buffer holds only part of a frame. A
    /// declared length shorter than the header cannot be resynchronized, so
    /// its two length bytes are dropped and `MalformedHeader` is returned;
    /// callers log it and keep draining.
    ///
    /// ```rust
    /// use c2w_protocol::{encode_frame, FrameAssembler, MessageType, Seq};
    ///
    /// let frame = encode_frame(MessageType::Login, Seq::ZERO, b"bob").unwrap();
    /// let mut assembler = FrameAssembler::new();
    /// assembler.push(&frame[..3]);
    /// assert!(assembler.next_frame().unwrap().is_none());
    /// assembler.push(&frame[3..]);
    /// assert_eq!(assembler.next_frame().unwrap().unwrap().text().unwrap(), "bob");
    /// ```
    pub fn next_frame(&mut self) -> ProtocolResult<Option<Frame>> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }

        let length = u16::from_be_bytes([self.buffer[0], self.buffer[1]]);
        if usize::from(length) < HEADER_LEN {
            self.buffer.advance(2);
            return Err(ProtocolError::MalformedHeader { length });
        }

        if self.buffer.len() < usize::from(length) {
            return Ok(None);
        }

        let raw = self.buffer.split_to(usize::from(length)).freeze();
        parse_frame(raw).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(value: u16) -> Seq {
        Seq::new(value).unwrap()
    }

    #[test]
    fn header_layout() {
        let header = encode_header(MessageType::Chat, 11, seq(0x0ABC)).unwrap();
        // length 15, then 0xABC << 4 | 9
        assert_eq!(header, [0x00, 0x0F, 0xAB, 0xC9]);
    }

    #[test]
    fn ack_is_bare_header() {
        let ack = encode_frame(MessageType::Ack, seq(7), &[]).unwrap();
        assert_eq!(&ack[..], &[0x00, 0x04, 0x00, 0x70]);
    }

    #[test]
    fn header_rejects_wide_type() {
        let result = encode_header(MessageType::Unknown(16), 0, Seq::ZERO);
        assert!(matches!(result, Err(ProtocolError::InvalidMessageType(16))));
    }

    #[test]
    fn header_rejects_oversized_frame() {
        let result = encode_header(MessageType::Chat, MAX_FRAME_LEN, Seq::ZERO);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn header_roundtrip_all_types() {
        for code in 0..=MessageType::MAX {
            let kind = MessageType::from_code(code).unwrap();
            let bytes = encode_frame(kind, seq(Seq::MAX), b"xyz").unwrap();
            let frame = decode_frame(&bytes).unwrap();
            assert_eq!(frame.kind, kind);
            assert_eq!(frame.seq, seq(Seq::MAX));
            assert_eq!(&frame.payload[..], b"xyz");
            assert_eq!(frame.length(), bytes.len());
        }
    }

    #[test]
    fn decode_rejects_short_declared_length() {
        let result = decode_frame(&[0x00, 0x02, 0x00, 0x10]);
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedHeader { length: 2 })
        ));
    }

    #[test]
    fn decode_rejects_missing_bytes() {
        let result = decode_frame(&[0x00, 0x0A, 0x00, 0x11, b'a']);
        assert!(matches!(
            result,
            Err(ProtocolError::IncompleteFrame {
                expected: 10,
                received: 5
            })
        ));
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut data = encode_frame(MessageType::Login, Seq::ZERO, b"ann").unwrap().to_vec();
        data.extend_from_slice(b"junk");
        let frame = decode_frame(&data).unwrap();
        assert_eq!(frame.text().unwrap(), "ann");
    }

    #[test]
    fn assembler_handles_coalesced_frames() {
        let mut stream = Vec::new();
        for (i, name) in ["a", "bb", "ccc"].iter().enumerate() {
            stream.extend_from_slice(
                &encode_frame(MessageType::Login, seq(i as u16), name.as_bytes()).unwrap(),
            );
        }

        let mut assembler = FrameAssembler::new();
        assembler.push(&stream);

        let mut names = Vec::new();
        while let Some(frame) = assembler.next_frame().unwrap() {
            names.push(frame.text().unwrap().to_string());
        }
        assert_eq!(names, ["a", "bb", "ccc"]);
        assert!(assembler.is_empty());
    }

    #[test]
    fn assembler_handles_byte_by_byte_delivery() {
        let first = encode_frame(MessageType::Chat, seq(1), b"\x03bobhi").unwrap();
        let second = encode_frame(MessageType::Ack, seq(2), &[]).unwrap();
        let stream: Vec<u8> = first.iter().chain(second.iter()).copied().collect();

        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();
        for byte in stream {
            assembler.push(&[byte]);
            while let Some(frame) = assembler.next_frame().unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, MessageType::Chat);
        assert_eq!(&frames[0].payload[..], b"\x03bobhi");
        assert_eq!(frames[1].kind, MessageType::Ack);
        assert_eq!(frames[1].seq, seq(2));
    }

    #[test]
    fn assembler_keeps_partial_tail() {
        let frame = encode_frame(MessageType::Leave, seq(4), b"alice").unwrap();
        let mut assembler = FrameAssembler::new();
        assembler.push(&frame);
        assembler.push(&frame[..6]);

        assert!(assembler.next_frame().unwrap().is_some());
        assert!(assembler.next_frame().unwrap().is_none());
        assert_eq!(assembler.buffered(), 6);

        assembler.push(&frame[6..]);
        let second = assembler.next_frame().unwrap().unwrap();
        assert_eq!(second.text().unwrap(), "alice");
        assert!(assembler.is_empty());
    }

    #[test]
    fn assembler_waits_on_empty_and_single_byte() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.next_frame().unwrap().is_none());
        assembler.push(&[0x00]);
        assert!(assembler.next_frame().unwrap().is_none());
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn assembler_skips_malformed_length() {
        let good = encode_frame(MessageType::Ack, seq(3), &[]).unwrap();
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x00, 0x01]);
        assembler.push(&good);

        assert!(matches!(
            assembler.next_frame(),
            Err(ProtocolError::MalformedHeader { length: 1 })
        ));
        let frame = assembler.next_frame().unwrap().unwrap();
        assert_eq!(frame.seq, seq(3));
    }
}
