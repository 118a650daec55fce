//! Acknowledged delivery: retransmission scheduling and duplicate suppression.
//!
//! An [`ArqEngine`] holds the state one endpoint keeps about one remote peer.
//! It performs no I/O. Drivers hand it inbound frames through
//! [`ArqEngine::receive`], write whatever bytes it returns, and wake up at
//! [`ArqEngine::next_deadline`] to call [`ArqEngine::poll_retransmits`].
//!
//! Every pending send owns its due time, so a wake-up that races with an
//! acknowledgment simply finds nothing to resend.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{ProtocolError, ProtocolResult};
use crate::framing::encode_frame;
use crate::message::Message;
use crate::types::{Frame, MessageType, Seq};

/// Default delay between retransmissions of an unacknowledged frame.
pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Distance at which a seen sequence number is forgotten.
const SEEN_WINDOW: u16 = (Seq::MAX + 1) / 2;

/// Retransmission settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArqConfig {
    /// Delay between two transmissions of the same frame.
    pub retransmit_interval: Duration,
    /// Number of retransmissions after which a send is abandoned.
    /// `None` retransmits until acknowledged.
    pub max_retransmits: Option<u32>,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
            max_retransmits: None,
        }
    }
}

impl ArqConfig {
    pub fn with_retransmit_interval(mut self, interval: Duration) -> Self {
        self.retransmit_interval = interval;
        self
    }

    pub fn with_max_retransmits(mut self, max: Option<u32>) -> Self {
        self.max_retransmits = max;
        self
    }
}

/// Lifecycle of a pending send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Sent,
    Acknowledged,
}

/// A frame awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub seq: Seq,
    pub kind: MessageType,
    /// Encoded frame, resent byte for byte.
    pub raw: Bytes,
    pub next_due: Instant,
    pub retransmits: u32,
    pub state: DeliveryState,
    /// Position among all sends of the engine, unaffected by wrap-around.
    pub order: u64,
}

/// Sequence numbers already processed from one peer.
///
/// Sequence numbers wrap after 4096 frames, so inserting a number forgets
/// the one half the number space away.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    seqs: HashSet<Seq>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `seq`. Returns `false` if it was already present.
    pub fn insert(&mut self, seq: Seq) -> bool {
        let stale = Seq::wrapping(seq.get().wrapping_add(SEEN_WINDOW));
        self.seqs.remove(&stale);
        self.seqs.insert(seq)
    }

    pub fn contains(&self, seq: Seq) -> bool {
        self.seqs.contains(&seq)
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    pub fn clear(&mut self) {
        self.seqs.clear();
    }
}

/// What the receiver should do with an inbound frame.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// New frame, hand it to the session.
    Deliver,
    /// Already processed; only the ACK goes out.
    Duplicate,
    /// ACK for one of our pending sends.
    Acknowledged(PendingSend),
    /// ACK for nothing we are waiting on.
    StaleAck,
}

/// Result of passing an inbound frame through the receive gate.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    /// Acknowledgment to send back, for every non-ACK frame.
    pub ack: Option<Bytes>,
    pub verdict: Verdict,
}

impl GateOutcome {
    pub fn should_deliver(&self) -> bool {
        matches!(self.verdict, Verdict::Deliver)
    }
}

/// Per-peer retransmission scheduler and duplicate filter.
#[derive(Debug)]
pub struct ArqEngine {
    config: ArqConfig,
    next_seq: Seq,
    confirmed: u64,
    sent: u64,
    pending: HashMap<Seq, PendingSend>,
    seen: SeenSet,
}

impl Default for ArqEngine {
    fn default() -> Self {
        Self::new(ArqConfig::default())
    }
}

impl ArqEngine {
    pub fn new(config: ArqConfig) -> Self {
        Self::starting_at(config, Seq::ZERO)
    }

    /// Engine whose first send uses `first` instead of zero.
    pub fn starting_at(config: ArqConfig, first: Seq) -> Self {
        Self {
            config,
            next_seq: first,
            confirmed: 0,
            sent: 0,
            pending: HashMap::new(),
            seen: SeenSet::new(),
        }
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    /// Sequence number the next send will use.
    pub fn next_seq(&self) -> Seq {
        self.next_seq
    }

    /// Number of sends acknowledged so far.
    pub fn confirmed(&self) -> u64 {
        self.confirmed
    }

    /// Encodes a frame, schedules its retransmission and returns the bytes
    /// for the first transmission.
    pub fn send(
        &mut self,
        kind: MessageType,
        payload: &[u8],
        now: Instant,
    ) -> ProtocolResult<(Seq, Bytes)> {
        let seq = self.next_seq;
        if self.pending.contains_key(&seq) {
            return Err(ProtocolError::SequenceInUse(seq.get()));
        }

        let raw = encode_frame(kind, seq, payload)?;
        self.pending.insert(
            seq,
            PendingSend {
                seq,
                kind,
                raw: raw.clone(),
                next_due: now + self.config.retransmit_interval,
                retransmits: 0,
                state: DeliveryState::Sent,
                order: self.sent,
            },
        );
        self.sent += 1;
        self.next_seq = seq.next();
        debug!(seq = %seq, kind = %kind, len = raw.len(), "Frame sent");
        Ok((seq, raw))
    }

    /// Encodes and sends a typed message.
    pub fn send_message(&mut self, message: &Message, now: Instant) -> ProtocolResult<(Seq, Bytes)> {
        let payload = message.encode_payload()?;
        self.send(message.kind(), &payload, now)
    }

    /// Runs an inbound frame through the ACK and duplicate gate.
    pub fn receive(&mut self, frame: &Frame) -> ProtocolResult<GateOutcome> {
        if frame.kind.is_ack() {
            let verdict = match self.pending.remove(&frame.seq) {
                Some(mut pending) => {
                    pending.state = DeliveryState::Acknowledged;
                    self.confirmed += 1;
                    trace!(seq = %frame.seq, kind = %pending.kind, "Frame acknowledged");
                    Verdict::Acknowledged(pending)
                }
                None => {
                    trace!(seq = %frame.seq, "Ignoring stale acknowledgment");
                    Verdict::StaleAck
                }
            };
            return Ok(GateOutcome { ack: None, verdict });
        }

        let ack = encode_frame(MessageType::Ack, frame.seq, &[])?;
        let fresh = self.seen.insert(frame.seq);
        let verdict = if fresh || frame.kind == MessageType::Login {
            Verdict::Deliver
        } else {
            debug!(seq = %frame.seq, kind = %frame.kind, "Duplicate frame, acknowledging only");
            Verdict::Duplicate
        };
        Ok(GateOutcome {
            ack: Some(ack),
            verdict,
        })
    }

    /// Returns the frames whose retransmission is due, in the order they
    /// were first sent, and reschedules them.
    pub fn poll_retransmits(&mut self, now: Instant) -> Vec<Bytes> {
        let mut due: Vec<(u64, Seq)> = self
            .pending
            .values()
            .filter(|pending| pending.next_due <= now)
            .map(|pending| (pending.order, pending.seq))
            .collect();
        due.sort_unstable();

        let mut frames = Vec::with_capacity(due.len());
        for (_, seq) in due {
            let Some(pending) = self.pending.get_mut(&seq) else {
                continue;
            };
            if self
                .config
                .max_retransmits
                .is_some_and(|max| pending.retransmits >= max)
            {
                warn!(
                    seq = %seq,
                    kind = %pending.kind,
                    retransmits = pending.retransmits,
                    "Giving up on unacknowledged frame"
                );
                self.pending.remove(&seq);
                continue;
            }
            pending.retransmits += 1;
            pending.next_due = now + self.config.retransmit_interval;
            debug!(seq = %seq, kind = %pending.kind, attempt = pending.retransmits, "Retransmitting frame");
            frames.push(pending.raw.clone());
        }
        frames
    }

    /// Earliest instant at which a retransmission is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.next_due).min()
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, seq: Seq) -> bool {
        self.pending.contains_key(&seq)
    }

    pub fn pending(&self, seq: Seq) -> Option<&PendingSend> {
        self.pending.get(&seq)
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    /// Stops retransmitting `seq` without counting it as acknowledged.
    pub fn cancel(&mut self, seq: Seq) -> Option<PendingSend> {
        let cancelled = self.pending.remove(&seq);
        if let Some(pending) = &cancelled {
            trace!(seq = %seq, kind = %pending.kind, "Frame no longer retransmitted");
        }
        cancelled
    }

    /// Drops every pending send and forgets every seen sequence number.
    pub fn reset(&mut self) {
        if !self.pending.is_empty() {
            debug!(in_flight = self.pending.len(), "Dropping unacknowledged frames");
        }
        self.pending.clear();
        self.seen.clear();
    }
}

/// Sleeps until `deadline`, or forever when there is none.
///
/// Meant as a `tokio::select!` branch next to the socket reads of a driver.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Maps outstanding sequence numbers to the request they carry.
#[derive(Debug, Clone)]
pub struct RequestTracker<K> {
    requests: HashMap<Seq, K>,
}

impl<K> Default for RequestTracker<K> {
    fn default() -> Self {
        Self {
            requests: HashMap::new(),
        }
    }
}

impl<K> RequestTracker<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, seq: Seq, kind: K) {
        self.requests.insert(seq, kind);
    }

    /// Removes and returns the request sent with `seq`.
    pub fn resolve(&mut self, seq: Seq) -> Option<K> {
        self.requests.remove(&seq)
    }

    pub fn contains(&self, kind: &K) -> bool
    where
        K: PartialEq,
    {
        self.requests.values().any(|tracked| tracked == kind)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::decode_frame;

    const SECOND: Duration = Duration::from_secs(1);

    fn frame(kind: MessageType, seq: u16, payload: &'static [u8]) -> Frame {
        Frame::new(kind, Seq::new(seq).unwrap(), payload)
    }

    fn ack(seq: u16) -> Frame {
        frame(MessageType::Ack, seq, b"")
    }

    #[test]
    fn send_assigns_increasing_sequence_numbers() {
        let mut arq = ArqEngine::default();
        let now = Instant::now();

        let (first, raw) = arq.send(MessageType::Login, b"alice", now).unwrap();
        let (second, _) = arq.send(MessageType::Chat, b"\x01ahi", now).unwrap();

        assert_eq!(first.get(), 0);
        assert_eq!(second.get(), 1);
        assert_eq!(arq.in_flight(), 2);
        assert_eq!(&raw[..], &[0x00, 0x09, 0x00, 0x01, b'a', b'l', b'i', b'c', b'e']);
    }

    #[test]
    fn retransmits_identical_bytes_until_acknowledged() {
        let mut arq = ArqEngine::default();
        let start = Instant::now();
        let (seq, raw) = arq.send(MessageType::Login, b"alice", start).unwrap();

        assert!(arq.poll_retransmits(start).is_empty());
        assert_eq!(arq.next_deadline(), Some(start + SECOND));

        let first = arq.poll_retransmits(start + SECOND);
        assert_eq!(first, vec![raw.clone()]);
        let second = arq.poll_retransmits(start + SECOND * 2);
        assert_eq!(second, vec![raw]);
        assert_eq!(arq.pending(seq).unwrap().retransmits, 2);

        let outcome = arq.receive(&ack(seq.get())).unwrap();
        assert!(outcome.ack.is_none());
        match outcome.verdict {
            Verdict::Acknowledged(pending) => {
                assert_eq!(pending.seq, seq);
                assert_eq!(pending.state, DeliveryState::Acknowledged);
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert!(arq.poll_retransmits(start + SECOND * 10).is_empty());
        assert_eq!(arq.next_deadline(), None);
        assert_eq!(arq.confirmed(), 1);
    }

    #[test]
    fn retransmits_in_sequence_order() {
        let mut arq = ArqEngine::default();
        let now = Instant::now();
        for _ in 0..5 {
            arq.send(MessageType::Roster, b"", now).unwrap();
        }
        let frames = arq.poll_retransmits(now + SECOND);
        let seqs: Vec<u16> = frames
            .iter()
            .map(|raw| decode_frame(raw).unwrap().seq.get())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn retransmits_in_send_order_across_wrap() {
        let mut arq = ArqEngine::starting_at(ArqConfig::default(), Seq::new(Seq::MAX - 1).unwrap());
        let now = Instant::now();
        for _ in 0..4 {
            arq.send(MessageType::Chat, b"\x00", now).unwrap();
        }
        let seqs: Vec<u16> = arq
            .poll_retransmits(now + SECOND)
            .iter()
            .map(|raw| decode_frame(raw).unwrap().seq.get())
            .collect();
        assert_eq!(seqs, vec![Seq::MAX - 1, Seq::MAX, 0, 1]);
    }

    #[test]
    fn starts_numbering_where_asked() {
        let mut arq = ArqEngine::starting_at(ArqConfig::default(), Seq::new(7).unwrap());
        let (seq, raw) = arq.send(MessageType::LoginRejected, b"", Instant::now()).unwrap();
        assert_eq!(seq.get(), 7);
        assert_eq!(&raw[..], &[0x00, 0x04, 0x00, 0x78]);
    }

    #[test]
    fn cancelled_sends_stop_retransmitting() {
        let mut arq = ArqEngine::default();
        let now = Instant::now();
        let (login, _) = arq.send(MessageType::Login, b"alice", now).unwrap();
        let (chat, chat_raw) = arq.send(MessageType::Chat, b"\x01ahi", now).unwrap();

        assert_eq!(arq.cancel(login).map(|pending| pending.kind), Some(MessageType::Login));
        assert!(arq.cancel(login).is_none());
        assert_eq!(arq.confirmed(), 0);
        assert!(arq.is_pending(chat));
        assert_eq!(arq.poll_retransmits(now + SECOND), vec![chat_raw]);

        // A late ACK for the cancelled frame is stale.
        assert!(matches!(arq.receive(&ack(login.get())).unwrap().verdict, Verdict::StaleAck));
    }

    #[test]
    fn stale_ack_is_ignored() {
        let mut arq = ArqEngine::default();
        let outcome = arq.receive(&ack(42)).unwrap();
        assert!(matches!(outcome.verdict, Verdict::StaleAck));
        assert!(outcome.ack.is_none());
    }

    #[test]
    fn duplicate_frames_are_acked_but_not_delivered() {
        let mut arq = ArqEngine::default();
        let chat = frame(MessageType::Chat, 3, b"\x05alicehello");

        let first = arq.receive(&chat).unwrap();
        assert!(first.should_deliver());
        let second = arq.receive(&chat).unwrap();
        assert!(matches!(second.verdict, Verdict::Duplicate));

        let expected_ack = [0x00, 0x04, 0x00, 0x30];
        assert_eq!(&first.ack.unwrap()[..], &expected_ack);
        assert_eq!(&second.ack.unwrap()[..], &expected_ack);
    }

    #[test]
    fn login_is_delivered_every_time() {
        let mut arq = ArqEngine::default();
        let login = frame(MessageType::Login, 0, b"alice");
        assert!(arq.receive(&login).unwrap().should_deliver());
        assert!(arq.receive(&login).unwrap().should_deliver());
    }

    #[test]
    fn unknown_types_are_acknowledged() {
        let mut arq = ArqEngine::default();
        let outcome = arq.receive(&frame(MessageType::Unknown(12), 9, b"??")).unwrap();
        assert!(outcome.ack.is_some());
        assert!(outcome.should_deliver());
    }

    #[test]
    fn gives_up_after_configured_retransmits() {
        let mut arq = ArqEngine::new(ArqConfig::default().with_max_retransmits(Some(2)));
        let start = Instant::now();
        let (seq, _) = arq.send(MessageType::Chat, b"\x01ahi", start).unwrap();

        assert_eq!(arq.poll_retransmits(start + SECOND).len(), 1);
        assert_eq!(arq.poll_retransmits(start + SECOND * 2).len(), 1);
        assert!(arq.poll_retransmits(start + SECOND * 3).is_empty());
        assert!(!arq.is_pending(seq));
    }

    #[test]
    fn sequence_numbers_wrap() {
        let mut arq = ArqEngine::default();
        let now = Instant::now();
        for expected in 0..=Seq::MAX {
            let (seq, _) = arq.send(MessageType::Chat, b"\x00", now).unwrap();
            assert_eq!(seq.get(), expected);
            arq.receive(&ack(expected)).unwrap();
        }
        let (seq, _) = arq.send(MessageType::Chat, b"\x00", now).unwrap();
        assert_eq!(seq, Seq::ZERO);
    }

    #[test]
    fn refuses_to_reuse_a_pending_sequence_number() {
        let mut arq = ArqEngine::default();
        let now = Instant::now();
        for _ in 0..=Seq::MAX {
            arq.send(MessageType::Chat, b"\x00", now).unwrap();
        }
        assert!(matches!(
            arq.send(MessageType::Chat, b"\x00", now),
            Err(ProtocolError::SequenceInUse(0))
        ));
    }

    #[test]
    fn seen_set_forgets_numbers_half_a_cycle_back() {
        let mut seen = SeenSet::new();
        for value in 0..=Seq::MAX {
            assert!(seen.insert(Seq::new(value).unwrap()));
        }
        assert_eq!(seen.len(), usize::from(SEEN_WINDOW));
        assert!(seen.insert(Seq::ZERO));
        assert!(!seen.insert(Seq::new(Seq::MAX).unwrap()));
    }

    #[test]
    fn reset_clears_everything() {
        let mut arq = ArqEngine::default();
        let now = Instant::now();
        arq.send(MessageType::Leave, b"alice", now).unwrap();
        arq.receive(&frame(MessageType::Roster, 1, b"")).unwrap();

        arq.reset();
        assert_eq!(arq.in_flight(), 0);
        assert!(arq.seen().is_empty());
        assert_eq!(arq.next_deadline(), None);
    }

    #[test]
    fn request_tracker_resolves_once() {
        let mut tracker = RequestTracker::new();
        tracker.track(Seq::new(4).unwrap(), "login");
        assert!(tracker.contains(&"login"));
        assert_eq!(tracker.resolve(Seq::new(4).unwrap()), Some("login"));
        assert_eq!(tracker.resolve(Seq::new(4).unwrap()), None);
        assert!(tracker.is_empty());
    }
}
