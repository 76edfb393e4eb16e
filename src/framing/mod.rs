// Framing Layer - fragments outbound envelopes into MTU-sized packets and
// reassembles inbound packets by correlation id.
//
// This is transport hygiene only: CRC mismatches and protocol violations are
// dropped and counted, never surfaced. The RPC Core only ever observes a
// `Complete` envelope or its own call timeout.

mod frame;
mod reassembly;

pub use frame::{Frame, FrameHeader, FRAME_HEADER_LEN};

use crate::ids::{CallId, PeerId};
use reassembly::PartialMessage;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// BLE's practical floor: 23-byte ATT MTU minus the 3-byte ATT header
/// leaves 20 payload bytes, and one more is reserved, so the smallest
/// `max_payload` this layer will ever negotiate down to is 27 — that is,
/// room for the 24-byte frame header plus 3 bytes of envelope.
pub const MIN_MAX_PAYLOAD: usize = 27;

/// How long a partial reassembly is kept around before being dropped as
/// abandoned. Distinct from the RPC Core's call timeout: a peer can keep
/// sending fragments for a message whose owning call has already timed out
/// on the other end, and this layer doesn't know about calls at all.
const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of feeding one received frame payload into the reassembler.
#[derive(Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// More fragments are still expected for this correlation id.
    Pending,
    /// All fragments for this correlation id have arrived and passed their
    /// CRC checks; here is the reassembled envelope.
    Complete(Vec<u8>),
    /// The frame was dropped (bad CRC, `sequence >= total`, or a `total`
    /// mismatch against an in-progress reassembly for the same id). Never
    /// propagated as an error; the caller just has nothing new to dispatch.
    Dropped,
}

/// Per-peer fragmentation/reassembly state: negotiated payload size and the
/// reassembly table keyed by correlation id.
struct PeerFraming {
    max_payload: usize,
    reassembly: HashMap<CallId, PartialMessage>,
}

impl PeerFraming {
    fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.max(MIN_MAX_PAYLOAD),
            reassembly: HashMap::new(),
        }
    }
}

/// Counters for frame-level hygiene events, surfaced for observability but
/// never turned into a `RuntimeError`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FramingStats {
    pub crc_failures: u64,
    pub protocol_violations: u64,
    pub reassembly_timeouts: u64,
}

/// Owns per-peer framing state. One instance lives inside the Actor
/// System / Event Bridge, accessed only from the single consumer task, so
/// no mutex is needed.
#[derive(Default)]
pub struct Framing {
    peers: HashMap<PeerId, PeerFraming>,
    stats: FramingStats,
}

impl Framing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> FramingStats {
        self.stats
    }

    /// Set (or update) the negotiated payload size for a peer. Called by
    /// the RPC Core on connect/subscribe.
    pub fn negotiate(&mut self, peer: PeerId, max_write_length: usize) {
        let max_payload = max_write_length.max(MIN_MAX_PAYLOAD);
        self.peers
            .entry(peer)
            .and_modify(|p| p.max_payload = max_payload)
            .or_insert_with(|| PeerFraming::new(max_payload));
    }

    /// Release all framing state for a peer (on disconnect).
    pub fn remove(&mut self, peer: &PeerId) {
        self.peers.remove(peer);
    }

    fn max_payload_for(&self, peer: &PeerId) -> usize {
        self.peers
            .get(peer)
            .map(|p| p.max_payload)
            .unwrap_or(MIN_MAX_PAYLOAD)
    }

    /// Fragment `bytes` into an ordered sequence of frames for `peer`,
    /// using its negotiated `max_payload` (falls back to the floor if the
    /// peer was never negotiated, matching `max_payload = max(negotiated,
    /// 27)`). Payloads small enough for one frame produce `total = 1`.
    pub fn fragment(&self, correlation_id: CallId, peer: &PeerId, bytes: &[u8]) -> Vec<Frame> {
        let max_payload = self.max_payload_for(peer);
        let chunk_len = max_payload - FRAME_HEADER_LEN;
        debug_assert!(chunk_len >= 1, "max_payload floor must leave room for a byte");

        let total = if bytes.is_empty() {
            1
        } else {
            bytes.len().div_ceil(chunk_len)
        };
        let total_u16 = u16::try_from(total).expect("fragment count exceeds u16::MAX");

        (0..total)
            .map(|i| {
                let start = i * chunk_len;
                let end = (start + chunk_len).min(bytes.len());
                let payload = bytes[start..end].to_vec();
                Frame::new(correlation_id, i as u16, total_u16, payload)
            })
            .collect()
    }

    /// Feed one received frame's raw bytes (header + payload) for `peer`
    /// into the reassembler.
    pub fn feed(&mut self, peer: PeerId, raw_frame: &[u8]) -> FeedOutcome {
        let frame = match Frame::parse(raw_frame) {
            Some(f) => f,
            None => {
                warn!(?peer, "dropped malformed frame (short or unparsable)");
                self.stats.protocol_violations += 1;
                return FeedOutcome::Dropped;
            }
        };

        if !frame.crc_valid() {
            trace!(?peer, correlation_id = ?frame.header.correlation_id, "dropped frame: crc mismatch");
            self.stats.crc_failures += 1;
            return FeedOutcome::Dropped;
        }

        if frame.header.sequence >= frame.header.total || frame.header.total == 0 {
            warn!(?peer, "dropped frame: sequence >= total (protocol violation)");
            self.stats.protocol_violations += 1;
            return FeedOutcome::Dropped;
        }

        let entry = self
            .peers
            .entry(peer)
            .or_insert_with(|| PeerFraming::new(MIN_MAX_PAYLOAD));

        self.prune_expired(entry);

        let correlation_id = frame.header.correlation_id;
        let total = frame.header.total;

        match entry.reassembly.get(&correlation_id) {
            Some(partial) if partial.total != total => {
                // All frames for one correlation id must share one `total`.
                // A mismatch invalidates the whole message.
                warn!(?peer, ?correlation_id, "dropped correlation id: total mismatch (protocol violation)");
                entry.reassembly.remove(&correlation_id);
                self.stats.protocol_violations += 1;
                return FeedOutcome::Dropped;
            }
            _ => {}
        }

        let partial = entry
            .reassembly
            .entry(correlation_id)
            .or_insert_with(|| PartialMessage::new(total));

        partial.insert(frame.header.sequence, frame.payload);

        if partial.is_complete() {
            let partial = entry.reassembly.remove(&correlation_id).unwrap();
            debug!(?peer, ?correlation_id, total, "reassembled complete envelope");
            FeedOutcome::Complete(partial.concat())
        } else {
            FeedOutcome::Pending
        }
    }

    fn prune_expired(&mut self, entry: &mut PeerFraming) {
        let now = Instant::now();
        let before = entry.reassembly.len();
        entry
            .reassembly
            .retain(|_, partial| now.duration_since(partial.started_at) < REASSEMBLY_TIMEOUT);
        let dropped = before - entry.reassembly.len();
        if dropped > 0 {
            self.stats.reassembly_timeouts += dropped as u64;
        }
    }
}
