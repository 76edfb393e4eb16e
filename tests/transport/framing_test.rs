// Framing Layer Tests
// Black-box coverage of the public `framing` API. Single-peer fragment/
// reassemble round trips and CRC tampering are already covered in-module;
// these focus on cross-peer isolation and renegotiation, which only show
// up once more than one peer or one negotiation is in play.

use bleu::framing::{FeedOutcome, Frame, Framing, MIN_MAX_PAYLOAD};
use bleu::{CallId, PeerId};

// ============================================================================
// CROSS-PEER ISOLATION
// ============================================================================

#[test]
fn test_two_peers_with_different_payload_sizes_fragment_independently() {
    let mut framing = Framing::new();
    let a = PeerId::generate();
    let b = PeerId::generate();
    framing.negotiate(a, 27);
    framing.negotiate(b, 512);

    let bytes: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
    let a_frames = framing.fragment(CallId::generate(), &a, &bytes);
    let b_frames = framing.fragment(CallId::generate(), &b, &bytes);

    assert!(a_frames.len() > b_frames.len(), "the smaller MTU peer must split into more frames");
}

#[test]
fn test_reusing_the_same_correlation_id_across_peers_does_not_cross_contaminate() {
    let mut framing = Framing::new();
    let a = PeerId::generate();
    let b = PeerId::generate();
    framing.negotiate(a, 27);
    framing.negotiate(b, 27);

    let correlation_id = CallId::generate();
    let a_bytes = b"from peer a".to_vec();
    let b_bytes = b"from peer b, a different length".to_vec();

    let a_frames = framing.fragment(correlation_id, &a, &a_bytes);
    let b_frames = framing.fragment(correlation_id, &b, &b_bytes);

    let mut a_result = None;
    let mut b_result = None;
    for frame in &a_frames {
        if let FeedOutcome::Complete(out) = framing.feed(a, &frame.to_bytes()) {
            a_result = Some(out);
        }
    }
    for frame in &b_frames {
        if let FeedOutcome::Complete(out) = framing.feed(b, &frame.to_bytes()) {
            b_result = Some(out);
        }
    }

    assert_eq!(a_result.unwrap(), a_bytes);
    assert_eq!(b_result.unwrap(), b_bytes);
}

#[test]
fn test_removing_a_peer_drops_its_in_progress_reassembly() {
    let mut framing = Framing::new();
    let peer = PeerId::generate();
    framing.negotiate(peer, 27);

    let bytes: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
    let frames = framing.fragment(CallId::generate(), &peer, &bytes);
    assert!(frames.len() > 1);

    // Feed every frame but the last, then drop the peer entirely.
    for frame in &frames[..frames.len() - 1] {
        assert_eq!(framing.feed(peer, &frame.to_bytes()), FeedOutcome::Pending);
    }
    framing.remove(&peer);

    // The stray final frame now starts a brand new (incomplete) partial
    // message rather than completing the one that was dropped.
    assert_eq!(framing.feed(peer, &frames[frames.len() - 1].to_bytes()), FeedOutcome::Pending);
}

// ============================================================================
// RENEGOTIATION
// ============================================================================

#[test]
fn test_renegotiating_mid_session_affects_only_subsequent_fragmentation() {
    let mut framing = Framing::new();
    let peer = PeerId::generate();
    framing.negotiate(peer, 512);

    let bytes: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
    let wide_frames = framing.fragment(CallId::generate(), &peer, &bytes);
    assert_eq!(wide_frames.len(), 1);

    framing.negotiate(peer, MIN_MAX_PAYLOAD);
    let narrow_frames = framing.fragment(CallId::generate(), &peer, &bytes);
    assert!(narrow_frames.len() > 1);
}

// ============================================================================
// STATS ACCUMULATE ACROSS PEERS
// ============================================================================

#[test]
fn test_crc_failures_accumulate_across_distinct_peers() {
    let mut framing = Framing::new();
    let a = PeerId::generate();
    let b = PeerId::generate();
    framing.negotiate(a, 64);
    framing.negotiate(b, 64);

    for peer in [a, b] {
        let frame = Frame::new(CallId::generate(), 0, 1, vec![1, 2, 3]);
        let mut tampered = frame.to_bytes();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert_eq!(framing.feed(peer, &tampered), FeedOutcome::Dropped);
    }

    assert_eq!(framing.stats().crc_failures, 2);
}

// ============================================================================
// EMPTY PAYLOAD EDGE CASE
// ============================================================================

#[test]
fn test_zero_length_payload_fragments_into_exactly_one_empty_frame() {
    let mut framing = Framing::new();
    let peer = PeerId::generate();
    framing.negotiate(peer, MIN_MAX_PAYLOAD);

    let frames = framing.fragment(CallId::generate(), &peer, &[]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.total, 1);

    match framing.feed(peer, &frames[0].to_bytes()) {
        FeedOutcome::Complete(bytes) => assert!(bytes.is_empty()),
        other => panic!("expected completion, got {other:?}"),
    }
}
