use std::time::{Duration, Instant};

use bytes::Bytes;
use sha1::{Digest, Sha1};

use super::*;
use crate::bencode::{encode, Value};
use crate::metainfo::InfoHash;

#[test]
fn peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1.0, id2.0);
    assert!(id1.client_id().is_some());
}

#[test]
fn bitfield_set_clear_count() {
    let mut bf = Bitfield::new(100);
    assert!(!bf.has(0));

    bf.set(0);
    assert!(bf.has(0));

    bf.set(99);
    assert!(bf.has(99));

    bf.clear(0);
    assert!(!bf.has(0));

    assert_eq!(bf.count(), 1);
}

#[test]
fn bitfield_out_of_range_is_silent() {
    let mut bf = Bitfield::new(10);
    let before = bf.to_bytes();

    assert!(!bf.has(10));
    assert!(!bf.has(1000));
    bf.set(10);
    bf.clear(1000);
    assert_eq!(bf.to_bytes(), before);
}

#[test]
fn bitfield_wire_roundtrip() {
    let mut bf = Bitfield::new(11);
    bf.set(0);
    bf.set(7);
    bf.set(10);

    let restored = Bitfield::from_bytes(&bf.to_bytes(), 11);
    assert_eq!(restored, bf);

    // Bit 0 lives in the high bit of byte 0.
    assert_eq!(bf.as_bytes()[0], 0b1000_0001);
}

#[test]
fn bitfield_from_bytes_masks_spare_bits() {
    // 10 pieces leave 6 spare bits in the second byte.
    let bf = Bitfield::from_bytes(&[0xFF, 0xFF], 10);
    assert_eq!(bf.count(), 10);
    assert!(!bf.has(10));
}

#[test]
fn handshake_roundtrip_and_extension_bit() {
    let info_hash = [1u8; 20];
    let peer_id = [2u8; 20];

    let handshake = Handshake::new(info_hash, peer_id);
    let encoded = handshake.encode();
    assert_eq!(encoded.len(), HANDSHAKE_LEN);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, info_hash);
    assert_eq!(decoded.peer_id, peer_id);
    assert!(decoded.supports_extension_protocol());
    assert_ne!(decoded.reserved[5] & 0x10, 0);
}

#[test]
fn handshake_rejects_wrong_protocol() {
    let mut data = Handshake::new([0; 20], [0; 20]).encode().to_vec();
    data[1] = b'X';
    assert!(Handshake::decode(&data).is_err());
}

#[test]
fn message_roundtrip_all_kinds() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0xA0, 0x01])),
        Message::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        },
        Message::Piece {
            index: 3,
            begin: 0,
            data: Bytes::from_static(b"hello world"),
        },
        Message::Cancel {
            index: 1,
            begin: 0,
            length: 16384,
        },
        Message::Port(6881),
        Message::Extended {
            id: 1,
            payload: Bytes::from_static(b"d8:msg_typei0e5:piecei0ee"),
        },
    ];

    for msg in messages {
        let decoded = Message::decode(msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }
}

#[test]
fn message_request_is_17_bytes() {
    let request = Message::Request {
        index: 0,
        begin: 0,
        length: 16384,
    };
    assert_eq!(request.encode().len(), 17);
}

#[test]
fn message_unknown_id_is_error() {
    // length 1, id 13 (fast-extension Suggest, which we don't speak)
    let frame = Bytes::from_static(&[0, 0, 0, 1, 13]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::InvalidMessageId(13))
    ));
}

#[test]
fn wire_decoder_streams_partial_input() {
    let mut decoder = WireDecoder::new();

    let handshake = Handshake::new([7u8; 20], [9u8; 20]).encode();
    let have = Message::Have { piece: 5 }.encode();

    // Nothing decodes until the full handshake is in.
    decoder.feed(&handshake[..40]);
    assert!(decoder.next().unwrap().is_none());

    decoder.feed(&handshake[40..]);
    match decoder.next().unwrap() {
        Some(WireEvent::Handshake(hs)) => assert_eq!(hs.info_hash, [7u8; 20]),
        other => panic!("expected handshake, got {:?}", other),
    }

    // Frames wait for their full length too.
    decoder.feed(&have[..3]);
    assert!(decoder.next().unwrap().is_none());
    decoder.feed(&have[3..]);
    match decoder.next().unwrap() {
        Some(WireEvent::Message(Message::Have { piece })) => assert_eq!(piece, 5),
        other => panic!("expected have, got {:?}", other),
    }

    // Two messages in one arrival decode back to back.
    decoder.feed(&Message::Choke.encode());
    decoder.feed(&Message::Unchoke.encode());
    assert!(matches!(
        decoder.next().unwrap(),
        Some(WireEvent::Message(Message::Choke))
    ));
    assert!(matches!(
        decoder.next().unwrap(),
        Some(WireEvent::Message(Message::Unchoke))
    ));
    assert!(decoder.next().unwrap().is_none());
}

#[test]
fn picker_rarest_first() {
    // Peers: A has {0,1,2}, B has {0,1}, C has {0}.
    let mut picker = PiecePicker::new(3);
    let mut a = Bitfield::new(3);
    a.set(0);
    a.set(1);
    a.set(2);
    let mut b = Bitfield::new(3);
    b.set(0);
    b.set(1);
    let mut c = Bitfield::new(3);
    c.set(0);

    picker.add_peer_bitfield(&a);
    picker.add_peer_bitfield(&b);
    picker.add_peer_bitfield(&c);

    let mut mine = Bitfield::new(3);
    // Piece 2 is rarest (only A has it).
    assert_eq!(picker.pick(&mine, &a), Some(2));

    mine.set(2);
    assert_eq!(picker.pick(&mine, &a), Some(1));

    mine.set(1);
    mine.set(0);
    assert_eq!(picker.pick(&mine, &a), None);
}

#[test]
fn picker_never_offers_held_or_unavailable_pieces() {
    let mut picker = PiecePicker::new(4);
    let mut peer = Bitfield::new(4);
    peer.set(1);
    picker.add_peer_bitfield(&peer);

    let mut mine = Bitfield::new(4);
    mine.set(1);
    // We hold the only piece the peer has.
    assert_eq!(picker.pick(&mine, &peer), None);
}

#[test]
fn picker_tie_breaks_to_smallest_index() {
    let mut picker = PiecePicker::new(3);
    let full = Bitfield::full(3);
    picker.add_peer_bitfield(&full);

    let mine = Bitfield::new(3);
    assert_eq!(picker.pick(&mine, &full), Some(0));

    let order = picker.pick_multiple(&mine, &full, 3);
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn picker_removal_saturates() {
    let mut picker = PiecePicker::new(2);
    let full = Bitfield::full(2);
    picker.remove_peer_bitfield(&full);
    assert_eq!(picker.availability(0), 0);
    assert_eq!(picker.availability(1), 0);
}

#[test]
fn assembler_verifies_correct_piece() {
    // One 32 KiB piece of 0xAB, delivered as two 16 KiB blocks.
    let content = vec![0xABu8; 32768];
    let mut hasher = Sha1::new();
    hasher.update(&content);
    let hash: [u8; 20] = hasher.finalize().into();

    let mut assembler = PieceAssembler::new(32768, 32768, vec![hash]);
    assembler.start_piece(0);
    assembler.add_block(0, 0, &content[..16384]);
    assert!(!assembler.is_ready(0));
    assembler.add_block(0, 16384, &content[16384..]);
    assert!(assembler.is_ready(0));

    match assembler.complete_piece(0) {
        VerifyOutcome::Verified(data) => assert_eq!(data.as_ref(), &content[..]),
        VerifyOutcome::Corrupt => panic!("expected verified"),
    }
    assert!(assembler.has_piece(0));
    assert!(assembler.is_complete());
    assert!((assembler.progress() - 1.0).abs() < f64::EPSILON);
}

#[test]
fn assembler_rejects_corrupt_piece() {
    let content = vec![0xABu8; 32768];
    let mut hasher = Sha1::new();
    hasher.update(&content);
    let hash: [u8; 20] = hasher.finalize().into();

    let mut corrupted = content.clone();
    corrupted[100] ^= 0xFF;

    let mut assembler = PieceAssembler::new(32768, 32768, vec![hash]);
    assembler.add_block(0, 0, &corrupted[..16384]);
    assembler.add_block(0, 16384, &corrupted[16384..]);

    assert!(matches!(
        assembler.complete_piece(0),
        VerifyOutcome::Corrupt
    ));
    assert!(!assembler.has_piece(0));
    // The buffer is gone and the piece can be restarted.
    assert!(!assembler.in_progress(0));
    assembler.start_piece(0);
    assert!(assembler.in_progress(0));
}

#[test]
fn assembler_zero_pads_out_of_order_blocks() {
    let mut content = vec![0u8; 100];
    content[50..].fill(7);
    let mut hasher = Sha1::new();
    hasher.update(&content);
    let hash: [u8; 20] = hasher.finalize().into();

    let mut assembler = PieceAssembler::new(100, 100, vec![hash]);
    // The tail arrives first; the gap is zero-filled, which happens to be
    // the right content here.
    assembler.add_block(0, 50, &content[50..]);
    assert!(assembler.is_ready(0));
    assert!(assembler.has_block(0, 50));
    assert!(!assembler.has_block(0, 0));

    assert!(matches!(
        assembler.complete_piece(0),
        VerifyOutcome::Verified(_)
    ));
}

#[test]
fn assembler_last_piece_is_short() {
    let assembler = PieceAssembler::new(16384, 40000, vec![[0u8; 20]; 3]);
    assert_eq!(assembler.expected_piece_size(0), 16384);
    assert_eq!(assembler.expected_piece_size(1), 16384);
    assert_eq!(assembler.expected_piece_size(2), 40000 - 2 * 16384);
}

#[test]
fn peer_state_starts_choked_and_uninterested() {
    let state = PeerState::new(10);
    assert!(state.am_choking);
    assert!(!state.am_interested);
    assert!(state.peer_choking);
    assert!(!state.peer_interested);
    assert!(!state.can_request());
}

#[test]
fn peer_state_pipeline_cap() {
    let mut state = PeerState::new(100);
    state.peer_choking = false;
    let now = Instant::now();

    for i in 0..MAX_PIPELINE_DEPTH {
        assert!(state.add_request(BlockRequest::new(0, i as u32 * 16384, 16384), now));
    }
    assert_eq!(state.pending_count(), MAX_PIPELINE_DEPTH);
    assert!(!state.can_request());
    assert!(!state.add_request(BlockRequest::new(1, 0, 16384), now));

    // Completing one frees a slot.
    assert!(state.complete_request(&BlockRequest::new(0, 0, 16384)));
    assert!(state.can_request());
}

#[test]
fn peer_state_duplicate_request_refused() {
    let mut state = PeerState::new(10);
    state.peer_choking = false;
    let now = Instant::now();
    let req = BlockRequest::new(0, 0, 16384);

    assert!(state.add_request(req, now));
    assert!(!state.add_request(req, now));
    assert_eq!(state.pending_count(), 1);
}

#[test]
fn peer_state_choke_voids_pending() {
    let mut state = PeerState::new(10);
    state.peer_choking = false;
    state.add_request(BlockRequest::new(0, 0, 16384), Instant::now());
    state.add_request(BlockRequest::new(0, 16384, 16384), Instant::now());

    state.peer_choking = true;
    let voided = state.clear_pending();
    assert_eq!(voided.len(), 2);
    assert_eq!(state.pending_count(), 0);
}

#[test]
fn peer_state_timeouts_are_a_subset_of_pending() {
    let mut state = PeerState::new(10);
    state.peer_choking = false;

    let old = Instant::now() - Duration::from_secs(60);
    let fresh = Instant::now();
    state.add_request(BlockRequest::new(0, 0, 16384), old);
    state.add_request(BlockRequest::new(0, 16384, 16384), fresh);

    // Everything is a timeout at timeout zero.
    assert_eq!(
        state.timed_out_requests(Instant::now(), Duration::ZERO).len(),
        2
    );

    let expired = state.take_timed_out(Instant::now(), REQUEST_TIMEOUT);
    assert_eq!(expired, vec![BlockRequest::new(0, 0, 16384)]);
    assert_eq!(state.pending_count(), 1);
}

#[test]
fn extension_handshake_roundtrip() {
    let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 1)]);
    hs.client = Some("torrin/0.1".to_string());
    hs.metadata_size = Some(12345);

    let decoded = ExtensionHandshake::decode(&hs.encode()).unwrap();
    assert_eq!(decoded.extension_id("ut_metadata"), Some(1));
    assert_eq!(decoded.client.as_deref(), Some("torrin/0.1"));
    assert_eq!(decoded.metadata_size, Some(12345));
}

#[test]
fn metadata_message_roundtrip() {
    let data = Bytes::from(vec![1, 2, 3, 4, 5]);
    let msg = MetadataMessage::data(2, 1000, data.clone());
    let decoded = MetadataMessage::decode(&msg.encode()).unwrap();

    assert_eq!(decoded.msg_type, MetadataMessageType::Data);
    assert_eq!(decoded.piece, 2);
    assert_eq!(decoded.total_size, Some(1000));
    assert_eq!(decoded.data, Some(data));

    let req = MetadataMessage::decode(&MetadataMessage::request(5).encode()).unwrap();
    assert_eq!(req.msg_type, MetadataMessageType::Request);
    assert_eq!(req.piece, 5);
    assert!(req.data.is_none());
}

#[test]
fn metadata_piece_math() {
    assert_eq!(metadata_piece_count(0), 0);
    assert_eq!(metadata_piece_count(1), 1);
    assert_eq!(metadata_piece_count(16384), 1);
    assert_eq!(metadata_piece_count(16385), 2);
    assert_eq!(metadata_piece_size(0, 20000), 16384);
    assert_eq!(metadata_piece_size(1, 20000), 20000 - 16384);
    assert_eq!(metadata_piece_size(2, 20000), 0);
}

// Build raw info-dict bytes and their hash for metadata-exchange tests.
fn sample_metadata() -> (Vec<u8>, InfoHash) {
    let info = Value::Dict(vec![
        ("length".into(), Value::Integer(4000)),
        ("name".into(), Value::string("meta-test")),
        ("piece length".into(), Value::Integer(16384)),
        (
            "pieces".into(),
            Value::Bytes(Bytes::copy_from_slice(&[0x11; 20])),
        ),
    ]);
    let raw = encode(&info);
    let hash = InfoHash::from_info_bytes(&raw);
    (raw, hash)
}

#[test]
fn metadata_exchange_requests_then_completes() {
    let (raw, hash) = sample_metadata();
    let mut exchange = MetadataExchange::new(hash);

    // Peer's extended handshake: ut_metadata on id 2, with the size.
    let peer_hs = {
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 2)]);
        hs.metadata_size = Some(raw.len() as i64);
        hs.encode()
    };

    let batch = match exchange.handle_extended(0, &peer_hs).unwrap() {
        MetadataEvent::Send(batch) => batch,
        other => panic!("expected request batch, got {:?}", other),
    };
    assert_eq!(batch.len(), metadata_piece_count(raw.len()));
    for message in &batch {
        match message {
            Message::Extended { id, payload } => {
                assert_eq!(*id, 2);
                let req = MetadataMessage::decode(payload).unwrap();
                assert_eq!(req.msg_type, MetadataMessageType::Request);
            }
            other => panic!("expected extended, got {:?}", other),
        }
    }

    // Peer's data reply on our local id.
    let reply = MetadataMessage::data(0, raw.len() as u32, Bytes::copy_from_slice(&raw)).encode();
    match exchange.handle_extended(LOCAL_METADATA_ID, &reply).unwrap() {
        MetadataEvent::Complete(info) => {
            assert_eq!(info.name, "meta-test");
            assert_eq!(info.total_size, 4000);
            assert_eq!(info.info_hash, hash);
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[test]
fn metadata_exchange_rejects_bad_hash() {
    let (raw, _) = sample_metadata();
    // Wrong target hash: assembled bytes must be thrown away.
    let mut exchange = MetadataExchange::new(InfoHash::from_bytes([0xEE; 20]));

    let peer_hs = {
        let mut hs = ExtensionHandshake::with_extensions(&[("ut_metadata", 3)]);
        hs.metadata_size = Some(raw.len() as i64);
        hs.encode()
    };
    exchange.handle_extended(0, &peer_hs).unwrap();

    let reply = MetadataMessage::data(0, raw.len() as u32, Bytes::copy_from_slice(&raw)).encode();
    match exchange.handle_extended(LOCAL_METADATA_ID, &reply).unwrap() {
        MetadataEvent::None => {}
        other => panic!("expected none after hash mismatch, got {:?}", other),
    }
}

#[test]
fn metadata_exchange_routes_peer_requests() {
    let (_, hash) = sample_metadata();
    let mut exchange = MetadataExchange::new(hash);

    let request = MetadataMessage::request(0).encode();
    match exchange.handle_extended(LOCAL_METADATA_ID, &request).unwrap() {
        MetadataEvent::PeerRequest(piece) => assert_eq!(piece, 0),
        other => panic!("expected peer request, got {:?}", other),
    }
}
