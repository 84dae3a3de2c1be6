use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;

use super::*;
use crate::metainfo::InfoHash;

fn addr(last_octet: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet)), port)
}

#[test]
fn node_id_distance_is_symmetric_and_zero_on_self() {
    let a = NodeId::generate();
    let b = NodeId::generate();

    assert_eq!(a.distance(&b), b.distance(&a));
    assert_eq!(a.distance(&a), [0u8; 20]);

    let zero = NodeId([0u8; 20]);
    let ones = NodeId([0xFF; 20]);
    assert_eq!(zero.distance(&ones), [0xFF; 20]);
}

#[test]
fn node_id_bucket_index_is_highest_set_bit() {
    let zero = NodeId([0u8; 20]);

    // Flipped top bit → 159.
    let mut top = [0u8; 20];
    top[0] = 0x80;
    assert_eq!(zero.bucket_index(&NodeId(top)), 159);

    // Flipped bottom bit → 0, as is an equal id.
    let mut bottom = [0u8; 20];
    bottom[19] = 0x01;
    assert_eq!(zero.bucket_index(&NodeId(bottom)), 0);
    assert_eq!(zero.bucket_index(&zero), 0);

    // 0x01 in the first byte → bit 152.
    let mut mid = [0u8; 20];
    mid[0] = 0x01;
    assert_eq!(zero.bucket_index(&NodeId(mid)), 152);
}

#[test]
fn node_compact_roundtrip() {
    let id = NodeId([1u8; 20]);
    let node = Node::new(id, addr(1, 6881));

    let compact = node.to_compact().unwrap();
    assert_eq!(compact.len(), 26);

    let parsed = Node::from_compact(&compact).unwrap();
    assert_eq!(parsed.id, id);
    assert_eq!(parsed.addr, node.addr);

    assert!(Node::from_compact(&compact[..20]).is_none());
}

#[test]
fn routing_insert_semantics() {
    let own = NodeId([0u8; 20]);
    let table = RoutingTable::new(own);

    // Fresh id into a non-full bucket: accepted.
    let mut id = [0u8; 20];
    id[0] = 0x80;
    let node = Node::new(NodeId(id), addr(1, 6881));
    assert_eq!(table.insert(node.clone()), InsertOutcome::Accepted);
    assert_eq!(table.node_count(), 1);

    // Existing id: touched, not duplicated.
    assert_eq!(table.insert(node), InsertOutcome::Accepted);
    assert_eq!(table.node_count(), 1);

    // Our own id is never stored.
    assert_eq!(
        table.insert(Node::new(own, addr(9, 6881))),
        InsertOutcome::Rejected
    );
}

#[test]
fn routing_bucket_caps_at_k() {
    let own = NodeId([0u8; 20]);
    let table = RoutingTable::new(own);

    // All these ids land in bucket 159 (top bit set).
    let mut accepted = 0;
    for i in 0..(K + 4) as u8 {
        let mut id = [0u8; 20];
        id[0] = 0x80;
        id[19] = i;
        if table.insert(Node::new(NodeId(id), addr(i, 6881))) == InsertOutcome::Accepted {
            accepted += 1;
        }
    }

    assert_eq!(accepted, K);
    assert_eq!(table.node_count(), K);
}

#[test]
fn routing_closest_nodes_sorted_by_distance() {
    let own = NodeId([0xFF; 20]);
    let table = RoutingTable::new(own);

    for i in 1..=20u8 {
        let mut id = [0u8; 20];
        id[19] = i;
        table.insert(Node::new(NodeId(id), addr(i, 6881)));
    }

    let target = NodeId([0u8; 20]);
    let closest = table.closest_nodes(&target, 8);
    assert_eq!(closest.len(), 8);

    for pair in closest.windows(2) {
        assert!(pair[0].id.distance(&target) <= pair[1].id.distance(&target));
    }
}

#[test]
fn routing_remove_stale_zero_empties_table() {
    let table = RoutingTable::new(NodeId([0u8; 20]));
    for i in 1..=10u8 {
        let mut id = [0u8; 20];
        id[0] = i;
        table.insert(Node::new(NodeId(id), addr(i, 6881)));
    }
    assert!(table.node_count() > 0);

    table.remove_stale_nodes(Duration::ZERO);
    assert_eq!(table.node_count(), 0);
}

#[test]
fn node_goes_bad_after_repeated_failures() {
    let mut node = Node::new(NodeId::generate(), addr(1, 6881));
    assert!(node.is_good());
    assert!(!node.is_bad());

    node.fail();
    node.fail();
    node.fail();
    assert!(node.is_bad());

    node.touch();
    assert!(node.is_good());
}

#[test]
fn closest_nodes_skips_unresponsive_nodes() {
    let own = NodeId([0xFF; 20]);
    let table = RoutingTable::new(own);

    let quiet = Node::new(NodeId([0x01; 20]), addr(1, 6881));
    let live = Node::new(NodeId([0x02; 20]), addr(2, 6881));
    table.insert(quiet.clone());
    table.insert(live.clone());

    // Two unanswered queries: not yet bad (the bucket keeps it), but no
    // longer offered to lookups.
    table.mark_failed(&quiet.id);
    table.mark_failed(&quiet.id);
    assert_eq!(table.node_count(), 2);

    let closest = table.closest_nodes(&NodeId([0u8; 20]), 8);
    assert_eq!(closest.len(), 1);
    assert_eq!(closest[0].id, live.id);

    // A third failure evicts it entirely.
    table.mark_failed(&quiet.id);
    assert_eq!(table.node_count(), 1);
}

#[test]
fn peer_store_caps_and_dedupes() {
    let store = PeerStore::new();
    let hash = InfoHash::from_bytes([0xAB; 20]);

    for i in 0..(MAX_PEERS_PER_KEY + 20) as u16 {
        store.add_peer(hash, addr((i % 250) as u8, 1000 + i));
    }
    assert!(store.peers_for(&hash).len() <= MAX_PEERS_PER_KEY);

    // Re-announcing the same address doesn't duplicate it.
    let store = PeerStore::new();
    store.add_peer(hash, addr(1, 6881));
    store.add_peer(hash, addr(1, 6881));
    assert_eq!(store.peers_for(&hash).len(), 1);

    // Unknown keys have no peers.
    assert!(store.peers_for(&InfoHash::from_bytes([0u8; 20])).is_empty());
}

#[test]
fn krpc_ping_roundtrip() {
    // encode(query(t=0x0102, ping, id=20·0xAA)) parses back structurally
    // equal.
    let own_id = NodeId([0xAA; 20]);
    let tid = Bytes::from_static(&[0x01, 0x02]);

    let msg = DhtMessage::query(tid.clone(), &own_id, DhtQuery::Ping);
    let encoded = msg.encode();

    let parsed = DhtMessage::parse(&encoded).unwrap();
    assert_eq!(parsed.transaction_id, tid);
    assert_eq!(parsed.sender_id, Some(own_id));
    assert!(matches!(parsed.query, Some(DhtQuery::Ping)));
    assert!(parsed.response.is_none());
}

#[test]
fn krpc_find_node_roundtrip() {
    let own_id = NodeId::generate();
    let target = NodeId::generate();
    let tid = Bytes::from_static(b"bb");

    let msg = DhtMessage::query(tid.clone(), &own_id, DhtQuery::FindNode { target });
    let parsed = DhtMessage::parse(&msg.encode()).unwrap();

    match parsed.query {
        Some(DhtQuery::FindNode { target: t }) => assert_eq!(t, target),
        other => panic!("expected find_node, got {:?}", other),
    }
}

#[test]
fn krpc_get_peers_response_with_values() {
    let id = NodeId::generate();
    let peers = vec![addr(7, 6881), addr(8, 51413)];

    let msg = DhtMessage::response(
        Bytes::from_static(b"tt"),
        DhtResponse::GetPeers {
            id,
            token: Bytes::from_static(b"tok"),
            peers: Some(peers.clone()),
            nodes: None,
        },
    );

    let parsed = DhtMessage::parse(&msg.encode()).unwrap();
    match parsed.response {
        Some(DhtResponse::GetPeers {
            token,
            peers: Some(parsed_peers),
            ..
        }) => {
            assert_eq!(token, Bytes::from_static(b"tok"));
            assert_eq!(parsed_peers, peers);
        }
        other => panic!("expected get_peers response, got {:?}", other),
    }
}

#[test]
fn krpc_find_node_response_carries_compact_nodes() {
    let id = NodeId::generate();
    let nodes = vec![
        Node::new(NodeId([1u8; 20]), addr(1, 6881)),
        Node::new(NodeId([2u8; 20]), addr(2, 6882)),
    ];

    let msg = DhtMessage::response(
        Bytes::from_static(b"nn"),
        DhtResponse::FindNode {
            id,
            nodes: nodes.clone(),
        },
    );

    let parsed = DhtMessage::parse(&msg.encode()).unwrap();
    match parsed.response {
        Some(DhtResponse::FindNode {
            nodes: parsed_nodes,
            ..
        }) => {
            assert_eq!(parsed_nodes.len(), 2);
            assert_eq!(parsed_nodes[0].id, nodes[0].id);
            assert_eq!(parsed_nodes[1].addr, nodes[1].addr);
        }
        other => panic!("expected find_node response, got {:?}", other),
    }
}

#[test]
fn krpc_error_roundtrip() {
    let msg = DhtMessage::response(
        Bytes::from_static(b"ee"),
        DhtResponse::Error {
            code: 203,
            message: "Invalid token".to_string(),
        },
    );

    let parsed = DhtMessage::parse(&msg.encode()).unwrap();
    match parsed.response {
        Some(DhtResponse::Error { code, message }) => {
            assert_eq!(code, 203);
            assert_eq!(message, "Invalid token");
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[test]
fn krpc_rejects_garbage() {
    assert!(DhtMessage::parse(b"not bencode").is_err());
    // A dict with no transaction id.
    assert!(DhtMessage::parse(b"d1:y1:qe").is_err());
}

#[tokio::test]
async fn two_nodes_ping_each_other() {
    let config = |port| crate::config::DhtConfig {
        port,
        bootstrap_nodes: vec![],
        query_timeout: Duration::from_secs(2),
    };

    let a = DhtNode::bind(config(0)).await.unwrap();
    let b = DhtNode::bind(config(0)).await.unwrap();
    a.start();
    b.start();

    let b_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), b.port());
    let response = a.query(b_addr, DhtQuery::Ping).await.unwrap();

    match response {
        DhtResponse::Ping { id } => assert_eq!(&id, b.own_id()),
        other => panic!("expected ping response, got {:?}", other),
    }

    // B learned about A from the inbound query.
    assert_eq!(b.routing_table().node_count(), 1);

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn announce_and_get_peers_between_nodes() {
    let config = |port| crate::config::DhtConfig {
        port,
        bootstrap_nodes: vec![],
        query_timeout: Duration::from_secs(2),
    };

    let a = DhtNode::bind(config(0)).await.unwrap();
    let b = DhtNode::bind(config(0)).await.unwrap();
    a.start();
    b.start();

    let b_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), b.port());
    let info_hash = [0x42u8; 20];

    // First get_peers: no values yet, but a token we can announce with.
    let token = match a
        .query(b_addr, DhtQuery::GetPeers { info_hash })
        .await
        .unwrap()
    {
        DhtResponse::GetPeers { token, peers, .. } => {
            assert!(peers.is_none());
            token
        }
        other => panic!("expected get_peers response, got {:?}", other),
    };

    // Announce with the token and an explicit port.
    let response = a
        .query(
            b_addr,
            DhtQuery::AnnouncePeer {
                info_hash,
                port: 7000,
                token,
                implied_port: false,
            },
        )
        .await
        .unwrap();
    // An announce reply carries only the id, which parses as a ping-shaped
    // response.
    assert!(matches!(
        response,
        DhtResponse::Ping { .. } | DhtResponse::AnnouncePeer { .. }
    ));

    // Now get_peers returns the stored peer.
    match a
        .query(b_addr, DhtQuery::GetPeers { info_hash })
        .await
        .unwrap()
    {
        DhtResponse::GetPeers {
            peers: Some(peers), ..
        } => {
            assert_eq!(peers.len(), 1);
            assert_eq!(peers[0].port(), 7000);
        }
        other => panic!("expected stored peers, got {:?}", other),
    }

    // A bogus token is refused.
    let bad = a
        .query(
            b_addr,
            DhtQuery::AnnouncePeer {
                info_hash,
                port: 7001,
                token: Bytes::from_static(b"bogus"),
                implied_port: false,
            },
        )
        .await;
    assert!(matches!(bad, Err(DhtError::Remote { code: 203, .. })));
}
