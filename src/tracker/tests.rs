use std::net::{IpAddr, Ipv4Addr};

use tokio::net::UdpSocket;

use super::*;

#[test]
fn event_wire_codes() {
    assert_eq!(TrackerEvent::None.as_udp_id(), 0);
    assert_eq!(TrackerEvent::Completed.as_udp_id(), 1);
    assert_eq!(TrackerEvent::Started.as_udp_id(), 2);
    assert_eq!(TrackerEvent::Stopped.as_udp_id(), 3);
}

#[test]
fn compact_peers_parse() {
    let data = [192, 168, 1, 2, 0x1A, 0xE1, 10, 0, 0, 1, 0x23, 0x28];
    let peers = parse_compact_peers(&data);

    assert_eq!(peers.len(), 2);
    assert_eq!(peers[0].ip(), IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)));
    assert_eq!(peers[0].port(), 6881);
    assert_eq!(peers[1].port(), 9000);

    // A trailing partial entry is dropped.
    assert_eq!(parse_compact_peers(&data[..10]).len(), 1);
    assert!(parse_compact_peers(&[]).is_empty());
}

#[tokio::test]
async fn rejects_non_udp_urls() {
    let err = UdpTracker::connect("http://tracker.example.com/announce").await;
    assert!(matches!(err, Err(TrackerError::UnsupportedProtocol(_))));
}

// A minimal in-process tracker speaking just enough BEP-15 for one
// connect + announce exchange.
async fn run_mock_tracker(socket: UdpSocket, peers: Vec<u8>) {
    let mut buf = vec![0u8; 2048];

    // Step 1: connect.
    let (n, from) = socket.recv_from(&mut buf).await.unwrap();
    assert!(n >= 16);
    assert_eq!(&buf[0..8], &0x41727101980u64.to_be_bytes());
    assert_eq!(&buf[8..12], &0u32.to_be_bytes());
    let txid = buf[12..16].to_vec();

    let mut reply = Vec::new();
    reply.extend_from_slice(&0u32.to_be_bytes());
    reply.extend_from_slice(&txid);
    reply.extend_from_slice(&0xDEADBEEFu64.to_be_bytes());
    socket.send_to(&reply, from).await.unwrap();

    // Step 2: announce.
    let (n, from) = socket.recv_from(&mut buf).await.unwrap();
    assert_eq!(n, 98);
    assert_eq!(&buf[0..8], &0xDEADBEEFu64.to_be_bytes());
    assert_eq!(&buf[8..12], &1u32.to_be_bytes());
    let txid = buf[12..16].to_vec();
    // info_hash and peer_id echo what the client sent.
    assert_eq!(&buf[16..36], &[0xAB; 20]);
    assert_eq!(&buf[36..56], &[0xCD; 20]);
    // event = started.
    assert_eq!(&buf[80..84], &2u32.to_be_bytes());

    let mut reply = Vec::new();
    reply.extend_from_slice(&1u32.to_be_bytes());
    reply.extend_from_slice(&txid);
    reply.extend_from_slice(&1800u32.to_be_bytes()); // interval
    reply.extend_from_slice(&3u32.to_be_bytes()); // leechers
    reply.extend_from_slice(&7u32.to_be_bytes()); // seeders
    reply.extend_from_slice(&peers);
    socket.send_to(&reply, from).await.unwrap();
}

#[tokio::test]
async fn connect_and_announce_against_mock_tracker() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    let peer_bytes = vec![10, 1, 2, 3, 0x1A, 0xE1, 10, 1, 2, 4, 0x1A, 0xE2];
    let mock = tokio::spawn(run_mock_tracker(server, peer_bytes));

    let tracker = UdpTracker::connect(&format!("udp://127.0.0.1:{}", port))
        .await
        .unwrap();

    let response = tracker
        .announce(&AnnounceRequest {
            info_hash: [0xAB; 20],
            peer_id: [0xCD; 20],
            downloaded: 0,
            left: 1000,
            uploaded: 0,
            event: TrackerEvent::Started,
            port: 6881,
            num_want: -1,
        })
        .await
        .unwrap();

    assert_eq!(response.interval, 1800);
    assert_eq!(response.leechers, Some(3));
    assert_eq!(response.seeders, Some(7));
    assert_eq!(response.peers.len(), 2);
    assert_eq!(response.peers[0].port(), 6881);
    assert_eq!(response.peers[1].port(), 6882);

    mock.await.unwrap();
}

#[tokio::test]
async fn announce_surfaces_tracker_error_message() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    let mock = tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];

        let (_, from) = server.recv_from(&mut buf).await.unwrap();
        let txid = buf[12..16].to_vec();
        let mut reply = Vec::new();
        reply.extend_from_slice(&0u32.to_be_bytes());
        reply.extend_from_slice(&txid);
        reply.extend_from_slice(&1u64.to_be_bytes());
        server.send_to(&reply, from).await.unwrap();

        let (_, from) = server.recv_from(&mut buf).await.unwrap();
        let txid = buf[12..16].to_vec();
        let mut reply = Vec::new();
        reply.extend_from_slice(&3u32.to_be_bytes()); // error action
        reply.extend_from_slice(&txid);
        reply.extend_from_slice(b"torrent not registered");
        server.send_to(&reply, from).await.unwrap();
    });

    let tracker = UdpTracker::connect(&format!("udp://127.0.0.1:{}", port))
        .await
        .unwrap();

    let result = tracker
        .announce(&AnnounceRequest {
            info_hash: [0u8; 20],
            peer_id: [0u8; 20],
            downloaded: 0,
            left: 0,
            uploaded: 0,
            event: TrackerEvent::None,
            port: 6881,
            num_want: -1,
        })
        .await;

    match result {
        Err(TrackerError::Failure(message)) => {
            assert_eq!(message, "torrent not registered");
        }
        other => panic!("expected tracker failure, got {:?}", other),
    }

    mock.await.unwrap();
}
