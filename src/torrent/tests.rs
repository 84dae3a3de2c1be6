use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;

use super::*;
use crate::bencode::{encode, Value};
use crate::config::TorrentConfig;
use crate::metainfo::{InfoHash, MagnetLink, TorrentInfo};
use crate::peer::Bitfield;
use crate::storage::{MemoryStore, PieceStore};

#[test]
fn resume_data_roundtrip() {
    let mut completed = Bitfield::new(10);
    completed.set(0);
    completed.set(3);
    completed.set(9);

    let resume = ResumeData {
        info_hash: InfoHash::from_bytes([0x5A; 20]),
        completed_pieces: completed.to_bytes(),
        uploaded: 4096,
        downloaded: 123456,
        save_path: "/downloads/stuff".to_string(),
    };

    let parsed = ResumeData::from_bytes(&resume.to_bytes()).unwrap();
    assert_eq!(parsed, resume);

    let restored = parsed.completed_bitfield(10);
    assert!(restored.has(0));
    assert!(restored.has(3));
    assert!(restored.has(9));
    assert_eq!(restored.count(), 3);
}

#[test]
fn resume_data_rejects_garbage() {
    assert!(ResumeData::from_bytes(b"not bencode").is_err());
    assert!(matches!(
        ResumeData::from_bytes(b"d8:uploadedi5ee"),
        Err(TorrentError::InvalidResumeData(_))
    ));
}

// Two single-block pieces: 16384 bytes and a short tail.
const PIECE_LEN: usize = 16384;
const TOTAL_LEN: usize = 20000;

fn test_content() -> Vec<u8> {
    (0..TOTAL_LEN).map(|i| (i % 251) as u8).collect()
}

fn test_torrent_info() -> TorrentInfo {
    use sha1::{Digest, Sha1};

    let content = test_content();
    let mut pieces = Vec::new();
    for chunk in content.chunks(PIECE_LEN) {
        let mut hasher = Sha1::new();
        hasher.update(chunk);
        let digest: [u8; 20] = hasher.finalize().into();
        pieces.extend_from_slice(&digest);
    }

    let info = Value::Dict(vec![
        ("length".into(), Value::Integer(TOTAL_LEN as i64)),
        ("name".into(), Value::string("exchange-test")),
        ("piece length".into(), Value::Integer(PIECE_LEN as i64)),
        ("pieces".into(), Value::Bytes(Bytes::from(pieces))),
    ]);
    let data = encode(&Value::Dict(vec![("info".into(), info)]));
    TorrentInfo::from_bytes(&data).unwrap()
}

fn fast_config() -> TorrentConfig {
    TorrentConfig {
        choke_interval: Duration::from_millis(300),
        optimistic_interval: Duration::from_millis(900),
        ..TorrentConfig::default()
    }
}

// A torrent that already has every piece, backed by a pre-filled store.
async fn make_seeder(info: &TorrentInfo) -> Arc<Torrent> {
    let content = test_content();
    let store = Arc::new(MemoryStore::new());
    for (index, chunk) in content.chunks(PIECE_LEN).enumerate() {
        store
            .write_piece(index as u32, Bytes::copy_from_slice(chunk))
            .await
            .unwrap();
    }

    let resume = ResumeData {
        info_hash: info.info_hash,
        completed_pieces: Bitfield::full(info.piece_count()).to_bytes(),
        uploaded: 0,
        downloaded: TOTAL_LEN as u64,
        save_path: String::new(),
    };

    Torrent::from_metainfo_with_resume(info.clone(), store, fast_config(), &resume)
}

#[tokio::test]
async fn leecher_downloads_from_seeder_over_loopback() {
    let info = test_torrent_info();
    let seeder = make_seeder(&info).await;
    assert_eq!(seeder.status().state, TorrentState::Seeding);

    let leecher_store = Arc::new(MemoryStore::new());
    let leecher = Torrent::from_metainfo(info.clone(), leecher_store.clone(), fast_config());
    assert_eq!(leecher.status().state, TorrentState::Downloading);

    // Wire them together over real TCP.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let seed_addr = listener.local_addr().unwrap();
    {
        let seeder = seeder.clone();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                seeder.add_incoming(stream);
            }
        });
    }
    leecher.add_peer(seed_addr);

    leecher
        .wait_for_completion(Duration::from_secs(30))
        .await
        .unwrap();

    let content = test_content();
    assert_eq!(
        leecher_store.piece(0).unwrap().as_ref(),
        &content[..PIECE_LEN]
    );
    assert_eq!(
        leecher_store.piece(1).unwrap().as_ref(),
        &content[PIECE_LEN..]
    );

    let status = leecher.status();
    assert_eq!(status.state, TorrentState::Seeding);
    assert_eq!(status.downloaded, TOTAL_LEN as u64);
    assert_eq!(status.bytes_left, 0);

    // Resume data now reflects a finished torrent.
    let resume = leecher.resume_data().unwrap();
    let completed = resume.completed_bitfield(info.piece_count());
    assert!(completed.all_set());

    seeder.stop();
    leecher.stop();
}

#[tokio::test]
async fn magnet_leecher_fetches_metadata_then_content() {
    let info = test_torrent_info();
    let seeder = make_seeder(&info).await;

    let uri = format!(
        "magnet:?xt=urn:btih:{}&dn=exchange-test",
        info.info_hash.to_hex()
    );
    let magnet = MagnetLink::parse(&uri).unwrap();

    let leecher_store = Arc::new(MemoryStore::new());
    let factory_store = leecher_store.clone();
    let leecher = Torrent::from_magnet(
        &magnet,
        Box::new(move |_info| factory_store.clone() as Arc<dyn PieceStore>),
        fast_config(),
    );
    assert_eq!(leecher.status().state, TorrentState::FetchingMetadata);

    // start() runs the metadata monitor; there are no trackers to bother.
    leecher.start();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let seed_addr = listener.local_addr().unwrap();
    {
        let seeder = seeder.clone();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                seeder.add_incoming(stream);
            }
        });
    }
    leecher.add_peer(seed_addr);

    // Metadata arrives over ut_metadata and matches the original.
    let fetched = leecher
        .wait_for_metadata(Duration::from_secs(15))
        .await
        .unwrap();
    assert_eq!(fetched.info_hash, info.info_hash);
    assert_eq!(fetched.name, "exchange-test");
    assert_eq!(fetched.total_size, TOTAL_LEN as u64);

    // And the download itself completes from the same connection.
    leecher
        .wait_for_completion(Duration::from_secs(30))
        .await
        .unwrap();

    let content = test_content();
    assert_eq!(
        leecher_store.piece(1).unwrap().as_ref(),
        &content[PIECE_LEN..]
    );

    seeder.stop();
    leecher.stop();
}
