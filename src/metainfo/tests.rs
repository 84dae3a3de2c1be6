use bytes::Bytes;

use super::*;
use crate::bencode::{encode, Value};

fn single_file_metainfo() -> Vec<u8> {
    let info = Value::Dict(vec![
        ("name".into(), Value::string("test.bin")),
        ("piece length".into(), Value::Integer(32768)),
        (
            "pieces".into(),
            Value::Bytes(Bytes::copy_from_slice(&[0xAA; 20])),
        ),
        ("length".into(), Value::Integer(32000)),
    ]);
    encode(&Value::Dict(vec![
        ("announce".into(), Value::string("udp://tracker.example.com:6969")),
        ("info".into(), info),
    ]))
}

#[test]
fn parse_single_file() {
    let data = single_file_metainfo();
    let info = TorrentInfo::from_bytes(&data).unwrap();

    assert_eq!(info.name, "test.bin");
    assert_eq!(info.piece_length, 32768);
    assert_eq!(info.total_size, 32000);
    assert_eq!(info.piece_count(), 1);
    assert_eq!(info.piece_size(0), 32000);
    assert_eq!(info.files.len(), 1);
    assert_eq!(info.files[0].offset, 0);
    assert_eq!(
        info.announce.as_deref(),
        Some("udp://tracker.example.com:6969")
    );
    assert!(!info.is_private);
}

#[test]
fn parse_multi_file_offsets() {
    let file = |len: i64, name: &str| {
        Value::Dict(vec![
            ("length".into(), Value::Integer(len)),
            ("path".into(), Value::List(vec![Value::string(name)])),
        ])
    };
    let info = Value::Dict(vec![
        ("name".into(), Value::string("dir")),
        ("piece length".into(), Value::Integer(16384)),
        (
            "pieces".into(),
            Value::Bytes(Bytes::copy_from_slice(&[0u8; 40])),
        ),
        (
            "files".into(),
            Value::List(vec![file(1000, "a.txt"), file(500, "b.txt")]),
        ),
    ]);
    let data = encode(&Value::Dict(vec![("info".into(), info)]));

    let parsed = TorrentInfo::from_bytes(&data).unwrap();
    assert_eq!(parsed.total_size, 1500);
    assert_eq!(parsed.files[0].offset, 0);
    assert_eq!(parsed.files[1].offset, 1000);
    assert_eq!(parsed.files[1].path, std::path::PathBuf::from("dir/b.txt"));
}

#[test]
fn info_hash_matches_raw_info_span() {
    // The hash must cover the source bytes of the info value, so a
    // non-canonical key order outside the info dict doesn't change it.
    let data = single_file_metainfo();
    let parsed = TorrentInfo::from_bytes(&data).unwrap();

    let expected = InfoHash::from_info_bytes(parsed.raw_info());
    assert_eq!(parsed.info_hash, expected);

    let rebuilt = TorrentInfo::from_info_bytes(parsed.raw_info()).unwrap();
    assert_eq!(rebuilt.info_hash, parsed.info_hash);
    assert_eq!(rebuilt.name, parsed.name);
}

#[test]
fn pieces_must_be_multiple_of_20() {
    let info = Value::Dict(vec![
        ("name".into(), Value::string("x")),
        ("piece length".into(), Value::Integer(16384)),
        (
            "pieces".into(),
            Value::Bytes(Bytes::copy_from_slice(&[0u8; 19])),
        ),
        ("length".into(), Value::Integer(5)),
    ]);
    let data = encode(&Value::Dict(vec![("info".into(), info)]));
    assert!(TorrentInfo::from_bytes(&data).is_err());
}

#[test]
fn announce_tiers_fall_back_to_announce() {
    let data = single_file_metainfo();
    let info = TorrentInfo::from_bytes(&data).unwrap();
    assert_eq!(
        info.announce_tiers(),
        vec![vec!["udp://tracker.example.com:6969".to_string()]]
    );
}

#[test]
fn magnet_round_trip() {
    let uri = "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567\
               &dn=MyT&tr=http%3A%2F%2Fex%2Fann";
    let magnet = MagnetLink::parse(uri).unwrap();

    assert_eq!(
        magnet.info_hash.to_hex(),
        "0123456789abcdef0123456789abcdef01234567"
    );
    assert_eq!(magnet.display_name.as_deref(), Some("MyT"));
    assert_eq!(magnet.trackers, vec!["http://ex/ann".to_string()]);

    let reparsed = MagnetLink::parse(&magnet.to_uri()).unwrap();
    assert_eq!(reparsed.info_hash, magnet.info_hash);
    assert_eq!(reparsed.display_name, magnet.display_name);
    assert_eq!(reparsed.trackers, magnet.trackers);
}

#[test]
fn magnet_base32_hash() {
    // 32 base32 chars decode to the 20-byte hash.
    let magnet = MagnetLink::parse("magnet:?xt=urn:btih:AEBAGBAFAYDQQCIKBMGA2DQPCAIREEYU").unwrap();
    assert_eq!(
        magnet.info_hash.as_bytes(),
        &[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10, 0x11, 0x12, 0x13, 0x14
        ]
    );
}

#[test]
fn magnet_rejects_bad_uris() {
    assert!(MagnetLink::parse("http://example.com").is_err());
    assert!(MagnetLink::parse("magnet:?dn=NoHash").is_err());
    assert!(MagnetLink::parse("magnet:?xt=urn:btih:tooshort").is_err());
}
