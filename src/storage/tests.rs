use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tempfile::TempDir;

use super::*;
use crate::bencode::{encode, Value};
use crate::metainfo::TorrentInfo;

fn multi_file_info() -> TorrentInfo {
    let file = |len: i64, name: &str| {
        Value::Dict(vec![
            ("length".into(), Value::Integer(len)),
            ("path".into(), Value::List(vec![Value::string(name)])),
        ])
    };
    let info = Value::Dict(vec![
        ("name".into(), Value::string("album")),
        ("piece length".into(), Value::Integer(16)),
        (
            "pieces".into(),
            Value::Bytes(Bytes::copy_from_slice(&[0u8; 60])),
        ),
        (
            "files".into(),
            Value::List(vec![file(10, "one.bin"), file(20, "two.bin"), file(10, "three.bin")]),
        ),
    ]);
    let data = encode(&Value::Dict(vec![("info".into(), info)]));
    TorrentInfo::from_bytes(&data).unwrap()
}

#[test]
fn file_map_spans_files() {
    let info = multi_file_info();
    let map = FileMap::new(&info);

    // Piece 0: bytes [0, 16) = all of one.bin + 6 bytes of two.bin.
    let slices = map.piece_slices(0);
    assert_eq!(slices.len(), 2);
    assert_eq!(slices[0].path, PathBuf::from("album/one.bin"));
    assert_eq!(slices[0].offset, 0);
    assert_eq!(slices[0].length, 10);
    assert_eq!(slices[1].path, PathBuf::from("album/two.bin"));
    assert_eq!(slices[1].offset, 0);
    assert_eq!(slices[1].length, 6);

    // The slices for any piece add up to exactly its expected size.
    for index in 0..info.piece_count() as u32 {
        let total: u64 = map.piece_slices(index).iter().map(|s| s.length).sum();
        assert_eq!(total, map.piece_size(index));
    }

    // Last piece is short: 40 bytes total, 16-byte pieces.
    assert_eq!(map.piece_size(2), 8);
}

#[tokio::test]
async fn memory_store_roundtrip() {
    let store = MemoryStore::new();
    let data = Bytes::from_static(b"0123456789abcdef");

    store.write_piece(0, data.clone()).await.unwrap();
    assert_eq!(store.piece_count(), 1);

    let block = store.read_block(0, 4, 8).await.unwrap();
    assert_eq!(block.as_ref(), b"456789ab");

    assert!(store.read_block(0, 10, 10).await.is_err());
    assert!(store.read_block(1, 0, 4).await.is_err());
}

#[tokio::test]
async fn file_store_scatters_and_reads_back() {
    let info = multi_file_info();
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn PieceStore> = Arc::new(FileStore::new(dir.path(), &info));

    // Fill all 40 content bytes with a recognizable pattern.
    let content: Vec<u8> = (0u8..40).collect();
    for index in 0..3u32 {
        let start = index as usize * 16;
        let end = (start + 16).min(40);
        store
            .write_piece(index, Bytes::copy_from_slice(&content[start..end]))
            .await
            .unwrap();
    }

    // Files landed with the right contents.
    let one = std::fs::read(dir.path().join("album/one.bin")).unwrap();
    assert_eq!(one, &content[..10]);
    let two = std::fs::read(dir.path().join("album/two.bin")).unwrap();
    assert_eq!(two, &content[10..30]);
    let three = std::fs::read(dir.path().join("album/three.bin")).unwrap();
    assert_eq!(three, &content[30..]);

    // Block reads cross file boundaries.
    let block = store.read_block(0, 8, 8).await.unwrap();
    assert_eq!(block.as_ref(), &content[8..16]);

    let tail = store.read_block(2, 0, 8).await.unwrap();
    assert_eq!(tail.as_ref(), &content[32..40]);

    // Out-of-range reads are refused before touching disk.
    assert!(store.read_block(2, 4, 8).await.is_err());
}
