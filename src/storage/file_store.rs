use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::trace;

use super::error::StorageError;
use super::file_map::FileMap;
use super::store::PieceStore;
use crate::metainfo::TorrentInfo;

/// A [`PieceStore`] backed by plain files under a root directory.
///
/// Pieces are scattered across the torrent's files according to the
/// [`FileMap`]; files are created on first write and grown as needed.
/// Handles are opened per operation, so there is no handle cache to
/// invalidate.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    map: FileMap,
    piece_length: u64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, info: &TorrentInfo) -> Self {
        Self {
            root: root.into(),
            map: FileMap::new(info),
            piece_length: info.piece_length,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn map(&self) -> &FileMap {
        &self.map
    }

    async fn write_slice(&self, path: &Path, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        let full = self.root.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&full)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_slice(&self, path: &Path, offset: u64, length: u64) -> Result<Vec<u8>, StorageError> {
        let full = self.root.join(path);
        let mut file = OpenOptions::new().read(true).open(&full).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

impl PieceStore for FileStore {
    fn write_piece(&self, index: u32, data: Bytes) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async move {
            let slices = self.map.piece_slices(index);
            if slices.is_empty() {
                return Err(StorageError::PieceOutOfRange(index));
            }

            let mut consumed = 0u64;
            for slice in slices {
                let end = consumed + slice.length;
                if end > data.len() as u64 {
                    return Err(StorageError::BlockOutOfRange {
                        piece: index,
                        offset: consumed as u32,
                        length: slice.length as u32,
                    });
                }
                self.write_slice(
                    &slice.path,
                    slice.offset,
                    &data[consumed as usize..end as usize],
                )
                .await?;
                consumed = end;
            }

            trace!(piece = index, bytes = consumed, "piece written");
            Ok(())
        })
    }

    fn read_block(
        &self,
        index: u32,
        offset: u32,
        length: u32,
    ) -> BoxFuture<'_, Result<Bytes, StorageError>> {
        Box::pin(async move {
            if offset as u64 + length as u64 > self.map.piece_size(index) {
                return Err(StorageError::BlockOutOfRange {
                    piece: index,
                    offset,
                    length,
                });
            }

            let start = index as u64 * self.piece_length + offset as u64;
            let slices = self.map.range_slices(start, start + length as u64);

            let mut buf = BytesMut::with_capacity(length as usize);
            for slice in slices {
                let part = self.read_slice(&slice.path, slice.offset, slice.length).await?;
                buf.extend_from_slice(&part);
            }

            Ok(buf.freeze())
        })
    }
}
