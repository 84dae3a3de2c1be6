use thiserror::Error;

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("metainfo error: {0}")]
    Metainfo(#[from] crate::metainfo::MetainfoError),

    #[error("peer error: {0}")]
    Peer(#[from] crate::peer::PeerError),

    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),

    #[error("dht error: {0}")]
    Dht(#[from] crate::dht::DhtError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("timed out")]
    Timeout,

    #[error("every tracker in every tier failed")]
    ConnectionFailed,

    #[error("invalid resume data: {0}")]
    InvalidResumeData(String),
}
