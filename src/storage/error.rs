use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("piece {0} out of range")]
    PieceOutOfRange(u32),

    #[error("read of piece {piece} at {offset}+{length} is out of bounds")]
    BlockOutOfRange { piece: u32, offset: u32, length: u32 },

    #[error("piece {0} is not available")]
    PieceMissing(u32),
}
