use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracker returned error: {0}")]
    Failure(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}
