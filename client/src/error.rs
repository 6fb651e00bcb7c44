use shared::CodecError;
use thiserror::Error;
use tokio::time::Duration;

/// Why a connection attempt failed. Retrying is up to the caller.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("server refused the handshake")]
    Rejected,

    #[error("no answer from server within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a running sync link ended.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
