use shared::CodecError;
use thiserror::Error;
use tokio::time::Duration;

/// Reasons a connection is dropped before it becomes a session.
///
/// None of these are reported to the peer; the connection is simply closed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("connection closed during handshake")]
    Closed,

    #[error("handshake tag mismatch")]
    BadTag,

    #[error("timed out after {0:?} waiting for the {1}")]
    Timeout(Duration, &'static str),

    #[error("registration exceeds {0} bytes")]
    Oversized(usize),

    #[error("server is full")]
    ServerFull,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
