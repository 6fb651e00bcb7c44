use thiserror::Error;

use crate::MAX_FRAME_RECORDS;

/// Failures while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("buffer holds {available} bytes, {needed} needed")]
    Incomplete { needed: usize, available: usize },

    #[error("frame declares {0} records, limit is {MAX_FRAME_RECORDS}")]
    TooManyRecords(usize),

    #[error("frame declares {declared} records, only {decoded} decoded")]
    ShortFrame { declared: usize, decoded: usize },

    #[error("server rejected the registration")]
    Rejected,

    #[error("invalid registration payload: {0}")]
    Registration(#[from] serde_json::Error),

    #[error("transform encoding failed: {0}")]
    Transform(#[from] bincode::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
