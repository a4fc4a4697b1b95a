use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Judge not found: {0}")]
    JudgeNotFound(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(u8),

    #[error("Judge connection lost: {0}")]
    JudgeGone(String),

    #[error("Framing error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
