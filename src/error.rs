//! Error types for udpft.
//!
//! Protocol-level faults (timeouts, mismatched or undecodable frames) are
//! absorbed by the retry loops and never surface here. What remains are the
//! conditions that end an operation or the process.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    /// A received block could not be decoded as a frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("payload of {len} bytes exceeds the {max}-byte frame payload")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("file name is {len} bytes, at most {max} fit in a frame")]
    NameTooLong { len: usize, max: usize },

    #[error("file is {len} bytes, transfers are limited to {max} bytes")]
    FileTooLarge { len: u64, max: u64 },

    #[error("frame index {index} is outside the transfer ({count} frames)")]
    IndexOutOfRange { index: usize, count: usize },

    /// The reassembly buffer for a transfer could not be allocated.
    #[error("could not allocate {0} bytes for the transfer buffer")]
    Allocation(usize),

    #[error("no matching response after {0} attempts")]
    RetriesExhausted(u32),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransferError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }
}
