//! Error taxonomy surfaced by the engine.
//!
//! Absence of a key is not an error: `get` returns `Ok(None)` both when a
//! key was never written and when its newest visible entry is a tombstone,
//! and callers cannot distinguish the two.

use std::io;
use thiserror::Error;

/// Errors surfaced to engine callers.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying filesystem failure, including a missing expected file.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// CRC mismatch, bad magic, or truncated binary framing.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A precondition on API inputs was violated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Open refused because `error_if_exists` was set.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Feature disabled at build or run time.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Background work could not proceed immediately.
    #[error("busy: {0}")]
    Busy(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<wal::WalError> for Error {
    fn from(e: wal::WalError) -> Self {
        match e {
            wal::WalError::Io(io) => Error::Io(io),
            wal::WalError::Corrupt => Error::Corruption("corrupt journal record".into()),
        }
    }
}

impl From<sstable::Error> for Error {
    fn from(e: sstable::Error) -> Self {
        match e {
            sstable::Error::Io(io) => Error::Io(io),
            sstable::Error::Corruption(msg) => Error::Corruption(msg),
        }
    }
}
