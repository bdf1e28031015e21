//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk sorted runs for the SiltDB storage engine.
//!
//! When the in-memory [`memtable::Memtable`] exceeds its size threshold the
//! engine flushes it to disk as a sorted run. Runs are *write-once,
//! read-many*: once created they are never modified, only replaced during
//! compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (sorted records, one version per user key)        │
//! │                                                               │
//! │ key_len (u32) | key | val_len (u32) | value                   │
//! │                                                               │
//! │ value = seq (u64) | present (u8) | [payload]                  │
//! │                                                               │
//! │ Blocks close when they reach the block-size threshold.        │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK (one entry per data block)                        │
//! │                                                               │
//! │ entry_count (u32), then per block:                            │
//! │ first_key_len (u32) | first_key | offset (u64) | size (u64)   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FILTER BLOCK (serialized BloomFilter over all keys)           │
//! │                                                               │
//! │ num_probes (u32) | bit array                                  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 60 bytes)                                 │
//! │                                                               │
//! │ data_offset (u64) | data_size (u64)                           │
//! │ index_offset (u64) | index_size (u64)                         │
//! │ filter_offset (u64) | filter_size (u64)                       │
//! │ entry_count (u64) | magic (u32)                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The magic value identifies the format;
//! a mismatch on open is reported as corruption.
//!
//! Sequence number and tombstone flag travel inside the record's value
//! field, so a run carries exactly the metadata the merge and read paths
//! need while the outer framing stays a plain length-prefixed key/value
//! pair.

mod format;
mod merge;
mod reader;
mod writer;

use std::io;
use thiserror::Error;

pub use format::{
    decode_entry, encode_entry, Footer, IndexEntry, DEFAULT_BLOCK_SIZE, FOOTER_BYTES,
    SSTABLE_MAGIC,
};
pub use merge::{EntrySource, MergeIterator};
pub use reader::{TableIterator, TableReader};
pub use writer::{BuilderOptions, TableBuilder};

/// Errors surfaced by sorted-run building and reading.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Bad magic, truncated framing, or an impossible length field.
    #[error("corruption: {0}")]
    Corruption(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests;
