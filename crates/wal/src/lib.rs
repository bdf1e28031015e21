//! # WAL — Write-Ahead Journal
//!
//! Provides crash-safe durability for the SiltDB storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended to the current journal epoch **before** the corresponding
//! in-memory update. On restart the epochs are replayed to reconstruct the
//! memtable, guaranteeing that no acknowledged write is lost.
//!
//! ## Binary Record Format
//!
//! ```text
//! [crc32: u32 LE][seq: u64 LE][kind: u8][key_len: u32 LE][key][val_len: u32 LE][value]
//! ```
//!
//! `kind` is 1 for a put and 2 for a delete; delete records carry
//! `val_len = 0`. The CRC covers every byte after the CRC field.
//!
//! ## Epochs
//!
//! Each rotation of the memtable opens a fresh journal file named
//! `<sequence>.wal`, where `<sequence>` is the engine's sequence counter at
//! creation time. [`WalManager`] resolves, lists, and deletes epochs; an
//! epoch becomes garbage once every sequence it covers is persisted in a
//! published sorted run.
//!
//! ## Durability
//!
//! Every append is flushed from the writer to the kernel. Callers that need
//! device-level persistence per write invoke [`WalWriter::sync`] afterwards.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Operation kind byte for a put record.
const KIND_PUT: u8 = 1;
/// Operation kind byte for a delete record.
const KIND_DELETE: u8 = 2;

/// Safety cap on key length when reading; larger values mean corruption.
const MAX_KEY_BYTES: u32 = 64 * 1024 * 1024;
/// Safety cap on value length when reading; larger values mean corruption.
const MAX_VALUE_BYTES: u32 = 64 * 1024 * 1024;

/// A single journal record representing either a key-value insertion or a
/// deletion.
///
/// Each record carries the **sequence number** the engine assigned to the
/// mutation; replay uses it to restore ordering, and the largest replayed
/// sequence re-seeds the engine's counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion.
    Put {
        /// Sequence number assigned by the engine.
        seq: u64,
        /// The lookup key.
        key: Vec<u8>,
        /// The payload value.
        value: Vec<u8>,
    },
    /// A key deletion (tombstone).
    Del {
        /// Sequence number assigned by the engine.
        seq: u64,
        /// The key to delete.
        key: Vec<u8>,
    },
}

impl WalRecord {
    /// The sequence number carried by this record.
    #[must_use]
    pub fn seq(&self) -> u64 {
        match self {
            WalRecord::Put { seq, .. } | WalRecord::Del { seq, .. } => *seq,
        }
    }
}

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation, was truncated mid-record, or carried
    /// an unknown kind byte.
    #[error("corrupt journal record")]
    Corrupt,
}

/// Append-only journal writer for a single epoch.
///
/// Records are serialized into a reusable in-memory buffer, CRC-checksummed,
/// and written to the file in a single `write_all` call followed by a flush
/// to the kernel. Device-level durability is a separate, explicit [`sync`]
/// call.
///
/// [`sync`]: WalWriter::sync
pub struct WalWriter {
    file: File,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a journal file in append mode.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            file,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it to the journal.
    ///
    /// The frame is written with a single `write_all` and flushed to the
    /// kernel before returning, so a process crash cannot lose an
    /// acknowledged append (an OS crash still can, unless [`sync`] was
    /// called).
    ///
    /// [`sync`]: WalWriter::sync
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        // Reuse the internal buffer: clear but keep the allocation
        self.buf.clear();

        // Reserve 4 bytes for the CRC, filled in below
        self.buf.extend_from_slice(&[0u8; 4]);

        match record {
            WalRecord::Put { seq, key, value } => {
                self.buf.write_u64::<LittleEndian>(*seq)?;
                self.buf.write_u8(KIND_PUT)?;
                self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
                self.buf.extend_from_slice(key);
                self.buf.write_u32::<LittleEndian>(value.len() as u32)?;
                self.buf.extend_from_slice(value);
            }
            WalRecord::Del { seq, key } => {
                self.buf.write_u64::<LittleEndian>(*seq)?;
                self.buf.write_u8(KIND_DELETE)?;
                self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
                self.buf.extend_from_slice(key);
                self.buf.write_u32::<LittleEndian>(0)?;
            }
        }

        // CRC covers everything after the CRC field
        let mut hasher = Crc32::new();
        hasher.update(&self.buf[4..]);
        let crc = hasher.finalize();
        self.buf[0..4].copy_from_slice(&crc.to_le_bytes());

        // Single write call for the entire frame, then flush to the kernel
        self.file.write_all(&self.buf)?;
        self.file.flush()?;

        Ok(())
    }

    /// Forces all written data down to the device via `sync_all()`.
    ///
    /// Called by the engine when a write carries the sync option, or once
    /// per batch when a batch does.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Sequential journal reader that yields records in file order.
///
/// The reader is generic over any `Read` implementor, allowing it to be used
/// with real files (`WalReader<File>`) or in-memory buffers for testing.
///
/// A clean end-of-file at a record boundary terminates replay normally.
/// Anything else (CRC mismatch, truncation mid-record, an unknown kind
/// byte) is [`WalError::Corrupt`]. Records handed to the callback before
/// the corruption point have already been applied; recovery exploits this
/// to keep the valid prefix of a damaged epoch.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    /// Opens an existing journal file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor.
    ///
    /// Useful for unit tests that supply an in-memory buffer (e.g.,
    /// `Cursor<Vec<u8>>`).
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every record in the journal, calling `apply` for each one.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** (zero bytes where the next CRC would start) ->
    ///   returns `Ok(())`.
    /// - **Truncated record** (EOF anywhere inside a record) ->
    ///   `Err(WalError::Corrupt)`.
    /// - **CRC mismatch / unknown kind** -> `Err(WalError::Corrupt)`.
    /// - **I/O error** -> `Err(WalError::Io(...))`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalRecord),
    {
        // Reusable buffer holding the checksummed portion of each record
        let mut body = Vec::with_capacity(256);

        loop {
            // The CRC is the record boundary: zero bytes here is a clean
            // end of the journal, a partial read is a torn record.
            let mut crc_buf = [0u8; 4];
            match read_full_or_eof(&mut self.rdr, &mut crc_buf)? {
                ReadOutcome::Eof => return Ok(()),
                ReadOutcome::Partial => return Err(WalError::Corrupt),
                ReadOutcome::Full => {}
            }
            let stored_crc = u32::from_le_bytes(crc_buf);

            // Fixed header after the CRC: seq(8) + kind(1) + key_len(4)
            body.clear();
            body.resize(13, 0);
            self.rdr.read_exact(&mut body).map_err(eof_as_corrupt)?;

            let key_len = u32::from_le_bytes([body[9], body[10], body[11], body[12]]);
            if key_len > MAX_KEY_BYTES {
                return Err(WalError::Corrupt);
            }

            let key_start = body.len();
            body.resize(key_start + key_len as usize + 4, 0);
            self.rdr
                .read_exact(&mut body[key_start..])
                .map_err(eof_as_corrupt)?;

            let val_len_start = body.len() - 4;
            let val_len = u32::from_le_bytes([
                body[val_len_start],
                body[val_len_start + 1],
                body[val_len_start + 2],
                body[val_len_start + 3],
            ]);
            if val_len > MAX_VALUE_BYTES {
                return Err(WalError::Corrupt);
            }

            let val_start = body.len();
            body.resize(val_start + val_len as usize, 0);
            self.rdr
                .read_exact(&mut body[val_start..])
                .map_err(eof_as_corrupt)?;

            // Verify the CRC over the complete body
            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != stored_crc {
                return Err(WalError::Corrupt);
            }

            // Parse the verified body
            let mut br = &body[..];
            let seq = br.read_u64::<LittleEndian>()?;
            let kind = br.read_u8()?;
            let _ = br.read_u32::<LittleEndian>()?; // key_len, already known
            let key = br[..key_len as usize].to_vec();
            let value = body[val_start..].to_vec();

            match kind {
                KIND_PUT => apply(WalRecord::Put { seq, key, value }),
                KIND_DELETE => {
                    if val_len != 0 {
                        return Err(WalError::Corrupt);
                    }
                    apply(WalRecord::Del { seq, key });
                }
                _ => return Err(WalError::Corrupt),
            }
        }
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// Reads exactly `buf.len()` bytes, distinguishing "no bytes at all" (clean
/// EOF) from "some bytes then EOF" (torn record).
fn read_full_or_eof<R: Read>(rdr: &mut R, buf: &mut [u8]) -> Result<ReadOutcome, WalError> {
    let mut filled = 0;
    while filled < buf.len() {
        match rdr.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Partial
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(WalError::Io(e)),
        }
    }
    Ok(ReadOutcome::Full)
}

/// Maps an unexpected EOF inside a record to `Corrupt`; other I/O errors
/// pass through.
fn eof_as_corrupt(e: io::Error) -> WalError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        WalError::Corrupt
    } else {
        WalError::Io(e)
    }
}

/// Resolves, lists, and deletes journal epochs inside the engine directory.
///
/// Epochs are named `<sequence>.wal` after the engine sequence counter at
/// creation time. The numeric stem doubles as the replay order and as the
/// low-watermark key for cleanup.
pub struct WalManager {
    dir: PathBuf,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the epoch created at `seq`.
    #[must_use]
    pub fn epoch_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{}.wal", seq))
    }

    /// Opens a writer for the epoch at `seq`, creating the file if needed.
    pub fn create_writer(&self, seq: u64) -> Result<WalWriter, WalError> {
        WalWriter::create(self.epoch_path(seq))
    }

    /// Lists existing epochs as `(sequence, path)`, sorted by sequence.
    ///
    /// Files with a `.wal` extension whose stem does not parse as a number
    /// are ignored.
    pub fn list_epochs(&self) -> Result<Vec<(u64, PathBuf)>, WalError> {
        let mut epochs = Vec::new();

        if !self.dir.exists() {
            return Ok(epochs);
        }

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "wal") {
                if let Some(seq) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u64>().ok())
                {
                    epochs.push((seq, path));
                }
            }
        }

        epochs.sort_by_key(|(seq, _)| *seq);
        Ok(epochs)
    }

    /// Deletes every epoch whose sequence is strictly less than
    /// `low_watermark`.
    ///
    /// Called after a flush publishes a sorted run: epochs older than the
    /// rotation point are fully covered by on-disk runs.
    pub fn cleanup(&self, low_watermark: u64) -> Result<(), WalError> {
        for (seq, path) in self.list_epochs()? {
            if seq < low_watermark {
                std::fs::remove_file(&path)?;
                tracing::info!(epoch = seq, path = %path.display(), "deleted obsolete journal epoch");
            }
        }
        Ok(())
    }
}
