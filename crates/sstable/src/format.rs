//! On-disk framing: footer, index entries, and record payload codec.

use byteorder::{LittleEndian, ReadBytesExt};
use memtable::ValueEntry;

use crate::{Error, Result};

/// Magic identifying a SiltDB sorted run ("SILT").
pub const SSTABLE_MAGIC: u32 = 0x5349_4C54;

/// Fixed footer length: seven u64 fields plus the u32 magic.
pub const FOOTER_BYTES: u64 = 7 * 8 + 4;

/// Data blocks are closed once their accumulated bytes reach this threshold.
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

/// Maximum key size tolerated when decoding (64 KiB). Prevents OOM on
/// corrupt files.
pub(crate) const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size tolerated when decoding (16 MiB).
pub(crate) const MAX_VALUE_BYTES: usize = 16 * 1024 * 1024;

/// The fixed-length trailer at the end of every sorted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub data_offset: u64,
    pub data_size: u64,
    pub index_offset: u64,
    pub index_size: u64,
    pub filter_offset: u64,
    pub filter_size: u64,
    pub entry_count: u64,
}

impl Footer {
    /// Encodes the footer into its 60-byte wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FOOTER_BYTES as usize);
        for v in [
            self.data_offset,
            self.data_size,
            self.index_offset,
            self.index_size,
            self.filter_offset,
            self.filter_size,
            self.entry_count,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&SSTABLE_MAGIC.to_le_bytes());
        out
    }

    /// Decodes and validates a footer read from the tail of a file.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FOOTER_BYTES as usize {
            return Err(Error::Corruption("footer too short".into()));
        }

        let mut rdr = data;
        let data_offset = rdr.read_u64::<LittleEndian>()?;
        let data_size = rdr.read_u64::<LittleEndian>()?;
        let index_offset = rdr.read_u64::<LittleEndian>()?;
        let index_size = rdr.read_u64::<LittleEndian>()?;
        let filter_offset = rdr.read_u64::<LittleEndian>()?;
        let filter_size = rdr.read_u64::<LittleEndian>()?;
        let entry_count = rdr.read_u64::<LittleEndian>()?;
        let magic = rdr.read_u32::<LittleEndian>()?;

        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic {:#010x} (expected {:#010x})",
                magic, SSTABLE_MAGIC
            )));
        }

        Ok(Self {
            data_offset,
            data_size,
            index_offset,
            index_size,
            filter_offset,
            filter_size,
            entry_count,
        })
    }
}

/// One index record: the first key of a data block plus its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub first_key: Vec<u8>,
    pub block_offset: u64,
    pub block_size: u64,
}

impl IndexEntry {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.first_key.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.first_key);
        out.extend_from_slice(&self.block_offset.to_le_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
    }

    /// Decodes one entry from `data`, returning it and the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut rdr = data;
        let key_len = rdr.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            return Err(Error::Corruption(format!(
                "index entry key_len {} exceeds maximum",
                key_len
            )));
        }
        if rdr.len() < key_len + 16 {
            return Err(Error::Corruption("index entry truncated".into()));
        }

        let first_key = rdr[..key_len].to_vec();
        rdr = &rdr[key_len..];
        let block_offset = rdr.read_u64::<LittleEndian>()?;
        let block_size = rdr.read_u64::<LittleEndian>()?;

        Ok((
            Self {
                first_key,
                block_offset,
                block_size,
            },
            4 + key_len + 16,
        ))
    }
}

/// Encodes an entry into the record's value field:
/// `[seq: u64][present: u8][payload]`. Tombstones carry no payload.
#[must_use]
pub fn encode_entry(entry: &ValueEntry) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + entry.value.as_ref().map_or(0, |v| v.len()));
    out.extend_from_slice(&entry.seq.to_le_bytes());
    match &entry.value {
        Some(v) => {
            out.push(1);
            out.extend_from_slice(v);
        }
        None => out.push(0),
    }
    out
}

/// Decodes a record's value field back into a [`ValueEntry`].
pub fn decode_entry(data: &[u8]) -> Result<ValueEntry> {
    if data.len() < 9 {
        return Err(Error::Corruption("entry payload too short".into()));
    }
    let seq = u64::from_le_bytes(data[..8].try_into().expect("sliced 8 bytes"));
    let value = match data[8] {
        1 => Some(data[9..].to_vec()),
        0 if data.len() == 9 => None,
        0 => {
            return Err(Error::Corruption(
                "tombstone entry carries a payload".into(),
            ))
        }
        b => return Err(Error::Corruption(format!("bad present flag {}", b))),
    };
    Ok(ValueEntry { seq, value })
}

/// Writes one data-block record: `[key_len][key][val_len][value]`.
pub(crate) fn encode_record(out: &mut Vec<u8>, key: &[u8], entry: &ValueEntry) {
    let value = encode_entry(entry);
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(&value);
}

/// Parses the record starting at `pos` inside a data block.
///
/// Returns `Ok(None)` when `pos` sits exactly at the end of the block.
pub(crate) fn parse_record(
    block: &[u8],
    pos: usize,
) -> Result<Option<(Vec<u8>, ValueEntry, usize)>> {
    if pos == block.len() {
        return Ok(None);
    }
    if pos + 4 > block.len() {
        return Err(Error::Corruption("record header truncated".into()));
    }

    let key_len =
        u32::from_le_bytes(block[pos..pos + 4].try_into().expect("sliced 4 bytes")) as usize;
    if key_len > MAX_KEY_BYTES {
        return Err(Error::Corruption(format!(
            "record key_len {} exceeds maximum",
            key_len
        )));
    }
    let key_start = pos + 4;
    let val_len_start = key_start + key_len;
    if val_len_start + 4 > block.len() {
        return Err(Error::Corruption("record key truncated".into()));
    }

    let key = block[key_start..val_len_start].to_vec();
    let val_len = u32::from_le_bytes(
        block[val_len_start..val_len_start + 4]
            .try_into()
            .expect("sliced 4 bytes"),
    ) as usize;
    if val_len > MAX_VALUE_BYTES {
        return Err(Error::Corruption(format!(
            "record val_len {} exceeds maximum",
            val_len
        )));
    }
    let val_start = val_len_start + 4;
    let end = val_start + val_len;
    if end > block.len() {
        return Err(Error::Corruption("record value truncated".into()));
    }

    let entry = decode_entry(&block[val_start..end])?;
    Ok(Some((key, entry, end)))
}
