//! Sorted-run reader: point lookups and ordered iteration.

use memtable::ValueEntry;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bloom::BloomFilter;

use crate::format::{parse_record, Footer, IndexEntry, FOOTER_BYTES};
use crate::{Error, Result};

/// Reads a sorted-run file.
///
/// On [`open`](TableReader::open) the footer is validated and the index and
/// bloom filter blocks are loaded into memory; the smallest key comes from
/// the first index entry and the largest key from scanning the last data
/// block (the format has no trailer record).
///
/// A persistent file handle is kept for the lifetime of the reader, wrapped
/// in a `Mutex` so lookups work through a shared `&self`. Readers are
/// cheaply shared via `Arc`: the version set, in-flight point reads, the
/// compactor, and live iterators all hold clones, and the underlying file
/// handle closes when the last clone drops.
pub struct TableReader {
    path: PathBuf,
    file: Mutex<BufReader<File>>,
    file_size: u64,
    footer: Footer,
    index: Vec<IndexEntry>,
    filter: BloomFilter,
    smallest_key: Vec<u8>,
    largest_key: Vec<u8>,
}

impl TableReader {
    /// Opens a sorted-run file and loads its index and filter.
    ///
    /// # Errors
    ///
    /// [`Error::Corruption`] if the file is too small, the magic is wrong,
    /// or any block fails to decode; [`Error::Io`] on filesystem failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        if file_size < FOOTER_BYTES {
            return Err(Error::Corruption("sorted run smaller than footer".into()));
        }

        // Footer from the tail
        file.seek(SeekFrom::End(-(FOOTER_BYTES as i64)))?;
        let mut footer_buf = [0u8; FOOTER_BYTES as usize];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let sections_end = file_size - FOOTER_BYTES;
        if footer.index_offset + footer.index_size > sections_end
            || footer.filter_offset + footer.filter_size > sections_end
        {
            return Err(Error::Corruption("footer offsets exceed file".into()));
        }

        // Index block
        let index_data = read_span(&mut file, footer.index_offset, footer.index_size)?;
        let index = decode_index(&index_data)?;

        // Filter block
        let filter_data = read_span(&mut file, footer.filter_offset, footer.filter_size)?;
        let filter = BloomFilter::decode(&filter_data)
            .ok_or_else(|| Error::Corruption("bad filter block".into()))?;

        // Key range: smallest from the index, largest by scanning the last
        // data block.
        let (smallest_key, largest_key) = match (index.first(), index.last()) {
            (Some(first), Some(last)) => {
                let block = read_span(&mut file, last.block_offset, last.block_size)?;
                let mut pos = 0;
                let mut last_key = first.first_key.clone();
                while let Some((key, _, next)) = parse_record(&block, pos)? {
                    last_key = key;
                    pos = next;
                }
                (first.first_key.clone(), last_key)
            }
            _ => (Vec::new(), Vec::new()),
        };

        file.seek(SeekFrom::Start(0))?;

        tracing::debug!(
            path = %path.display(),
            entries = footer.entry_count,
            bytes = file_size,
            "opened sorted run"
        );

        Ok(Self {
            path,
            file: Mutex::new(BufReader::new(file)),
            file_size,
            footer,
            index,
            filter,
            smallest_key,
            largest_key,
        })
    }

    /// O(1) filter probe: `false` means the key is definitely absent.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.filter.may_contain(key)
    }

    /// Point lookup.
    ///
    /// Returns `Ok(Some(entry))` if the run stores a version of `key` (the
    /// entry may be a tombstone); `Ok(None)` if the key is not present.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        if !self.filter.may_contain(key) {
            return Ok(None);
        }

        let block_idx = match self.find_block(key) {
            Some(i) => i,
            None => return Ok(None),
        };

        let block = self.read_block(block_idx)?;
        let mut pos = 0;
        while let Some((rec_key, entry, next)) = parse_record(&block, pos)? {
            if rec_key == key {
                return Ok(Some(entry));
            }
            if rec_key.as_slice() > key {
                break;
            }
            pos = next;
        }
        Ok(None)
    }

    /// Binary-searches the index for the candidate block: the last block
    /// whose first key is <= `key`. `None` if the key sorts before every
    /// block.
    fn find_block(&self, key: &[u8]) -> Option<usize> {
        if self.index.is_empty() {
            return None;
        }
        let idx = self
            .index
            .partition_point(|e| e.first_key.as_slice() <= key);
        idx.checked_sub(1)
    }

    /// Reads the data block at `index[block_idx]` into memory.
    fn read_block(&self, block_idx: usize) -> Result<Vec<u8>> {
        let entry = &self.index[block_idx];
        let mut file = self.file.lock().expect("reader mutex poisoned");
        file.seek(SeekFrom::Start(entry.block_offset))?;
        let mut block = vec![0u8; entry.block_size as usize];
        file.read_exact(&mut block)?;
        Ok(block)
    }

    /// Number of entries recorded in the footer.
    #[must_use]
    pub fn num_entries(&self) -> u64 {
        self.footer.entry_count
    }

    /// Total file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Smallest user key stored in the run (empty for an empty run).
    #[must_use]
    pub fn smallest_key(&self) -> &[u8] {
        &self.smallest_key
    }

    /// Largest user key stored in the run (empty for an empty run).
    #[must_use]
    pub fn largest_key(&self) -> &[u8] {
        &self.largest_key
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.footer.entry_count == 0
    }
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("path", &self.path)
            .field("entries", &self.footer.entry_count)
            .field("file_size", &self.file_size)
            .field("blocks", &self.index.len())
            .finish()
    }
}

fn read_span(file: &mut File, offset: u64, size: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn decode_index(data: &[u8]) -> Result<Vec<IndexEntry>> {
    if data.len() < 4 {
        return Err(Error::Corruption("index block too small".into()));
    }
    let count = u32::from_le_bytes(data[..4].try_into().expect("sliced 4 bytes")) as usize;

    // Cap the pre-allocation; a corrupt count fails entry decoding anyway.
    let mut entries = Vec::with_capacity(count.min(4096));
    let mut pos = 4;
    for _ in 0..count {
        let (entry, consumed) = IndexEntry::decode(&data[pos..])?;
        pos += consumed;
        entries.push(entry);
    }
    Ok(entries)
}

/// Forward iterator over every record of a run, in user-key order.
///
/// Holds an `Arc` to the reader, so it stays valid after the version set
/// drops the run.
pub struct TableIterator {
    reader: Arc<TableReader>,
    block_idx: usize,
    block: Vec<u8>,
    pos: usize,
    errored: bool,
}

impl TableIterator {
    /// Positions a new iterator at the first record.
    pub fn new(reader: Arc<TableReader>) -> Self {
        Self {
            reader,
            block_idx: 0,
            block: Vec::new(),
            pos: 0,
            errored: false,
        }
    }

    /// Repositions at the first record with key >= `key`.
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.errored = false;
        self.block = Vec::new();
        self.pos = 0;
        self.block_idx = self.reader.find_block(key).unwrap_or(0);
        self.load_current_block()?;

        // Skip records before the target inside the block; the next block's
        // records are all >= key by the index invariant.
        loop {
            match parse_record(&self.block, self.pos)? {
                Some((rec_key, _, next)) => {
                    if rec_key.as_slice() >= key {
                        return Ok(());
                    }
                    self.pos = next;
                }
                None => {
                    // Target is past this block; start at the next one.
                    self.block_idx += 1;
                    self.pos = 0;
                    self.load_current_block()?;
                    if self.block.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn load_current_block(&mut self) -> Result<()> {
        if self.block_idx >= self.reader.index.len() {
            self.block = Vec::new();
            return Ok(());
        }
        self.block = self.reader.read_block(self.block_idx)?;
        Ok(())
    }
}

impl Iterator for TableIterator {
    type Item = Result<(Vec<u8>, ValueEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }

        loop {
            // Lazily load the block the cursor points into.
            if self.block.is_empty() {
                if self.block_idx >= self.reader.index.len() {
                    return None;
                }
                match self.load_current_block() {
                    Ok(()) => {}
                    Err(e) => {
                        self.errored = true;
                        return Some(Err(e));
                    }
                }
                if self.block.is_empty() {
                    return None;
                }
            }

            match parse_record(&self.block, self.pos) {
                Ok(Some((key, entry, next))) => {
                    self.pos = next;
                    return Some(Ok((key, entry)));
                }
                Ok(None) => {
                    // Exhausted this block; move to the next.
                    self.block_idx += 1;
                    self.block = Vec::new();
                    self.pos = 0;
                }
                Err(e) => {
                    self.errored = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
