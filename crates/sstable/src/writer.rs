//! Sorted-run builder.

use memtable::ValueEntry;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bloom::BloomFilter;

use crate::format::{encode_record, Footer, IndexEntry, DEFAULT_BLOCK_SIZE};
use crate::Result;

/// Knobs for building a sorted run.
#[derive(Debug, Clone, Copy)]
pub struct BuilderOptions {
    /// A data block is closed once its accumulated bytes reach this size.
    pub block_size: usize,
    /// Bits-per-key budget for the embedded bloom filter.
    pub bloom_bits_per_key: usize,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            bloom_bits_per_key: 10,
        }
    }
}

/// Streams strictly-increasing `(key, entry)` pairs into a sorted-run file.
///
/// The caller drives the builder with [`add`], then either [`finish`]es the
/// file (index + filter + footer + fsync) or [`abandon`]s it, which removes
/// the partial output. Dropping an unfinished builder abandons it.
///
/// Keys MUST arrive in strictly increasing user-key order with at most one
/// entry per key; violating this is a programmer error and panics.
///
/// [`add`]: TableBuilder::add
/// [`finish`]: TableBuilder::finish
/// [`abandon`]: TableBuilder::abandon
pub struct TableBuilder {
    path: PathBuf,
    file: BufWriter<File>,
    options: BuilderOptions,

    /// The data block currently being accumulated.
    data_block: Vec<u8>,
    first_key_in_block: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,

    index_entries: Vec<IndexEntry>,
    keys_for_filter: Vec<Vec<u8>>,

    num_entries: u64,
    /// Bytes written to the file so far.
    offset: u64,
    finished: bool,
}

impl TableBuilder {
    /// Creates the output file (truncating any previous content).
    pub fn create<P: AsRef<Path>>(path: P, options: BuilderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            path,
            file: BufWriter::new(file),
            options,
            data_block: Vec::with_capacity(DEFAULT_BLOCK_SIZE),
            first_key_in_block: None,
            last_key: None,
            index_entries: Vec::new(),
            keys_for_filter: Vec::new(),
            num_entries: 0,
            offset: 0,
            finished: false,
        })
    }

    /// Appends one entry. Keys must be strictly increasing.
    pub fn add(&mut self, key: &[u8], entry: &ValueEntry) -> Result<()> {
        assert!(!self.finished, "add() after finish()");
        if let Some(last) = &self.last_key {
            assert!(
                key > last.as_slice(),
                "keys must be added in strictly increasing order"
            );
        }

        if self.first_key_in_block.is_none() {
            self.first_key_in_block = Some(key.to_vec());
        }

        encode_record(&mut self.data_block, key, entry);
        self.keys_for_filter.push(key.to_vec());
        self.last_key = Some(key.to_vec());
        self.num_entries += 1;

        if self.data_block.len() >= self.options.block_size {
            self.flush_block()?;
        }

        Ok(())
    }

    /// Writes the accumulated block and records its index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }

        self.index_entries.push(IndexEntry {
            first_key: self
                .first_key_in_block
                .take()
                .expect("non-empty block has a first key"),
            block_offset: self.offset,
            block_size: self.data_block.len() as u64,
        });

        self.file.write_all(&self.data_block)?;
        self.offset += self.data_block.len() as u64;
        self.data_block.clear();

        Ok(())
    }

    /// Writes the index block, filter block, and footer, then syncs the
    /// file to disk.
    pub fn finish(&mut self) -> Result<()> {
        assert!(!self.finished, "finish() called twice");

        self.flush_block()?;

        // Index block
        let index_offset = self.offset;
        let mut index_data = Vec::new();
        index_data.extend_from_slice(&(self.index_entries.len() as u32).to_le_bytes());
        for entry in &self.index_entries {
            entry.encode_into(&mut index_data);
        }
        self.file.write_all(&index_data)?;
        self.offset += index_data.len() as u64;

        // Filter block
        let filter_offset = self.offset;
        let filter =
            BloomFilter::from_keys(&self.keys_for_filter, self.options.bloom_bits_per_key);
        let filter_data = filter.encode();
        self.file.write_all(&filter_data)?;
        self.offset += filter_data.len() as u64;

        // Footer
        let footer = Footer {
            data_offset: 0,
            data_size: index_offset,
            index_offset,
            index_size: filter_offset - index_offset,
            filter_offset,
            filter_size: filter_data.len() as u64,
            entry_count: self.num_entries,
        };
        let footer_data = footer.encode();
        self.file.write_all(&footer_data)?;
        self.offset += footer_data.len() as u64;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        self.finished = true;

        tracing::debug!(
            path = %self.path.display(),
            entries = self.num_entries,
            bytes = self.offset,
            "sorted run finished"
        );

        Ok(())
    }

    /// Removes the partial output file. Safe to call at any point before
    /// [`finish`](TableBuilder::finish).
    pub fn abandon(&mut self) {
        self.finished = true;
        let _ = std::fs::remove_file(&self.path);
        tracing::debug!(path = %self.path.display(), "sorted run abandoned");
    }

    /// Total entries added so far.
    #[must_use]
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Bytes written to the file so far (final size once finished).
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.offset
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if !self.finished {
            self.abandon();
        }
    }
}
