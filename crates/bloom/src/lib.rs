//! # Bloom Filter
//!
//! A space-efficient probabilistic data structure for set membership testing.
//!
//! A bloom filter can tell you with certainty that a key is **not** in the set
//! (no false negatives), but may occasionally report that a key **is** in the
//! set when it isn't (false positives). The false positive rate depends on the
//! number of bits per key and the number of hash probes.
//!
//! ## Usage in SiltDB
//!
//! Each sorted run embeds a bloom filter built from its keys. During point
//! lookups the engine checks the filter first -- if it says "not present",
//! the run is skipped entirely, avoiding index lookups and disk I/O.
//!
//! ## Example
//!
//! ```rust,no_run
//! use bloom::BloomFilter;
//!
//! let keys = vec![b"hello".to_vec(), b"world".to_vec()];
//! let bf = BloomFilter::from_keys(&keys, 10);
//! assert!(bf.may_contain(b"hello"));
//! ```

/// Maximum number of hash probes. Beyond ~30 probes the false-positive rate
/// stops improving and lookups only get slower.
const MAX_PROBES: u32 = 30;

/// Minimum size of the bit array in bytes, so tiny key sets still get a
/// usable filter.
const MIN_FILTER_BYTES: usize = 8;

/// A bloom filter backed by a bit vector with `k` hash probes.
///
/// Probes are derived by double hashing: probe `i` touches bit
/// `(h1 + i * h2) mod num_bits`, where `h1` and `h2` are two murmur3-32
/// hashes (the second seeded by the first). This costs two hash computations
/// per key regardless of the probe count.
pub struct BloomFilter {
    /// The bit array storing the filter state.
    bits: Vec<u8>,
    /// Number of hash probes per key (k).
    num_probes: u32,
    /// Number of keys the filter was built from. Zero for decoded filters.
    num_keys: usize,
}

impl BloomFilter {
    /// Builds a filter from a finite set of keys with the given
    /// bits-per-key budget.
    ///
    /// Sizing:
    /// - probes `k = round(bits_per_key * ln 2)`, clamped to `[1, 30]`.
    /// - bit array = `ceil(keys * bits_per_key / 8)` bytes, minimum 8.
    #[must_use]
    pub fn from_keys(keys: &[Vec<u8>], bits_per_key: usize) -> Self {
        let num_bits = keys.len() * bits_per_key;
        let num_bytes = num_bits.div_ceil(8).max(MIN_FILTER_BYTES);

        let num_probes = ((bits_per_key as f64) * std::f64::consts::LN_2).round() as u32;
        let num_probes = num_probes.clamp(1, MAX_PROBES);

        let mut filter = Self {
            bits: vec![0u8; num_bytes],
            num_probes,
            num_keys: keys.len(),
        };

        for key in keys {
            filter.add_key(key);
        }

        filter
    }

    /// Sets the probe bits for a single key.
    fn add_key(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        let num_bits = (self.bits.len() * 8) as u64;

        for i in 0..self.num_probes {
            let bit_pos = (h1 as u64).wrapping_add((i as u64).wrapping_mul(h2 as u64)) % num_bits;
            self.bits[(bit_pos / 8) as usize] |= 1 << (bit_pos % 8);
        }
    }

    /// Returns `true` if the key **might** be in the set, `false` if it is
    /// **definitely not** in the set.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        let num_bits = (self.bits.len() * 8) as u64;

        for i in 0..self.num_probes {
            let bit_pos = (h1 as u64).wrapping_add((i as u64).wrapping_mul(h2 as u64)) % num_bits;
            if self.bits[(bit_pos / 8) as usize] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
        }
        true
    }

    /// Returns the number of hash probes.
    #[must_use]
    pub fn num_probes(&self) -> u32 {
        self.num_probes
    }

    /// Returns the size of the serialized filter in bytes.
    ///
    /// Layout: `num_probes(u32) + bits`.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        4 + self.bits.len()
    }

    /// Serializes the filter.
    ///
    /// Wire format (little-endian):
    /// ```text
    /// [num_probes: u32][bits: bytes]
    /// ```
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        out.extend_from_slice(&self.num_probes.to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    /// Deserializes a filter from its encoded form.
    ///
    /// Returns `None` if the buffer is too short to hold the probe count and
    /// at least one byte of bit array, or if the probe count is out of range.
    #[must_use]
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 5 {
            return None;
        }
        let num_probes = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if num_probes == 0 || num_probes > MAX_PROBES {
            return None;
        }
        Some(Self {
            bits: data[4..].to_vec(),
            num_probes,
            num_keys: 0,
        })
    }

    /// Expected false-positive rate, computed from the filter parameters:
    /// `p = (1 - e^(-kn/m))^k`.
    ///
    /// Returns `0.0` when the key count is unknown (freshly decoded filters).
    #[must_use]
    pub fn false_positive_rate(&self) -> f64 {
        if self.num_keys == 0 {
            return 0.0;
        }
        let k = self.num_probes as f64;
        let n = self.num_keys as f64;
        let m = (self.bits.len() * 8) as f64;
        (1.0 - (-k * n / m).exp()).powf(k)
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_probes", &self.num_probes)
            .field("bytes", &self.bits.len())
            .field("num_keys", &self.num_keys)
            .finish()
    }
}

/// Computes the two base hashes for double hashing.
///
/// The second hash is seeded by the first, so a single key always maps to
/// the same probe sequence regardless of filter size.
fn hash_pair(key: &[u8]) -> (u32, u32) {
    let h1 = murmur3_32(key, 0);
    let h2 = murmur3_32(key, h1);
    (h1, h2)
}

/// MurmurHash3, 32-bit variant.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, &b) in tail.iter().enumerate() {
            k1 ^= (b as u32) << (i * 8);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;

    // fmix32
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod tests;
