use super::*;

// -------------------- Construction --------------------

#[test]
fn from_keys_creates_valid_filter() {
    let keys: Vec<Vec<u8>> = (0..100u64).map(|i| i.to_le_bytes().to_vec()).collect();
    let bf = BloomFilter::from_keys(&keys, 10);
    assert!(bf.num_probes() > 0);
    assert!(bf.serialized_size() > 4);
}

#[test]
fn probe_count_follows_bits_per_key() {
    let keys = vec![b"a".to_vec()];
    // round(10 * ln 2) = 7
    assert_eq!(BloomFilter::from_keys(&keys, 10).num_probes(), 7);
    // round(1 * ln 2) = 1 (clamped minimum is also 1)
    assert_eq!(BloomFilter::from_keys(&keys, 1).num_probes(), 1);
    // huge bits-per-key clamps at 30
    assert_eq!(BloomFilter::from_keys(&keys, 100).num_probes(), 30);
}

#[test]
fn empty_key_set_gets_minimum_bits() {
    let bf = BloomFilter::from_keys(&[], 10);
    // 4-byte probe count + 8-byte minimum bit array
    assert_eq!(bf.serialized_size(), 12);
    assert!(!bf.may_contain(b"anything"));
}

// -------------------- Insert / Contains --------------------

#[test]
fn no_false_negatives() {
    let keys: Vec<Vec<u8>> = (0..1000u64)
        .map(|i| format!("key{:05}", i).into_bytes())
        .collect();
    let bf = BloomFilter::from_keys(&keys, 10);
    for key in &keys {
        assert!(
            bf.may_contain(key),
            "key {:?} should be found",
            String::from_utf8_lossy(key)
        );
    }
}

#[test]
fn measured_false_positive_rate_under_five_percent() {
    // 10k members at 10 bits/key; probe 10k non-members.
    let keys: Vec<Vec<u8>> = (0..10_000u64)
        .map(|i| format!("key{:05}", i).into_bytes())
        .collect();
    let bf = BloomFilter::from_keys(&keys, 10);

    let mut false_positives = 0;
    for i in 10_000..20_000u64 {
        if bf.may_contain(format!("key{:05}", i).as_bytes()) {
            false_positives += 1;
        }
    }

    // 10 bits/key targets ~1%; 5% leaves plenty of statistical headroom.
    assert!(
        false_positives < 500,
        "too many false positives: {}/10000",
        false_positives
    );
}

#[test]
fn empty_key_is_storable() {
    let bf = BloomFilter::from_keys(&[b"".to_vec()], 10);
    assert!(bf.may_contain(b""));
}

#[test]
fn binary_key_is_storable() {
    let key = vec![0u8, 1, 2, 255, 254, 253];
    let bf = BloomFilter::from_keys(&[key.clone()], 10);
    assert!(bf.may_contain(&key));
}

// -------------------- Serialization --------------------

#[test]
fn roundtrip_encode_decode() {
    let keys: Vec<Vec<u8>> = (0..500u64).map(|i| i.to_le_bytes().to_vec()).collect();
    let bf = BloomFilter::from_keys(&keys, 10);

    let buf = bf.encode();
    assert_eq!(buf.len(), bf.serialized_size());

    let bf2 = BloomFilter::decode(&buf).expect("decode failed");
    assert_eq!(bf2.num_probes(), bf.num_probes());

    // All inserted keys still found after the roundtrip
    for key in &keys {
        assert!(bf2.may_contain(key));
    }
}

#[test]
fn decode_rejects_short_buffer() {
    assert!(BloomFilter::decode(&[]).is_none());
    assert!(BloomFilter::decode(&[7, 0, 0, 0]).is_none());
}

#[test]
fn decode_rejects_bad_probe_count() {
    let mut buf = vec![0u8; 12];
    // probe count 0
    assert!(BloomFilter::decode(&buf).is_none());
    // probe count 31 (> MAX_PROBES)
    buf[0] = 31;
    assert!(BloomFilter::decode(&buf).is_none());
}

// -------------------- False-positive estimate --------------------

#[test]
fn false_positive_rate_estimate_is_sane() {
    let keys: Vec<Vec<u8>> = (0..1000u64).map(|i| i.to_le_bytes().to_vec()).collect();
    let bf = BloomFilter::from_keys(&keys, 10);
    let rate = bf.false_positive_rate();
    assert!(rate > 0.0 && rate < 0.05, "estimate out of range: {}", rate);

    // Decoded filters don't know their key count
    let decoded = BloomFilter::decode(&bf.encode()).unwrap();
    assert_eq!(decoded.false_positive_rate(), 0.0);
}

// -------------------- Debug --------------------

#[test]
fn debug_impl_works() {
    let bf = BloomFilter::from_keys(&[b"x".to_vec()], 10);
    let debug = format!("{:?}", bf);
    assert!(debug.contains("BloomFilter"));
    assert!(debug.contains("num_probes"));
}
