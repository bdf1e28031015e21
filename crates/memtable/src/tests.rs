use super::*;
use std::sync::Arc;
use std::thread;

// -------------------- Internal key ordering --------------------

#[test]
fn internal_key_orders_by_user_key_then_seq_desc() {
    let a1 = InternalKey::new(b"a".to_vec(), 1);
    let a2 = InternalKey::new(b"a".to_vec(), 2);
    let b1 = InternalKey::new(b"b".to_vec(), 1);

    // same user key: newer sequence sorts first
    assert!(a2 < a1);
    // different user keys: byte order wins regardless of sequence
    assert!(a1 < b1);
    assert!(a2 < b1);
}

#[test]
fn internal_key_shorter_prefix_sorts_first() {
    let short = InternalKey::new(b"ab".to_vec(), 1);
    let long = InternalKey::new(b"abc".to_vec(), 9);
    assert!(short < long);
}

#[test]
fn internal_key_compares_bytes_unsigned() {
    // 0xFF must sort after 0x01, not before (as it would with signed bytes)
    let low = InternalKey::new(vec![0x01], 1);
    let high = InternalKey::new(vec![0xFF], 1);
    assert!(low < high);
}

// -------------------- Insert / get --------------------

#[test]
fn get_returns_latest_visible_version() {
    let m = Memtable::new();
    m.insert(b"k".to_vec(), Some(b"v1".to_vec()), 1);
    m.insert(b"k".to_vec(), Some(b"v2".to_vec()), 2);

    let entry = m.get(b"k", u64::MAX).unwrap();
    assert_eq!(entry.seq, 2);
    assert_eq!(entry.value, Some(b"v2".to_vec()));
}

#[test]
fn get_respects_snapshot() {
    let m = Memtable::new();
    m.insert(b"k".to_vec(), Some(b"v1".to_vec()), 1);
    m.insert(b"k".to_vec(), Some(b"v2".to_vec()), 5);

    // snapshot between the two versions sees the older one
    let entry = m.get(b"k", 3).unwrap();
    assert_eq!(entry.seq, 1);
    assert_eq!(entry.value, Some(b"v1".to_vec()));

    // snapshot before the first version sees nothing
    assert!(m.get(b"k", 0).is_none());
}

#[test]
fn tombstone_is_returned_not_skipped() {
    let m = Memtable::new();
    m.insert(b"k".to_vec(), Some(b"v".to_vec()), 1);
    m.insert(b"k".to_vec(), None, 2);

    let entry = m.get(b"k", u64::MAX).unwrap();
    assert!(entry.is_tombstone());
    assert_eq!(entry.seq, 2);

    // the older version is still reachable below the tombstone
    let entry = m.get(b"k", 1).unwrap();
    assert_eq!(entry.value, Some(b"v".to_vec()));
}

#[test]
fn get_does_not_match_neighbouring_keys() {
    let m = Memtable::new();
    m.insert(b"aa".to_vec(), Some(b"1".to_vec()), 1);
    m.insert(b"ac".to_vec(), Some(b"2".to_vec()), 2);

    assert!(m.get(b"ab", u64::MAX).is_none());
    assert!(m.get(b"a", u64::MAX).is_none());
}

#[test]
fn empty_value_is_not_a_tombstone() {
    let m = Memtable::new();
    m.insert(b"k".to_vec(), Some(Vec::new()), 1);

    let entry = m.get(b"k", u64::MAX).unwrap();
    assert!(!entry.is_tombstone());
    assert_eq!(entry.value, Some(Vec::new()));
}

// -------------------- Size accounting --------------------

#[test]
fn approx_size_grows_with_entries() {
    let m = Memtable::new();
    assert_eq!(m.approx_size(), 0);
    m.insert(b"a".to_vec(), Some(b"aaa".to_vec()), 1);
    let after_one = m.approx_size();
    assert!(after_one >= 4);

    // a second version of the same key still costs memory
    m.insert(b"a".to_vec(), Some(b"bb".to_vec()), 2);
    assert!(m.approx_size() > after_one);
    assert_eq!(m.len(), 2);
}

#[test]
fn should_rotate_once_limit_reached() {
    let m = Memtable::new();
    assert!(!m.should_rotate(100));
    m.insert(b"key".to_vec(), Some(vec![0u8; 100]), 1);
    assert!(m.should_rotate(100));
}

// -------------------- Iteration --------------------

#[test]
fn iter_yields_internal_key_order() {
    let m = Arc::new(Memtable::new());
    m.insert(b"b".to_vec(), Some(b"2".to_vec()), 2);
    m.insert(b"a".to_vec(), Some(b"1".to_vec()), 1);
    m.insert(b"a".to_vec(), Some(b"1b".to_vec()), 3);
    m.insert(b"c".to_vec(), None, 4);

    let items: Vec<_> = MemtableIter::new(m).collect();
    let keys_and_seqs: Vec<_> = items
        .iter()
        .map(|(k, e)| (k.as_slice(), e.seq))
        .collect();

    // "a" newest first, then "b", then the "c" tombstone
    assert_eq!(
        keys_and_seqs,
        vec![(&b"a"[..], 3), (&b"a"[..], 1), (&b"b"[..], 2), (&b"c"[..], 4)]
    );
    assert!(items[3].1.is_tombstone());
}

#[test]
fn iter_survives_concurrent_inserts() {
    let m = Arc::new(Memtable::new());
    for i in 0..100u64 {
        m.insert(format!("k{:04}", i).into_bytes(), Some(b"v".to_vec()), i + 1);
    }

    let mut iter = MemtableIter::new(Arc::clone(&m));
    // consume half, then insert more from another thread
    for _ in 0..50 {
        iter.next().unwrap();
    }

    let m2 = Arc::clone(&m);
    thread::spawn(move || {
        for i in 100..200u64 {
            m2.insert(format!("z{:04}", i).into_bytes(), Some(b"v".to_vec()), i + 1);
        }
    })
    .join()
    .unwrap();

    // the remaining original keys plus the new ones are all reachable
    let rest: Vec<_> = iter.collect();
    assert_eq!(rest.len(), 50 + 100);
}

// -------------------- Concurrent reads --------------------

#[test]
fn concurrent_readers_with_single_writer() {
    let m = Arc::new(Memtable::new());
    m.insert(b"stable".to_vec(), Some(b"base".to_vec()), 1);

    let writer = {
        let m = Arc::clone(&m);
        thread::spawn(move || {
            for i in 0..1000u64 {
                m.insert(format!("k{}", i).into_bytes(), Some(b"v".to_vec()), i + 2);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let entry = m.get(b"stable", u64::MAX).unwrap();
                    assert_eq!(entry.value, Some(b"base".to_vec()));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(m.len(), 1001);
}
