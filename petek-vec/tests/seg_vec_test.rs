use petek_vec::{Error, SegVec};
use std::sync::Arc;
use std::thread;

#[test]
fn test_push_get_roundtrip() {
    let v = SegVec::new();
    for i in 0..100usize {
        assert_eq!(v.push(i * 7), Ok(i));
    }
    assert_eq!(v.len(), 100);
    for i in 0..100usize {
        assert_eq!(v.get(i), Some(&(i * 7)));
    }
    assert_eq!(v.get(100), None);
}

#[test]
fn test_addresses_are_stable_across_growth() {
    let v = SegVec::new();
    v.push(String::from("anchor")).unwrap();
    let before = v.get(0).unwrap() as *const String;

    for i in 0..10_000 {
        v.push(format!("filler-{i}")).unwrap();
    }

    let after = v.get(0).unwrap() as *const String;
    assert_eq!(before, after);
    assert_eq!(v.get(0).unwrap(), "anchor");
}

#[test]
fn test_reserve_is_idempotent_and_monotone() {
    let v: SegVec<u64> = SegVec::new();
    v.reserve(100).unwrap();
    let cap = v.capacity();
    assert!(cap >= 100);

    v.reserve(50).unwrap();
    assert_eq!(v.capacity(), cap);

    v.reserve(100).unwrap();
    assert_eq!(v.capacity(), cap);

    v.reserve(1000).unwrap();
    assert!(v.capacity() >= 1000);
}

#[test]
fn test_pop_returns_in_lifo_order() {
    let mut v = SegVec::new();
    v.push(1).unwrap();
    v.push(2).unwrap();
    v.push(3).unwrap();

    assert_eq!(v.pop(), Some(3));
    assert_eq!(v.pop(), Some(2));
    assert_eq!(v.len(), 1);

    v.push(4).unwrap();
    assert_eq!(v.pop(), Some(4));
    assert_eq!(v.pop(), Some(1));
    assert_eq!(v.pop(), None);
    assert!(v.is_empty());
}

#[test]
fn test_update_in_place() {
    let mut v = SegVec::new();
    v.push(String::from("old")).unwrap();
    assert!(v.update(0, String::from("new")));
    assert!(!v.update(1, String::from("nope")));
    assert_eq!(v.get(0).unwrap(), "new");
}

#[test]
fn test_iterator_covers_published_prefix() {
    let v = SegVec::new();
    for i in 0..50u64 {
        v.push(i).unwrap();
    }
    let collected: Vec<u64> = v.iter().copied().collect();
    assert_eq!(collected, (0..50).collect::<Vec<u64>>());
    assert_eq!(v.iter().len(), 50);
}

#[test]
fn test_bucket_budget_exhaustion() {
    // Buckets of 2 and 4: six elements total.
    let v = SegVec::with_config(2, 2);
    for i in 0..6 {
        v.push(i).unwrap();
    }
    assert_eq!(v.push(99), Err(Error::CapacityExceeded));
    assert_eq!(v.len(), 6);
    // The failed push must not have corrupted the prefix.
    for i in 0..6 {
        assert_eq!(v.get(i as usize), Some(&i));
    }
}

#[test]
fn test_max_buckets_caps_capacity() {
    // Default first bucket of 2 limited to 3 buckets: 2 + 4 + 8 elements.
    let v = SegVec::with_max_buckets(3);
    assert_eq!(v.max_capacity(), 14);
    for i in 0..14 {
        assert_eq!(v.push(i), Ok(i));
    }
    assert_eq!(v.push(14), Err(Error::CapacityExceeded));
    assert_eq!(v.len(), 14);
    assert_eq!(v.bucket_count(), 3);
    assert_eq!(v.reserve(15), Err(Error::CapacityExceeded));
}

#[test]
fn test_first_bucket_rounding() {
    let v: SegVec<u8> = SegVec::with_first_bucket(5);
    v.reserve(8).unwrap();
    // 5 rounds up to 8, so one bucket covers the whole reservation.
    assert_eq!(v.bucket_count(), 1);
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_push() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 5_000;

    let v = Arc::new(SegVec::new());
    let mut handles = Vec::new();

    for t in 0..THREADS {
        let v = Arc::clone(&v);
        handles.push(thread::spawn(move || {
            for i in 0..PER_THREAD {
                v.push(t * PER_THREAD + i).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(v.len(), THREADS * PER_THREAD);

    // Every value appears exactly once.
    let mut seen = vec![false; THREADS * PER_THREAD];
    for value in v.iter() {
        assert!(!seen[*value], "duplicate value {value}");
        seen[*value] = true;
    }
    assert!(seen.iter().all(|&s| s));
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_push_and_read() {
    let v = Arc::new(SegVec::new());
    let writer = {
        let v = Arc::clone(&v);
        thread::spawn(move || {
            for i in 0..20_000u64 {
                v.push(i).unwrap();
            }
        })
    };

    // Readers only ever see fully written elements.
    for _ in 0..100 {
        let n = v.len();
        for i in 0..n {
            assert_eq!(*v.get(i).unwrap(), i as u64);
        }
        thread::yield_now();
    }
    writer.join().unwrap();
    assert_eq!(v.len(), 20_000);
}
