use petek::{Key, LockedSlotMap};
use std::sync::Arc;
use std::thread;

#[test]
fn test_insert_get_erase_basics() {
    let map = LockedSlotMap::new();
    let k1 = map.insert(48);
    let k2 = map.insert(0);
    let k3 = map.insert(-9823);

    assert_eq!(map.get(k1), Some(48));
    assert_eq!(map.get(k2), Some(0));
    assert_eq!(map.get(k3), Some(-9823));
    assert_eq!(map.len(), 3);

    assert!(map.erase(k2));
    assert_eq!(map.get(k2), None);
    assert_eq!(map.len(), 2);

    assert!(map.erase(k1));
    assert!(map.erase(k3));
    assert!(map.is_empty());
}

#[test]
fn test_erasure_is_immediate() {
    // Unlike the optimistic variants there is no deferred queue: the value
    // is gone and the dense array compacted when erase returns.
    let map = LockedSlotMap::new();
    let keys: Vec<Key> = (0..4).map(|i| map.insert(i)).collect();
    assert!(map.erase(keys[1]));
    assert_eq!(map.len(), 3);

    let mut order = Vec::new();
    map.iterate(|v| order.push(*v));
    assert_eq!(order, vec![0, 3, 2]);
}

#[test]
fn test_generation_reuse() {
    let map = LockedSlotMap::new();
    let k = map.insert("a");
    assert_eq!((k.index(), k.generation()), (0, 0));

    assert!(map.erase(k));
    let k2 = map.insert("b");
    assert_eq!((k2.index(), k2.generation()), (0, 1));

    assert_eq!(map.get(k), None);
    assert!(!map.erase(k));
    assert_eq!(map.get(k2), Some("b"));
}

#[test]
fn test_take_returns_the_value() {
    let map = LockedSlotMap::new();
    let key = map.insert(String::from("mine"));
    assert_eq!(map.take(key), Some(String::from("mine")));
    assert_eq!(map.take(key), None);
}

#[test]
fn test_with_mut_updates_in_place() {
    let map = LockedSlotMap::new();
    let key = map.insert(10);
    assert_eq!(map.with_mut(key, |v| {
        *v += 5;
        *v
    }), Some(15));
    assert_eq!(map.get(key), Some(15));
}

#[test]
fn test_iterate_mut_touches_every_value() {
    let map = LockedSlotMap::new();
    let keys: Vec<Key> = (0..10).map(|i| map.insert(i)).collect();
    map.iterate_mut(|v| *v *= 2);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(map.get(*key), Some((i as i32) * 2));
    }
}

#[test]
fn test_clear_kills_every_key() {
    let map = LockedSlotMap::new();
    let keys: Vec<Key> = (0..8).map(|i| map.insert(i)).collect();
    map.clear();
    assert!(map.is_empty());
    for key in keys {
        assert_eq!(map.get(key), None);
        assert!(!map.contains_key(key));
    }
}

#[test]
#[cfg_attr(miri, ignore)]
fn test_concurrent_insert_and_erase() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 2_000;

    let map = Arc::new(LockedSlotMap::new());
    let mut handles = Vec::new();

    for t in 0..THREADS {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            let mut keys = Vec::with_capacity(PER_THREAD);
            for i in 0..PER_THREAD {
                keys.push(map.insert(t * PER_THREAD + i));
            }
            // Erase every other key this thread owns.
            for key in keys.iter().step_by(2) {
                assert!(map.erase(*key));
            }
            keys
        }));
    }

    let mut live = 0;
    for handle in handles {
        let keys = handle.join().unwrap();
        for (i, key) in keys.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(map.get(*key), None);
            } else {
                assert!(map.get(*key).is_some());
                live += 1;
            }
        }
    }
    assert_eq!(map.len(), live);
}
