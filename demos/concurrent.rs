//! Example demonstrating concurrent operations on the lock-free slot map.
//!
//! Multiple threads insert, look up, and erase through generation-tagged
//! keys without blocking each other; the deferred compaction runs at the
//! end as an explicit drain.

use petek::SlotMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    println!("=== Concurrent Slot Map Demo ===\n");

    let map = Arc::new(SlotMap::new());

    // Spawn 8 threads, each inserting 10,000 elements
    println!("Benchmarking concurrent inserts...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for thread_id in 0..8u64 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            let mut keys = Vec::with_capacity(10_000);
            for i in 0..10_000u64 {
                keys.push(map.insert(thread_id * 10_000 + i));
            }
            keys
        }));
    }

    let keys: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let duration = start.elapsed();
    println!(
        "Inserted {} entries from 8 threads in {:?} ({:.2} ops/sec)",
        keys.len(),
        duration,
        keys.len() as f64 / duration.as_secs_f64()
    );
    println!("Map contains {} entries\n", map.len());

    // Every key resolves, in parallel
    println!("Benchmarking concurrent lookups...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for chunk in keys.chunks(keys.len() / 8) {
        let map = Arc::clone(&map);
        let chunk = chunk.to_vec();
        handles.push(thread::spawn(move || {
            let mut found = 0usize;
            for key in chunk {
                if map.find(key).is_some() {
                    found += 1;
                }
            }
            found
        }));
    }

    let total_found: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let duration = start.elapsed();
    println!(
        "Resolved {} keys in {:?} ({:.2} ops/sec)\n",
        total_found,
        duration,
        total_found as f64 / duration.as_secs_f64()
    );

    // Erase half the keys, then reclaim their dense cells deterministically.
    println!("Erasing half the entries...");
    for key in keys.iter().step_by(2) {
        map.erase(*key);
    }
    map.drain_erase_queue(true);
    println!("Map contains {} entries after drain", map.len());

    let mut sum = 0u64;
    map.iterate(|v| sum += *v);
    println!("Sum over the dense survivors: {sum}");
}
