use cmap::ConcurrentMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_sets() {
    let map = Arc::new(ConcurrentMap::new());
    let mut handles = vec![];

    // Spawn 10 threads, each inserting 100 items
    for thread_id in 0..10 {
        let map = Arc::clone(&map);
        let handle = thread::spawn(move || {
            for i in 0..100 {
                let key = format!("thread_{}_key_{}", thread_id, i);
                map.set(key, i);
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.count(), 1000);
}

#[test]
fn test_two_workers_disjoint_ranges() {
    let map = Arc::new(ConcurrentMap::new());

    let workers: Vec<_> = [0..500, 500..1000]
        .into_iter()
        .map(|range| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in range {
                    map.set(i.to_string(), i);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(map.count(), 1000);
    for i in 0..1000 {
        assert_eq!(map.get(&i.to_string()), Some(i));
    }
}

#[test]
fn test_concurrent_reads() {
    let map = Arc::new(ConcurrentMap::new());

    for i in 0..100 {
        map.set(format!("key_{}", i), i);
    }

    let mut handles = vec![];

    // Spawn 20 threads, each reading all items
    for _ in 0..20 {
        let map = Arc::clone(&map);
        let handle = thread::spawn(move || {
            for i in 0..100 {
                let key = format!("key_{}", i);
                assert_eq!(map.get(&key), Some(i));
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_concurrent_upserts() {
    let map = Arc::new(ConcurrentMap::new());
    let mut handles = vec![];

    // Spawn 10 threads, each incrementing the counter 100 times
    for _ in 0..10 {
        let map = Arc::clone(&map);
        let handle = thread::spawn(move || {
            for _ in 0..100 {
                map.upsert("counter".to_string(), |old| old.copied().unwrap_or(0) + 1);
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // Counter should be 1000 (10 threads * 100 increments)
    assert_eq!(map.get(&"counter".to_string()), Some(1000));
}

#[test]
fn test_get_or_insert_stores_one_value() {
    const THREADS: usize = 16;

    let map = Arc::new(ConcurrentMap::new());
    let barrier = Arc::new(Barrier::new(THREADS));
    let producer_calls = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            let producer_calls = Arc::clone(&producer_calls);
            thread::spawn(move || {
                barrier.wait();
                map.get_or_insert("shared".to_string(), || {
                    producer_calls.fetch_add(1, Ordering::SeqCst);
                    format!("value_from_{}", thread_id)
                })
            })
        })
        .collect();

    let returned: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Every caller saw the same stored value, produced by exactly one thread.
    assert_eq!(returned.len(), 1);
    assert_eq!(producer_calls.load(Ordering::SeqCst), 1);
    let stored = map.get(&"shared".to_string()).unwrap();
    assert!(returned.contains(&stored));
    assert_eq!(map.count(), 1);
}

#[test]
fn test_get_or_insert_several_keys() {
    let map = Arc::new(ConcurrentMap::new());

    let handles: Vec<_> = (0..10)
        .map(|index| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let key = format!("concurrent_key{}", index % 3);
                map.get_or_insert(key, || format!("concurrent_value_{}", index));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.count(), 3);
}

#[test]
fn test_set_if_absent_single_winner() {
    const THREADS: usize = 8;

    let map = Arc::new(ConcurrentMap::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                map.set_if_absent("slot", thread_id)
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn test_pop_each_value_once() {
    let map = Arc::new(ConcurrentMap::new());
    for i in 0..1000 {
        map.set(i, i);
    }

    let popped = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let map = Arc::clone(&map);
            let popped = Arc::clone(&popped);
            thread::spawn(move || {
                for i in 0..1000 {
                    if map.pop(&i).is_some() {
                        popped.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(popped.load(Ordering::SeqCst), 1000);
    assert!(map.is_empty());
}

#[test]
fn test_concurrent_mixed_operations() {
    let map = Arc::new(ConcurrentMap::new());
    let mut handles = vec![];

    // Spawn writers
    for thread_id in 0..5 {
        let map = Arc::clone(&map);
        let handle = thread::spawn(move || {
            for i in 0..100 {
                let key = format!("key_{}_{}", thread_id, i);
                map.set(key, i);
            }
        });
        handles.push(handle);
    }

    // Spawn readers and iterators
    for _ in 0..5 {
        let map = Arc::clone(&map);
        let handle = thread::spawn(move || {
            for i in 0..200 {
                let key = format!("key_{}_{}", i % 5, i % 100);
                map.get(&key); // May or may not exist, that's ok
                if i % 50 == 0 {
                    let seen = map.iter().count();
                    assert!(seen <= 500);
                }
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.count(), 500);
}

#[test]
fn test_keys_while_removing() {
    let map = Arc::new(ConcurrentMap::new());
    for i in 0..1000 {
        map.set(i.to_string(), i);
    }

    let remover = {
        let map = Arc::clone(&map);
        thread::spawn(move || {
            for i in 0..1000 {
                map.remove(&i.to_string());
            }
        })
    };

    for _ in 0..10 {
        for key in map.keys() {
            assert!(!key.is_empty());
        }
    }

    remover.join().unwrap();
    assert!(map.keys().is_empty());
}
