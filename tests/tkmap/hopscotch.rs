// The concurrent hopscotch table on its own: insert/lookup/remove,
// duplicate rejection, displacement and resize under load, and basic
// multi-threaded consistency.

use ddscdr::tkmap::hopscotch::{pin, EpochOwned, HopscotchMap};
use std::sync::Arc;

#[derive(Debug)]
struct Entry {
    key: u32,
    val: u32,
}

fn ehash(e: &Entry) -> u32 {
    // Multiplicative scramble; tests that need collisions build them via
    // the key distribution instead.
    e.key.wrapping_mul(2_654_435_761)
}

fn eeq(a: &Entry, b: &Entry) -> bool {
    a.key == b.key
}

fn new_map() -> HopscotchMap<Entry> {
    HopscotchMap::new(1, ehash, eeq)
}

fn template(key: u32) -> Entry {
    Entry { key, val: 0 }
}

#[test]
fn insert_then_lookup() {
    let map = new_map();
    let guard = pin();
    map.add(EpochOwned::new(Entry { key: 1, val: 100 }), &guard)
        .unwrap();
    let found = map.lookup(&template(1), &guard).expect("inserted key");
    assert_eq!(unsafe { found.deref() }.val, 100);
    assert!(map.lookup(&template(2), &guard).is_none());
}

#[test]
fn duplicate_insert_returns_entry_back() {
    let map = new_map();
    let guard = pin();
    map.add(EpochOwned::new(Entry { key: 5, val: 1 }), &guard)
        .unwrap();
    let lost = map
        .add(EpochOwned::new(Entry { key: 5, val: 2 }), &guard)
        .unwrap_err();
    assert_eq!(lost.val, 2);
    // The original value stays.
    let found = map.lookup(&template(5), &guard).unwrap();
    assert_eq!(unsafe { found.deref() }.val, 1);
}

#[test]
fn remove_unlinks_and_returns_pointer() {
    let map = new_map();
    let guard = pin();
    map.add(EpochOwned::new(Entry { key: 9, val: 90 }), &guard)
        .unwrap();
    let removed = map.remove(&template(9), &guard).expect("present");
    assert_eq!(unsafe { removed.deref() }.key, 9);
    unsafe { guard.defer_destroy(removed) };
    assert!(map.lookup(&template(9), &guard).is_none());
    assert!(map.remove(&template(9), &guard).is_none());
}

#[test]
fn grows_past_initial_capacity() {
    // Far more entries than the initial 32 buckets: exercises displacement
    // and repeated resize.
    let map = new_map();
    let guard = pin();
    for k in 0..2000u32 {
        map.add(EpochOwned::new(Entry { key: k, val: k * 3 }), &guard)
            .unwrap();
    }
    for k in 0..2000u32 {
        let found = map.lookup(&template(k), &guard).expect("entry survived growth");
        assert_eq!(unsafe { found.deref() }.val, k * 3);
    }
}

#[test]
fn for_each_visits_every_entry() {
    let map = new_map();
    let guard = pin();
    for k in 0..100u32 {
        map.add(EpochOwned::new(Entry { key: k, val: 0 }), &guard)
            .unwrap();
    }
    let mut seen = vec![false; 100];
    map.for_each(&guard, |e| seen[e.key as usize] = true);
    assert!(seen.iter().all(|&s| s));
}

#[test]
fn concurrent_inserts_and_lookups() {
    let map = Arc::new(new_map());
    let threads: Vec<_> = (0..4u32)
        .map(|t| {
            let map = Arc::clone(&map);
            std::thread::spawn(move || {
                let lo = t * 500;
                for k in lo..lo + 500 {
                    let guard = pin();
                    map.add(EpochOwned::new(Entry { key: k, val: k }), &guard)
                        .unwrap();
                    // Immediately visible to the inserting thread.
                    assert!(map.lookup(&template(k), &guard).is_some());
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    let guard = pin();
    for k in 0..2000u32 {
        assert!(map.lookup(&template(k), &guard).is_some(), "key {k} missing");
    }
}

#[test]
fn concurrent_insert_remove_churn() {
    let map = Arc::new(new_map());
    let threads: Vec<_> = (0..4u32)
        .map(|t| {
            let map = Arc::clone(&map);
            std::thread::spawn(move || {
                let lo = t * 100;
                for round in 0..50 {
                    for k in lo..lo + 100 {
                        let guard = pin();
                        let _ = map.add(
                            EpochOwned::new(Entry {
                                key: k,
                                val: round,
                            }),
                            &guard,
                        );
                    }
                    for k in lo..lo + 100 {
                        let guard = pin();
                        if let Some(removed) = map.remove(&template(k), &guard) {
                            unsafe { guard.defer_destroy(removed) };
                        }
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    let guard = pin();
    for k in 0..400u32 {
        assert!(map.lookup(&template(k), &guard).is_none());
    }
}
