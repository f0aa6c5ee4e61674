// Concurrency: many threads doing find/unref over a small key set must
// keep iids stable while references are held and leave the map empty when
// every reference has been released.

use crate::common::*;
use ddscdr::{InstanceMap, SampleKind, SerData, Topic, IID_NIL};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn key_sample(topic: &Arc<Topic>, b: u32) -> Arc<SerData> {
    let sample = AbsSample::new(0, b, "");
    unsafe { SerData::from_sample(topic, SampleKind::Key, &sample as *const AbsSample as *const u8) }
}

#[test]
fn concurrent_find_unref_drains_to_empty() {
    const THREADS: u32 = 8;
    const KEYS: u32 = 8;
    const ROUNDS: u32 = 400;

    let topic = abs_topic();
    let map = Arc::new(InstanceMap::new());
    let samples: Vec<Arc<SerData>> = (0..KEYS).map(|k| key_sample(&topic, k)).collect();

    let threads: Vec<_> = (0..THREADS)
        .map(|t| {
            let map = Arc::clone(&map);
            let samples = samples.clone();
            std::thread::spawn(move || {
                let mut state = 0x9e3779b97f4a7c15u64 ^ (t as u64);
                for _ in 0..ROUNDS {
                    state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    let k = ((state >> 32) % KEYS as u64) as usize;
                    let tk = map.find(&samples[k], false, true).expect("create");
                    // Hold briefly, occasionally stacking a second ref.
                    if state & 1 == 0 {
                        InstanceMap::instance_ref(tk);
                        map.instance_unref(tk);
                    }
                    map.instance_unref(tk);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    // Every reference released: no instance survives.
    for s in &samples {
        assert_eq!(map.lookup_iid(s), IID_NIL);
    }
    assert!(map.is_empty());
}

#[test]
fn iid_stable_while_any_reference_is_held() {
    const THREADS: u32 = 4;
    const ROUNDS: u32 = 300;

    let topic = abs_topic();
    let map = Arc::new(InstanceMap::new());
    let sd = key_sample(&topic, 777);

    // An anchor reference pins the instance for the whole test.
    let anchor_iid = {
        let tk = map.find(&sd, false, true).unwrap();
        tk.iid()
    };

    let observed_change = Arc::new(AtomicU64::new(0));
    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let map = Arc::clone(&map);
            let sd = Arc::clone(&sd);
            let observed_change = Arc::clone(&observed_change);
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let tk = map.find(&sd, false, true).unwrap();
                    if tk.iid() != anchor_iid {
                        observed_change.store(tk.iid(), Ordering::Relaxed);
                    }
                    map.instance_unref(tk);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(observed_change.load(Ordering::Relaxed), 0);
    assert_eq!(map.lookup_iid(&sd), anchor_iid);

    // Drop the anchor.
    let tk = map.find_by_id(anchor_iid).unwrap();
    map.instance_unref(tk);
    assert_eq!(map.lookup_iid(&sd), IID_NIL);
}

#[test]
fn recreation_after_concurrent_teardown_yields_fresh_iids() {
    const THREADS: u32 = 6;
    const ROUNDS: u32 = 200;

    let topic = abs_topic();
    let map = Arc::new(InstanceMap::new());
    let sd = key_sample(&topic, 31337);

    // Threads alternately create-and-release the same key, racing their
    // teardowns against each other's lookups.
    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let map = Arc::clone(&map);
            let sd = Arc::clone(&sd);
            std::thread::spawn(move || {
                let mut iids = Vec::with_capacity(ROUNDS as usize);
                for _ in 0..ROUNDS {
                    let tk = map.find(&sd, false, true).expect("create");
                    iids.push(tk.iid());
                    map.instance_unref(tk);
                }
                iids
            })
        })
        .collect();
    let mut all: Vec<u64> = Vec::new();
    for t in threads {
        all.extend(t.join().unwrap());
    }

    // No thread may ever observe the nil id, and the key is gone at the end.
    assert!(all.iter().all(|&iid| iid != IID_NIL));
    assert_eq!(map.lookup_iid(&sd), IID_NIL);
    assert!(map.is_empty());
}
