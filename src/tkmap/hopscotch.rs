//! Concurrent hopscotch hash table.
//!
//! Open addressing with a hop range of 32: every entry lives within 32
//! slots of its home bucket, whose `hopinfo` bitmap records which of those
//! slots belong to it.  Lookups are lock-free — they read the home bucket's
//! `timestamp`, scan the hop window, and retry when the timestamp moved
//! under them (bounded retries, then one pessimistic full-window scan).
//! Inserts take the home bucket's lock, claim a free slot within an add
//! range of 64, and displace entries toward the home bucket when the free
//! slot is too far.  When no slot can be brought close enough the table
//! doubles under a write-locked stripe of resize locks.
//!
//! Memory reclamation is epoch-based: retired bucket arrays, and entries a
//! caller removes, are destroyed only after all concurrent readers have
//! unpinned.
//!
//! Per-bucket locks are a single 32-bit word — high bit means locked, the
//! low bits count waiters — backed by a stripe of mutex/condvar pairs.
//! Unlock broadcasts because each condvar is shared by many buckets.

use std::sync::atomic::{fence, AtomicU32, Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use parking_lot::{Condvar, Mutex, RwLock};

// Epoch handles are part of the table's public API surface: callers pin a
// guard around lookups and build entries as `Owned` values.
pub use crossbeam_epoch::{pin, Guard as EpochGuard, Owned as EpochOwned, Shared as EpochShared};

/// Entries live within this many slots of their home bucket.
const HOP_RANGE: u32 = 32;
/// Inserts probe this far for a free slot before resizing.
const ADD_RANGE: u32 = 64;
const NOT_A_BUCKET: u32 = u32::MAX;
/// Optimistic lookup retries before falling back to a pessimistic scan.
const MAX_TRIES: u32 = 4;
/// Mutex/condvar pairs backing the per-bucket lock words.
const N_BACKING_LOCKS: usize = 32;
/// Reader-writer locks serializing inserts against resize.
const N_RESIZE_LOCKS: usize = 8;

const LOCKBIT: u32 = 1 << 31;
/// Pointer tag marking a slot that is reserved but not yet published.
const BUSY_TAG: usize = 1;

struct Bucket<T> {
    hopinfo: AtomicU32,
    /// Bumped on every displacement out of this bucket's hop window so
    /// in-flight lookups can detect that they may have missed the entry.
    timestamp: AtomicU32,
    lock: AtomicU32,
    data: Atomic<T>,
}

impl<T> Bucket<T> {
    fn new() -> Bucket<T> {
        Bucket {
            hopinfo: AtomicU32::new(0),
            timestamp: AtomicU32::new(0),
            lock: AtomicU32::new(0),
            data: Atomic::null(),
        }
    }
}

struct BucketArray<T> {
    /// `size - 1`; size is a power of two of at least `HOP_RANGE`.
    idxmask: u32,
    bs: Box<[Bucket<T>]>,
}

impl<T> BucketArray<T> {
    fn new(size: u32) -> BucketArray<T> {
        debug_assert!(size.is_power_of_two() && size >= HOP_RANGE);
        let bs: Vec<Bucket<T>> = (0..size).map(|_| Bucket::new()).collect();
        BucketArray {
            idxmask: size - 1,
            bs: bs.into_boxed_slice(),
        }
    }
}

struct BackingLock {
    lock: Mutex<()>,
    cv: Condvar,
}

/// A slot holds a real entry when its pointer is non-null; a null pointer
/// tagged [`BUSY_TAG`] is reserved by an in-flight insert or displacement.
#[inline]
fn slot_valid<T>(p: Shared<'_, T>) -> bool {
    !p.is_null()
}

#[inline]
fn slot_free<T>(p: Shared<'_, T>) -> bool {
    p.is_null() && p.tag() == 0
}

#[inline]
fn busy_marker<'g, T>() -> Shared<'g, T> {
    Shared::null().with_tag(BUSY_TAG)
}

/// The concurrent table.  Generic over the entry type; identity is defined
/// by the caller-supplied hash and equality functions, which must agree
/// (`equals(a, b)` implies `hash(a) == hash(b)`).
pub struct HopscotchMap<T> {
    buckets: Atomic<BucketArray<T>>,
    backing: Box<[BackingLock]>,
    resize_locks: Box<[RwLock<()>]>,
    hash: fn(&T) -> u32,
    equals: fn(&T, &T) -> bool,
}

unsafe impl<T: Send + Sync> Send for HopscotchMap<T> {}
unsafe impl<T: Send + Sync> Sync for HopscotchMap<T> {}

impl<T> HopscotchMap<T> {
    pub fn new(init_size: u32, hash: fn(&T) -> u32, equals: fn(&T, &T) -> bool) -> HopscotchMap<T> {
        let mut size = HOP_RANGE;
        while size < init_size {
            size *= 2;
        }
        let backing: Vec<BackingLock> = (0..N_BACKING_LOCKS)
            .map(|_| BackingLock {
                lock: Mutex::new(()),
                cv: Condvar::new(),
            })
            .collect();
        let resize_locks: Vec<RwLock<()>> = (0..N_RESIZE_LOCKS).map(|_| RwLock::new(())).collect();
        HopscotchMap {
            buckets: Atomic::new(BucketArray::new(size)),
            backing: backing.into_boxed_slice(),
            resize_locks: resize_locks.into_boxed_slice(),
            hash,
            equals,
        }
    }

    // ── Per-bucket locking ───────────────────────────────────────────────────

    fn lock_bucket(&self, ba: &BucketArray<T>, bidx: u32) {
        let b = &ba.bs[bidx as usize];
        let s = &self.backing[bidx as usize % N_BACKING_LOCKS];
        loop {
            let o = b.lock.load(Ordering::Relaxed);
            let n = if o & LOCKBIT == 0 { o | LOCKBIT } else { o + 1 };
            if b.lock
                .compare_exchange(o, n, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }
            if o & LOCKBIT == 0 {
                fence(Ordering::SeqCst);
                return;
            }
            // Registered as a waiter; sleep until the holder broadcasts,
            // then convert the waiter slot into lock ownership.
            let mut g = s.lock.lock();
            loop {
                let mut o2 = b.lock.load(Ordering::Relaxed);
                while o2 & LOCKBIT != 0 {
                    s.cv.wait(&mut g);
                    o2 = b.lock.load(Ordering::Relaxed);
                }
                if b.lock
                    .compare_exchange(o2, (o2 - 1) | LOCKBIT, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    return;
                }
            }
        }
    }

    fn unlock_bucket(&self, ba: &BucketArray<T>, bidx: u32) {
        let b = &ba.bs[bidx as usize];
        let s = &self.backing[bidx as usize % N_BACKING_LOCKS];
        loop {
            let o = b.lock.load(Ordering::Relaxed);
            debug_assert!(o & LOCKBIT != 0);
            let n = o & !LOCKBIT;
            if b.lock
                .compare_exchange(o, n, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                if n == 0 {
                    fence(Ordering::SeqCst);
                } else {
                    // The condvar is shared by many buckets, so a targeted
                    // wake could rouse only a thread waiting on a different
                    // bucket; broadcast instead.
                    let _g = s.lock.lock();
                    s.cv.notify_all();
                }
                return;
            }
        }
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    fn lookup_internal<'g>(
        ba: &BucketArray<T>,
        equals: fn(&T, &T) -> bool,
        bucket: u32,
        template: &T,
        guard: &'g Guard,
    ) -> Option<Shared<'g, T>> {
        let bs = &ba.bs;
        let idxmask = ba.idxmask;
        let mut tries = 0u32;
        loop {
            let timestamp = bs[bucket as usize].timestamp.load(Ordering::Acquire);
            let mut hopinfo = bs[bucket as usize].hopinfo.load(Ordering::Acquire);
            let mut idx = 0u32;
            while hopinfo != 0 {
                let bidx = (bucket + idx) & idxmask;
                let data = bs[bidx as usize].data.load(Ordering::Acquire, guard);
                if slot_valid(data) && equals(unsafe { data.deref() }, template) {
                    return Some(data);
                }
                hopinfo >>= 1;
                idx += 1;
            }
            if timestamp == bs[bucket as usize].timestamp.load(Ordering::Acquire) {
                return None;
            }
            tries += 1;
            if tries == MAX_TRIES {
                // Too much churn around this bucket; scan the whole hop
                // window once without the timestamp shortcut.
                for idx in 0..HOP_RANGE {
                    let bidx = (bucket + idx) & idxmask;
                    let data = bs[bidx as usize].data.load(Ordering::Acquire, guard);
                    if slot_valid(data) && equals(unsafe { data.deref() }, template) {
                        return Some(data);
                    }
                }
                return None;
            }
        }
    }

    /// Lock-free lookup.  The returned pointer is valid while `guard` is
    /// pinned.
    pub fn lookup<'g>(&self, template: &T, guard: &'g Guard) -> Option<Shared<'g, T>> {
        let ba = unsafe { self.buckets.load(Ordering::Acquire, guard).deref() };
        let bucket = (self.hash)(template) & ba.idxmask;
        Self::lookup_internal(ba, self.equals, bucket, template, guard)
    }

    // ── Insert ───────────────────────────────────────────────────────────────

    /// Moves some entry living in the hop window of an earlier bucket into
    /// `free_bucket`, freeing a slot closer to the inserter's home bucket.
    /// Returns the new free slot, or `NOT_A_BUCKET` when nothing within
    /// reach can move.
    fn find_closer_free_bucket(
        &self,
        ba: &BucketArray<T>,
        free_bucket: u32,
        free_distance: &mut u32,
        guard: &Guard,
    ) -> u32 {
        let bs = &ba.bs;
        let idxmask = ba.idxmask;
        let mut move_bucket = free_bucket.wrapping_sub(HOP_RANGE - 1) & idxmask;
        let mut free_dist = HOP_RANGE - 1;
        while free_dist > 0 {
            let start_hop_info = bs[move_bucket as usize].hopinfo.load(Ordering::Relaxed);
            let mut move_free_distance = NOT_A_BUCKET;
            let mut mask = 1u32;
            for i in 0..free_dist {
                if mask & start_hop_info != 0 {
                    move_free_distance = i;
                    break;
                }
                mask <<= 1;
            }
            if move_free_distance != NOT_A_BUCKET {
                self.lock_bucket(ba, move_bucket);
                if start_hop_info == bs[move_bucket as usize].hopinfo.load(Ordering::Relaxed) {
                    let new_free_bucket = (move_bucket + move_free_distance) & idxmask;
                    let mb = &bs[move_bucket as usize];
                    // Publish the entry at its new slot before retracting
                    // the old one; the timestamp bump tells racing lookups
                    // to retry.
                    mb.hopinfo.store(
                        mb.hopinfo.load(Ordering::Relaxed) | (1 << free_dist),
                        Ordering::Relaxed,
                    );
                    let moved = bs[new_free_bucket as usize].data.load(Ordering::Acquire, guard);
                    bs[free_bucket as usize].data.store(moved, Ordering::Release);
                    mb.timestamp.store(
                        mb.timestamp.load(Ordering::Relaxed).wrapping_add(1),
                        Ordering::Relaxed,
                    );
                    fence(Ordering::SeqCst);
                    bs[new_free_bucket as usize]
                        .data
                        .store(busy_marker(), Ordering::Release);
                    mb.hopinfo.store(
                        mb.hopinfo.load(Ordering::Relaxed) & !(1 << move_free_distance),
                        Ordering::Relaxed,
                    );
                    *free_distance -= free_dist - move_free_distance;
                    self.unlock_bucket(ba, move_bucket);
                    return new_free_bucket;
                }
                self.unlock_bucket(ba, move_bucket);
            }
            move_bucket = (move_bucket + 1) & idxmask;
            free_dist -= 1;
        }
        NOT_A_BUCKET
    }

    /// Doubles the table.  Must run with every resize lock write-held.
    ///
    /// Doubling adds one bit to the bucket index, so an entry's distance to
    /// its home bucket is preserved and no recursive displacement is ever
    /// needed.
    fn resize(&self, guard: &Guard) {
        let old_shared = self.buckets.load(Ordering::Acquire, guard);
        let old = unsafe { old_shared.deref() };
        let old_size = old.idxmask + 1;
        let new = BucketArray::new(old_size * 2);
        let idxmask0 = old.idxmask;
        let idxmask1 = new.idxmask;
        for i in 0..old_size {
            let data = old.bs[i as usize].data.load(Ordering::Relaxed, guard);
            if slot_valid(data) {
                let hash = (self.hash)(unsafe { data.deref() });
                let old_start = hash & idxmask0;
                let new_start = hash & idxmask1;
                let dist = if i >= old_start {
                    i - old_start
                } else {
                    old_size + i - old_start
                };
                debug_assert!(dist < HOP_RANGE);
                let newb = (new_start + dist) & idxmask1;
                let nsb = &new.bs[new_start as usize];
                nsb.hopinfo.store(
                    nsb.hopinfo.load(Ordering::Relaxed) | (1 << dist),
                    Ordering::Relaxed,
                );
                new.bs[newb as usize].data.store(data, Ordering::Relaxed);
            }
        }
        self.buckets.store(Owned::new(new), Ordering::Release);
        unsafe { guard.defer_destroy(old_shared) };
    }

    /// Inserts `data`.  Returns the published pointer, or gives the entry
    /// back when an equal one is already present.
    pub fn add<'g>(&self, data: Owned<T>, guard: &'g Guard) -> Result<Shared<'g, T>, Owned<T>> {
        let hash = (self.hash)(&data);
        loop {
            let size;
            {
                let _rl = self.resize_locks[hash as usize % N_RESIZE_LOCKS].read();
                let ba = unsafe { self.buckets.load(Ordering::Acquire, guard).deref() };
                let idxmask = ba.idxmask;
                size = idxmask + 1;
                let start_bucket = hash & idxmask;

                self.lock_bucket(ba, start_bucket);
                if Self::lookup_internal(ba, self.equals, start_bucket, &data, guard).is_some() {
                    self.unlock_bucket(ba, start_bucket);
                    return Err(data);
                }

                let mut free_bucket = start_bucket;
                let mut free_distance = 0u32;
                while free_distance < ADD_RANGE {
                    let d = ba.bs[free_bucket as usize].data.load(Ordering::Relaxed, guard);
                    if slot_free(d)
                        && ba.bs[free_bucket as usize]
                            .data
                            .compare_exchange(
                                Shared::null(),
                                busy_marker(),
                                Ordering::AcqRel,
                                Ordering::Relaxed,
                                guard,
                            )
                            .is_ok()
                    {
                        break;
                    }
                    free_bucket = (free_bucket + 1) & idxmask;
                    free_distance += 1;
                }
                if free_distance < ADD_RANGE {
                    loop {
                        if free_distance < HOP_RANGE {
                            debug_assert_eq!(free_bucket, (start_bucket + free_distance) & idxmask);
                            let sb = &ba.bs[start_bucket as usize];
                            sb.hopinfo.store(
                                sb.hopinfo.load(Ordering::Relaxed) | (1 << free_distance),
                                Ordering::Relaxed,
                            );
                            let published = data.into_shared(guard);
                            ba.bs[free_bucket as usize]
                                .data
                                .store(published, Ordering::Release);
                            self.unlock_bucket(ba, start_bucket);
                            return Ok(published);
                        }
                        free_bucket =
                            self.find_closer_free_bucket(ba, free_bucket, &mut free_distance, guard);
                        if free_bucket == NOT_A_BUCKET {
                            break;
                        }
                    }
                    // A reserved far slot may be left busy here; the resize
                    // below drops reservations when it migrates entries.
                }
                self.unlock_bucket(ba, start_bucket);
            }

            // No reachable slot: double the table, unless another thread
            // already did.
            {
                let _wguards: Vec<_> = self.resize_locks.iter().map(|l| l.write()).collect();
                let cur = unsafe { self.buckets.load(Ordering::Acquire, guard).deref() };
                if cur.idxmask + 1 == size {
                    self.resize(guard);
                }
            }
        }
    }

    // ── Remove ───────────────────────────────────────────────────────────────

    /// Unlinks the entry equal to `template`.  The caller owns the returned
    /// pointer and is responsible for deferring its destruction.
    pub fn remove<'g>(&self, template: &T, guard: &'g Guard) -> Option<Shared<'g, T>> {
        let hash = (self.hash)(template);
        let _rl = self.resize_locks[hash as usize % N_RESIZE_LOCKS].read();
        let ba = unsafe { self.buckets.load(Ordering::Acquire, guard).deref() };
        let idxmask = ba.idxmask;
        let bucket = hash & idxmask;
        self.lock_bucket(ba, bucket);
        let mut hopinfo = ba.bs[bucket as usize].hopinfo.load(Ordering::Relaxed);
        let mut idx = 0u32;
        while hopinfo != 0 {
            if hopinfo & 1 != 0 {
                let bidx = (bucket + idx) & idxmask;
                let data = ba.bs[bidx as usize].data.load(Ordering::Acquire, guard);
                if slot_valid(data) && (self.equals)(unsafe { data.deref() }, template) {
                    ba.bs[bidx as usize].data.store(Shared::null(), Ordering::Release);
                    let sb = &ba.bs[bucket as usize];
                    sb.hopinfo.store(
                        sb.hopinfo.load(Ordering::Relaxed) & !(1 << idx),
                        Ordering::Relaxed,
                    );
                    self.unlock_bucket(ba, bucket);
                    return Some(data);
                }
            }
            hopinfo >>= 1;
            idx += 1;
        }
        self.unlock_bucket(ba, bucket);
        None
    }

    // ── Enumeration ──────────────────────────────────────────────────────────

    /// Visits every live entry in the current bucket array.  Entries that
    /// move concurrently may be seen twice or not at all; callers that need
    /// a consistent view must prevent concurrent mutation themselves.
    pub fn for_each<'g>(&self, guard: &'g Guard, mut f: impl FnMut(&'g T))
    where
        T: 'g,
    {
        let ba = unsafe { self.buckets.load(Ordering::Acquire, guard).deref() };
        for b in ba.bs.iter() {
            let data = b.data.load(Ordering::Acquire, guard);
            if slot_valid(data) {
                f(unsafe { data.deref() });
            }
        }
    }
}

impl<T> Drop for HopscotchMap<T> {
    fn drop(&mut self) {
        // Exclusive access: drop the remaining entries, then the array.
        unsafe {
            let guard = crossbeam_epoch::unprotected();
            let ba = self.buckets.load(Ordering::Relaxed, guard);
            if !ba.is_null() {
                for b in ba.deref().bs.iter() {
                    let data = b.data.load(Ordering::Relaxed, guard);
                    if slot_valid(data) {
                        drop(data.into_owned());
                    }
                }
                drop(ba.into_owned());
            }
        }
    }
}
