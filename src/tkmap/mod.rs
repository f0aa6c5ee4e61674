//! The instance map: keyhash-identified instances with stable 64-bit ids.
//!
//! Every distinct key value of every topic maps to one [`Instance`] holding
//! a key-bearing serialized sample, a process-unique instance id, and a
//! reference count.  Lookup is lock-free; teardown uses a DELETE bit folded
//! into the refcount word so that ref/unref stay single-CAS, with a per-map
//! condvar for the thread that loses the race against a teardown.

pub mod hopscotch;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_epoch as epoch;
use parking_lot::{Condvar, Mutex};

use crate::iid::{IidGenerator, IID_NIL};
use crate::serdata::{serdata_cmp, SerData};
use hopscotch::HopscotchMap;

/// Instance teardown in progress; the entry must not be handed out.
const REFC_DELETE: u32 = 0x8000_0000;
/// Low bits of the refcount word holding the actual count.
const REFC_MASK: u32 = 0x0fff_ffff;

/// One map entry: a stable instance id bound to a key representation.
pub struct Instance {
    iid: u64,
    sample: Arc<SerData>,
    refc: AtomicU32,
}

impl Instance {
    #[inline]
    pub fn iid(&self) -> u64 {
        self.iid
    }

    /// The serialized sample supplying this instance's key representation.
    #[inline]
    pub fn sample(&self) -> &Arc<SerData> {
        &self.sample
    }

    /// Current reference count (test/diagnostic use).
    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refc.load(Ordering::Relaxed) & REFC_MASK
    }
}

fn instance_hash(tk: &Instance) -> u32 {
    tk.sample.hash_value()
}

fn instance_eq(a: &Instance, b: &Instance) -> bool {
    serdata_cmp(&a.sample, &b.sample) == std::cmp::Ordering::Equal
}

/// The concurrent keyhash → instance map.
pub struct InstanceMap {
    table: HopscotchMap<Instance>,
    lock: Mutex<()>,
    cond: Condvar,
    iids: IidGenerator,
}

impl Default for InstanceMap {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceMap {
    pub fn new() -> InstanceMap {
        InstanceMap {
            table: HopscotchMap::new(1, instance_hash, instance_eq),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            iids: IidGenerator::new(),
        }
    }

    fn template(sd: &Arc<SerData>) -> Instance {
        Instance {
            iid: IID_NIL,
            sample: Arc::clone(sd),
            refc: AtomicU32::new(0),
        }
    }

    /// Returns the instance id bound to this sample's key, or [`IID_NIL`].
    /// Takes no reference; the id may be retired concurrently.
    pub fn lookup_iid(&self, sd: &Arc<SerData>) -> u64 {
        debug_assert!(sd.keyhash().set || !sd.topic().has_key());
        let template = Self::template(sd);
        let guard = epoch::pin();
        match self.table.lookup(&template, &guard) {
            Some(tk) => unsafe { tk.deref() }.iid,
            None => IID_NIL,
        }
    }

    /// Finds the instance carrying `iid`, without taking a reference.
    ///
    /// The returned reference stays valid only while the caller prevents
    /// the last reference from being released (administrative use).
    pub fn find_by_id(&self, iid: u64) -> Option<&Instance> {
        let guard = epoch::pin();
        let mut found: Option<*const Instance> = None;
        self.table.for_each(&guard, |tk| {
            if tk.iid == iid {
                found = Some(tk as *const Instance);
            }
        });
        // The refcount protocol keeps the instance alive past the guard.
        found.map(|p| unsafe { &*p })
    }

    /// Finds the instance for this sample's key, creating it (refc = 1, a
    /// fresh iid) when absent and `create` is set.  On success a reference
    /// is taken; pair with [`InstanceMap::instance_unref`].
    ///
    /// Returns `None` when the instance is absent and `create` is false,
    /// or when an insert loses every retry (allocation pressure).
    pub fn find(&self, sd: &Arc<SerData>, rd: bool, create: bool) -> Option<&Instance> {
        debug_assert!(sd.keyhash().set || !sd.topic().has_key());
        let template = Self::template(sd);
        let guard = epoch::pin();
        loop {
            if let Some(shared) = self.table.lookup(&template, &guard) {
                let tk = unsafe { shared.deref() };
                let new = tk.refc.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
                if new & REFC_DELETE != 0 {
                    // Lost against a teardown; undo and wait for the entry
                    // to leave the map, then start over (a fresh insert
                    // will mint a new iid).
                    tk.refc.fetch_sub(1, Ordering::Release);
                    let mut g = self.lock.lock();
                    loop {
                        match self.table.lookup(&template, &guard) {
                            Some(cur)
                                if unsafe { cur.deref() }.refc.load(Ordering::Acquire)
                                    & REFC_DELETE
                                    != 0 =>
                            {
                                self.cond.wait(&mut g);
                            }
                            _ => break,
                        }
                    }
                    drop(g);
                    continue;
                }
                let tk: &Instance = unsafe { &*shared.as_raw() };
                if rd {
                    log::trace!("instance_find: iid {:#x} refc +1", tk.iid);
                }
                return Some(tk);
            }
            if !create {
                return None;
            }
            let tk = epoch::Owned::new(Instance {
                iid: self.iids.next_iid(),
                sample: Arc::clone(sd),
                refc: AtomicU32::new(1),
            });
            match self.table.add(tk, &guard) {
                Ok(shared) => {
                    let tk: &Instance = unsafe { &*shared.as_raw() };
                    log::trace!("instance_new: iid {:#x}", tk.iid);
                    return Some(tk);
                }
                Err(_lost) => {
                    // Another thread inserted the same key first; drop ours
                    // and take theirs on the next pass.
                    continue;
                }
            }
        }
    }

    /// [`InstanceMap::find`] with `create` set and a reference taken — the
    /// reader-cache entry point.
    pub fn lookup_instance_ref(&self, sd: &Arc<SerData>) -> Option<&Instance> {
        self.find(sd, true, true)
    }

    /// Takes an additional reference on an instance already held.
    pub fn instance_ref(tk: &Instance) {
        let old = tk.refc.fetch_add(1, Ordering::AcqRel);
        debug_assert!(old & REFC_DELETE == 0, "ref on an instance being torn down");
    }

    /// Releases a reference.  Dropping the last one marks the instance
    /// DELETE, unlinks it from the map, wakes any waiters, and schedules
    /// reclamation for after concurrent lookups have drained.
    pub fn instance_unref(&self, tk: &Instance) {
        let mut old = tk.refc.load(Ordering::Relaxed);
        loop {
            let new = if old == 1 {
                REFC_DELETE
            } else {
                debug_assert!(old & REFC_DELETE == 0);
                old - 1
            };
            match tk
                .refc
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    if new == REFC_DELETE {
                        self.retire(tk);
                    }
                    return;
                }
                Err(cur) => old = cur,
            }
        }
    }

    /// Removes a DELETE-marked instance from the table and hands it to the
    /// deferred reclaimer.
    fn retire(&self, tk: &Instance) {
        log::trace!("instance_retire: iid {:#x}", tk.iid);
        let guard = epoch::pin();
        if let Some(removed) = self.table.remove(tk, &guard) {
            debug_assert!(std::ptr::eq(removed.as_raw(), tk));
            unsafe { guard.defer_destroy(removed) };
        }
        // Wake threads parked in find()'s teardown-race loop.
        let _g = self.lock.lock();
        self.cond.notify_all();
    }

    /// Copies the key fields of the instance carrying `iid` into a caller
    /// sample.  Returns false when the id is unknown.
    ///
    /// # Safety
    /// `sample` must point at a zeroed or previously deserialized sample of
    /// the instance's topic type.
    pub unsafe fn get_key(&self, iid: u64, sample: *mut u8) -> bool {
        let _g = self.lock.lock();
        let guard = epoch::pin();
        let mut found = false;
        self.table.for_each(&guard, |tk| {
            if tk.iid == iid && !found {
                unsafe { tk.sample.deserialize_into(sample) };
                found = true;
            }
        });
        found
    }

    /// Number of live instances (test/diagnostic use; racy by nature).
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        let mut n = 0usize;
        self.table.for_each(&guard, |_| n += 1);
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
