//! Instance identifier allocation: monotonically increasing 64-bit ids,
//! unique within the process, with a random starting point so that
//! successive runs of a process produce disjoint ranges with high
//! probability.

use std::sync::atomic::{AtomicU64, Ordering};

/// The nil instance id, never handed out.
pub const IID_NIL: u64 = 0;

/// Process-wide id source.  Owned by the root object that owns the
/// instance map; cheap to share by reference.
#[derive(Debug)]
pub struct IidGenerator {
    counter: AtomicU64,
}

impl IidGenerator {
    /// Creates a generator seeded from the OS entropy source.
    pub fn new() -> IidGenerator {
        let mut seed = [0u8; 8];
        getrandom::getrandom(&mut seed).expect("OS entropy source unavailable");
        IidGenerator {
            counter: AtomicU64::new(u64::from_ne_bytes(seed)),
        }
    }

    /// Returns the next id.  Never returns [`IID_NIL`].
    pub fn next_iid(&self) -> u64 {
        loop {
            let v = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if v != IID_NIL {
                return v;
            }
        }
    }
}

impl Default for IidGenerator {
    fn default() -> Self {
        Self::new()
    }
}
