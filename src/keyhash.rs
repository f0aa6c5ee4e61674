//! Per-instance keyhash derivation.
//!
//! The keyhash is the 16-byte instance identifier: for topics whose
//! big-endian key CDR always fits in 16 bytes it is that CDR zero-padded on
//! the right; for every other keyed topic it is the MD5 digest of the
//! big-endian key CDR.  Keyless topics share the all-zero keyhash (the
//! default instance).

use crate::cdr::OstreamBe;
use crate::hash;
use crate::ops::DescriptorFlags;
use crate::topic::Topic;
use crate::walker::write::write_key;

/// The 16-byte keyhash plus its derivation state.
///
/// `iskey` distinguishes the two encodings: when set, `hash[..keysize]` is
/// the literal big-endian key CDR (zero-padded); when clear, `hash` is an
/// MD5 digest.  `set` records that derivation ran at all.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct KeyHash {
    pub hash: [u8; 16],
    /// Length of the literal key CDR inside `hash`; 16 for digests.
    pub keysize: u8,
    pub set: bool,
    pub iskey: bool,
}

impl KeyHash {
    /// A keyhash that has not been derived yet.
    pub const fn unset() -> KeyHash {
        KeyHash {
            hash: [0; 16],
            keysize: 0,
            set: false,
            iskey: false,
        }
    }
}

/// Derives the keyhash from an in-memory sample.
///
/// # Safety
/// `sample` must point at a live sample laid out per the topic's
/// descriptor.
pub unsafe fn keyhash_from_sample(topic: &Topic, sample: *const u8) -> KeyHash {
    let desc = &topic.descriptor;
    if desc.keys.is_empty() {
        return KeyHash {
            hash: [0; 16],
            keysize: 0,
            set: true,
            iskey: true,
        };
    }

    let mut os = OstreamBe::new();
    write_key(&mut os, sample, topic);

    if desc.flags.contains(DescriptorFlags::FIXED_KEY) {
        debug_assert!(os.pos() <= 16, "FIXED_KEY topic produced more than 16 key bytes");
        let mut h = [0u8; 16];
        let n = os.pos().min(16);
        h[..n].copy_from_slice(&os.as_slice()[..n]);
        KeyHash {
            hash: h,
            keysize: n as u8,
            set: true,
            iskey: true,
        }
    } else {
        KeyHash {
            hash: hash::md5(os.as_slice()),
            keysize: 16,
            set: true,
            iskey: false,
        }
    }
}
