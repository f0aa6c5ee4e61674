//! Thin wrappers around the `md5` and `murmur3` crates providing the two
//! hash functions the engine depends on: MD5 for keyhash digests and
//! MurmurHash3 x86_32 for distributing 16-byte keyhashes over map buckets.
//!
//! The Murmur constants are fixed by interoperability: seed 0 over exactly
//! the 16 keyhash bytes (`c1=0xcc9e2d51`, `c2=0x1b873593` inside the
//! reference algorithm), so that map load behavior is reproducible across
//! implementations given the same keyhash inputs.

use std::io::Cursor;

/// One-shot MD5 digest.
#[inline]
pub fn md5(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// One-shot MurmurHash3 x86_32.
#[inline]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    murmur3::murmur3_32(&mut Cursor::new(data), seed).expect("reading from a slice cannot fail")
}
