//! Serialized samples: an encapsulation header, the CDR body, and the
//! cached identity values the instance map keys on.
//!
//! A [`SerData`] is immutable once constructed and shared by `Arc`; the
//! only lazily produced value is the 32-bit map hash.  Construction always
//! leaves the body native-endian (wire ingestion normalizes first) and the
//! keyhash derived, so every comparison and hash after that is a plain
//! memory operation.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::cdr::{self, CdrHeader, Istream, Ostream, HEADER_SIZE};
use crate::hash;
use crate::keyhash::{keyhash_from_sample, KeyHash};
use crate::ops::DescriptorFlags;
use crate::topic::Topic;
use crate::walker::{extract, normalize, print, read, write, NormalizeError};

/// What the body of a serialized sample carries.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SampleKind {
    /// No payload at all (unregister/dispose without key transport).
    Empty,
    /// Only the key fields, back to back in key order.
    Key,
    /// Every field, in declaration order.
    Data,
}

/// An encapsulated, validated, native-endian serialized sample.
pub struct SerData {
    topic: Arc<Topic>,
    kind: SampleKind,
    /// Representation identifier; always the native PLAIN CDR id after
    /// construction.
    identifier: u16,
    /// Trailing zero bytes appended to reach a 4-byte boundary, as encoded
    /// in the header options.
    pad: u8,
    /// CDR body including the trailing padding.
    body: Vec<u8>,
    keyhash: KeyHash,
    hash: OnceLock<u32>,
}

impl SerData {
    /// Serializes an in-memory sample (the writer path).
    ///
    /// # Safety
    /// `sample` must point at a live sample laid out per the topic's
    /// descriptor.
    pub unsafe fn from_sample(topic: &Arc<Topic>, kind: SampleKind, sample: *const u8) -> Arc<SerData> {
        let keyhash = keyhash_from_sample(topic, sample);
        let mut os: Ostream = Ostream::new();
        match kind {
            SampleKind::Empty => {}
            SampleKind::Key => write::write_key(&mut os, sample, topic),
            SampleKind::Data => write::write_sample(&mut os, sample, topic),
        }
        let pad = os.pad_to_4();
        Arc::new(SerData {
            topic: Arc::clone(topic),
            kind,
            identifier: cdr::native_encoding(),
            pad: pad as u8,
            body: os.into_vec(),
            keyhash,
            hash: OnceLock::new(),
        })
    }

    /// Ingests a header-prefixed payload received from the network:
    /// validates and normalizes the body, then derives the keyhash from it.
    pub fn from_wire(
        topic: &Arc<Topic>,
        kind: SampleKind,
        raw: &[u8],
    ) -> Result<Arc<SerData>, NormalizeError> {
        let result = Self::from_wire_inner(topic, kind, raw);
        if let Err(e) = &result {
            log::debug!("{}: rejecting payload ({e})", topic.name);
        }
        result
    }

    fn from_wire_inner(
        topic: &Arc<Topic>,
        kind: SampleKind,
        raw: &[u8],
    ) -> Result<Arc<SerData>, NormalizeError> {
        let hdr = CdrHeader::from_bytes(raw).ok_or(NormalizeError::OutOfBounds)?;
        let bswap = match hdr.identifier {
            id if id == cdr::native_encoding() => false,
            cdr::CDR_LE | cdr::CDR_BE => true,
            _ => return Err(NormalizeError::UnknownEncoding),
        };
        let mut body = raw[HEADER_SIZE..].to_vec();
        let pad = hdr.padding();
        if body.len() < pad {
            return Err(NormalizeError::OutOfBounds);
        }
        let valid = body.len() - pad;
        let just_key = matches!(kind, SampleKind::Key);
        normalize(&mut body[..valid], bswap, topic, just_key)?;
        let keyhash = {
            let mut is = Istream::new(&body[..valid]);
            extract::keyhash_from_wire(&mut is, topic, just_key)
        };
        Ok(Arc::new(SerData {
            topic: Arc::clone(topic),
            kind,
            identifier: cdr::native_encoding(),
            pad: pad as u8,
            body,
            keyhash,
            hash: OnceLock::new(),
        }))
    }

    /// Reconstructs a key-only sample from a received 16-byte keyhash.
    ///
    /// Only possible for `FIXED_KEY` topics, where the keyhash *is* the
    /// big-endian key CDR; for every other topic it is a digest and `None`
    /// is returned.  Also returns `None` when the 16 bytes do not validate
    /// as a key body.
    pub fn from_keyhash(topic: &Arc<Topic>, keyhash: &[u8; 16]) -> Option<Arc<SerData>> {
        if !topic.descriptor.flags.contains(DescriptorFlags::FIXED_KEY) {
            return None;
        }
        let mut body = keyhash.to_vec();
        let bswap = cdr::native_encoding() != cdr::CDR_BE;
        normalize(&mut body, bswap, topic, true).ok()?;
        Some(Arc::new(SerData {
            topic: Arc::clone(topic),
            kind: SampleKind::Key,
            identifier: cdr::native_encoding(),
            pad: 0,
            body,
            keyhash: KeyHash {
                hash: *keyhash,
                keysize: 16,
                set: true,
                iskey: true,
            },
            hash: OnceLock::new(),
        }))
    }

    /// Projects a sample down to its key representation — what the
    /// instance map stores.  Key-only samples are duplicated as-is; for
    /// full-data samples the key CDR is recovered from the keyhash when it
    /// is literal, or re-extracted from the body when it is a digest.
    pub fn to_key(&self) -> Arc<SerData> {
        let (body, pad): (Vec<u8>, u8) = match self.kind {
            SampleKind::Key | SampleKind::Empty => (self.body.clone(), self.pad),
            SampleKind::Data => {
                if self.keyhash.iskey {
                    let mut b = self.keyhash.hash.to_vec();
                    let bswap = cdr::native_encoding() != cdr::CDR_BE;
                    // A literal keyhash is the key CDR that validated when
                    // this sample was built; the zero tail keeps the body
                    // 4-aligned.
                    normalize(&mut b, bswap, &self.topic, true)
                        .expect("literal keyhash is valid key CDR");
                    (b, 0)
                } else {
                    let mut is = Istream::new(self.cdr_body());
                    let mut os: Ostream = Ostream::new();
                    extract::extract_key_from_data(&mut is, &mut os, &self.topic);
                    let pad = os.pad_to_4();
                    (os.into_vec(), pad as u8)
                }
            }
        };
        Arc::new(SerData {
            topic: Arc::clone(&self.topic),
            kind: SampleKind::Key,
            identifier: self.identifier,
            pad,
            body,
            keyhash: self.keyhash,
            hash: OnceLock::from(self.hash_value()),
        })
    }

    /// Deserializes into an in-memory sample, dispatching on the body kind.
    ///
    /// # Safety
    /// `sample` must point at a zeroed or previously deserialized sample of
    /// this topic's type.
    pub unsafe fn deserialize_into(&self, sample: *mut u8) {
        let mut is = Istream::new(self.cdr_body());
        match self.kind {
            SampleKind::Key => read::read_key(&mut is, sample, &self.topic),
            _ => read::read_sample(&mut is, sample, &self.topic),
        }
    }

    /// The 32-bit map hash: Murmur3 of a literal keyhash or the leading
    /// word of an MD5 one, disambiguated by the topic's base hash.  Cached
    /// after the first call.
    pub fn hash_value(&self) -> u32 {
        *self.hash.get_or_init(|| {
            let base = self.topic.base_hash();
            if !self.topic.has_key() {
                return base;
            }
            debug_assert!(self.keyhash.set);
            if self.keyhash.iskey {
                hash::murmur3_32(&self.keyhash.hash, 0) ^ base
            } else {
                u32::from_le_bytes(self.keyhash.hash[0..4].try_into().unwrap()) ^ base
            }
        })
    }

    /// Renders the body for diagnostics; returns the unused budget.
    pub fn print(&self, out: &mut String, limit: usize) -> usize {
        let mut is = Istream::new(self.cdr_body());
        match self.kind {
            SampleKind::Key => print::print_key(&mut is, &self.topic, out, limit),
            _ => print::print_sample(&mut is, &self.topic, out, limit),
        }
    }

    /// Re-emits the header-prefixed wire image.
    pub fn to_wire(&self) -> Vec<u8> {
        let hdr = CdrHeader {
            identifier: self.identifier,
            options: self.pad as u16,
        };
        let mut v = Vec::with_capacity(HEADER_SIZE + self.body.len());
        v.extend_from_slice(&hdr.to_bytes());
        v.extend_from_slice(&self.body);
        v
    }

    /// Total wire size, header included.
    #[inline]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    /// The CDR body without the trailing alignment padding.
    #[inline]
    pub fn cdr_body(&self) -> &[u8] {
        &self.body[..self.body.len() - self.pad as usize]
    }

    #[inline]
    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    #[inline]
    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    #[inline]
    pub fn keyhash(&self) -> &KeyHash {
        &self.keyhash
    }
}

impl fmt::Debug for SerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerData")
            .field("topic", &self.topic.name)
            .field("kind", &self.kind)
            .field("body_len", &self.body.len())
            .field("keyhash", &self.keyhash)
            .finish()
    }
}

/// Instance-identity ordering over serialized samples: topics order by
/// address, all samples of a keyless topic collapse onto the default
/// instance, and within a keyed topic identity is the 16-byte keyhash.
pub fn serdata_cmp(a: &SerData, b: &SerData) -> Ordering {
    if !Arc::ptr_eq(&a.topic, &b.topic) {
        let pa = Arc::as_ptr(&a.topic) as usize;
        let pb = Arc::as_ptr(&b.topic) as usize;
        return pa.cmp(&pb);
    }
    if !a.topic.has_key() {
        return Ordering::Equal;
    }
    debug_assert!(a.keyhash.set && b.keyhash.set);
    a.keyhash.hash.cmp(&b.keyhash.hash)
}
