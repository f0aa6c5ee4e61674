//! Topic registration: a named handle around a [`TypeDescriptor`] with the
//! per-type values the serialization paths cache once — the memcpy fast-path
//! size and the 32-bit base hash mixed into every sample hash.

use crate::hash;
use crate::ops::{self, DescriptorFlags, TypeCode, TypeDescriptor, OP_ADR, OP_RTS};
use std::sync::Arc;

/// A registered topic type.  Immutable after construction and shared
/// (`Arc`) between serialized samples and the instance map.
#[derive(Debug)]
pub struct Topic {
    pub name: String,
    pub type_name: String,
    pub descriptor: TypeDescriptor,
    opt_size: u32,
    base_hash: u32,
}

impl Topic {
    /// Registers a topic type, computing the cached per-type values.
    pub fn new(
        name: impl Into<String>,
        type_name: impl Into<String>,
        descriptor: TypeDescriptor,
    ) -> Arc<Topic> {
        let opt_size = if descriptor.flags.contains(DescriptorFlags::NO_OPTIMIZE) {
            0
        } else {
            check_optimize(&descriptor)
        };
        let base_hash = descriptor_hash(&descriptor);
        Arc::new(Topic {
            name: name.into(),
            type_name: type_name.into(),
            descriptor,
            opt_size,
            base_hash,
        })
    }

    /// Non-zero when samples of this type can be (de)serialized with a
    /// single bulk copy of the in-memory struct.
    #[inline]
    pub fn opt_size(&self) -> u32 {
        self.opt_size
    }

    /// Per-type hash XORed into sample hashes to disambiguate identical key
    /// values on different topics.
    #[inline]
    pub fn base_hash(&self) -> u32 {
        self.base_hash
    }

    /// True when the type declares at least one key field.
    #[inline]
    pub fn has_key(&self) -> bool {
        !self.descriptor.keys.is_empty()
    }
}

/// Hash of the instruction stream, used as the topic base hash.
fn descriptor_hash(desc: &TypeDescriptor) -> u32 {
    let mut bytes = Vec::with_capacity(desc.ops.len() * 4);
    for w in &desc.ops {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    hash::murmur3_32(&bytes, 0)
}

/// Scans the instruction stream and decides whether the wire image of a
/// sample is byte-identical to its in-memory image: only naturally aligned
/// primitive scalars and primitive arrays qualify.  Returns the struct size
/// when it is, 0 otherwise.
pub fn check_optimize(desc: &TypeDescriptor) -> u32 {
    let ops = &desc.ops;
    let mut i = 0usize;
    loop {
        let insn = ops[i];
        if insn == OP_RTS {
            break;
        }
        if ops::op(insn) != OP_ADR {
            return 0;
        }
        match ops::op_type(insn) {
            t @ (TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8) => {
                if ops[i + 1] % t.prim_size() != 0 {
                    return 0;
                }
                i += 2;
            }
            TypeCode::Arr => match ops::op_subtype(insn) {
                s @ (TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8) => {
                    if ops[i + 1] % s.prim_size() != 0 {
                        return 0;
                    }
                    i += 3;
                }
                _ => return 0,
            },
            _ => return 0,
        }
    }
    desc.size
}
