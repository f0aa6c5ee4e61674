//! Validation and conversion to native endianness.
//!
//! A buffer that arrived from the network is walked once before any
//! deserialization: every alignment and primitive read is bounds-checked,
//! strings are checked for a sane length prefix and their NUL terminator,
//! and — when the wire endianness differs from the host — primitives are
//! byte-swapped in place.  On success the buffer is native-endian and the
//! read walkers can consume it without further checks; on failure the
//! buffer contents are unspecified and the caller must discard it.

use std::fmt;

use byteorder::{ByteOrder, NativeEndian};

use crate::ops::{self, TypeCode};
use crate::topic::Topic;
use crate::walker::{find_union_case, jsr_target, next_after_complex_arr, next_after_complex_seq, skip_sequence_insns};

/// Input buffers above this size are rejected outright so that alignment
/// arithmetic on 32-bit offsets cannot overflow.
pub const CDR_SIZE_MAX: usize = 0xffff_fff0;

/// Why a wire payload was rejected.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NormalizeError {
    /// The buffer exceeds [`CDR_SIZE_MAX`].
    InputTooLarge,
    /// An alignment, primitive, or counted region runs past the buffer end.
    OutOfBounds,
    /// A string length prefix of zero (every string includes its NUL).
    EmptyString,
    /// A bounded string whose length exceeds its declared bound.
    StringTooLong,
    /// The byte at the end of a string is not NUL.
    MissingNul,
    /// A NUL byte before the end of a string.
    EmbeddedNul,
    /// An encapsulation header naming a representation this engine does not
    /// handle.
    UnknownEncoding,
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NormalizeError::InputTooLarge => "input exceeds maximum CDR size",
            NormalizeError::OutOfBounds => "data extends past the end of the buffer",
            NormalizeError::EmptyString => "string length prefix is zero",
            NormalizeError::StringTooLong => "bounded string exceeds its bound",
            NormalizeError::MissingNul => "string is not NUL-terminated",
            NormalizeError::EmbeddedNul => "string contains an interior NUL byte",
            NormalizeError::UnknownEncoding => "unsupported CDR representation identifier",
        };
        f.write_str(s)
    }
}

impl std::error::Error for NormalizeError {}

type Result_ = std::result::Result<(), NormalizeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Bounds-checked alignment
// ─────────────────────────────────────────────────────────────────────────────

/// Aligns `off` to `a` and checks that one `a`-byte primitive fits.
#[inline]
fn align_one(off: usize, len: usize, a: usize) -> std::result::Result<usize, NormalizeError> {
    debug_assert!(a <= 8 && len <= CDR_SIZE_MAX && off <= len);
    let off1 = (off + a - 1) & !(a - 1);
    if len < off1 + a {
        Err(NormalizeError::OutOfBounds)
    } else {
        Ok(off1)
    }
}

/// Aligns `off` to `a` and checks that `n` `a`-byte primitives fit.
#[inline]
fn align_many(off: usize, len: usize, a: usize, n: usize) -> std::result::Result<usize, NormalizeError> {
    debug_assert!(a <= 8 && len <= CDR_SIZE_MAX && off <= len);
    let off1 = (off + a - 1) & !(a - 1);
    if len < off1 || (len - off1) / a < n {
        Err(NormalizeError::OutOfBounds)
    } else {
        Ok(off1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Primitive normalization
// ─────────────────────────────────────────────────────────────────────────────

fn normalize_u8(off: &mut usize, len: usize) -> Result_ {
    if *off == len {
        return Err(NormalizeError::OutOfBounds);
    }
    *off += 1;
    Ok(())
}

fn normalize_prim(data: &mut [u8], off: &mut usize, bswap: bool, size: usize) -> Result_ {
    let off1 = align_one(*off, data.len(), size)?;
    if bswap {
        data[off1..off1 + size].reverse();
    }
    *off = off1 + size;
    Ok(())
}

fn read_and_normalize_u32(
    data: &mut [u8],
    off: &mut usize,
    bswap: bool,
) -> std::result::Result<u32, NormalizeError> {
    let off1 = align_one(*off, data.len(), 4)?;
    if bswap {
        data[off1..off1 + 4].reverse();
    }
    let v = NativeEndian::read_u32(&data[off1..off1 + 4]);
    *off = off1 + 4;
    Ok(v)
}

fn normalize_string(data: &mut [u8], off: &mut usize, bswap: bool, maxsz: usize) -> Result_ {
    let sz = read_and_normalize_u32(data, off, bswap)? as usize;
    if sz == 0 {
        return Err(NormalizeError::EmptyString);
    }
    if data.len() - *off < sz {
        return Err(NormalizeError::OutOfBounds);
    }
    if maxsz < sz {
        return Err(NormalizeError::StringTooLong);
    }
    let body = &data[*off..*off + sz];
    if body[sz - 1] != 0 {
        return Err(NormalizeError::MissingNul);
    }
    if body[..sz - 1].contains(&0) {
        return Err(NormalizeError::EmbeddedNul);
    }
    *off += sz;
    Ok(())
}

fn normalize_primarray(
    data: &mut [u8],
    off: &mut usize,
    bswap: bool,
    num: usize,
    ty: TypeCode,
) -> Result_ {
    let size = ty.prim_size() as usize;
    let off1 = align_many(*off, data.len(), size, num)?;
    if bswap && size > 1 {
        for chunk in data[off1..off1 + num * size].chunks_exact_mut(size) {
            chunk.reverse();
        }
    }
    *off = off1 + num * size;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Compound normalization
// ─────────────────────────────────────────────────────────────────────────────

fn normalize_seq(
    data: &mut [u8],
    off: &mut usize,
    bswap: bool,
    ops_arr: &[u32],
    idx: usize,
    insn: u32,
) -> std::result::Result<usize, NormalizeError> {
    let subtype = ops::op_subtype(insn);
    let num = read_and_normalize_u32(data, off, bswap)? as usize;
    if num == 0 {
        return Ok(skip_sequence_insns(ops_arr, idx, insn));
    }
    match subtype {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 => {
            normalize_primarray(data, off, bswap, num, subtype)?;
            Ok(idx + 2)
        }
        TypeCode::Str | TypeCode::Bst => {
            let maxsz = if subtype == TypeCode::Str {
                usize::MAX
            } else {
                ops_arr[idx + 2] as usize
            };
            for _ in 0..num {
                normalize_string(data, off, bswap, maxsz)?;
            }
            Ok(idx + if subtype == TypeCode::Str { 2 } else { 3 })
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            for _ in 0..num {
                stream_normalize(data, off, bswap, ops_arr, sub)?;
            }
            Ok(next_after_complex_seq(ops_arr, idx))
        }
    }
}

fn normalize_arr(
    data: &mut [u8],
    off: &mut usize,
    bswap: bool,
    ops_arr: &[u32],
    idx: usize,
    insn: u32,
) -> std::result::Result<usize, NormalizeError> {
    let subtype = ops::op_subtype(insn);
    let num = ops_arr[idx + 2] as usize;
    match subtype {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 => {
            normalize_primarray(data, off, bswap, num, subtype)?;
            Ok(idx + 3)
        }
        TypeCode::Str | TypeCode::Bst => {
            let maxsz = if subtype == TypeCode::Str {
                usize::MAX
            } else {
                ops_arr[idx + 4] as usize
            };
            for _ in 0..num {
                normalize_string(data, off, bswap, maxsz)?;
            }
            Ok(idx + if subtype == TypeCode::Str { 3 } else { 5 })
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            for _ in 0..num {
                stream_normalize(data, off, bswap, ops_arr, sub)?;
            }
            Ok(next_after_complex_arr(ops_arr, idx))
        }
    }
}

fn normalize_uni_disc(
    data: &mut [u8],
    off: &mut usize,
    bswap: bool,
    disctype: TypeCode,
) -> std::result::Result<u32, NormalizeError> {
    match disctype {
        TypeCode::By1 => {
            let off1 = align_one(*off, data.len(), 1)?;
            let v = data[off1] as u32;
            *off = off1 + 1;
            Ok(v)
        }
        TypeCode::By2 => {
            let off1 = align_one(*off, data.len(), 2)?;
            if bswap {
                data[off1..off1 + 2].reverse();
            }
            let v = NativeEndian::read_u16(&data[off1..off1 + 2]) as u32;
            *off = off1 + 2;
            Ok(v)
        }
        TypeCode::By4 => read_and_normalize_u32(data, off, bswap),
        _ => unreachable!("union discriminant must be an integer of at most 4 bytes"),
    }
}

fn normalize_uni(
    data: &mut [u8],
    off: &mut usize,
    bswap: bool,
    ops_arr: &[u32],
    idx: usize,
    insn: u32,
) -> std::result::Result<usize, NormalizeError> {
    let disc = normalize_uni_disc(data, off, bswap, ops::op_subtype(insn))?;
    let case = find_union_case(ops_arr, idx, disc);
    let next = idx + ops::adr_jmp(ops_arr[idx + 3]) as usize;
    if let Some(case) = case {
        match ops::jeq_type(ops_arr[case]) {
            TypeCode::By1 => normalize_u8(off, data.len())?,
            TypeCode::By2 => normalize_prim(data, off, bswap, 2)?,
            TypeCode::By4 => normalize_prim(data, off, bswap, 4)?,
            TypeCode::By8 => normalize_prim(data, off, bswap, 8)?,
            TypeCode::Str => normalize_string(data, off, bswap, usize::MAX)?,
            TypeCode::Bst | TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
                stream_normalize(data, off, bswap, ops_arr, case + ops::adr_jsr(ops_arr[case]) as usize)?;
            }
        }
    }
    Ok(next)
}

/// The normalization dispatch loop.
fn stream_normalize(
    data: &mut [u8],
    off: &mut usize,
    bswap: bool,
    ops_arr: &[u32],
    mut idx: usize,
) -> Result_ {
    loop {
        let insn = ops_arr[idx];
        if insn == ops::OP_RTS {
            return Ok(());
        }
        match ops::op(insn) {
            ops::OP_ADR => match ops::op_type(insn) {
                TypeCode::By1 => {
                    normalize_u8(off, data.len())?;
                    idx += 2;
                }
                TypeCode::By2 => {
                    normalize_prim(data, off, bswap, 2)?;
                    idx += 2;
                }
                TypeCode::By4 => {
                    normalize_prim(data, off, bswap, 4)?;
                    idx += 2;
                }
                TypeCode::By8 => {
                    normalize_prim(data, off, bswap, 8)?;
                    idx += 2;
                }
                TypeCode::Str => {
                    normalize_string(data, off, bswap, usize::MAX)?;
                    idx += 2;
                }
                TypeCode::Bst => {
                    normalize_string(data, off, bswap, ops_arr[idx + 2] as usize)?;
                    idx += 3;
                }
                TypeCode::Seq => idx = normalize_seq(data, off, bswap, ops_arr, idx, insn)?,
                TypeCode::Arr => idx = normalize_arr(data, off, bswap, ops_arr, idx, insn)?,
                TypeCode::Uni => idx = normalize_uni(data, off, bswap, ops_arr, idx, insn)?,
                TypeCode::Stu => unreachable!("struct tag outside a subroutine"),
            },
            ops::OP_JSR => {
                stream_normalize(data, off, bswap, ops_arr, jsr_target(idx, insn))?;
                idx += 1;
            }
            _ => unreachable!("stray RTS/JEQ in instruction stream"),
        }
    }
}

/// Key-only bodies hold the key fields back to back in key order.
fn stream_normalize_key(data: &mut [u8], bswap: bool, topic: &Topic) -> Result_ {
    let ops_arr = &topic.descriptor.ops;
    let mut off = 0usize;
    for key in &topic.descriptor.keys {
        let idx = key.index as usize;
        let insn = ops_arr[idx];
        debug_assert!(ops::key_insn_ok(insn));
        match ops::op_type(insn) {
            TypeCode::By1 => normalize_u8(&mut off, data.len())?,
            TypeCode::By2 => normalize_prim(data, &mut off, bswap, 2)?,
            TypeCode::By4 => normalize_prim(data, &mut off, bswap, 4)?,
            TypeCode::By8 => normalize_prim(data, &mut off, bswap, 8)?,
            TypeCode::Str => normalize_string(data, &mut off, bswap, usize::MAX)?,
            TypeCode::Bst => normalize_string(data, &mut off, bswap, ops_arr[idx + 2] as usize)?,
            TypeCode::Arr => {
                normalize_arr(data, &mut off, bswap, ops_arr, idx, insn)?;
            }
            TypeCode::Seq | TypeCode::Uni | TypeCode::Stu => {
                unreachable!("complex types cannot be key fields")
            }
        }
    }
    Ok(())
}

/// Validates `data` against the topic's type and converts it to native
/// endianness in place.  `just_key` selects the key-only body layout.
///
/// On success the buffer is safe for the read walkers; on failure its
/// contents are unspecified (some primitives may already be swapped) and it
/// must be discarded.
pub fn normalize(data: &mut [u8], bswap: bool, topic: &Topic, just_key: bool) -> Result_ {
    if data.len() > CDR_SIZE_MAX {
        return Err(NormalizeError::InputTooLarge);
    }
    if just_key {
        stream_normalize_key(data, bswap, topic)
    } else {
        let mut off = 0usize;
        stream_normalize(data, &mut off, bswap, &topic.descriptor.ops, 0)
    }
}
