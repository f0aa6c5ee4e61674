//! Key extraction from wire-format CDR.
//!
//! Given a normalized full-data body, produces the key-only CDR by copying
//! key fields and skipping everything else, advancing the input cursor by
//! the exact on-wire size of each skipped field.  The big-endian output
//! flavor feeds keyhash computation; the native flavor produces key-only
//! serialized samples.
//!
//! Everything here operates on wire buffers only, so unlike the sample
//! walkers these functions are safe.

use byteorder::ByteOrder;

use crate::cdr::{Istream, Ostream, OstreamBe};
use crate::hash;
use crate::keyhash::KeyHash;
use crate::ops::{self, DescriptorFlags, TypeCode, OP_FLAG_KEY};
use crate::topic::Topic;
use crate::walker::{find_union_case, jsr_target, next_after_complex_arr, next_after_complex_seq, skip_sequence_insns};

// ─────────────────────────────────────────────────────────────────────────────
// Skipping: advance the input past a field without producing output
// ─────────────────────────────────────────────────────────────────────────────

/// Skips `num` consecutive values of `subtype` on the wire.  Complex
/// subtypes need the subroutine cursor in `sub`.
pub(crate) fn skip_subtype(
    is: &mut Istream,
    num: u32,
    subtype: TypeCode,
    ops_arr: &[u32],
    sub: Option<usize>,
) {
    match subtype {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 => {
            let elem = subtype.prim_size() as usize;
            is.align(elem);
            is.skip(num as usize, elem);
        }
        TypeCode::Str | TypeCode::Bst => {
            for _ in 0..num {
                let len = is.get4() as usize;
                is.skip(len, 1);
            }
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = sub.expect("complex subtype requires a subroutine");
            for _ in 0..num {
                skip_struct(is, ops_arr, sub);
            }
        }
    }
}

/// Skips one whole struct-shaped value (a subroutine's worth of fields).
fn skip_struct(is: &mut Istream, ops_arr: &[u32], mut idx: usize) {
    loop {
        let insn = ops_arr[idx];
        if insn == ops::OP_RTS {
            return;
        }
        match ops::op(insn) {
            ops::OP_ADR => match ops::op_type(insn) {
                t @ (TypeCode::By1
                | TypeCode::By2
                | TypeCode::By4
                | TypeCode::By8
                | TypeCode::Str) => {
                    skip_subtype(is, 1, t, ops_arr, None);
                    idx += 2;
                }
                TypeCode::Bst => {
                    skip_subtype(is, 1, TypeCode::Bst, ops_arr, None);
                    idx += 3;
                }
                TypeCode::Seq => idx = skip_seq(is, ops_arr, idx, insn),
                TypeCode::Arr => idx = skip_arr(is, ops_arr, idx, insn),
                TypeCode::Uni => idx = skip_uni(is, ops_arr, idx, insn),
                TypeCode::Stu => unreachable!("struct tag outside a subroutine"),
            },
            ops::OP_JSR => {
                skip_struct(is, ops_arr, jsr_target(idx, insn));
                idx += 1;
            }
            _ => unreachable!("stray RTS/JEQ in instruction stream"),
        }
    }
}

fn skip_seq(is: &mut Istream, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let subtype = ops::op_subtype(insn);
    let num = is.get4();
    if num == 0 {
        return skip_sequence_insns(ops_arr, idx, insn);
    }
    match subtype {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 | TypeCode::Str => {
            skip_subtype(is, num, subtype, ops_arr, None);
            idx + 2
        }
        TypeCode::Bst => {
            skip_subtype(is, num, subtype, ops_arr, None);
            idx + 3
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            skip_subtype(is, num, subtype, ops_arr, Some(sub));
            next_after_complex_seq(ops_arr, idx)
        }
    }
}

fn skip_arr(is: &mut Istream, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let subtype = ops::op_subtype(insn);
    let num = ops_arr[idx + 2];
    match subtype {
        TypeCode::By1 | TypeCode::By2 | TypeCode::By4 | TypeCode::By8 | TypeCode::Str => {
            skip_subtype(is, num, subtype, ops_arr, None);
            idx + 3
        }
        TypeCode::Bst => {
            skip_subtype(is, num, subtype, ops_arr, None);
            idx + 5
        }
        TypeCode::Seq | TypeCode::Arr | TypeCode::Uni | TypeCode::Stu => {
            let sub = idx + ops::adr_jsr(ops_arr[idx + 3]) as usize;
            skip_subtype(is, num, subtype, ops_arr, Some(sub));
            next_after_complex_arr(ops_arr, idx)
        }
    }
}

fn skip_uni(is: &mut Istream, ops_arr: &[u32], idx: usize, insn: u32) -> usize {
    let disc = match ops::op_subtype(insn) {
        TypeCode::By1 => is.get1() as u32,
        TypeCode::By2 => is.get2() as u32,
        TypeCode::By4 => is.get4(),
        _ => unreachable!("union discriminant must be an integer of at most 4 bytes"),
    };
    if let Some(case) = find_union_case(ops_arr, idx, disc) {
        let valtype = ops::jeq_type(ops_arr[case]);
        let sub = case + ops::adr_jsr(ops_arr[case]) as usize;
        skip_subtype(is, 1, valtype, ops_arr, Some(sub));
    }
    idx + ops::adr_jmp(ops_arr[idx + 3]) as usize
}

// ─────────────────────────────────────────────────────────────────────────────
// Copying key fields from the input to the key CDR
// ─────────────────────────────────────────────────────────────────────────────

/// Copies one simple key field from the input to the output, re-encoding
/// primitives in the output byte order.
fn extract_key_prim_op<B: ByteOrder>(is: &mut Istream, os: &mut Ostream<B>, ops_arr: &[u32], idx: usize) {
    let insn = ops_arr[idx];
    debug_assert!(ops::op(insn) == ops::OP_ADR && (insn & OP_FLAG_KEY) != 0);
    match ops::op_type(insn) {
        TypeCode::By1 => {
            let v = is.get1();
            os.put1(v);
        }
        TypeCode::By2 => {
            let v = is.get2();
            os.put2(v);
        }
        TypeCode::By4 => {
            let v = is.get4();
            os.put4(v);
        }
        TypeCode::By8 => {
            let v = is.get8();
            os.put8(v);
        }
        TypeCode::Str | TypeCode::Bst => {
            let sz = is.get4();
            os.put4(sz);
            os.put_bytes(is.get_bytes(sz as usize, 1));
        }
        TypeCode::Arr => {
            let subtype = ops::op_subtype(insn);
            debug_assert!(subtype <= TypeCode::By8);
            let num = ops_arr[idx + 2];
            match subtype {
                TypeCode::By1 => os.put_bytes_aligned(is.get_bytes(num as usize, 1), 1),
                TypeCode::By2 => {
                    for _ in 0..num {
                        let v = is.get2();
                        os.put2(v);
                    }
                }
                TypeCode::By4 => {
                    for _ in 0..num {
                        let v = is.get4();
                        os.put4(v);
                    }
                }
                TypeCode::By8 => {
                    for _ in 0..num {
                        let v = is.get8();
                        os.put8(v);
                    }
                }
                _ => unreachable!(),
            }
        }
        TypeCode::Seq | TypeCode::Uni | TypeCode::Stu => {
            unreachable!("complex types cannot be key fields")
        }
    }
}

/// Walks a full-data body, copying key fields (in declaration order) and
/// skipping everything else.  Returns early once every key is copied.
fn extract_key_from_data1<B: ByteOrder>(
    is: &mut Istream,
    os: &mut Ostream<B>,
    ops_arr: &[u32],
    mut idx: usize,
    keys_remaining: &mut u32,
) {
    loop {
        let insn = ops_arr[idx];
        if insn == ops::OP_RTS {
            return;
        }
        match ops::op(insn) {
            ops::OP_ADR => {
                let ty = ops::op_type(insn);
                if insn & OP_FLAG_KEY != 0 {
                    extract_key_prim_op(is, os, ops_arr, idx);
                    *keys_remaining -= 1;
                    if *keys_remaining == 0 {
                        return;
                    }
                    idx += 2 + usize::from(ty == TypeCode::Bst || ty == TypeCode::Arr);
                } else {
                    match ty {
                        TypeCode::By1
                        | TypeCode::By2
                        | TypeCode::By4
                        | TypeCode::By8
                        | TypeCode::Str => {
                            skip_subtype(is, 1, ty, ops_arr, None);
                            idx += 2;
                        }
                        TypeCode::Bst => {
                            skip_subtype(is, 1, ty, ops_arr, None);
                            idx += 3;
                        }
                        TypeCode::Seq => idx = skip_seq(is, ops_arr, idx, insn),
                        TypeCode::Arr => idx = skip_arr(is, ops_arr, idx, insn),
                        TypeCode::Uni => idx = skip_uni(is, ops_arr, idx, insn),
                        TypeCode::Stu => unreachable!("struct tag outside a subroutine"),
                    }
                }
            }
            ops::OP_JSR => {
                extract_key_from_data1(is, os, ops_arr, jsr_target(idx, insn), keys_remaining);
                if *keys_remaining == 0 {
                    return;
                }
                idx += 1;
            }
            _ => unreachable!("stray RTS/JEQ in instruction stream"),
        }
    }
}

/// Produces the key CDR from a normalized full-data body.
pub fn extract_key_from_data<B: ByteOrder>(is: &mut Istream, os: &mut Ostream<B>, topic: &Topic) {
    let mut keys_remaining = topic.descriptor.nkeys();
    if keys_remaining == 0 {
        return;
    }
    extract_key_from_data1(is, os, &topic.descriptor.ops, 0, &mut keys_remaining);
}

/// Produces the key CDR from a body that already contains only the key
/// fields (in key order).
pub fn extract_key_from_key<B: ByteOrder>(is: &mut Istream, os: &mut Ostream<B>, topic: &Topic) {
    for key in &topic.descriptor.keys {
        extract_key_prim_op(is, os, &topic.descriptor.ops, key.index as usize);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyhash from wire data
// ─────────────────────────────────────────────────────────────────────────────

/// Derives the 16-byte keyhash from a normalized CDR body — the entry point
/// used when a sample arrives from the network (possibly key-only) rather
/// than from local user memory.
pub fn keyhash_from_wire(is: &mut Istream, topic: &Topic, just_key: bool) -> KeyHash {
    let desc = &topic.descriptor;
    if desc.keys.is_empty() {
        return KeyHash {
            set: true,
            iskey: true,
            keysize: 0,
            hash: [0; 16],
        };
    }
    let mut os = OstreamBe::new();
    if just_key {
        extract_key_from_key(is, &mut os, topic);
    } else {
        extract_key_from_data(is, &mut os, topic);
    }
    if desc.flags.contains(DescriptorFlags::FIXED_KEY) {
        let mut h = [0u8; 16];
        let n = os.pos().min(16);
        h[..n].copy_from_slice(&os.as_slice()[..n]);
        KeyHash {
            set: true,
            iskey: true,
            keysize: n as u8,
            hash: h,
        }
    } else {
        KeyHash {
            set: true,
            iskey: false,
            keysize: 16,
            hash: hash::md5(os.as_slice()),
        }
    }
}
